// logtrail - watch/mod.rs
//
// Abstract file-change source consumed by the tail engine: exists-yet,
// modified, rotated/gone. Two implementations live in the sibling modules;
// this file holds the shared trait, event type, and file-identity shim.

pub mod event_driven;
pub mod polling;

use std::path::Path;
use std::sync::mpsc;

use crate::cancel::CancelToken;
use crate::util::error::CoreError;

/// A change observed on a watched path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeEvent {
    /// Content was appended (or otherwise modified) in place.
    Modified,
    /// The file has been replaced or has vanished in a way that invalidates
    /// the current handle. Terminal: no further events follow on this
    /// stream.
    Rotated,
}

/// Blocks until a path exists, and streams change events against a path once
/// opened. One `FileWatcher` instance is scoped to a single underlying file
/// handle; the tail engine constructs a fresh one after every reopen.
pub trait FileWatcher: Send {
    /// Block until the target path is observable on disk, or cancellation
    /// fires.
    fn await_exists(&self, cancel: &CancelToken) -> Result<(), CoreError>;

    /// Start watching for changes against the file identified by `initial`
    /// at watcher-creation time. The returned receiver yields events until
    /// `Rotated` is sent (terminal) or the watcher's background thread is
    /// cancelled.
    fn change_stream(&self, initial: FileId, cancel: CancelToken) -> mpsc::Receiver<ChangeEvent>;
}

/// Cheap identity fingerprint for "is this still the same file" checks,
/// independent of path: `(dev, ino)` on Unix, `(volume_serial, file_index)`
/// on Windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId {
    #[cfg(unix)]
    dev: u64,
    #[cfg(unix)]
    ino: u64,
    #[cfg(windows)]
    volume_serial: u64,
    #[cfg(windows)]
    file_index: u64,
}

impl FileId {
    #[cfg(unix)]
    pub fn of(path: &Path) -> Result<Self, CoreError> {
        use std::os::unix::fs::MetadataExt;
        let meta = std::fs::metadata(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            operation: "stat for file identity",
            source,
        })?;
        Ok(Self {
            dev: meta.dev(),
            ino: meta.ino(),
        })
    }

    #[cfg(windows)]
    pub fn of(path: &Path) -> Result<Self, CoreError> {
        use std::os::windows::fs::MetadataExt;
        let meta = std::fs::metadata(path).map_err(|source| CoreError::Io {
            path: path.to_path_buf(),
            operation: "stat for file identity",
            source,
        })?;
        Ok(Self {
            volume_serial: u64::from(meta.volume_serial_number().unwrap_or(0)),
            file_index: meta.file_index().unwrap_or(0),
        })
    }
}
