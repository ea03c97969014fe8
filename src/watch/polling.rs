// logtrail - watch/polling.rs
//
// Stat-polling watcher. Same background-thread-plus-cancel shape as the
// event-driven variant and as the tail/pipeline threads: a spawned
// std::thread sleeping between polls via the shared CancelToken so
// cancellation is observed promptly rather than at a fixed tick.

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::util::constants::{MAX_PERMISSION_RETRIES, POLL_WATCH_INTERVAL_MS, WATCH_CHANNEL_CAPACITY};
use crate::util::error::CoreError;

use super::{ChangeEvent, FileId, FileWatcher};

pub struct PollingWatcher {
    path: PathBuf,
}

impl PollingWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl FileWatcher for PollingWatcher {
    fn await_exists(&self, cancel: &CancelToken) -> Result<(), CoreError> {
        let interval = Duration::from_millis(POLL_WATCH_INTERVAL_MS);
        loop {
            if self.path.exists() {
                return Ok(());
            }
            if cancel.sleep(interval) {
                return Err(CoreError::Cancelled);
            }
        }
    }

    fn change_stream(&self, initial: FileId, cancel: CancelToken) -> mpsc::Receiver<ChangeEvent> {
        let (tx, rx) = mpsc::sync_channel(WATCH_CHANNEL_CAPACITY);
        let path = self.path.clone();
        std::thread::spawn(move || run_polling_loop(path, initial, tx, cancel));
        rx
    }
}

fn run_polling_loop(
    path: PathBuf,
    initial: FileId,
    tx: mpsc::SyncSender<ChangeEvent>,
    cancel: CancelToken,
) {
    let interval = Duration::from_millis(POLL_WATCH_INTERVAL_MS);
    let mut last_len = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let mut permission_failures: u32 = 0;

    loop {
        if cancel.sleep(interval) {
            return;
        }

        let meta = match std::fs::metadata(&path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let _ = tx.send(ChangeEvent::Rotated);
                return;
            }
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                permission_failures += 1;
                if permission_failures > MAX_PERMISSION_RETRIES {
                    tracing::error!(path = %path.display(), "giving up after repeated permission errors");
                    return;
                }
                continue;
            }
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "stat failed");
                return;
            }
        };
        permission_failures = 0;

        match FileId::of(&path) {
            Ok(id) if id != initial => {
                let _ = tx.send(ChangeEvent::Rotated);
                return;
            }
            Err(_) => {
                let _ = tx.send(ChangeEvent::Rotated);
                return;
            }
            Ok(_) => {}
        }

        let len = meta.len();
        if len < last_len {
            let _ = tx.send(ChangeEvent::Rotated);
            return;
        }
        if len > last_len {
            if tx.send(ChangeEvent::Modified).is_err() {
                return;
            }
        }
        last_len = len;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn await_exists_returns_once_file_created() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        let watcher = PollingWatcher::new(&path);
        let cancel = CancelToken::new();

        let path2 = path.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            std::fs::write(&path2, b"hi").unwrap();
        });

        watcher.await_exists(&cancel).unwrap();
        handle.join().unwrap();
    }

    #[test]
    fn await_exists_is_cancellable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("never.log");
        let watcher = PollingWatcher::new(&path);
        let cancel = CancelToken::new();
        let cancel2 = cancel.clone();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            cancel2.cancel();
        });

        let result = watcher.await_exists(&cancel);
        assert!(matches!(result, Err(crate::util::error::CoreError::Cancelled)));
    }

    #[test]
    fn change_stream_emits_rotated_on_deletion() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"hello").unwrap();
        let initial = FileId::of(&path).unwrap();

        let watcher = PollingWatcher::new(&path);
        let cancel = CancelToken::new();
        let rx = watcher.change_stream(initial, cancel);

        std::fs::remove_file(&path).unwrap();
        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ChangeEvent::Rotated);
    }

    #[test]
    fn change_stream_emits_modified_on_growth() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"hello").unwrap();
        let initial = FileId::of(&path).unwrap();

        let watcher = PollingWatcher::new(&path);
        let cancel = CancelToken::new();
        let rx = watcher.change_stream(initial, cancel);

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b" world").unwrap();

        let event = rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert_eq!(event, ChangeEvent::Modified);
    }
}
