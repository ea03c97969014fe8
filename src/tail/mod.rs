// logtrail - tail/mod.rs
//
// Owns the current read handle for one tailed source and emits a single,
// strictly ordered stream of Line events. Generalises app/tail.rs's
// TailManager (background thread + mpsc + Arc<AtomicBool> cancellation) from
// "poll N files, send batched progress" to "own one file, emit NewFile/
// NewLine/Tick in order, across rotation."

pub mod engine;

use std::io::SeekFrom;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::limiter::WorkLimiter;
use crate::util::constants::{DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_REOPEN_DELAY_MS};

pub use engine::TailEngine;

/// One event in the ordered stream a `TailEngine` emits for its source.
#[derive(Debug, Clone)]
pub enum Line {
    /// A file has just been opened; reads will begin at `offset`.
    NewFile {
        path: PathBuf,
        open_time: DateTime<Utc>,
        offset: u64,
    },
    /// One complete line (terminator preserved, as read from the file).
    NewLine {
        text: String,
        time: DateTime<Utc>,
        path: PathBuf,
        open_time: DateTime<Utc>,
        offset_after: u64,
    },
    /// Periodic heartbeat allowing downstream flushes even with no new
    /// lines. Also raised (with an empty path) while waiting for a
    /// cronolog-templated path to produce its first match, so the Pipeline
    /// can still detect inactivity before any file has been opened.
    Tick {
        time: DateTime<Utc>,
        path: PathBuf,
        open_time: DateTime<Utc>,
        offset: u64,
    },
}

/// Either a literal path, or a cronolog template resolved slice-by-slice as
/// time advances. Mirrors `tailex.TailFile`'s `PathFmt`-vs-`Path` split.
#[derive(Debug, Clone)]
pub enum PathSource {
    Literal(PathBuf),
    Template {
        template: String,
        rotate_period: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Follow across rotation: reopen the file (or the next template slice)
    /// after it is rotated out from under the engine. When false, the
    /// engine terminates cleanly on rotation.
    pub reopen: bool,
    /// Delay before attempting to reopen after a rotation is detected.
    pub reopen_delay: Duration,
    /// If true, skip `await_exists` on the very first open and fail
    /// immediately if the path is missing. If false, block until the path
    /// appears.
    pub must_exist: bool,
    /// Use the stat-polling watcher instead of the event-driven one.
    pub poll_mode: bool,
    /// Initial seek position on the very first open. Subsequent reopens
    /// always start at `SeekFrom::Start(0)`: a rotated-in file is read from
    /// its own beginning, never resuming the old file's offset.
    pub location: SeekFrom,
    /// How often `Tick` is emitted with no new lines.
    pub heartbeat: Duration,
    /// Optional process-wide bound on concurrent blocking I/O syscalls.
    pub limiter: Option<WorkLimiter>,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            reopen: true,
            reopen_delay: Duration::from_millis(DEFAULT_REOPEN_DELAY_MS),
            must_exist: false,
            poll_mode: false,
            location: SeekFrom::Start(0),
            heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
            limiter: None,
        }
    }
}
