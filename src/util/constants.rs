// logtrail - util/constants.rs
//
// Single source of truth for all named constants, limits, and defaults.

// =============================================================================
// Application metadata
// =============================================================================

/// Application display name.
pub const APP_NAME: &str = "logtrail";

/// Current application version (updated by release script).
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

// =============================================================================
// Segment on-disk layout
// =============================================================================

/// Suffix of an active segment file, open for append.
pub const SEGMENT_ACTIVE_EXT: &str = "rec";

/// Suffix of a sealed segment file; no further writes.
pub const SEGMENT_SEALED_EXT: &str = "fixed";

/// Suffix of a quarantined (corrupt) segment file.
pub const SEGMENT_BROKEN_EXT: &str = "broken";

/// strftime-style format for the bucket date directory component (`YYYYMMDD`).
pub const SEGMENT_DATE_FORMAT: &str = "%Y%m%d";

/// strftime-style format for the bucket time file-stem component (`HHMMSS`).
pub const SEGMENT_TIME_FORMAT: &str = "%H%M%S";

/// Grace period (seconds) after a bucket's period ends before `close_old`
/// seals it. Gives slow writers (clock skew, scheduling jitter) a window to
/// still land a row in the correct bucket before the segment is sealed.
pub const SEGMENT_CLOSE_DELAY_SECS: i64 = 10;

// =============================================================================
// Head-hash / resumption
// =============================================================================

/// Default number of bytes hashed from the start of a tailed file to detect
/// identity change (truncate-and-rewrite, or a different file at the same
/// path) across a restart.
pub const DEFAULT_MAX_HEAD_HASH_SIZE: u64 = 16 * 1024;

// =============================================================================
// Tail engine
// =============================================================================

/// Default heartbeat interval: how often `Tick` is emitted even with no new
/// lines, so downstream batching can flush promptly.
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 1_000;

/// Default delay after a rotation is detected before the engine attempts to
/// reopen the file (lets a slow creator finish writing the new file).
pub const DEFAULT_REOPEN_DELAY_MS: u64 = 1_000;

/// Maximum size of a single buffered line before it is force-flushed as-is.
/// Prevents unbounded memory growth from a pathological file with no
/// newlines.
pub const MAX_LINE_SIZE_BYTES: usize = 16 * 1024 * 1024; // 16 MiB

/// I/O buffer size used for the tail engine's line reader.
pub const TAIL_READ_BUFFER_SIZE: usize = 64 * 1024;

// =============================================================================
// Watcher
// =============================================================================

/// Polling watcher: interval between `stat()` calls on the tailed path.
pub const POLL_WATCH_INTERVAL_MS: u64 = 250;

/// Event-driven watcher: debounce window after a parent-directory create
/// event before concluding the rotation happened via create-only (no
/// close-after-write observed).
pub const DEFAULT_DEBOUNCE_MS: u64 = 5_000;

/// Bounded polling watcher: number of consecutive permission-error retries
/// tolerated before the watcher escalates to a fatal error.
pub const MAX_PERMISSION_RETRIES: u32 = 5;

/// Granularity at which a background watch/tail/pipeline thread re-checks
/// its cancellation flag while otherwise sleeping or waiting.
pub const CANCEL_CHECK_INTERVAL_MS: u64 = 100;

// =============================================================================
// Path resolver (cronolog templates)
// =============================================================================

/// Poll interval while waiting for a templated path's first concrete match.
pub const TEMPLATE_GLOB_POLL_INTERVAL_MS: u64 = 1_000;

// =============================================================================
// Channels
// =============================================================================

/// Bound on the watcher -> tail engine event channel.
pub const WATCH_CHANNEL_CAPACITY: usize = 64;

/// Bound on the tail engine -> pipeline line channel.
pub const TAIL_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Logging
// =============================================================================

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";
