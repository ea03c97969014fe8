// logtrail - segment/pool.rs
//
// Bucket time -> open Segment map for one (base_path, name) pair, grounded
// on original_source/core/dbpool.go's DBpool (Put/Close/Init/autoClose),
// generalised: last_written_bucket tracking, TimePast-on-stale-write,
// seal-then-open on bucket advance, and close_old's grace-period sweep
// replace the original's per-bucket time.AfterFunc goroutine (autoClose)
// with an explicit call driven by the Pipeline's own tick, since this crate
// has no implicit background-timer infrastructure to spawn one-off delayed
// closures from outside the owning thread.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Local};

use crate::pathfmt;
use crate::position::Position;
use crate::util::constants::{
    SEGMENT_ACTIVE_EXT, SEGMENT_BROKEN_EXT, SEGMENT_CLOSE_DELAY_SECS, SEGMENT_DATE_FORMAT, SEGMENT_SEALED_EXT,
    SEGMENT_TIME_FORMAT,
};
use crate::util::error::CoreError;

use super::{Row, Segment, SegmentFormat};

/// Owns every open `Segment` for one (base_path, name) pair and the
/// configured bucket period. Exclusively owned by a `Pipeline`; no external
/// code touches it concurrently.
pub struct SegmentPool {
    base_path: PathBuf,
    name: String,
    period: Duration,
    format: SegmentFormat,
    open: HashMap<DateTime<Local>, Segment>,
    last_written_bucket: Option<DateTime<Local>>,
}

impl SegmentPool {
    pub fn new(base_path: impl Into<PathBuf>, name: impl Into<String>, period: Duration, format: SegmentFormat) -> Self {
        Self {
            base_path: base_path.into(),
            name: name.into(),
            period,
            format,
            open: HashMap::new(),
            last_written_bucket: None,
        }
    }

    pub fn open_count(&self) -> usize {
        self.open.len()
    }

    pub fn last_written_bucket(&self) -> Option<DateTime<Local>> {
        self.last_written_bucket
    }

    /// Scan prior segments on disk and recover the resumption Position.
    /// `*/*.rec` takes priority over `*.fixed`: if any active segments
    /// exist, every one of them is opened (ascending) and left open so
    /// `put`/`close_old` can pick up where the process left off. A
    /// corrupted `.rec` is quarantined in place and skipped rather than
    /// aborting the whole scan, so earlier-bucket segments still
    /// contribute their Position.
    pub fn init(&mut self) -> Result<Option<Position>, CoreError> {
        let rec_paths = self.glob_sorted(SEGMENT_ACTIVE_EXT)?;
        if !rec_paths.is_empty() {
            let mut last_position = None;
            for path in rec_paths {
                let Some(bucket) = parse_bucket(&path) else {
                    continue;
                };
                match Segment::open_existing(&path, self.format, bucket) {
                    Ok((segment, position)) => {
                        self.open.insert(bucket, segment);
                        self.last_written_bucket = Some(bucket);
                        last_position = Some(position);
                    }
                    Err(CoreError::InvalidSegment { file, record_index, cause }) => {
                        tracing::error!(
                            file = %file.display(),
                            record_index,
                            cause = %cause,
                            "quarantining corrupt active segment found on init"
                        );
                        let broken = file.with_extension(SEGMENT_BROKEN_EXT);
                        if let Err(e) = std::fs::rename(&file, &broken) {
                            tracing::error!(file = %file.display(), error = %e, "failed to quarantine corrupt segment");
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            return Ok(last_position);
        }

        let fixed_paths = self.glob_sorted(SEGMENT_SEALED_EXT)?;
        if let Some(path) = fixed_paths.into_iter().last() {
            let Some(bucket) = parse_bucket(&path) else {
                return Ok(None);
            };
            let (segment, position) = Segment::open_existing(&path, self.format, bucket)?;
            segment.close()?;
            self.last_written_bucket = Some(bucket);
            return Ok(Some(position));
        }

        Ok(None)
    }

    fn glob_sorted(&self, ext: &str) -> Result<Vec<PathBuf>, CoreError> {
        let pattern = format!("{}/{}/*/*.{ext}", self.base_path.display(), self.name);
        let mut paths: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| CoreError::Io {
                path: self.base_path.clone(),
                operation: "glob segment directory",
                source: std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
            })?
            .filter_map(Result::ok)
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Ensure a segment exists for `bucket`, seeded with `header` if newly
    /// created. Idempotent if already open. Does not seal any other open
    /// bucket — that is `put`'s and `close_old`'s job — so the Pipeline can
    /// pre-create the next bucket's segment ahead of a period boundary
    /// while the previous one is still being written.
    pub fn create_db(&mut self, bucket: DateTime<Local>, header: Position) -> Result<(), CoreError> {
        if let Some(last) = self.last_written_bucket {
            if bucket < last {
                return Err(CoreError::TimePast { bucket, last_written: last });
            }
        }
        if self.open.contains_key(&bucket) {
            return Ok(());
        }
        let segment = Segment::create(&self.base_path, &self.name, bucket, self.format, header)?;
        self.open.insert(bucket, segment);
        self.last_written_bucket = Some(bucket);
        Ok(())
    }

    /// Assign `row` to its bucket (`truncate(row.time, period)`), sealing
    /// the previously open bucket first if the bucket advanced.
    pub fn put(&mut self, row: Row) -> Result<(), CoreError> {
        let bucket = pathfmt::truncate(row.time.with_timezone(&Local), self.period);

        if let Some(last) = self.last_written_bucket {
            if bucket < last {
                return Err(CoreError::TimePast { bucket, last_written: last });
            }
            if bucket > last {
                self.seal_bucket(last)?;
            }
        }

        if !self.open.contains_key(&bucket) {
            let segment = Segment::create(&self.base_path, &self.name, bucket, self.format, row.position.clone())?;
            self.open.insert(bucket, segment);
        }

        let segment = self.open.get_mut(&bucket).expect("just inserted or already present");
        segment.append(&row)?;
        self.last_written_bucket = Some(bucket);
        Ok(())
    }

    fn seal_bucket(&mut self, bucket: DateTime<Local>) -> Result<(), CoreError> {
        if let Some(segment) = self.open.remove(&bucket) {
            segment.seal()?;
        }
        Ok(())
    }

    /// Seal every open segment whose grace period has elapsed
    /// (`bucket + period + delay <= now`). Returns the number still open.
    pub fn close_old(&mut self, now: DateTime<Local>) -> Result<usize, CoreError> {
        let delay = chrono::Duration::seconds(SEGMENT_CLOSE_DELAY_SECS);
        let period = chrono::Duration::from_std(self.period).unwrap_or_default();

        let stale: Vec<DateTime<Local>> = self
            .open
            .keys()
            .copied()
            .filter(|bucket| *bucket + period + delay <= now)
            .collect();

        for bucket in stale {
            self.seal_bucket(bucket)?;
        }
        Ok(self.open.len())
    }

    /// Seal every open segment regardless of grace period. Used on orderly
    /// shutdown where the caller wants sealed files, not `.rec` left for
    /// resumption (see `close_all` for the resumable variant).
    pub fn seal_all(&mut self) -> Result<(), CoreError> {
        let buckets: Vec<DateTime<Local>> = self.open.keys().copied().collect();
        for bucket in buckets {
            self.seal_bucket(bucket)?;
        }
        Ok(())
    }

    /// Close every open segment without renaming, so its `.rec` file
    /// remains for the next start's `init()` to discover and resume. Used
    /// on cooperative cancellation, where leaving a resumable file behind
    /// matters more than a clean seal.
    pub fn close_all(&mut self) -> Result<(), CoreError> {
        for (_, segment) in self.open.drain() {
            segment.close()?;
        }
        Ok(())
    }
}

fn parse_bucket(path: &Path) -> Option<DateTime<Local>> {
    let stem = path.file_stem()?.to_str()?;
    let date_dir = path.parent()?.file_name()?.to_str()?;
    let date = chrono::NaiveDate::parse_from_str(date_dir, SEGMENT_DATE_FORMAT).ok()?;
    let time = chrono::NaiveTime::parse_from_str(stem, SEGMENT_TIME_FORMAT).ok()?;
    date.and_time(time).and_local_timezone(Local).single()
}
