// logtrail - pipeline/mod.rs
//
// Binds the Tail engine to the Segment pool: one thread per tailed source,
// grounded on original_source/in/ftail/ftail.go's Start (a `select` over
// ctx.Done()/t.Lines/t.FileInfo) translated to the same
// thread+mpsc+CancelToken shape tail::engine already establishes. Owns the
// batching buffer, the running head-hash, and the startup resumption
// sequence; the Segment pool is never touched by anything else.

use std::path::{Path, PathBuf};
use std::sync::mpsc::RecvTimeoutError;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::cancel::CancelToken;
use crate::config::SourceConfig;
use crate::limiter::WorkLimiter;
use crate::pathfmt;
use crate::position::{HeadHasher, Position};
use crate::segment::pool::SegmentPool;
use crate::segment::{Payload, Row, SegmentFormat};
use crate::tail::{Line, PathSource, TailConfig, TailEngine};
use crate::util::constants::{CANCEL_CHECK_INTERVAL_MS, DEFAULT_HEARTBEAT_INTERVAL_MS};
use crate::util::error::CoreError;

/// Everything a `Pipeline` needs beyond the externally-supplied
/// `SourceConfig`: the on-disk segment encoding and an optional shared I/O
/// throttle. Kept separate from `SourceConfig` since that struct's shape is
/// the external loader's pinned boundary and neither belongs there.
#[derive(Clone)]
pub struct PipelineConfig {
    pub source: SourceConfig,
    pub format: SegmentFormat,
    pub limiter: Option<WorkLimiter>,
}

/// Owns the background thread running one tailed source end to end. Drop
/// cancels it; `stop` is the orderly way to wait for it to flush and exit.
pub struct Pipeline {
    cancel: CancelToken,
    handle: Option<JoinHandle<Result<(), CoreError>>>,
}

impl Pipeline {
    pub fn spawn(config: PipelineConfig) -> Self {
        let cancel = CancelToken::new();
        let cancel_thread = cancel.clone();
        let handle = thread::spawn(move || run(config, cancel_thread));
        Self {
            cancel,
            handle: Some(handle),
        }
    }

    /// Request cooperative shutdown and block for the final result. Bounded
    /// by the longest outstanding syscall plus the watcher-debounce.
    pub fn stop(mut self) -> Result<(), CoreError> {
        self.cancel.cancel();
        match self.handle.take() {
            Some(handle) => handle.join().unwrap_or(Err(CoreError::Cancelled)),
            None => Ok(()),
        }
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn is_template(source: &SourceConfig) -> bool {
    source.path_or_template.contains('%')
}

fn current_concrete_path(source: &SourceConfig) -> PathBuf {
    if is_template(source) {
        let slice = pathfmt::truncate(Local::now(), source.rotate_period);
        PathBuf::from(pathfmt::format_template(&source.path_or_template, slice))
    } else {
        PathBuf::from(&source.path_or_template)
    }
}

fn same_template_slice(source: &SourceConfig, created_at: DateTime<Utc>) -> bool {
    if !is_template(source) {
        return true;
    }
    let now_slice = pathfmt::truncate(Local::now(), source.rotate_period);
    let created_slice = pathfmt::truncate(created_at.with_timezone(&Local), source.rotate_period);
    created_slice == now_slice
}

/// Startup with no prior Position recovered: synthesise one from the
/// current on-disk file. A file at least as large as
/// `max_head_hash_size` is assumed to predate this process and its bulk is
/// skipped rather than replayed from byte zero.
fn synthesize_initial_position(source: &SourceConfig) -> Position {
    let path = current_concrete_path(source);
    match std::fs::metadata(&path) {
        Ok(meta) => {
            let created_at = meta.modified().map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now());
            let size = meta.len();
            let offset = if size < source.max_head_hash_size { 0 } else { size };
            Position {
                source_name: path.to_string_lossy().into_owned(),
                source_created_at: created_at,
                offset,
                head_hash: String::new(),
                head_hash_length: 0,
            }
        }
        Err(e) => {
            tracing::info!(path = %path.display(), error = %e, "no on-disk file yet; starting from an empty position");
            Position::empty(path.to_string_lossy().into_owned(), Utc::now())
        }
    }
}

/// Reconcile a recovered resumption Position against the file actually on
/// disk right now, returning the offset the Tail engine should seek to.
fn reconcile_resumption(source: &SourceConfig, position: &mut Position) -> Result<u64, CoreError> {
    let current_path = current_concrete_path(source);

    if source.max_head_hash_size > 0 {
        if position.head_hash_length > 0 && position.verify_head_hash(&current_path)? {
            return Ok(position.offset);
        }
        let hasher = HeadHasher::from_file(&current_path, source.max_head_hash_size)?;
        position.head_hash = hasher.hex();
        position.head_hash_length = hasher.len();
        position.offset = 0;
        return Ok(0);
    }

    if same_template_slice(source, position.source_created_at) {
        Ok(position.offset)
    } else {
        position.offset = 0;
        Ok(0)
    }
}

fn make_path_source(source: &SourceConfig) -> PathSource {
    if is_template(source) {
        PathSource::Template {
            template: source.path_or_template.clone(),
            rotate_period: source.rotate_period,
        }
    } else {
        PathSource::Literal(PathBuf::from(&source.path_or_template))
    }
}

fn compress_for_flush(raw: &[u8]) -> Payload {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    use std::io::Write;
    let compressed = encoder
        .write_all(raw)
        .and_then(|()| encoder.finish())
        .ok();

    match compressed {
        Some(bin) if bin.len() < raw.len() => Payload::Bin(bin),
        _ => Payload::Text(String::from_utf8_lossy(raw).into_owned()),
    }
}

struct State {
    position: Position,
    head_hasher: HeadHasher,
    batch: Vec<u8>,
    last_time: DateTime<Utc>,
    max_head_hash_size: u64,
}

impl State {
    fn on_new_file(&mut self, path: &Path, open_time: DateTime<Utc>, offset: u64) -> Result<(), CoreError> {
        self.position.source_name = path.to_string_lossy().into_owned();
        self.position.source_created_at = open_time;
        self.position.offset = offset;

        let hash_len = self.max_head_hash_size.min(offset);
        self.head_hasher = HeadHasher::from_file(path, hash_len)?;
        self.position.head_hash = self.head_hasher.hex();
        self.position.head_hash_length = self.head_hasher.len();
        Ok(())
    }

    fn on_new_line(&mut self, text: &str, time: DateTime<Utc>, path: &Path, offset_after: u64) {
        self.position.source_name = path.to_string_lossy().into_owned();
        self.position.offset = offset_after;

        if self.max_head_hash_size > 0 && !self.head_hasher.is_full() {
            self.head_hasher.update(text.as_bytes());
            self.position.head_hash = self.head_hasher.hex();
            self.position.head_hash_length = self.head_hasher.len();
        }

        self.batch.extend_from_slice(text.as_bytes());
        self.last_time = time;
    }

    fn flush(&mut self, pool: &mut SegmentPool) -> Result<(), CoreError> {
        if self.batch.is_empty() {
            return Ok(());
        }
        let payload = compress_for_flush(&self.batch);
        let row = Row {
            time: self.last_time,
            position: self.position.clone(),
            payload,
        };
        match pool.put(row) {
            Ok(()) => {}
            Err(CoreError::TimePast { bucket, last_written }) => {
                tracing::warn!(%bucket, %last_written, "dropping batch: event time before the last sealed bucket");
            }
            Err(e) => return Err(e),
        }
        self.batch.clear();
        Ok(())
    }

    fn on_tick(&mut self, pool: &mut SegmentPool, tick_time: DateTime<Utc>, period: Duration) -> Result<(), CoreError> {
        self.flush(pool)?;

        let tick_local = tick_time.with_timezone(&Local);
        let bucket = pathfmt::truncate(tick_local, period);
        let should_create = match pool.last_written_bucket() {
            Some(last) => bucket > last,
            None => true,
        };
        if should_create {
            match pool.create_db(bucket, self.position.clone()) {
                Ok(()) | Err(CoreError::TimePast { .. }) => {}
                Err(e) => return Err(e),
            }
        }
        pool.close_old(tick_local)?;
        Ok(())
    }
}

fn run(config: PipelineConfig, cancel: CancelToken) -> Result<(), CoreError> {
    let PipelineConfig { source, format, limiter } = config;
    let span = tracing::info_span!("source", name = %source.name);
    let _enter = span.enter();

    let mut pool = SegmentPool::new(&source.base_path, &source.name, source.period, format);
    let resumed = pool.init()?;

    let (position, seek_offset) = match resumed {
        Some(mut position) => {
            let offset = reconcile_resumption(&source, &mut position)?;
            (position, offset)
        }
        None => {
            let position = synthesize_initial_position(&source);
            let offset = position.offset;
            (position, offset)
        }
    };

    let current_path = current_concrete_path(&source);
    let head_hasher = if source.max_head_hash_size > 0 {
        HeadHasher::from_file(&current_path, source.max_head_hash_size.min(seek_offset))
            .unwrap_or_else(|_| HeadHasher::new(source.max_head_hash_size))
    } else {
        HeadHasher::new(0)
    };

    let mut state = State {
        last_time: position.source_created_at,
        max_head_hash_size: source.max_head_hash_size,
        position,
        head_hasher,
        batch: Vec::new(),
    };

    let tail_config = TailConfig {
        reopen: true,
        reopen_delay: source.reopen_delay,
        must_exist: false,
        poll_mode: source.poll_mode,
        location: std::io::SeekFrom::Start(seek_offset),
        heartbeat: Duration::from_millis(DEFAULT_HEARTBEAT_INTERVAL_MS),
        limiter,
    };
    let (engine, rx) = TailEngine::spawn(make_path_source(&source), tail_config);

    let result = (|| -> Result<(), CoreError> {
        loop {
            if cancel.is_cancelled() {
                return Ok(());
            }
            match rx.recv_timeout(Duration::from_millis(CANCEL_CHECK_INTERVAL_MS)) {
                Ok(Line::NewLine {
                    text,
                    time,
                    path,
                    offset_after,
                    ..
                }) => state.on_new_line(&text, time, &path, offset_after),
                Ok(Line::Tick { time, .. }) => state.on_tick(&mut pool, time, source.period)?,
                Ok(Line::NewFile { path, open_time, offset }) => {
                    if !path.as_os_str().is_empty() {
                        state.on_new_file(&path, open_time, offset)?;
                    }
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
        }
    })();

    let flush_result = state.flush(&mut pool);
    engine.stop();
    let close_result = pool.close_all();

    result.and(flush_result).and(close_result)
}
