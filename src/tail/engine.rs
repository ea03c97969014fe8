// logtrail - tail/engine.rs
//
// The read loop: open, seek, emit NewFile; read-to-newline with manual
// offset bookkeeping (so a partial line at EOF is never double-counted, an
// edge case the original's binary.Read fallthrough left ambiguous);
// wait-for-changes multiplexing the heartbeat, the watcher's change stream,
// and cancellation; rotation handling.

use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;

use crate::cancel::CancelToken;
use crate::pathfmt;
use crate::util::constants::{CANCEL_CHECK_INTERVAL_MS, MAX_LINE_SIZE_BYTES, TAIL_CHANNEL_CAPACITY, TAIL_READ_BUFFER_SIZE};
use crate::util::error::CoreError;
use crate::watch::{self, ChangeEvent, FileId, FileWatcher};

use super::{Line, PathSource, TailConfig};

/// Owns the background thread reading one tailed source. Dropping without
/// calling `stop` leaves the thread running until it next checks
/// cancellation; `stop` is the orderly way to tear it down.
pub struct TailEngine {
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl TailEngine {
    /// Spawn the background thread and return a handle plus the Line
    /// receiver. Events from this receiver arrive strictly in emission
    /// order.
    pub fn spawn(source: PathSource, config: TailConfig) -> (Self, mpsc::Receiver<Line>) {
        let (tx, rx) = mpsc::sync_channel(TAIL_CHANNEL_CAPACITY);
        let cancel = CancelToken::new();
        let cancel_thread = cancel.clone();
        let handle = thread::spawn(move || run(source, config, tx, cancel_thread));
        (
            Self {
                cancel,
                handle: Some(handle),
            },
            rx,
        )
    }

    /// Request cooperative shutdown and block until the background thread
    /// exits. Bounded by the longest outstanding syscall plus the
    /// watcher-debounce.
    pub fn stop(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for TailEngine {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn make_watcher(path: &Path, poll_mode: bool) -> Box<dyn FileWatcher> {
    if poll_mode {
        Box::new(watch::polling::PollingWatcher::new(path))
    } else {
        Box::new(watch::event_driven::NotifyWatcher::new(path))
    }
}

/// Emit every complete, newline-terminated line currently buffered in
/// `pending`. Returns `false` if the send failed (receiver gone), in which
/// case the caller should stop reading.
fn drain_full_lines(pending: &mut Vec<u8>, read_pos: u64, path: &Path, open_time: chrono::DateTime<Utc>, tx: &SyncSender<Line>) -> bool {
    while let Some(idx) = pending.iter().position(|&b| b == b'\n') {
        let line_bytes: Vec<u8> = pending.drain(..=idx).collect();
        let offset_after = read_pos - pending.len() as u64;
        let text = String::from_utf8_lossy(&line_bytes).into_owned();
        if tx
            .send(Line::NewLine {
                text,
                time: Utc::now(),
                path: path.to_path_buf(),
                open_time,
                offset_after,
            })
            .is_err()
        {
            return false;
        }
    }
    true
}

enum WaitOutcome {
    Cancelled,
    Tick,
    Modified,
    Rotated,
}

fn wait_for_change(rx: &mpsc::Receiver<ChangeEvent>, heartbeat: Duration, cancel: &CancelToken) -> WaitOutcome {
    let deadline = Instant::now() + heartbeat;
    loop {
        if cancel.is_cancelled() {
            return WaitOutcome::Cancelled;
        }
        let remaining = deadline.saturating_duration_since(Instant::now());
        let slice = remaining.min(Duration::from_millis(CANCEL_CHECK_INTERVAL_MS));
        match rx.recv_timeout(slice) {
            Ok(ChangeEvent::Modified) => return WaitOutcome::Modified,
            Ok(ChangeEvent::Rotated) => return WaitOutcome::Rotated,
            Err(RecvTimeoutError::Disconnected) => return WaitOutcome::Rotated,
            Err(RecvTimeoutError::Timeout) => {
                if Instant::now() >= deadline {
                    return WaitOutcome::Tick;
                }
            }
        }
    }
}

/// Resolve the concrete path for this iteration. For a literal source this
/// is a no-op; for a template it blocks (polling once per second) until a
/// concrete file matches, surfacing a `Tick` on every empty poll so the
/// Pipeline can still detect inactivity before any file exists.
fn resolve_path(source: &PathSource, cancel: &CancelToken, tx: &SyncSender<Line>) -> Result<PathBuf, CoreError> {
    match source {
        PathSource::Literal(path) => Ok(path.clone()),
        PathSource::Template { template, rotate_period } => pathfmt::resolve(template, *rotate_period, cancel, |_tick| {
            let now = Utc::now();
            let _ = tx.send(Line::Tick {
                time: now,
                path: PathBuf::new(),
                open_time: now,
                offset: 0,
            });
        }),
    }
}

fn run(source: PathSource, config: TailConfig, tx: SyncSender<Line>, cancel: CancelToken) {
    let mut first_iteration = true;

    loop {
        let path = match resolve_path(&source, &cancel, &tx) {
            Ok(p) => p,
            Err(CoreError::Cancelled) => return,
            Err(e) => {
                tracing::error!(error = %e, "tail engine: failed to resolve path");
                return;
            }
        };

        let must_await = !(first_iteration && config.must_exist);
        if must_await {
            let watcher = make_watcher(&path, config.poll_mode);
            if let Err(e) = watcher.await_exists(&cancel) {
                if !matches!(e, CoreError::Cancelled) {
                    tracing::error!(path = %path.display(), error = %e, "tail engine: await_exists failed");
                }
                return;
            }
        }

        let _permit = config.limiter.as_ref().map(|l| l.acquire());
        let mut file = match std::fs::File::open(&path) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "tail engine: open failed");
                return;
            }
        };
        drop(_permit);

        let seek_to = if first_iteration {
            config.location
        } else {
            std::io::SeekFrom::Start(0)
        };
        let start_offset = match file.seek(seek_to) {
            Ok(o) => o,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "tail engine: seek failed");
                return;
            }
        };

        let open_time = Utc::now();
        if tx
            .send(Line::NewFile {
                path: path.clone(),
                open_time,
                offset: start_offset,
            })
            .is_err()
        {
            return;
        }

        let file_id = match FileId::of(&path) {
            Ok(id) => id,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "tail engine: stat for identity failed");
                return;
            }
        };
        let watcher = make_watcher(&path, config.poll_mode);
        let change_rx = watcher.change_stream(file_id, cancel.clone());

        let mut read_pos = start_offset;
        let mut pending: Vec<u8> = Vec::new();
        let mut buf = vec![0u8; TAIL_READ_BUFFER_SIZE];
        let mut rotated = false;

        'reading: loop {
            if !drain_full_lines(&mut pending, read_pos, &path, open_time, &tx) {
                return;
            }

            if pending.len() >= MAX_LINE_SIZE_BYTES {
                let offset_after = read_pos;
                let text = String::from_utf8_lossy(&pending).into_owned();
                pending.clear();
                tracing::warn!(
                    path = %path.display(),
                    size = text.len(),
                    "tail engine: force-flushing an unterminated line past the size limit"
                );
                if tx
                    .send(Line::NewLine {
                        text,
                        time: Utc::now(),
                        path: path.clone(),
                        open_time,
                        offset_after,
                    })
                    .is_err()
                {
                    return;
                }
            }

            if cancel.is_cancelled() {
                return;
            }

            let permit = config.limiter.as_ref().map(|l| l.acquire());
            let read_result = file.read(&mut buf);
            drop(permit);

            match read_result {
                Ok(0) => match wait_for_change(&change_rx, config.heartbeat, &cancel) {
                    WaitOutcome::Cancelled => return,
                    WaitOutcome::Tick => {
                        let offset = read_pos - pending.len() as u64;
                        if tx
                            .send(Line::Tick {
                                time: Utc::now(),
                                path: path.clone(),
                                open_time,
                                offset,
                            })
                            .is_err()
                        {
                            return;
                        }
                    }
                    WaitOutcome::Modified => continue 'reading,
                    WaitOutcome::Rotated => {
                        // Drain whatever the old handle still has buffered before
                        // acting on the rotation: a final "line\n" can land between
                        // the watcher's rotation signal and our last read of the
                        // soon-to-be-replaced file, and must not be lost.
                        loop {
                            let permit = config.limiter.as_ref().map(|l| l.acquire());
                            let drain_result = file.read(&mut buf);
                            drop(permit);
                            match drain_result {
                                Ok(0) => break,
                                Ok(n) => {
                                    pending.extend_from_slice(&buf[..n]);
                                    read_pos += n as u64;
                                }
                                Err(e) => {
                                    tracing::error!(path = %path.display(), error = %e, "tail engine: final drain read failed");
                                    break;
                                }
                            }
                        }
                        if !drain_full_lines(&mut pending, read_pos, &path, open_time, &tx) {
                            return;
                        }
                        rotated = true;
                        break 'reading;
                    }
                },
                Ok(n) => {
                    pending.extend_from_slice(&buf[..n]);
                    read_pos += n as u64;
                }
                Err(e) => {
                    tracing::error!(path = %path.display(), error = %e, "tail engine: read failed");
                    return;
                }
            }
        }

        debug_assert!(rotated);
        if !config.reopen {
            return;
        }

        if cancel.sleep(config.reopen_delay) {
            return;
        }
        first_iteration = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    fn recv_line(rx: &mpsc::Receiver<Line>) -> Line {
        rx.recv_timeout(Duration::from_secs(3)).expect("expected a Line event")
    }

    #[test]
    fn drain_full_lines_emits_every_complete_line_and_leaves_partial_tail() {
        let (tx, rx) = mpsc::sync_channel(16);
        let path = PathBuf::from("t.log");
        let open_time = Utc::now();
        let mut pending = b"one\ntwo\nthree".to_vec();

        assert!(drain_full_lines(&mut pending, 13, &path, open_time, &tx));
        drop(tx);

        let mut texts = Vec::new();
        while let Ok(line) = rx.recv_timeout(Duration::from_millis(50)) {
            match line {
                Line::NewLine { text, .. } => texts.push(text),
                other => panic!("unexpected event: {other:?}"),
            }
        }
        assert_eq!(texts, vec!["one\n", "two\n"]);
        assert_eq!(pending, b"three");
    }

    #[test]
    fn emits_new_file_then_existing_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"a\nb\n").unwrap();

        let (engine, rx) = TailEngine::spawn(
            PathSource::Literal(path.clone()),
            TailConfig {
                must_exist: true,
                ..TailConfig::default()
            },
        );

        match recv_line(&rx) {
            Line::NewFile { offset, .. } => assert_eq!(offset, 0),
            other => panic!("expected NewFile, got {other:?}"),
        }
        match recv_line(&rx) {
            Line::NewLine { text, offset_after, .. } => {
                assert_eq!(text, "a\n");
                assert_eq!(offset_after, 2);
            }
            other => panic!("expected NewLine, got {other:?}"),
        }
        match recv_line(&rx) {
            Line::NewLine { text, offset_after, .. } => {
                assert_eq!(text, "b\n");
                assert_eq!(offset_after, 4);
            }
            other => panic!("expected NewLine, got {other:?}"),
        }

        engine.stop();
    }

    #[test]
    fn emits_new_line_on_append_after_eof() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"").unwrap();

        let (engine, rx) = TailEngine::spawn(
            PathSource::Literal(path.clone()),
            TailConfig {
                must_exist: true,
                heartbeat: Duration::from_millis(100),
                ..TailConfig::default()
            },
        );

        match recv_line(&rx) {
            Line::NewFile { offset, .. } => assert_eq!(offset, 0),
            other => panic!("expected NewFile, got {other:?}"),
        }

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"hello\n").unwrap();

        loop {
            match recv_line(&rx) {
                Line::NewLine { text, .. } => {
                    assert_eq!(text, "hello\n");
                    break;
                }
                Line::Tick { .. } => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }

        engine.stop();
    }

    #[test]
    fn partial_line_at_eof_is_not_emitted_until_terminated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"partial").unwrap();

        let (engine, rx) = TailEngine::spawn(
            PathSource::Literal(path.clone()),
            TailConfig {
                must_exist: true,
                heartbeat: Duration::from_millis(100),
                ..TailConfig::default()
            },
        );

        match recv_line(&rx) {
            Line::NewFile { .. } => {}
            other => panic!("expected NewFile, got {other:?}"),
        }

        // Only a Tick should arrive while the line is incomplete.
        match recv_line(&rx) {
            Line::Tick { offset, .. } => assert_eq!(offset, 0),
            other => panic!("expected Tick before terminator arrives, got {other:?}"),
        }

        let mut f = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b" line\n").unwrap();

        loop {
            match recv_line(&rx) {
                Line::NewLine { text, .. } => {
                    assert_eq!(text, "partial line\n");
                    break;
                }
                Line::Tick { .. } => continue,
                other => panic!("unexpected event: {other:?}"),
            }
        }

        engine.stop();
    }

    #[test]
    fn emits_new_file_again_on_rotation_when_reopen_is_set() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"first\n").unwrap();

        let (engine, rx) = TailEngine::spawn(
            PathSource::Literal(path.clone()),
            TailConfig {
                must_exist: true,
                reopen: true,
                reopen_delay: Duration::from_millis(50),
                poll_mode: true,
                heartbeat: Duration::from_millis(100),
                ..TailConfig::default()
            },
        );

        match recv_line(&rx) {
            Line::NewFile { .. } => {}
            other => panic!("expected NewFile, got {other:?}"),
        }
        match recv_line(&rx) {
            Line::NewLine { text, .. } => assert_eq!(text, "first\n"),
            other => panic!("expected NewLine, got {other:?}"),
        }

        std::fs::remove_file(&path).unwrap();
        std::fs::write(&path, b"second\n").unwrap();

        loop {
            match recv_line(&rx) {
                Line::NewFile { offset, .. } => {
                    assert_eq!(offset, 0);
                    break;
                }
                Line::Tick { .. } => continue,
                other => panic!("unexpected event before reopen: {other:?}"),
            }
        }
        match recv_line(&rx) {
            Line::NewLine { text, .. } => assert_eq!(text, "second\n"),
            other => panic!("expected NewLine, got {other:?}"),
        }

        engine.stop();
    }

    #[test]
    fn terminates_cleanly_on_rotation_when_reopen_is_off() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.log");
        std::fs::write(&path, b"only\n").unwrap();

        let (engine, rx) = TailEngine::spawn(
            PathSource::Literal(path.clone()),
            TailConfig {
                must_exist: true,
                reopen: false,
                poll_mode: true,
                heartbeat: Duration::from_millis(100),
                ..TailConfig::default()
            },
        );

        match recv_line(&rx) {
            Line::NewFile { .. } => {}
            other => panic!("expected NewFile, got {other:?}"),
        }
        match recv_line(&rx) {
            Line::NewLine { .. } => {}
            other => panic!("expected NewLine, got {other:?}"),
        }

        std::fs::remove_file(&path).unwrap();

        // The channel should close (thread exits) rather than hang.
        let deadline = Instant::now() + Duration::from_secs(3);
        loop {
            match rx.recv_timeout(Duration::from_millis(200)) {
                Ok(Line::Tick { .. }) => {}
                Err(RecvTimeoutError::Timeout) if Instant::now() < deadline => continue,
                Err(RecvTimeoutError::Disconnected) => break,
                other => panic!("expected channel disconnection, got {other:?}"),
            }
        }

        engine.stop();
    }
}
