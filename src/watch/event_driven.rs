// logtrail - watch/event_driven.rs
//
// notify-based watcher. Registers watches on both the file and its parent
// directory; a create event in the parent for the target name starts a
// debounce timer, and a close-after-write observed within the window
// confirms Rotated, otherwise the timer firing alone still emits Rotated
// (covers create-only rotations where no further write follows promptly).

use std::path::PathBuf;
use std::sync::mpsc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher as NotifyWatcherTrait};

use crate::cancel::CancelToken;
use crate::util::constants::{DEFAULT_DEBOUNCE_MS, POLL_WATCH_INTERVAL_MS, WATCH_CHANNEL_CAPACITY};
use crate::util::error::CoreError;

use super::{ChangeEvent, FileId, FileWatcher};

pub struct NotifyWatcher {
    path: PathBuf,
    debounce: Duration,
}

impl NotifyWatcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            debounce: Duration::from_millis(DEFAULT_DEBOUNCE_MS),
        }
    }

    pub fn with_debounce(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            path: path.into(),
            debounce,
        }
    }
}

impl FileWatcher for NotifyWatcher {
    fn await_exists(&self, cancel: &CancelToken) -> Result<(), CoreError> {
        // Existence-polling stays simple and dependency-free; a watch can't
        // be registered on a parent directory that doesn't exist either, so
        // there is no event-driven shortcut here.
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
        let debounce = self.debounce;
        std::thread::spawn(move || run_event_driven_loop(path, initial, debounce, tx, cancel));
        rx
    }
}

fn run_event_driven_loop(
    path: PathBuf,
    initial: FileId,
    debounce: Duration,
    tx: mpsc::SyncSender<ChangeEvent>,
    cancel: CancelToken,
) {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let file_name = match path.file_name() {
        Some(name) => name.to_owned(),
        None => return,
    };

    let (notify_tx, notify_rx) = mpsc::channel::<notify::Result<Event>>();
    let mut watcher: RecommendedWatcher = match notify::recommended_watcher(move |res| {
        let _ = notify_tx.send(res);
    }) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!(path = %path.display(), error = %e, "failed to create notify watcher");
            return;
        }
    };

    if let Err(e) = watcher.watch(&parent, RecursiveMode::NonRecursive) {
        tracing::error!(path = %parent.display(), error = %e, "failed to watch parent directory");
        return;
    }
    if path.exists() {
        let _ = watcher.watch(&path, RecursiveMode::NonRecursive);
    }

    let mut debounce_deadline: Option<Instant> = None;

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match notify_rx.recv_timeout(Duration::from_millis(POLL_WATCH_INTERVAL_MS)) {
            Ok(Ok(event)) => {
                if is_rename_or_remove(&event.kind) && event_touches(&event, &path, &file_name) {
                    if debounce_deadline.is_none() {
                        debounce_deadline = Some(Instant::now() + debounce);
                    }
                }
                if is_create(&event.kind) && event_touches(&event, &path, &file_name) {
                    if FileId::of(&path).map(|id| id != initial).unwrap_or(true) {
                        let _ = tx.send(ChangeEvent::Rotated);
                        return;
                    }
                }
                if is_modify_data(&event.kind) && event_touches(&event, &path, &file_name) {
                    if debounce_deadline.is_some() {
                        let _ = tx.send(ChangeEvent::Rotated);
                        return;
                    }
                    if tx.send(ChangeEvent::Modified).is_err() {
                        return;
                    }
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "notify watcher error");
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
            Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }

        if let Some(deadline) = debounce_deadline {
            if Instant::now() >= deadline {
                let _ = tx.send(ChangeEvent::Rotated);
                return;
            }
        }
    }
}

fn event_touches(event: &Event, path: &std::path::Path, file_name: &std::ffi::OsStr) -> bool {
    event.paths.iter().any(|p| p == path || p.file_name() == Some(file_name))
}

fn is_create(kind: &EventKind) -> bool {
    matches!(kind, EventKind::Create(_))
}

fn is_rename_or_remove(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Remove(_) | EventKind::Modify(notify::event::ModifyKind::Name(_))
    )
}

fn is_modify_data(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Modify(notify::event::ModifyKind::Data(_)) | EventKind::Modify(notify::event::ModifyKind::Any)
    )
}
