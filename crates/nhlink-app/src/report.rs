//! Process-boundary error reporting
//!
//! Errors that reach the top of a task end up in [`surface`]. Everything is
//! logged; the user only hears about errors that are not a known benign
//! condition.

use std::cell::Cell;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::lock::SessionLock;
use nhlink_core::prelude::*;

/// Severity of a user notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeLevel {
    Info,
    Warning,
    Error,
}

/// Where user-facing notifications go.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NoticeLevel, message: &str);
}

/// Notifier that only writes to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        match level {
            NoticeLevel::Info => info!("[notice] {}", message),
            NoticeLevel::Warning => warn!("[notice] {}", message),
            NoticeLevel::Error => error!("[notice] {}", message),
        }
    }
}

/// Keeps every notification for later inspection.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<(NoticeLevel, String)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn notices(&self) -> Vec<(NoticeLevel, String)> {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, level: NoticeLevel, message: &str) {
        self.notices
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

/// Log `err` and tell the user about it unless it is benign.
///
/// Returns whether a notification was sent.
pub fn surface(err: &Error, notifier: &dyn Notifier) -> bool {
    if let Some(condition) = err.benign() {
        debug!("Suppressed benign error ({:?}): {}", condition, err);
        return false;
    }

    error!("{}", err);
    notifier.notify(NoticeLevel::Error, &err.to_string());
    true
}

thread_local! {
    static ISOLATION_DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct IsolationGuard;

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        ISOLATION_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}

/// Run `f` with panics on this thread marked as recovered by the caller.
///
/// The caller must catch any unwind coming out of `f`.
pub(crate) fn isolated<R>(f: impl FnOnce() -> R) -> R {
    ISOLATION_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let _guard = IsolationGuard;
    f()
}

/// Whether the current thread is inside [`isolated`].
pub fn in_isolation() -> bool {
    ISOLATION_DEPTH.with(|depth| depth.get() > 0)
}

/// Install a panic hook that logs the panic and releases the session lock
/// before the previous hook runs.
///
/// Panics raised inside an isolated bus handler are recovered by the bus, so
/// the session keeps its lock for them.
pub fn install_panic_hook(lock: Option<Arc<SessionLock>>) {
    let original_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic_info| {
        if in_isolation() {
            error!("Recovered panic: {}", panic_info);
        } else {
            error!("Panic: {}", panic_info);
            if let Some(lock) = &lock {
                lock.release();
            }
        }
        original_hook(panic_info);
    }));
}
