//! Background refresh control
//!
//! Two switches gate background work: the periodic tree refresh and the
//! sync-status poll. Both are suspended while an install is in flight so the
//! tree doesn't flicker through half-installed states.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::tree::WorkloadTree;
use nhlink_core::prelude::*;

/// Background switches shared by the trackers, the launcher and the timer.
///
/// Only `auto_refresh` is acted on here, by [`spawn_refresh_timer`]. The
/// sync-status switch and its check counter are published for the host's
/// sync-status poller, which reads [`RefreshControl::is_sync_polling`] and
/// [`RefreshControl::sync_checks`]; nothing in this crate polls sync status.
#[derive(Debug)]
pub struct RefreshControl {
    auto_refresh: AtomicBool,
    /// Read by the external sync-status poller
    sync_polling: AtomicBool,
    refresh_requests: AtomicU64,
    /// Bumped on every check request so a poller can tell requests apart
    sync_checks: AtomicU64,
    tree: Arc<WorkloadTree>,
}

impl RefreshControl {
    pub fn new(tree: Arc<WorkloadTree>) -> Self {
        Self {
            auto_refresh: AtomicBool::new(true),
            sync_polling: AtomicBool::new(true),
            refresh_requests: AtomicU64::new(0),
            sync_checks: AtomicU64::new(0),
            tree,
        }
    }

    pub fn is_auto_refresh(&self) -> bool {
        self.auto_refresh.load(Ordering::Relaxed)
    }

    pub fn is_sync_polling(&self) -> bool {
        self.sync_polling.load(Ordering::Relaxed)
    }

    /// Resume the periodic refresh. With `immediate`, refresh right now too.
    pub fn start_auto_refresh(&self, immediate: bool) {
        if !self.auto_refresh.swap(true, Ordering::Relaxed) {
            debug!("Auto refresh resumed");
        }
        if immediate {
            self.request_refresh();
        }
    }

    pub fn stop_auto_refresh(&self) {
        if self.auto_refresh.swap(false, Ordering::Relaxed) {
            debug!("Auto refresh suspended");
        }
    }

    /// Refresh the whole tree now, regardless of the auto-refresh switch.
    pub fn request_refresh(&self) {
        self.refresh_requests.fetch_add(1, Ordering::Relaxed);
        self.tree.request_full();
    }

    /// Ask the sync-status poller for a check now and turn polling back on.
    pub fn check_sync(&self) {
        self.sync_polling.store(true, Ordering::Relaxed);
        self.sync_checks.fetch_add(1, Ordering::Relaxed);
        trace!("Sync status check requested");
    }

    pub fn stop_sync_status(&self) {
        if self.sync_polling.swap(false, Ordering::Relaxed) {
            debug!("Sync status polling suspended");
        }
    }

    /// Install in progress: suspend both background activities.
    pub fn suspend_for_install(&self) {
        self.stop_auto_refresh();
        self.stop_sync_status();
    }

    /// Install settled: resume both.
    pub fn resume_after_install(&self) {
        self.start_auto_refresh(false);
        self.check_sync();
    }

    pub fn refresh_requests(&self) -> u64 {
        self.refresh_requests.load(Ordering::Relaxed)
    }

    pub fn sync_checks(&self) -> u64 {
        self.sync_checks.load(Ordering::Relaxed)
    }
}

/// Publish `TreeUpdate::Full` every `interval` while auto refresh is on.
///
/// The sync-status switch has no effect on this timer. Exits when `shutdown` turns true or its sender goes away.
pub fn spawn_refresh_timer(
    control: Arc<RefreshControl>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    if control.is_auto_refresh() {
                        control.tree.request_full();
                    }
                }
            }
        }
        debug!("Refresh timer stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::TreeUpdate;

    #[test]
    fn test_install_suspends_and_resumes() {
        let control = RefreshControl::new(Arc::new(WorkloadTree::new()));
        assert!(control.is_auto_refresh());
        assert!(control.is_sync_polling());

        control.suspend_for_install();
        assert!(!control.is_auto_refresh());
        assert!(!control.is_sync_polling());

        control.resume_after_install();
        assert!(control.is_auto_refresh());
        assert!(control.is_sync_polling());
        assert_eq!(control.sync_checks(), 1);
    }

    #[test]
    fn test_immediate_start_requests_refresh() {
        let tree = Arc::new(WorkloadTree::new());
        let mut rx = tree.subscribe();
        let control = RefreshControl::new(Arc::clone(&tree));

        control.start_auto_refresh(true);
        assert_eq!(control.refresh_requests(), 1);
        assert_eq!(rx.try_recv().unwrap(), TreeUpdate::Full);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_honours_switch_and_shutdown() {
        let tree = Arc::new(WorkloadTree::new());
        let mut rx = tree.subscribe();
        let control = Arc::new(RefreshControl::new(Arc::clone(&tree)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_refresh_timer(Arc::clone(&control), Duration::from_secs(10), shutdown_rx);

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.try_recv().unwrap(), TreeUpdate::Full);

        control.stop_auto_refresh();
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_switch_is_independent_of_timer() {
        let tree = Arc::new(WorkloadTree::new());
        let mut rx = tree.subscribe();
        let control = Arc::new(RefreshControl::new(Arc::clone(&tree)));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = spawn_refresh_timer(Arc::clone(&control), Duration::from_secs(10), shutdown_rx);

        control.stop_sync_status();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(rx.try_recv().unwrap(), TreeUpdate::Full);
        assert!(!control.is_sync_polling());
        assert_eq!(control.sync_checks(), 0);

        control.check_sync();
        control.check_sync();
        assert!(control.is_sync_polling());
        assert_eq!(control.sync_checks(), 2);
        // Sync checks never touch the tree
        assert!(rx.try_recv().is_err());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
