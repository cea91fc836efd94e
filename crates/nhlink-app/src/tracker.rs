//! Applying other sessions' lifecycle events to the local tree
//!
//! Events whose `source` is this session's own workspace were already applied
//! when they were emitted, so they are ignored here.

use std::sync::Arc;

use crate::launch::Launcher;
use crate::refresh::RefreshControl;
use crate::tree::WorkloadTree;
use nhlink_core::prelude::*;
use nhlink_core::{DevStart, EndDevMode, Install, RefreshTree, Session, Uninstall};

pub struct Tracker {
    session: Session,
    tree: Arc<WorkloadTree>,
    refresh: Arc<RefreshControl>,
    launcher: Arc<Launcher>,
}

impl Tracker {
    pub fn new(
        session: Session,
        tree: Arc<WorkloadTree>,
        refresh: Arc<RefreshControl>,
        launcher: Arc<Launcher>,
    ) -> Self {
        Self {
            session,
            tree,
            refresh,
            launcher,
        }
    }

    fn is_foreign(&self, source: &str) -> bool {
        !self.session.is_local_source(source)
    }

    /// Another session started dev mode; maybe it left a start for us.
    pub async fn on_dev_start(&self, event: &DevStart) -> Result<bool> {
        if !self.is_foreign(&event.source) {
            return Ok(false);
        }
        self.launcher.launch_dev_space().await
    }

    pub fn on_end_dev_mode(&self, event: &EndDevMode) -> bool {
        if !self.is_foreign(&event.source) {
            return false;
        }
        debug!("endDevMode from {}: {}", event.source, event.workload);
        self.tree.dispose_workload(&event.workload)
    }

    pub fn on_uninstall(&self, event: &Uninstall) -> bool {
        if !self.is_foreign(&event.source) {
            return false;
        }
        self.tree.dispose_app(&event.app)
    }

    /// Suspend background work while any session installs.
    pub fn on_install(&self, event: &Install) {
        if event.is_loading() {
            self.refresh.suspend_for_install();
        } else {
            self.refresh.resume_after_install();
        }
    }

    pub fn on_refresh_tree(&self, event: &RefreshTree) {
        if event.is_current_workspace {
            return;
        }
        debug!("refreshTree requested by another workspace");
        self.refresh.start_auto_refresh(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandRegistry;
    use crate::store::MemoryStore;
    use crate::tree::TreeUpdate;
    use nhlink_core::{AppRef, SessionId, WorkloadPhase, WorkloadRef};

    fn tracker() -> Tracker {
        let session = Session::with_id(SessionId::new("/work/a"), Some("/work/a".into()));
        let tree = Arc::new(WorkloadTree::new());
        let refresh = Arc::new(RefreshControl::new(Arc::clone(&tree)));
        let launcher = Arc::new(Launcher::new(
            Arc::new(MemoryStore::new()),
            session.clone(),
            Arc::clone(&refresh),
            Arc::new(CommandRegistry::new()),
        ));
        Tracker::new(session, tree, refresh, launcher)
    }

    fn api() -> WorkloadRef {
        WorkloadRef::new("space", "shop", "api")
    }

    #[test]
    fn test_foreign_end_dev_mode_disposes() {
        let tracker = tracker();
        tracker.tree.transition(&api(), WorkloadPhase::DevMode);
        let event = EndDevMode {
            workload: api(),
            source: "/work/b".into(),
        };

        assert!(tracker.on_end_dev_mode(&event));
        assert_eq!(tracker.tree.phase(&api()), Some(WorkloadPhase::Unknown));
        // Delivered twice: second is a no-op
        assert!(!tracker.on_end_dev_mode(&event));
    }

    #[test]
    fn test_own_end_dev_mode_is_ignored() {
        let tracker = tracker();
        tracker.tree.transition(&api(), WorkloadPhase::DevMode);
        let event = EndDevMode {
            workload: api(),
            source: "/work/a".into(),
        };

        assert!(!tracker.on_end_dev_mode(&event));
        assert_eq!(tracker.tree.phase(&api()), Some(WorkloadPhase::DevMode));
    }

    #[test]
    fn test_foreign_uninstall_disposes_app() {
        let tracker = tracker();
        tracker.tree.track(&api());
        let event = Uninstall {
            app: AppRef::new("space", "shop"),
            source: "/work/b".into(),
        };

        assert!(tracker.on_uninstall(&event));
        assert_eq!(tracker.tree.phase(&api()), Some(WorkloadPhase::Uninstalled));
        assert!(!tracker.on_uninstall(&event));
    }

    #[test]
    fn test_install_status_toggles_background_work() {
        let tracker = tracker();
        tracker.on_install(&Install::loading());
        assert!(!tracker.refresh.is_auto_refresh());
        assert!(!tracker.refresh.is_sync_polling());

        tracker.on_install(&Install::new("done"));
        assert!(tracker.refresh.is_auto_refresh());
        assert!(tracker.refresh.is_sync_polling());
    }

    #[test]
    fn test_refresh_tree_from_current_workspace_is_ignored() {
        let tracker = tracker();
        let mut rx = tracker.tree.subscribe();

        tracker.on_refresh_tree(&RefreshTree {
            is_current_workspace: true,
        });
        assert!(rx.try_recv().is_err());

        tracker.on_refresh_tree(&RefreshTree {
            is_current_workspace: false,
        });
        assert_eq!(rx.try_recv().unwrap(), TreeUpdate::Full);
    }

    #[tokio::test]
    async fn test_own_dev_start_does_not_launch() {
        let tracker = tracker();
        let own = DevStart {
            source: "/work/a".into(),
        };
        assert!(!tracker.on_dev_start(&own).await.unwrap());
        assert_eq!(tracker.refresh.sync_checks(), 0);

        let foreign = DevStart {
            source: "/work/b".into(),
        };
        assert!(!tracker.on_dev_start(&foreign).await.unwrap());
        assert_eq!(tracker.refresh.sync_checks(), 1);
    }
}
