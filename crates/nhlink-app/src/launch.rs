//! Resuming dev mode after a reload
//!
//! Starting dev mode may force the editor to reopen on the workload's source
//! folder. Before that happens the pending start is written to durable
//! markers; whichever session opens on that folder picks them up, clears them
//! and starts dev mode exactly once.

use std::sync::Arc;

use crate::commands::{
    CommandOptions, CommandRegistry, CommandTarget, DevStartOptions, ResourceCapability,
    START_DEV_MODE,
};
use crate::keys;
use crate::refresh::RefreshControl;
use crate::store::{Scope, StateStore, StateStoreExt};
use nhlink_core::prelude::*;
use nhlink_core::Session;

/// The pending dev-mode start, one durable record per field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevStartMarkers {
    /// Source folder of the session that must resume
    pub workload_path: Option<String>,
    pub devspace: Option<String>,
    pub namespace: Option<String>,
    pub app: Option<String>,
    /// Tree node id of the workload
    pub id: Option<String>,
    pub workload: Option<String>,
    pub status: Option<String>,
    pub resource_type: Option<String>,
    pub kubeconfig_path: Option<String>,
    pub storage_class: Option<String>,
    pub container: Option<String>,
    pub mode: Option<String>,
    pub header: Option<String>,
    pub image: Option<String>,
    pub dev_start_command: Option<String>,
    pub append_command: Option<String>,
}

impl DevStartMarkers {
    fn fields(&self) -> [(&'static str, &Option<String>); 16] {
        [
            (keys::TMP_WORKLOAD_PATH, &self.workload_path),
            (keys::TMP_DEVSPACE, &self.devspace),
            (keys::TMP_NAMESPACE, &self.namespace),
            (keys::TMP_APP, &self.app),
            (keys::TMP_ID, &self.id),
            (keys::TMP_WORKLOAD, &self.workload),
            (keys::TMP_STATUS, &self.status),
            (keys::TMP_RESOURCE_TYPE, &self.resource_type),
            (keys::TMP_KUBECONFIG_PATH, &self.kubeconfig_path),
            (keys::TMP_STORAGE_CLASS, &self.storage_class),
            (keys::TMP_CONTAINER, &self.container),
            (keys::TMP_MODE, &self.mode),
            (keys::TMP_HEADER, &self.header),
            (keys::TMP_DEV_START_IMAGE, &self.image),
            (keys::TMP_DEV_START_COMMAND, &self.dev_start_command),
            (keys::TMP_DEVSTART_APPEND_COMMAND, &self.append_command),
        ]
    }

    pub fn load(store: &dyn StateStore) -> Result<Self> {
        let get = |key: &str| store.get_string(Scope::Global, key);
        Ok(Self {
            workload_path: get(keys::TMP_WORKLOAD_PATH)?,
            devspace: get(keys::TMP_DEVSPACE)?,
            namespace: get(keys::TMP_NAMESPACE)?,
            app: get(keys::TMP_APP)?,
            id: get(keys::TMP_ID)?,
            workload: get(keys::TMP_WORKLOAD)?,
            status: get(keys::TMP_STATUS)?,
            resource_type: get(keys::TMP_RESOURCE_TYPE)?,
            kubeconfig_path: get(keys::TMP_KUBECONFIG_PATH)?,
            storage_class: get(keys::TMP_STORAGE_CLASS)?,
            container: get(keys::TMP_CONTAINER)?,
            mode: get(keys::TMP_MODE)?,
            header: get(keys::TMP_HEADER)?,
            image: get(keys::TMP_DEV_START_IMAGE)?,
            dev_start_command: get(keys::TMP_DEV_START_COMMAND)?,
            append_command: get(keys::TMP_DEVSTART_APPEND_COMMAND)?,
        })
    }

    /// Write every present field. Absent fields are left as they are.
    pub fn persist(&self, store: &dyn StateStore) -> Result<()> {
        for (key, value) in self.fields() {
            if let Some(value) = value {
                store.set_as(Scope::Global, key, value)?;
            }
        }
        Ok(())
    }

    /// Remove every marker, including mode, header and image.
    pub fn clear(store: &dyn StateStore) -> Result<()> {
        for key in keys::DEV_START_MARKERS {
            store.remove(Scope::Global, key)?;
        }
        Ok(())
    }

    fn present(value: &Option<String>) -> bool {
        value.as_deref().is_some_and(|v| !v.is_empty())
    }

    /// App, workload, status and resource type are all set.
    pub fn is_complete(&self) -> bool {
        Self::present(&self.app)
            && Self::present(&self.workload)
            && Self::present(&self.status)
            && Self::present(&self.resource_type)
    }

    pub fn to_target(&self) -> CommandTarget {
        let field = |value: &Option<String>| value.clone().unwrap_or_default();
        CommandTarget {
            kubeconfig_path: field(&self.kubeconfig_path),
            namespace: field(&self.namespace),
            space_name: field(&self.devspace),
            app_name: field(&self.app),
            name: field(&self.workload),
            resource_type: field(&self.resource_type),
            status: field(&self.status),
            container: field(&self.container),
            storage_class: field(&self.storage_class),
        }
    }

    pub fn to_options(&self) -> DevStartOptions {
        // The append command is tacked onto the dev container command
        let command = match (&self.dev_start_command, &self.append_command) {
            (Some(cmd), Some(append)) if !append.is_empty() => Some(format!("{} {}", cmd, append)),
            (Some(cmd), _) => Some(cmd.clone()),
            (None, Some(append)) if !append.is_empty() => Some(append.clone()),
            _ => None,
        };
        DevStartOptions {
            mode: self.mode.clone(),
            image: self.image.clone(),
            command,
            header: self.header.clone(),
            syncs: Vec::new(),
        }
    }
}

/// Checks for, and consumes, a pending dev-mode start.
pub struct Launcher {
    store: Arc<dyn StateStore>,
    session: Session,
    refresh: Arc<RefreshControl>,
    registry: Arc<CommandRegistry>,
}

impl Launcher {
    pub fn new(
        store: Arc<dyn StateStore>,
        session: Session,
        refresh: Arc<RefreshControl>,
        registry: Arc<CommandRegistry>,
    ) -> Self {
        Self {
            store,
            session,
            refresh,
            registry,
        }
    }

    /// Replace any pending start with `markers`.
    ///
    /// Fields from an earlier, unconsumed start are removed first.
    pub fn persist(&self, markers: &DevStartMarkers) -> Result<()> {
        DevStartMarkers::clear(self.store.as_ref())?;
        markers.persist(self.store.as_ref())?;
        debug!(
            "Persisted dev-start markers for {:?}",
            markers.workload_path.as_deref().unwrap_or_default()
        );
        Ok(())
    }

    /// Start dev mode if the pending markers belong to this session.
    ///
    /// Returns whether a start was dispatched.
    pub async fn launch_dev_space(&self) -> Result<bool> {
        self.refresh.check_sync();

        let workload_path = self
            .store
            .get_string(Scope::Global, keys::TMP_WORKLOAD_PATH)?;
        if workload_path.as_deref().unwrap_or_default() != self.session.source_path() {
            return Ok(false);
        }

        let markers = DevStartMarkers::load(self.store.as_ref())?;
        if !markers.is_complete() {
            trace!("Dev-start markers incomplete, nothing to resume");
            return Ok(false);
        }

        // Cleared before dispatch: another launch must never start it twice
        DevStartMarkers::clear(self.store.as_ref())?;

        let target = markers.to_target();
        info!(
            "Resuming dev mode on {} for {}",
            target.workload_ref(),
            self.session.source_path()
        );
        self.registry
            .execute(
                START_DEV_MODE,
                &target,
                &CommandOptions::dev_start(markers.to_options()),
            )
            .await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use crate::commands::{register_builtins, CommandContext};
    use crate::store::MemoryStore;
    use crate::tree::WorkloadTree;
    use nhlink_core::{SessionId, WorkloadPhase, WorkloadRef};
    use nhlink_daemon::test_utils::RecordingRunner;
    use nhlink_daemon::NhctlCommand;
    use std::time::Duration;

    struct Fixture {
        launcher: Launcher,
        store: Arc<MemoryStore>,
        runner: RecordingRunner,
        tree: Arc<WorkloadTree>,
    }

    fn fixture(root: &str) -> Fixture {
        let session = Session::with_id(SessionId::new(root), Some(root.into()));
        let store = Arc::new(MemoryStore::new());
        let tree = Arc::new(WorkloadTree::new());
        let runner = RecordingRunner::new();
        let bus = Arc::new(EventBus::new(session.id.clone(), Duration::from_millis(100)));
        let registry = Arc::new(CommandRegistry::new());
        register_builtins(
            &registry,
            Arc::new(CommandContext::new(
                runner.clone(),
                bus,
                Arc::clone(&tree),
                session.clone(),
            )),
        );
        let refresh = Arc::new(RefreshControl::new(Arc::clone(&tree)));
        let launcher = Launcher::new(store.clone(), session, refresh, registry);
        Fixture {
            launcher,
            store,
            runner,
            tree,
        }
    }

    fn complete(path: &str) -> DevStartMarkers {
        DevStartMarkers {
            workload_path: Some(path.into()),
            devspace: Some("space".into()),
            namespace: Some("team-a".into()),
            app: Some("shop".into()),
            id: Some("node-7".into()),
            workload: Some("api".into()),
            status: Some("developing".into()),
            resource_type: Some("deployment".into()),
            kubeconfig_path: Some("/k/config".into()),
            mode: Some("duplicate".into()),
            header: Some("x-dev=1".into()),
            image: Some("golang:1.22".into()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_resumes_exactly_once() {
        let f = fixture("/work/a");
        f.launcher.persist(&complete("/work/a")).unwrap();

        assert!(f.launcher.launch_dev_space().await.unwrap());
        assert!(!f.launcher.launch_dev_space().await.unwrap());

        let calls = f.runner.calls();
        assert_eq!(calls.len(), 1);
        assert!(matches!(
            &calls[0].command,
            NhctlCommand::DevStart { app, workload, flags, .. }
                if app == "shop" && workload == "api" && flags.mode.as_deref() == Some("duplicate")
        ));
        assert_eq!(
            f.tree.phase(&WorkloadRef::new("space", "shop", "api")),
            Some(WorkloadPhase::DevMode)
        );
    }

    #[tokio::test]
    async fn test_all_markers_cleared() {
        let f = fixture("/work/a");
        let mut markers = complete("/work/a");
        markers.container = Some("app".into());
        markers.storage_class = Some("ssd".into());
        markers.dev_start_command = Some("make run".into());
        markers.append_command = Some("--verbose".into());
        f.launcher.persist(&markers).unwrap();

        f.launcher.launch_dev_space().await.unwrap();

        for key in keys::DEV_START_MARKERS {
            assert_eq!(f.store.get(Scope::Global, key).unwrap(), None, "{} left behind", key);
        }
    }

    #[tokio::test]
    async fn test_new_start_drops_stale_options() {
        let f = fixture("/work/a");
        let mut stale = complete("/work/b");
        stale.image = Some("stale:1".into());
        stale.container = Some("sidecar".into());
        f.launcher.persist(&stale).unwrap();

        let fresh = DevStartMarkers {
            mode: None,
            header: None,
            image: None,
            ..complete("/work/a")
        };
        f.launcher.persist(&fresh).unwrap();
        assert!(f.launcher.launch_dev_space().await.unwrap());

        let calls = f.runner.calls();
        assert_eq!(calls.len(), 1);
        let NhctlCommand::DevStart { flags, .. } = &calls[0].command else {
            panic!("expected dev start, got {:?}", calls[0].command);
        };
        assert_eq!(flags.mode, None);
        assert_eq!(flags.image, None);
        assert_eq!(flags.container, None);
    }

    #[tokio::test]
    async fn test_other_workspace_is_ignored() {
        let f = fixture("/work/a");
        f.launcher.persist(&complete("/work/b")).unwrap();

        assert!(!f.launcher.launch_dev_space().await.unwrap());
        assert!(f.runner.calls().is_empty());
        assert_eq!(
            f.store.get_string(Scope::Global, keys::TMP_APP).unwrap().as_deref(),
            Some("shop")
        );
    }

    #[tokio::test]
    async fn test_incomplete_markers_are_kept() {
        let f = fixture("/work/a");
        let mut markers = complete("/work/a");
        markers.status = None;
        f.launcher.persist(&markers).unwrap();

        assert!(!f.launcher.launch_dev_space().await.unwrap());
        assert!(f.runner.calls().is_empty());
        assert!(f.store.get(Scope::Global, keys::TMP_APP).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_launch_requests_sync_check() {
        let f = fixture("/work/a");
        f.launcher.launch_dev_space().await.unwrap();
        assert_eq!(f.launcher.refresh.sync_checks(), 1);
    }

    #[test]
    fn test_options_join_append_command() {
        let markers = DevStartMarkers {
            dev_start_command: Some("make run".into()),
            append_command: Some("--verbose".into()),
            ..Default::default()
        };
        assert_eq!(
            markers.to_options().command.as_deref(),
            Some("make run --verbose")
        );
    }
}
