//! Core domain types: sessions, resource references, workload phases

use std::fmt;
use std::path::{Path, PathBuf};

use rand::Rng;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────

/// Identity of one running session.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Random token for sessions without a workspace root.
    pub fn generate() -> Self {
        let token: u64 = rand::thread_rng().gen();
        Self(format!("session-{:016x}", token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One running editor session. Created at process start, never persisted.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: SessionId,
    pub workspace_root: Option<PathBuf>,
}

impl Session {
    /// Create a session for an optional workspace root.
    ///
    /// The root is canonicalized so two processes opened on the same folder
    /// through different relative paths agree on their identity.
    pub fn new(workspace_root: Option<&Path>) -> Self {
        let workspace_root =
            workspace_root.map(|p| dunce::canonicalize(p).unwrap_or_else(|_| p.to_path_buf()));

        let id = match &workspace_root {
            Some(root) => SessionId::new(root.to_string_lossy()),
            None => SessionId::generate(),
        };

        Self { id, workspace_root }
    }

    /// Session with an explicit id, used when the identity is known up front.
    pub fn with_id(id: SessionId, workspace_root: Option<PathBuf>) -> Self {
        Self { id, workspace_root }
    }

    /// The workspace root as carried in event `source` / `associate` fields.
    ///
    /// Sessions without a workspace use the empty string.
    pub fn source_path(&self) -> String {
        self.workspace_root
            .as_ref()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    /// Whether a `source` field names this session.
    pub fn is_local_source(&self, source: &str) -> bool {
        source == self.source_path()
    }
}

// ─────────────────────────────────────────────────────────────────
// Resource References
// ─────────────────────────────────────────────────────────────────

/// (devSpaceName, appName) pair identifying an installed application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppRef {
    pub dev_space_name: String,
    pub app_name: String,
}

impl AppRef {
    pub fn new(dev_space_name: impl Into<String>, app_name: impl Into<String>) -> Self {
        Self {
            dev_space_name: dev_space_name.into(),
            app_name: app_name.into(),
        }
    }

    /// Node path of this app and its ancestors, root first.
    pub fn ancestor_chain(&self) -> Vec<String> {
        vec![
            self.dev_space_name.clone(),
            format!("{}/{}", self.dev_space_name, self.app_name),
        ]
    }
}

/// (devSpaceName, appName, workloadName) triple identifying a workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadRef {
    pub dev_space_name: String,
    pub app_name: String,
    pub workload_name: String,
}

impl WorkloadRef {
    pub fn new(
        dev_space_name: impl Into<String>,
        app_name: impl Into<String>,
        workload_name: impl Into<String>,
    ) -> Self {
        Self {
            dev_space_name: dev_space_name.into(),
            app_name: app_name.into(),
            workload_name: workload_name.into(),
        }
    }

    pub fn app(&self) -> AppRef {
        AppRef::new(&self.dev_space_name, &self.app_name)
    }

    /// Node path of this workload and its ancestors, root first.
    pub fn ancestor_chain(&self) -> Vec<String> {
        let mut chain = self.app().ancestor_chain();
        chain.push(format!(
            "{}/{}/{}",
            self.dev_space_name, self.app_name, self.workload_name
        ));
        chain
    }
}

impl fmt::Display for WorkloadRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.dev_space_name, self.app_name, self.workload_name
        )
    }
}

// ─────────────────────────────────────────────────────────────────
// Workload Phase
// ─────────────────────────────────────────────────────────────────

/// Tracked phase of a workload node.
///
/// `Unknown -> Installing -> DevMode -> Unknown` or
/// `Unknown -> Installing -> Uninstalled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum WorkloadPhase {
    #[default]
    Unknown,
    Installing,
    DevMode,
    Uninstalled,
}

impl WorkloadPhase {
    /// Whether moving to `next` is a legal transition.
    pub fn can_transition_to(self, next: WorkloadPhase) -> bool {
        use WorkloadPhase::*;
        matches!(
            (self, next),
            (Unknown, Installing)
                | (Unknown, DevMode)
                | (Installing, DevMode)
                | (Installing, Uninstalled)
                | (Installing, Unknown)
                | (DevMode, Unknown)
                | (DevMode, Uninstalled)
                | (Unknown, Uninstalled)
                | (Uninstalled, Installing)
        )
    }

    pub fn is_developing(self) -> bool {
        self == WorkloadPhase::DevMode
    }

    pub fn label(self) -> &'static str {
        match self {
            WorkloadPhase::Unknown => "unknown",
            WorkloadPhase::Installing => "installing",
            WorkloadPhase::DevMode => "developing",
            WorkloadPhase::Uninstalled => "uninstalled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_without_root_gets_token() {
        let a = Session::new(None);
        let b = Session::new(None);
        assert_ne!(a.id, b.id);
        assert_eq!(a.source_path(), "");
        assert!(a.is_local_source(""));
    }

    #[test]
    fn test_session_id_from_canonical_root() {
        let dir = tempfile::tempdir().unwrap();
        let direct = Session::new(Some(dir.path()));
        let dotted = Session::new(Some(&dir.path().join(".")));
        assert_eq!(direct.id, dotted.id);
        assert_eq!(direct.source_path(), dotted.source_path());
        assert!(!direct.is_local_source("/somewhere/else"));
    }

    #[test]
    fn test_workload_ancestor_chain() {
        let w = WorkloadRef::new("space", "shop", "api");
        assert_eq!(
            w.ancestor_chain(),
            vec!["space", "space/shop", "space/shop/api"]
        );
        assert_eq!(w.app(), AppRef::new("space", "shop"));
        assert_eq!(w.to_string(), "space/shop/api");
    }

    #[test]
    fn test_phase_transitions() {
        use WorkloadPhase::*;
        assert!(Unknown.can_transition_to(Installing));
        assert!(Installing.can_transition_to(DevMode));
        assert!(DevMode.can_transition_to(Unknown));
        assert!(Installing.can_transition_to(Uninstalled));
        assert!(!Uninstalled.can_transition_to(DevMode));
        assert!(!DevMode.can_transition_to(Installing));
    }
}
