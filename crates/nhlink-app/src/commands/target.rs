//! What a command acts on

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use nhlink_core::{AppRef, CommandParameter, WorkloadRef};
use nhlink_daemon::{DevStartFlags, KubeContext};

/// Read access to the resource a command targets.
///
/// Tree nodes, replayed command descriptors and dev-start markers all expose
/// the same accessors.
pub trait ResourceCapability: Send + Sync {
    fn kubeconfig_path(&self) -> &str;
    fn namespace(&self) -> &str;
    fn app_name(&self) -> &str;
    /// Workload name
    fn name(&self) -> &str;
    fn resource_type(&self) -> &str;
    fn status(&self) -> &str;

    /// Dev space the app lives in. Falls back to the namespace.
    fn space_name(&self) -> &str {
        self.namespace()
    }

    fn container(&self) -> &str {
        ""
    }

    fn storage_class(&self) -> &str {
        ""
    }

    fn workload_ref(&self) -> WorkloadRef {
        WorkloadRef::new(self.space_name(), self.app_name(), self.name())
    }

    fn app_ref(&self) -> AppRef {
        AppRef::new(self.space_name(), self.app_name())
    }

    /// Cluster scope for nhctl, if a kubeconfig is known.
    fn kube_context(&self) -> Option<KubeContext> {
        let path = self.kubeconfig_path().trim();
        if path.is_empty() {
            return None;
        }
        Some(KubeContext::new(path, Some(self.namespace().to_string())))
    }
}

/// Owned [`ResourceCapability`] built from a descriptor or persisted markers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandTarget {
    pub kubeconfig_path: String,
    pub namespace: String,
    pub space_name: String,
    pub app_name: String,
    pub name: String,
    pub resource_type: String,
    pub status: String,
    pub container: String,
    pub storage_class: String,
}

impl CommandTarget {
    pub fn from_parameter(parameter: &CommandParameter) -> Self {
        Self {
            kubeconfig_path: parameter.kubeconfig.clone(),
            namespace: parameter.name_space.clone(),
            app_name: parameter.app.clone(),
            name: parameter.service.clone(),
            resource_type: parameter.resource_type.clone(),
            status: parameter.status.clone(),
            ..Default::default()
        }
    }
}

impl ResourceCapability for CommandTarget {
    fn kubeconfig_path(&self) -> &str {
        &self.kubeconfig_path
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn app_name(&self) -> &str {
        &self.app_name
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn resource_type(&self) -> &str {
        &self.resource_type
    }

    fn status(&self) -> &str {
        &self.status
    }

    fn space_name(&self) -> &str {
        if self.space_name.is_empty() {
            &self.namespace
        } else {
            &self.space_name
        }
    }

    fn container(&self) -> &str {
        &self.container
    }

    fn storage_class(&self) -> &str {
        &self.storage_class
    }
}

/// Optional settings for starting dev mode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DevStartOptions {
    pub mode: Option<String>,
    pub image: Option<String>,
    /// Command to run in the dev container once started
    pub command: Option<String>,
    pub header: Option<String>,
    pub syncs: Vec<String>,
}

impl DevStartOptions {
    pub fn to_flags(&self, target: &dyn ResourceCapability) -> DevStartFlags {
        fn non_empty(s: &str) -> Option<String> {
            Some(s.trim()).filter(|s| !s.is_empty()).map(str::to_string)
        }

        DevStartFlags {
            mode: self.mode.as_deref().and_then(non_empty),
            image: self.image.as_deref().and_then(non_empty),
            container: non_empty(target.container()),
            storage_class: non_empty(target.storage_class()),
            header: self.header.as_deref().and_then(non_empty),
            syncs: self.syncs.clone(),
        }
    }
}

/// Where an application is installed from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallOptions {
    pub git_url: String,
    pub install_type: String,
    pub resource_dir: String,
    pub values: Option<PathBuf>,
}

/// Per-invocation options passed alongside the target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOptions {
    pub dev_start: DevStartOptions,
    pub install: Option<InstallOptions>,
}

impl CommandOptions {
    pub fn dev_start(options: DevStartOptions) -> Self {
        Self {
            dev_start: options,
            ..Default::default()
        }
    }

    pub fn install(options: InstallOptions) -> Self {
        Self {
            install: Some(options),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parameter() -> CommandParameter {
        CommandParameter {
            associate: "/work/a".into(),
            kubeconfig: "/k/config".into(),
            name_space: "team-a".into(),
            app: "shop".into(),
            service: "api".into(),
            resource_type: "deployment".into(),
            status: "developing".into(),
        }
    }

    #[test]
    fn test_target_from_parameter() {
        let target = CommandTarget::from_parameter(&parameter());
        assert_eq!(target.kubeconfig_path(), "/k/config");
        assert_eq!(target.namespace(), "team-a");
        assert_eq!(target.app_name(), "shop");
        assert_eq!(target.name(), "api");
        assert_eq!(target.resource_type(), "deployment");
        assert_eq!(target.status(), "developing");
        assert_eq!(target.workload_ref(), WorkloadRef::new("team-a", "shop", "api"));
    }

    #[test]
    fn test_kube_context_requires_kubeconfig() {
        let mut target = CommandTarget::from_parameter(&parameter());
        assert_eq!(
            target.kube_context(),
            Some(KubeContext::new("/k/config", Some("team-a".into())))
        );
        target.kubeconfig_path.clear();
        assert_eq!(target.kube_context(), None);
    }

    #[test]
    fn test_flags_skip_blank_values() {
        let target = CommandTarget {
            container: "app".into(),
            storage_class: " ".into(),
            ..Default::default()
        };
        let options = DevStartOptions {
            mode: Some("replace".into()),
            image: Some(String::new()),
            ..Default::default()
        };
        let flags = options.to_flags(&target);
        assert_eq!(flags.mode.as_deref(), Some("replace"));
        assert_eq!(flags.image, None);
        assert_eq!(flags.container.as_deref(), Some("app"));
        assert_eq!(flags.storage_class, None);
    }
}
