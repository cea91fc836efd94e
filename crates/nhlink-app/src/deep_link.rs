//! Deep links that start dev mode from the web console
//!
//! ```text
//! vscode://forkmain.forkmain?token=..&namespace=team-a&application=shop
//!     &workload=api&workload_type=deployment&kubeconfig=/home/dev/.kube/team
//! ```

use serde::{Deserialize, Serialize};
use url::Url;

use crate::keys;
use crate::launch::{DevStartMarkers, Launcher};
use crate::store::{Scope, StateStore, StateStoreExt};
use nhlink_core::prelude::*;
use nhlink_core::Session;

/// Status recorded for a workload the link puts into dev mode.
const DEVELOPING: &str = "developing";

/// Query parameters of a dev-mode deep link.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeepLink {
    pub token: String,
    pub namespace: Option<String>,
    pub application: Option<String>,
    pub workload_type: Option<String>,
    pub workload: Option<String>,
    pub action: Option<String>,
    pub email: Option<String>,
    pub organization: Option<String>,
    pub kubeconfig: Option<String>,
    pub env: Option<String>,
    pub app: Option<String>,
    pub service: Option<String>,
    pub base_url: Option<String>,
    pub org_id: Option<String>,
    pub cluster_id: Option<String>,
}

/// The `accountToken` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountToken {
    pub email: Option<String>,
    pub token: String,
}

/// The `app` record describing what the link asked for.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    pub email: Option<String>,
    pub organization: Option<String>,
    pub application: Option<String>,
    pub service: Option<String>,
    pub action: Option<String>,
    pub kubeconfig: Option<String>,
    pub workload_type: Option<String>,
    pub namespace: Option<String>,
    pub environment: Option<String>,
}

impl DeepLink {
    pub fn parse(uri: &str) -> Result<Self> {
        let url = Url::parse(uri).map_err(|e| Error::deep_link(format!("{}: {}", uri, e)))?;

        let mut link = DeepLink::default();
        for (key, value) in url.query_pairs() {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            let value = Some(value.to_string());
            match key.as_ref() {
                "token" => link.token = value.unwrap_or_default(),
                "namespace" => link.namespace = value,
                "application" => link.application = value,
                "workload_type" => link.workload_type = value,
                "workload" => link.workload = value,
                "action" => link.action = value,
                "email" => link.email = value,
                "organization" => link.organization = value,
                "kubeconfig" => link.kubeconfig = value,
                "env" => link.env = value,
                "app" => link.app = value,
                "service" => link.service = value,
                "baseUrl" => link.base_url = value,
                "orgId" => link.org_id = value,
                "clusterId" => link.cluster_id = value,
                other => trace!("Ignoring deep link parameter '{}'", other),
            }
        }

        if link.token.is_empty() {
            return Err(Error::deep_link(
                "Token parameter is required to enter dev mode.",
            ));
        }
        Ok(link)
    }

    pub fn account(&self) -> AccountToken {
        AccountToken {
            email: self.email.clone(),
            token: self.token.clone(),
        }
    }

    pub fn application_record(&self) -> ApplicationRecord {
        ApplicationRecord {
            email: self.email.clone(),
            organization: self.organization.clone(),
            application: self.app.clone(),
            service: self.service.clone(),
            action: self.action.clone(),
            kubeconfig: self.kubeconfig.clone(),
            workload_type: self.workload_type.clone(),
            namespace: self.namespace.clone(),
            environment: self.env.clone(),
        }
    }

    /// Dev-start markers for `session`, if the link names a full target.
    pub fn markers_for(&self, session: &Session) -> Option<DevStartMarkers> {
        let application = self.application.as_ref()?;
        let workload = self.workload.as_ref()?;
        let workload_type = self.workload_type.as_ref()?;
        let kubeconfig = self.kubeconfig.as_ref()?;
        let namespace = self.namespace.clone().unwrap_or_default();

        Some(DevStartMarkers {
            workload_path: Some(session.source_path()),
            devspace: Some(namespace.clone()),
            id: Some(format!("{}/{}/{}", namespace, application, workload)),
            namespace: Some(namespace),
            app: Some(application.clone()),
            workload: Some(workload.clone()),
            status: Some(DEVELOPING.to_string()),
            resource_type: Some(workload_type.clone()),
            kubeconfig_path: Some(kubeconfig.clone()),
            ..Default::default()
        })
    }
}

/// Store the link's records and, when it names a workload, start dev mode.
///
/// Returns whether dev mode was started.
pub async fn handle(
    link: &DeepLink,
    store: &dyn StateStore,
    session: &Session,
    launcher: &Launcher,
) -> Result<bool> {
    store.set_as(Scope::Global, keys::ACCOUNT_TOKEN, &link.account())?;
    store.set_as(Scope::Global, keys::APP, &link.application_record())?;

    let Some(markers) = link.markers_for(session) else {
        info!("Deep link stored; it names no complete workload");
        return Ok(false);
    };
    launcher.persist(&markers)?;
    launcher.launch_dev_space().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use nhlink_core::SessionId;

    const FULL: &str = "vscode://forkmain.forkmain?token=t0k&namespace=team-a\
        &application=shop&workload=api&workload_type=deployment\
        &kubeconfig=%2Fhome%2Fdev%2F.kube%2Fteam&email=dev%40example.com&app=shop&env=staging";

    #[test]
    fn test_parse_full_link() {
        let link = DeepLink::parse(FULL).unwrap();
        assert_eq!(link.token, "t0k");
        assert_eq!(link.namespace.as_deref(), Some("team-a"));
        assert_eq!(link.kubeconfig.as_deref(), Some("/home/dev/.kube/team"));
        assert_eq!(link.email.as_deref(), Some("dev@example.com"));
        assert_eq!(link.application_record().environment.as_deref(), Some("staging"));
    }

    #[test]
    fn test_token_is_required() {
        let err = DeepLink::parse("vscode://forkmain.forkmain?namespace=team-a").unwrap_err();
        assert!(matches!(err, Error::DeepLink { .. }));
        let err = DeepLink::parse("vscode://forkmain.forkmain?token=").unwrap_err();
        assert!(matches!(err, Error::DeepLink { .. }));
    }

    #[test]
    fn test_unparseable_uri() {
        assert!(matches!(
            DeepLink::parse("not a uri"),
            Err(Error::DeepLink { .. })
        ));
    }

    #[test]
    fn test_markers_need_full_target() {
        let session = Session::with_id(SessionId::new("/work/a"), Some("/work/a".into()));
        let link = DeepLink::parse(FULL).unwrap();
        let markers = link.markers_for(&session).unwrap();
        assert!(markers.is_complete());
        assert_eq!(markers.workload_path.as_deref(), Some("/work/a"));
        assert_eq!(markers.resource_type.as_deref(), Some("deployment"));

        let partial = DeepLink::parse("vscode://x?token=t&application=shop").unwrap();
        assert!(partial.markers_for(&session).is_none());
    }
}
