//! Durable record keys shared with other sessions
//!
//! These names are part of the on-disk contract; every session on the
//! machine reads and writes the same keys.

// Dev-start markers
pub const TMP_WORKLOAD_PATH: &str = "tmpWorkloadPath";
pub const TMP_DEVSPACE: &str = "tmpDevspace";
pub const TMP_NAMESPACE: &str = "tmpNamespace";
pub const TMP_APP: &str = "tmpApp";
pub const TMP_ID: &str = "tmpId";
pub const TMP_WORKLOAD: &str = "tmpWorkload";
pub const TMP_STATUS: &str = "tmpStatusId";
pub const TMP_RESOURCE_TYPE: &str = "tmpResourceType";
pub const TMP_KUBECONFIG_PATH: &str = "tmpKubeconfigPath";
pub const TMP_STORAGE_CLASS: &str = "tmpStorageClass";
pub const TMP_CONTAINER: &str = "tmpContainer";
pub const TMP_MODE: &str = "tmpMode";
pub const TMP_HEADER: &str = "tmpHeader";
pub const TMP_DEV_START_IMAGE: &str = "tmpDevStartImage";
pub const TMP_DEV_START_COMMAND: &str = "tmpDevStartCommand";
pub const TMP_DEVSTART_APPEND_COMMAND: &str = "tmpDevstartAppendCommand";

/// Every dev-start marker, cleared together once consumed.
pub const DEV_START_MARKERS: [&str; 16] = [
    TMP_WORKLOAD_PATH,
    TMP_DEVSPACE,
    TMP_NAMESPACE,
    TMP_APP,
    TMP_ID,
    TMP_WORKLOAD,
    TMP_STATUS,
    TMP_RESOURCE_TYPE,
    TMP_KUBECONFIG_PATH,
    TMP_STORAGE_CLASS,
    TMP_CONTAINER,
    TMP_MODE,
    TMP_HEADER,
    TMP_DEV_START_IMAGE,
    TMP_DEV_START_COMMAND,
    TMP_DEVSTART_APPEND_COMMAND,
];

pub const WELCOME_DID_SHOW: &str = "welcomeDidShow";
pub const ACCOUNT_TOKEN: &str = "accountToken";
pub const APP: &str = "app";

/// Deferred command awaiting replay after a reload
pub const TMP_COMMAND: &str = "tmpCommand";
