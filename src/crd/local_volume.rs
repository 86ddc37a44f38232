//! LocalVolume CRD
//!
//! The resource that owns a node's diskmaker configuration. The diskmaker
//! only reads it, to attach events to it.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

// =============================================================================
// LocalVolume CRD
// =============================================================================

/// LocalVolume declares which local devices and directories on the selected
/// nodes are exposed as persistent volumes, grouped by storage class.
#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "local.storage.openshift.io",
    version = "v1",
    kind = "LocalVolume",
    plural = "localvolumes",
    shortname = "lv",
    status = "LocalVolumeStatus",
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeSpec {
    /// Node labels the diskmaker daemon set is restricted to
    #[serde(default)]
    pub node_selector: std::collections::BTreeMap<String, String>,

    /// Devices and directories per storage class
    #[serde(default)]
    pub storage_class_devices: Vec<StorageClassDevice>,
}

/// Selection for one storage class
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassDevice {
    pub storage_class_name: String,

    /// Filesystem or Block
    #[serde(default)]
    pub volume_mode: Option<String>,

    #[serde(default)]
    pub fs_type: Option<String>,

    #[serde(default)]
    pub device_names: Vec<String>,

    #[serde(default, rename = "deviceIDs")]
    pub device_ids: Vec<String>,

    #[serde(default)]
    pub directory_paths: Vec<String>,
}

/// Status of the LocalVolume
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalVolumeStatus {
    #[serde(default)]
    pub management_state: Option<String>,

    #[serde(default)]
    pub observed_generation: Option<i64>,
}
