//! Configuration
//!
//! `DiskConfig` is the declarative selection policy written by the operator
//! for this node. `DiskMakerConfig` holds the daemon's host paths and timing.

use crate::domain::ports::OwnerReference;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Constants
// =============================================================================

pub const DEFAULT_SYMLINK_ROOT: &str = "/mnt/local-storage";
pub const DEFAULT_ROOTFS_DIR: &str = "/rootfs";
pub const DEFAULT_DEVICE_ID_GLOB: &str = "/dev/disk/by-id/*";
pub const DEFAULT_LSBLK_COMMAND: &str = "lsblk";
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 5;

// =============================================================================
// Disk Config
// =============================================================================

/// Selection policy for one storage class
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageClassDisks {
    /// Absolute device paths, e.g. `/dev/sdb`
    #[serde(default)]
    pub device_names: BTreeSet<String>,

    /// Stable identifier paths, e.g. `/dev/disk/by-id/ata-X`
    #[serde(default, rename = "deviceIDs")]
    pub device_ids: BTreeSet<String>,

    /// Directories relative to the host root
    #[serde(default)]
    pub directory_paths: Vec<String>,
}

/// Declarative input for one reconciliation cycle
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiskConfig {
    /// Storage class name to selection policy
    #[serde(default)]
    pub disks: BTreeMap<String, StorageClassDisks>,

    #[serde(default)]
    pub owner_name: String,

    #[serde(default)]
    pub owner_namespace: String,

    #[serde(default)]
    pub owner_kind: String,

    #[serde(default, rename = "ownerAPIVersion", alias = "ownerApiVersion")]
    pub owner_api_version: String,
}

impl DiskConfig {
    /// Parse a config from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Read and parse the config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Error::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| Error::ConfigLoad {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    /// Resource the events of this cycle attach to
    pub fn owner(&self) -> OwnerReference {
        OwnerReference {
            name: self.owner_name.clone(),
            namespace: self.owner_namespace.clone(),
            kind: self.owner_kind.clone(),
            api_version: self.owner_api_version.clone(),
        }
    }
}

// =============================================================================
// Daemon Config
// =============================================================================

/// Host paths and timing for the diskmaker daemon
#[derive(Debug, Clone)]
pub struct DiskMakerConfig {
    /// Root under which one symlink directory per storage class is kept
    pub symlink_root: PathBuf,
    /// Host root filesystem as mounted into the daemon
    pub rootfs_dir: PathBuf,
    /// Glob matching the stable identifier links
    pub device_id_glob: String,
    /// Block device listing tool
    pub lsblk_command: String,
    /// Reconciliation interval
    pub check_interval: Duration,
}

impl Default for DiskMakerConfig {
    fn default() -> Self {
        Self {
            symlink_root: PathBuf::from(DEFAULT_SYMLINK_ROOT),
            rootfs_dir: PathBuf::from(DEFAULT_ROOTFS_DIR),
            device_id_glob: DEFAULT_DEVICE_ID_GLOB.to_string(),
            lsblk_command: DEFAULT_LSBLK_COMMAND.to_string(),
            check_interval: Duration::from_secs(DEFAULT_CHECK_INTERVAL_SECS),
        }
    }
}

impl DiskMakerConfig {
    /// Validate settings that cannot be fixed up at runtime
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(Error::Configuration(
                "check interval must be greater than zero".into(),
            ));
        }
        if !self.symlink_root.is_absolute() {
            return Err(Error::Configuration(format!(
                "symlink location {} must be absolute",
                self.symlink_root.display()
            )));
        }
        glob::Pattern::new(&self.device_id_glob).map_err(|e| {
            Error::Configuration(format!(
                "invalid device ID glob {}: {}",
                self.device_id_glob, e
            ))
        })?;
        Ok(())
    }
}
