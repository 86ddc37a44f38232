//! Device Enumerator
//!
//! Lists block devices that have no mount point using `lsblk`, and the
//! stable identifier links under `/dev/disk/by-id`.

use crate::config::DiskMakerConfig;
use crate::domain::ports::{BlockDeviceSource, BlockDeviceSourceRef, DeviceInventory};
use crate::error::{Error, Result};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use tracing::{debug, trace};

/// Columns requested from lsblk, in order
const LSBLK_COLUMNS: &str = "NAME,MOUNTPOINT";

// =============================================================================
// Host Device Source
// =============================================================================

/// Reads block devices and device IDs from the running host
#[derive(Debug, Clone)]
pub struct HostDeviceSource {
    lsblk_command: String,
    device_id_glob: String,
}

impl HostDeviceSource {
    pub fn new(lsblk_command: impl Into<String>, device_id_glob: impl Into<String>) -> Self {
        Self {
            lsblk_command: lsblk_command.into(),
            device_id_glob: device_id_glob.into(),
        }
    }

    pub fn from_config(config: &DiskMakerConfig) -> Self {
        Self::new(config.lsblk_command.clone(), config.device_id_glob.clone())
    }
}

impl BlockDeviceSource for HostDeviceSource {
    fn list_block_devices(&self) -> Result<String> {
        let output = Command::new(&self.lsblk_command)
            .args(["--list", "-o", LSBLK_COLUMNS, "--noheadings"])
            .output()
            .map_err(|e| Error::ToolInvocation {
                tool: self.lsblk_command.clone(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(Error::ToolInvocation {
                tool: self.lsblk_command.clone(),
                reason: format!(
                    "{}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn list_device_ids(&self) -> Result<Vec<PathBuf>> {
        glob_device_ids(&self.device_id_glob)
    }
}

/// Expand a device ID glob. Only an invalid pattern is an error; entries
/// that cannot be read are skipped.
pub fn glob_device_ids(pattern: &str) -> Result<Vec<PathBuf>> {
    let entries = glob::glob(pattern)
        .map_err(|e| Error::DeviceIdListing(format!("invalid pattern {}: {}", pattern, e)))?;

    let mut ids = Vec::new();
    for entry in entries {
        match entry {
            Ok(path) => ids.push(path),
            Err(e) => debug!("Skipping unreadable device ID entry: {}", e),
        }
    }
    Ok(ids)
}

/// Extract unmounted device names from `lsblk --list -o NAME,MOUNTPOINT`
/// output. A line counts only when it carries a name and nothing else.
///
/// Partitions are not filtered: a disk and its partition can both appear.
pub fn parse_unmounted_devices(listing: &str) -> BTreeSet<String> {
    let mut devices = BTreeSet::new();
    for line in listing.lines() {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(name), None) => {
                devices.insert(name.to_string());
            }
            (Some(name), Some(mount_point)) => {
                trace!("Skipping {} mounted at {}", name, mount_point);
            }
            _ => {}
        }
    }
    devices
}

// =============================================================================
// Device Enumerator
// =============================================================================

/// Produces the per-cycle device inventory from a block device source
#[derive(Clone)]
pub struct DeviceEnumerator {
    source: BlockDeviceSourceRef,
}

impl DeviceEnumerator {
    pub fn new(source: BlockDeviceSourceRef) -> Self {
        Self { source }
    }

    /// Enumerator over the host using the daemon's configured tools
    pub fn for_host(config: &DiskMakerConfig) -> Self {
        Self::new(Arc::new(HostDeviceSource::from_config(config)))
    }

    /// Base names of all block devices without a mount point
    pub fn list_unmounted_devices(&self) -> Result<BTreeSet<String>> {
        let listing = self.source.list_block_devices()?;
        Ok(parse_unmounted_devices(&listing))
    }

    /// Stable identifier links present on the host
    pub fn list_stable_identifier_paths(&self) -> Result<Vec<PathBuf>> {
        self.source.list_device_ids()
    }

    /// Gather the full inventory. Any failure aborts the cycle.
    pub fn inventory(&self) -> Result<DeviceInventory> {
        let unmounted_devices = self.list_unmounted_devices()?;
        if unmounted_devices.is_empty() {
            debug!("Unable to find any new disks");
        }

        let stable_identifiers = self.list_stable_identifier_paths()?;
        debug!(
            "Found {} unmounted devices and {} device IDs",
            unmounted_devices.len(),
            stable_identifiers.len()
        );

        Ok(DeviceInventory {
            unmounted_devices,
            stable_identifiers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::fs;

    const LSBLK_OUTPUT: &str = "sda\n\
        sda1 /boot\n\
        sda2 /\n\
        sdb\n\
        sdc [SWAP]\n\
        nvme0n1   \n\
        \n\
        sr0 /run/media/cd rom\n";

    #[test]
    fn test_parse_unmounted_devices() {
        let devices = parse_unmounted_devices(LSBLK_OUTPUT);
        let names: Vec<&str> = devices.iter().map(String::as_str).collect();
        assert_eq!(names, vec!["nvme0n1", "sda", "sdb"]);
    }

    #[test]
    fn test_mounted_devices_never_listed() {
        let devices = parse_unmounted_devices(LSBLK_OUTPUT);
        for mounted in ["sda1", "sda2", "sdc", "sr0"] {
            assert!(!devices.contains(mounted), "{} is mounted", mounted);
        }
    }

    #[test]
    fn test_parse_empty_listing() {
        assert!(parse_unmounted_devices("").is_empty());
        assert!(parse_unmounted_devices("\n  \n").is_empty());
    }

    #[test]
    fn test_missing_lsblk_fails() {
        let source = HostDeviceSource::new("/nonexistent/lsblk", "/nonexistent/*");
        let err = source.list_block_devices().unwrap_err();
        assert_matches!(err, Error::ToolInvocation { .. });
        assert!(err.aborts_cycle());
    }

    #[test]
    fn test_glob_device_ids() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("ata-X"), "").unwrap();
        fs::write(dir.path().join("wwn-0x1"), "").unwrap();

        let pattern = format!("{}/*", dir.path().display());
        let mut ids = glob_device_ids(&pattern).unwrap();
        ids.sort();
        assert_eq!(
            ids,
            vec![dir.path().join("ata-X"), dir.path().join("wwn-0x1")]
        );
    }

    #[test]
    fn test_glob_invalid_pattern() {
        let err = glob_device_ids("/dev/disk/by-id/[").unwrap_err();
        assert_matches!(err, Error::DeviceIdListing(_));
    }

    #[test]
    fn test_glob_missing_directory_is_empty() {
        let ids = glob_device_ids("/nonexistent/by-id/*").unwrap();
        assert!(ids.is_empty());
    }
}
