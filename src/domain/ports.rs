//! Domain Ports - Core types and trait definitions for the diskmaker
//!
//! These traits define the boundaries between the reconciliation core and
//! the host (block device listing) and the cluster (event sink).
//! Adapters implement these traits to provide concrete functionality.

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

// =============================================================================
// Owner Reference
// =============================================================================

/// Identity of the resource that a cycle's events are attached to
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OwnerReference {
    pub name: String,
    pub namespace: String,
    pub kind: String,
    pub api_version: String,
}

impl OwnerReference {
    /// `namespace/name` key used in logs
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Event severity, mirrors the Kubernetes event types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    Normal,
    Warning,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EventKind::Normal => write!(f, "Normal"),
            EventKind::Warning => write!(f, "Warning"),
        }
    }
}

/// Machine-readable reason code carried by every event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventReason {
    ErrorRunningBlockList,
    ErrorListingDeviceID,
    ErrorFindingMatchingDisk,
    ErrorResolvingDeviceID,
    ErrorVerifyingSharedDir,
    ErrorCreatingSharedDir,
    ErrorCreatingSymLinkDir,
    ErrorCreatingSymLink,
    FoundMatchingDisk,
    DiskAlreadyLinked,
}

impl std::fmt::Display for EventReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EventReason::ErrorRunningBlockList => "ErrorRunningBlockList",
            EventReason::ErrorListingDeviceID => "ErrorListingDeviceID",
            EventReason::ErrorFindingMatchingDisk => "ErrorFindingMatchingDisk",
            EventReason::ErrorResolvingDeviceID => "ErrorResolvingDeviceID",
            EventReason::ErrorVerifyingSharedDir => "ErrorVerifyingSharedDir",
            EventReason::ErrorCreatingSharedDir => "ErrorCreatingSharedDir",
            EventReason::ErrorCreatingSymLinkDir => "ErrorCreatingSymLinkDir",
            EventReason::ErrorCreatingSymLink => "ErrorCreatingSymLink",
            EventReason::FoundMatchingDisk => "FoundMatchingDisk",
            EventReason::DiskAlreadyLinked => "DiskAlreadyLinked",
        };
        write!(f, "{}", s)
    }
}

/// A single reconciliation outcome. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskEvent {
    pub kind: EventKind,
    pub reason: EventReason,
    pub message: String,
    /// Device (or device ID) the event is about, if any
    pub device: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl DiskEvent {
    /// Create a warning event
    pub fn error(reason: EventReason, message: impl Into<String>, device: Option<String>) -> Self {
        Self {
            kind: EventKind::Warning,
            reason,
            message: message.into(),
            device,
            timestamp: Utc::now(),
        }
    }

    /// Create a normal event
    pub fn success(reason: EventReason, message: impl Into<String>, device: Option<String>) -> Self {
        Self {
            kind: EventKind::Normal,
            reason,
            message: message.into(),
            device,
            timestamp: Utc::now(),
        }
    }

    /// Build a warning event from a cycle error
    pub fn from_error(err: &crate::error::Error, device: Option<String>) -> Self {
        Self::error(err.reason(), err.to_string(), device)
    }

    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Warning
    }
}

// =============================================================================
// Device Inventory
// =============================================================================

/// Host state gathered at the start of every cycle. Never persisted.
#[derive(Debug, Clone, Default)]
pub struct DeviceInventory {
    /// Base names (e.g. `sdb`) of devices without a mount point
    pub unmounted_devices: BTreeSet<String>,
    /// Stable identifier links (e.g. `/dev/disk/by-id/ata-X`) in listing order
    pub stable_identifiers: Vec<PathBuf>,
}

impl DeviceInventory {
    /// Check whether a device base name is currently unmounted
    pub fn is_unmounted(&self, base_name: &str) -> bool {
        self.unmounted_devices.contains(base_name)
    }
}

// =============================================================================
// Assignments
// =============================================================================

/// What an assignment points at. Exactly one of device or directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssignmentTarget {
    Device {
        /// Raw device path, e.g. `/dev/sdb`
        device_path: PathBuf,
        /// Stable identifier aliasing the device, when one was found
        stable_id: Option<PathBuf>,
    },
    Directory {
        /// Absolute host path under the rootfs prefix
        path: PathBuf,
    },
}

/// One matched device or directory for a storage class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub storage_class: String,
    pub target: AssignmentTarget,
}

impl Assignment {
    pub fn device(
        storage_class: impl Into<String>,
        device_path: impl Into<PathBuf>,
        stable_id: Option<PathBuf>,
    ) -> Self {
        Self {
            storage_class: storage_class.into(),
            target: AssignmentTarget::Device {
                device_path: device_path.into(),
                stable_id,
            },
        }
    }

    pub fn directory(storage_class: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            storage_class: storage_class.into(),
            target: AssignmentTarget::Directory { path: path.into() },
        }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.target, AssignmentTarget::Directory { .. })
    }
}

// =============================================================================
// Event Reporter Port
// =============================================================================

/// Sink for reconciliation events.
///
/// Fire-and-forget: implementations must not block the cycle on delivery
/// and swallow their own failures.
pub trait EventReporter: Send + Sync {
    fn report(&self, event: &DiskEvent, owner: &OwnerReference);
}

// =============================================================================
// Block Device Source Port
// =============================================================================

/// Port for the host's block device listing
pub trait BlockDeviceSource: Send + Sync {
    /// Raw two-column (`NAME MOUNTPOINT`) listing, one device per line,
    /// without a header
    fn list_block_devices(&self) -> Result<String>;

    /// Stable identifier links currently present on the host
    fn list_device_ids(&self) -> Result<Vec<PathBuf>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type EventReporterRef = Arc<dyn EventReporter>;
pub type BlockDeviceSourceRef = Arc<dyn BlockDeviceSource>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn test_event_reason_display() {
        assert_eq!(
            format!("{}", EventReason::FoundMatchingDisk),
            "FoundMatchingDisk"
        );
        assert_eq!(
            format!("{}", EventReason::ErrorRunningBlockList),
            "ErrorRunningBlockList"
        );
        assert_eq!(format!("{}", EventKind::Warning), "Warning");
    }

    #[test]
    fn test_event_from_error() {
        let err = Error::ResolutionFailed {
            device: "/dev/disk/by-id/ata-X".into(),
            reason: "No such file or directory".into(),
        };
        let event = DiskEvent::from_error(&err, Some("/dev/disk/by-id/ata-X".into()));
        assert!(event.is_error());
        assert_eq!(event.reason, EventReason::ErrorResolvingDeviceID);
        assert!(event.message.contains("ata-X"));
    }

    #[test]
    fn test_assignment_constructors() {
        let dev = Assignment::device("ssd", "/dev/sdb", None);
        assert!(!dev.is_directory());

        let dir = Assignment::directory("nfs", "/rootfs/shared1");
        assert!(dir.is_directory());
        assert_eq!(dir.storage_class, "nfs");
    }

    #[test]
    fn test_owner_key() {
        let owner = OwnerReference {
            name: "local-disks".into(),
            namespace: "local-storage".into(),
            ..Default::default()
        };
        assert_eq!(owner.key(), "local-storage/local-disks");
    }
}
