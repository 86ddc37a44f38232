//! Local Diskmaker - node-local device matching for local volumes
//!
//! Reconciles a declarative storage selection (device names, device IDs and
//! shared directories per storage class) against the block devices visible
//! on the node, and publishes the matches as stable symlinks that a local
//! volume provisioner consumes.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                        Reconciler (one cycle)                         │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────┐   ┌──────────────────┐   ┌──────────────────┐  │
//! │  │ Device Enumerator│──▶│ Selection Matcher│──▶│    Symlink       │  │
//! │  │ (lsblk, by-id)   │   │ (names/IDs/dirs) │   │  Materializer    │  │
//! │  └────────┬─────────┘   └────────┬─────────┘   └────────┬─────────┘  │
//! │           │   Stable-ID Resolver │                      │            │
//! │           └──────────────────────┴──────────┬───────────┘            │
//! │                                             ▼                        │
//! │                                   ┌──────────────────┐               │
//! │                                   │  Event Reporter  │               │
//! │                                   │ (log / kube API) │               │
//! │                                   └──────────────────┘               │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`reconciler`]: The per-tick entry point
//! - [`discovery`]: Device enumeration and stable-ID resolution
//! - [`matching`]: Selection matching and symlink materialization
//! - [`reporter`]: Event reporter implementations
//! - [`config`]: Declarative input and daemon settings
//! - [`crd`]: The LocalVolume resource events attach to
//! - [`domain`]: Core types and ports
//! - [`metrics`]: Prometheus metrics
//! - [`error`]: Error types and handling

pub mod config;
pub mod crd;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod reconciler;
pub mod reporter;

// Re-export commonly used types
pub use config::{DiskConfig, DiskMakerConfig, StorageClassDisks};

pub use crd::{LocalVolume, LocalVolumeSpec, LocalVolumeStatus};

pub use discovery::{DeviceEnumerator, HostDeviceSource};

pub use domain::ports::{
    Assignment, AssignmentTarget, BlockDeviceSource, DeviceInventory, DiskEvent, EventKind,
    EventReason, EventReporter, OwnerReference,
};

pub use error::{Error, ErrorAction, Result};

pub use matching::{generate_bind_name, LinkOutcome, SelectionMatcher, SymlinkMaterializer};

pub use metrics::DiskMakerMetrics;

pub use reconciler::{CycleReport, DiskMaker};

pub use reporter::{KubeEventReporter, LogReporter, NoopReporter, RecordingReporter};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
