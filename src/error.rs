//! Error types for the Local Diskmaker
//!
//! Provides structured error types for device discovery, selection
//! matching, symlink materialization and the daemon surface around them.

use crate::domain::ports::EventReason;
use thiserror::Error;

/// Unified error type for the diskmaker
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Failed to read configuration {path}: {reason}")]
    ConfigLoad { path: String, reason: String },

    // =========================================================================
    // Kubernetes Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    // =========================================================================
    // Discovery Errors
    // =========================================================================
    #[error("Error running {tool}: {reason}")]
    ToolInvocation { tool: String, reason: String },

    #[error("Error listing device IDs: {0}")]
    DeviceIdListing(String),

    #[error("Unable to resolve device {device}: {reason}")]
    ResolutionFailed { device: String, reason: String },

    // =========================================================================
    // Shared Directory Errors
    // =========================================================================
    #[error("Error checking shared dir {path}: {reason}")]
    DirectoryVerificationFailed { path: String, reason: String },

    #[error("Shared dir {path} exists but is not a directory")]
    NotADirectory { path: String },

    #[error("Error creating shared dir {path}: {reason}")]
    DirectoryCreationFailed { path: String, reason: String },

    // =========================================================================
    // Symlink Errors
    // =========================================================================
    #[error("Error creating symlink dir {path}: {reason}")]
    SymlinkDirCreationFailed { path: String, reason: String },

    #[error("Error creating symlink {link} -> {target}: {reason}")]
    LinkCreationFailed {
        link: String,
        target: String,
        reason: String,
    },

    #[error("Found empty matching device list")]
    NoMatchingDevices,

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

/// How a failure propagates through a reconciliation cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Abandon the whole cycle, retry from scratch on the next tick
    AbortCycle,
    /// Skip only the device, directory or class that failed
    SkipEntry,
    /// Matching produced nothing, do not run the materializer
    SkipMaterialization,
}

impl Error {
    /// Determine how this error affects the current cycle
    pub fn action(&self) -> ErrorAction {
        match self {
            Error::ResolutionFailed { .. }
            | Error::DirectoryVerificationFailed { .. }
            | Error::NotADirectory { .. }
            | Error::DirectoryCreationFailed { .. }
            | Error::SymlinkDirCreationFailed { .. }
            | Error::LinkCreationFailed { .. } => ErrorAction::SkipEntry,

            Error::NoMatchingDevices => ErrorAction::SkipMaterialization,

            // Host tooling, configuration and everything else
            _ => ErrorAction::AbortCycle,
        }
    }

    /// Check if this error ends the current cycle early
    pub fn aborts_cycle(&self) -> bool {
        matches!(self.action(), ErrorAction::AbortCycle)
    }

    /// Event reason attached when this error is reported against the owner
    pub fn reason(&self) -> EventReason {
        match self {
            Error::ToolInvocation { .. } => EventReason::ErrorRunningBlockList,
            Error::DeviceIdListing(_) => EventReason::ErrorListingDeviceID,
            Error::ResolutionFailed { .. } => EventReason::ErrorResolvingDeviceID,
            Error::DirectoryVerificationFailed { .. } | Error::NotADirectory { .. } => {
                EventReason::ErrorVerifyingSharedDir
            }
            Error::DirectoryCreationFailed { .. } => EventReason::ErrorCreatingSharedDir,
            Error::SymlinkDirCreationFailed { .. } => EventReason::ErrorCreatingSymLinkDir,
            Error::LinkCreationFailed { .. } => EventReason::ErrorCreatingSymLink,
            _ => EventReason::ErrorFindingMatchingDisk,
        }
    }
}

/// Result type alias for the diskmaker
pub type Result<T> = std::result::Result<T, Error>;
