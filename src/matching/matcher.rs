//! Selection Matcher
//!
//! Combines the declarative selection policy with the device inventory to
//! produce the storage class to device/directory assignments.

use crate::config::{DiskConfig, StorageClassDisks};
use crate::discovery::resolver::{base_name, resolve_by_id, resolve_stable_id};
use crate::domain::ports::{Assignment, DeviceInventory};
use crate::error::Error;
use crate::reporter::EventContext;
use std::collections::BTreeMap;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};

/// Mode for shared directories created on the host
pub const SHARED_DIR_MODE: u32 = 0o755;

/// Assignments per storage class
pub type AssignmentMap = BTreeMap<String, Vec<Assignment>>;

// =============================================================================
// Selection Matcher
// =============================================================================

/// Applies the per-class selection rules
pub struct SelectionMatcher<'a> {
    rootfs_dir: &'a Path,
    events: EventContext<'a>,
}

impl<'a> SelectionMatcher<'a> {
    pub fn new(rootfs_dir: &'a Path, events: EventContext<'a>) -> Self {
        Self { rootfs_dir, events }
    }

    /// Match every storage class in `config` against `inventory`.
    ///
    /// Per-entry failures are reported and skipped. A device selected by
    /// both name and ID is assigned twice; callers see both entries.
    pub fn match_all(&self, config: &DiskConfig, inventory: &DeviceInventory) -> AssignmentMap {
        let mut assignments = AssignmentMap::new();

        for (storage_class, disks) in &config.disks {
            let mut matched = Vec::new();
            matched.extend(self.match_device_names(storage_class, disks, inventory));
            matched.extend(self.match_device_ids(storage_class, disks, inventory));
            matched.extend(self.match_directories(storage_class, disks));

            debug!(
                "Storage class {} matched {} entries",
                storage_class,
                matched.len()
            );
            if !matched.is_empty() {
                assignments.insert(storage_class.clone(), matched);
            }
        }

        assignments
    }

    /// Devices selected by raw path, e.g. `/dev/sdb`
    pub fn match_device_names(
        &self,
        storage_class: &str,
        disks: &StorageClassDisks,
        inventory: &DeviceInventory,
    ) -> Vec<Assignment> {
        let mut matched = Vec::new();

        for device_name in &disks.device_names {
            let base = base_name(device_name);
            if !inventory.is_unmounted(&base) {
                continue;
            }

            match resolve_stable_id(&base, &inventory.stable_identifiers) {
                Ok(stable_id) => {
                    matched.push(Assignment::device(
                        storage_class,
                        device_name,
                        Some(stable_id),
                    ));
                }
                Err(e) => {
                    // No by-id link for this device, fall back to the raw path
                    warn!("Unable to find disk ID for {}: {}", device_name, e);
                    matched.push(Assignment::device(storage_class, device_name, None));
                }
            }
        }

        matched
    }

    /// Devices selected by stable identifier
    pub fn match_device_ids(
        &self,
        storage_class: &str,
        disks: &StorageClassDisks,
        inventory: &DeviceInventory,
    ) -> Vec<Assignment> {
        let mut matched = Vec::new();

        for device_id in &disks.device_ids {
            let (stable_id, device_path) = match resolve_by_id(Path::new(device_id)) {
                Ok(resolved) => resolved,
                Err(e) => {
                    self.events.emit_error(&e, Some(device_id.clone()));
                    continue;
                }
            };

            // Mounted or otherwise claimed devices are left alone
            if !inventory.is_unmounted(&base_name(&device_path)) {
                debug!(
                    "Device {} for {} is not an unmounted disk",
                    device_path.display(),
                    device_id
                );
                continue;
            }

            matched.push(Assignment::device(
                storage_class,
                device_path,
                Some(stable_id),
            ));
        }

        matched
    }

    /// Shared directories under the host root, created when missing
    pub fn match_directories(
        &self,
        storage_class: &str,
        disks: &StorageClassDisks,
    ) -> Vec<Assignment> {
        let mut matched = Vec::new();

        for directory in &disks.directory_paths {
            let shared_dir = host_path(self.rootfs_dir, directory);
            match ensure_shared_dir(&shared_dir) {
                Ok(()) => matched.push(Assignment::directory(storage_class, shared_dir)),
                Err(e) => self.events.emit_error(&e, None),
            }
        }

        matched
    }
}

/// Join a host path under the rootfs prefix, absolute or not
pub fn host_path(rootfs_dir: &Path, directory: &str) -> PathBuf {
    join_confined(rootfs_dir, directory)
}

/// Lexically clean `relative` and join it below `root`.
///
/// `.`, empty components and trailing separators are dropped, a leading
/// `/` is ignored and `..` never climbs above `root`, so every spelling of
/// the same location yields the same path.
pub fn join_confined(root: &Path, relative: impl AsRef<Path>) -> PathBuf {
    let mut parts: Vec<&std::ffi::OsStr> = Vec::new();
    for component in relative.as_ref().components() {
        match component {
            Component::Normal(part) => parts.push(part),
            Component::ParentDir => {
                parts.pop();
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    let mut path = root.to_path_buf();
    path.extend(parts);
    path
}

/// Verify an existing shared directory, or create it
fn ensure_shared_dir(path: &Path) -> crate::error::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => {
            // Follow links so a symlinked directory is accepted
            let metadata =
                fs::metadata(path).map_err(|e| Error::DirectoryVerificationFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })?;
            if metadata.is_dir() {
                Ok(())
            } else {
                Err(Error::NotADirectory {
                    path: path.display().to_string(),
                })
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Creating shared dir {}", path.display());
            DirBuilder::new()
                .recursive(true)
                .mode(SHARED_DIR_MODE)
                .create(path)
                .map_err(|e| Error::DirectoryCreationFailed {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                })
        }
        Err(e) => Err(Error::DirectoryVerificationFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        }),
    }
}
