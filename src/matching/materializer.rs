//! Symlink Materializer
//!
//! Publishes matched assignments as one symlink per device under
//! `<symlink root>/<storage class>/`. Existing entries are left untouched,
//! which makes every cycle safe to repeat.

use crate::discovery::resolver::base_name;
use crate::domain::ports::{Assignment, AssignmentTarget, DiskEvent, EventReason};
use crate::error::Error;
use crate::matching::matcher::{join_confined, AssignmentMap};
use crate::reporter::EventContext;
use serde::{Deserialize, Serialize};
use std::fs::{self, DirBuilder};
use std::os::unix::fs::{symlink, DirBuilderExt};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Mode for per-class symlink directories
pub const SYMLINK_DIR_MODE: u32 = 0o755;

/// Prefix of shared directory placeholder names
pub const BIND_NAME_PREFIX: &str = "local-shared-";

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

// =============================================================================
// Outcomes
// =============================================================================

/// Terminal state of one assignment within a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LinkOutcome {
    /// Something already exists at the link path; nothing was touched
    AlreadyPresent,
    /// A new symlink was created
    Created,
    /// The class directory or the link could not be created
    Failed,
    /// Shared directory whose placeholder does not exist yet. Bind mounting
    /// is not performed, so nothing is created.
    BindDeferred,
}

impl std::fmt::Display for LinkOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LinkOutcome::AlreadyPresent => write!(f, "already_present"),
            LinkOutcome::Created => write!(f, "created"),
            LinkOutcome::Failed => write!(f, "failed"),
            LinkOutcome::BindDeferred => write!(f, "bind_deferred"),
        }
    }
}

/// Outcome for one assignment, with the path that was checked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedLink {
    pub storage_class: String,
    pub path: PathBuf,
    pub outcome: LinkOutcome,
}

// =============================================================================
// Bind Names
// =============================================================================

/// Placeholder name for a shared directory in a storage class:
/// `local-shared-` followed by the lowercase hex FNV-1a (32 bit) hash of the
/// directory path concatenated with the class name.
pub fn generate_bind_name(directory: &Path, storage_class: &str) -> String {
    let mut hash = FNV32_OFFSET_BASIS;
    let dir = directory.to_string_lossy();
    for byte in dir.bytes().chain(storage_class.bytes()) {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(FNV32_PRIME);
    }
    format!("{}{:x}", BIND_NAME_PREFIX, hash)
}

// =============================================================================
// Symlink Materializer
// =============================================================================

/// Creates the per-class symlinks for a set of assignments
pub struct SymlinkMaterializer<'a> {
    symlink_root: &'a Path,
    events: EventContext<'a>,
}

impl<'a> SymlinkMaterializer<'a> {
    pub fn new(symlink_root: &'a Path, events: EventContext<'a>) -> Self {
        Self {
            symlink_root,
            events,
        }
    }

    /// Apply all assignments, class by class
    pub fn materialize(&self, assignments: &AssignmentMap) -> Vec<MaterializedLink> {
        let mut results = Vec::new();

        for (storage_class, entries) in assignments {
            let class_dir = join_confined(self.symlink_root, storage_class);
            if let Err(e) = create_class_dir(&class_dir) {
                self.events.emit_error(&e, None);
                results.extend(entries.iter().map(|_| MaterializedLink {
                    storage_class: storage_class.clone(),
                    path: class_dir.clone(),
                    outcome: LinkOutcome::Failed,
                }));
                continue;
            }

            for assignment in entries {
                results.push(self.materialize_one(&class_dir, assignment));
            }
        }

        results
    }

    fn materialize_one(&self, class_dir: &Path, assignment: &Assignment) -> MaterializedLink {
        let (path, outcome) = match &assignment.target {
            AssignmentTarget::Directory { path } => {
                let bind_path =
                    class_dir.join(generate_bind_name(path, &assignment.storage_class));
                let outcome = self.check_bind_placeholder(path, &bind_path);
                (bind_path, outcome)
            }
            AssignmentTarget::Device {
                device_path,
                stable_id,
            } => {
                let link_path = class_dir.join(base_name(device_path));
                let target = stable_id.as_deref().unwrap_or(device_path);
                let outcome = self.link_device(device_path, target, &link_path);
                (link_path, outcome)
            }
        };

        MaterializedLink {
            storage_class: assignment.storage_class.clone(),
            path,
            outcome,
        }
    }

    fn check_bind_placeholder(&self, directory: &Path, bind_path: &Path) -> LinkOutcome {
        if entry_exists(bind_path) {
            debug!("Bind path {} already exists", bind_path.display());
            return LinkOutcome::AlreadyPresent;
        }

        // TODO: bind mount `directory` onto `bind_path`
        debug!(
            "Shared dir {} awaits bind mount at {}",
            directory.display(),
            bind_path.display()
        );
        LinkOutcome::BindDeferred
    }

    fn link_device(&self, device_path: &Path, target: &Path, link_path: &Path) -> LinkOutcome {
        let device = device_path.display().to_string();
        let device_name = base_name(device_path);

        if entry_exists(link_path) {
            debug!("Symlink {} already exists", link_path.display());
            self.events.emit(DiskEvent::success(
                EventReason::DiskAlreadyLinked,
                format!("disk {} already linked at {}", device_name, link_path.display()),
                Some(device),
            ));
            return LinkOutcome::AlreadyPresent;
        }

        info!("Symlinking {} to {}", target.display(), link_path.display());
        match symlink(target, link_path) {
            Ok(()) => {
                self.events.emit(DiskEvent::success(
                    EventReason::FoundMatchingDisk,
                    format!("found matching disk {}", device_name),
                    Some(device),
                ));
                LinkOutcome::Created
            }
            Err(e) => {
                let err = Error::LinkCreationFailed {
                    link: link_path.display().to_string(),
                    target: target.display().to_string(),
                    reason: e.to_string(),
                };
                self.events.emit_error(&err, Some(device));
                LinkOutcome::Failed
            }
        }
    }
}

/// Existence check that does not follow the final link, so a dangling
/// symlink still counts as present
fn entry_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn create_class_dir(path: &Path) -> crate::error::Result<()> {
    DirBuilder::new()
        .recursive(true)
        .mode(SYMLINK_DIR_MODE)
        .create(path)
        .map_err(|e| Error::SymlinkDirCreationFailed {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::OwnerReference;
    use crate::reporter::RecordingReporter;
    use assert_matches::assert_matches;

    fn single(class: &str, assignment: Assignment) -> AssignmentMap {
        [(class.to_string(), vec![assignment])].into_iter().collect()
    }

    #[test]
    fn test_bind_name_known_values() {
        // FNV-1a 32 of the empty input is the offset basis
        assert_eq!(generate_bind_name(Path::new(""), ""), "local-shared-811c9dc5");
        // FNV-1a 32 of "a"
        assert_eq!(generate_bind_name(Path::new("a"), ""), "local-shared-e40c292c");
        assert_eq!(generate_bind_name(Path::new(""), "a"), "local-shared-e40c292c");
    }

    #[test]
    fn test_bind_name_deterministic() {
        let dir = Path::new("/rootfs/shared1");
        let a = generate_bind_name(dir, "nfs");
        let b = generate_bind_name(dir, "nfs");
        assert_eq!(a, b);
        assert!(a.starts_with(BIND_NAME_PREFIX));
        assert!(a[BIND_NAME_PREFIX.len()..]
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));

        assert_ne!(a, generate_bind_name(dir, "ssd"));
        assert_ne!(a, generate_bind_name(Path::new("/rootfs/shared2"), "nfs"));
    }

    #[test]
    fn test_create_link_to_stable_id() {
        let root = tempfile::tempdir().unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        let stable_id = PathBuf::from("/dev/disk/by-id/ata-X");
        let assignments = single(
            "ssd",
            Assignment::device("ssd", "/dev/sdb", Some(stable_id.clone())),
        );
        let results = materializer.materialize(&assignments);

        let link = root.path().join("ssd/sdb");
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, LinkOutcome::Created);
        assert_eq!(results[0].path, link);
        assert_eq!(fs::read_link(&link).unwrap(), stable_id);
        assert_eq!(reporter.count(EventReason::FoundMatchingDisk), 1);
        assert_eq!(reporter.events()[0].device.as_deref(), Some("/dev/sdb"));
    }

    #[test]
    fn test_create_link_to_raw_device() {
        let root = tempfile::tempdir().unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        let assignments = single("hdd", Assignment::device("hdd", "/dev/sdc", None));
        materializer.materialize(&assignments);

        assert_eq!(
            fs::read_link(root.path().join("hdd/sdc")).unwrap(),
            PathBuf::from("/dev/sdc")
        );
    }

    #[test]
    fn test_existing_link_untouched() {
        let root = tempfile::tempdir().unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        let assignments = single(
            "ssd",
            Assignment::device("ssd", "/dev/sdb", Some("/dev/disk/by-id/ata-X".into())),
        );
        materializer.materialize(&assignments);
        reporter.clear();

        let link = root.path().join("ssd/sdb");
        let before = fs::symlink_metadata(&link).unwrap().modified().unwrap();

        // a different target must not replace the existing link
        let changed = single(
            "ssd",
            Assignment::device("ssd", "/dev/sdb", Some("/dev/disk/by-id/wwn-Y".into())),
        );
        let results = materializer.materialize(&changed);

        assert_eq!(results[0].outcome, LinkOutcome::AlreadyPresent);
        assert_eq!(
            fs::read_link(&link).unwrap(),
            PathBuf::from("/dev/disk/by-id/ata-X")
        );
        assert_eq!(fs::symlink_metadata(&link).unwrap().modified().unwrap(), before);
        assert_eq!(reporter.count(EventReason::DiskAlreadyLinked), 1);
        assert_eq!(reporter.count(EventReason::FoundMatchingDisk), 0);
    }

    #[test]
    fn test_class_dir_failure_skips_class() {
        let root = tempfile::tempdir().unwrap();
        fs::write(root.path().join("ssd"), "in the way").unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        let mut assignments = AssignmentMap::new();
        assignments.insert(
            "ssd".into(),
            vec![
                Assignment::device("ssd", "/dev/sdb", None),
                Assignment::device("ssd", "/dev/sdc", None),
            ],
        );
        assignments.insert("hdd".into(), vec![Assignment::device("hdd", "/dev/sdd", None)]);

        let results = materializer.materialize(&assignments);

        let failed: Vec<_> = results
            .iter()
            .filter(|r| r.outcome == LinkOutcome::Failed)
            .collect();
        assert_eq!(failed.len(), 2);
        assert!(failed.iter().all(|r| r.storage_class == "ssd"));
        assert!(root.path().join("hdd/sdd").symlink_metadata().is_ok());
        assert_eq!(reporter.count(EventReason::ErrorCreatingSymLinkDir), 1);
        assert_eq!(reporter.count(EventReason::FoundMatchingDisk), 1);
    }

    #[test]
    fn test_link_creation_failure() {
        let root = tempfile::tempdir().unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        // link name longer than NAME_MAX fails with ENAMETOOLONG, even for root
        let device = format!("/dev/{}", "x".repeat(300));
        let results = materializer.materialize(&single("ssd", Assignment::device("ssd", &device, None)));

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].outcome, LinkOutcome::Failed);
        assert_eq!(reporter.count(EventReason::ErrorCreatingSymLink), 1);
        assert_eq!(reporter.count(EventReason::FoundMatchingDisk), 0);
        assert_eq!(reporter.events().len(), 1);
        assert_eq!(reporter.events()[0].device.as_deref(), Some(device.as_str()));
        assert_eq!(fs::read_dir(root.path().join("ssd")).unwrap().count(), 0);
    }

    #[test]
    fn test_absolute_class_name_stays_under_root() {
        let root = tempfile::tempdir().unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        let outside = tempfile::tempdir().unwrap();
        let class = format!("{}/ssd", outside.path().display());
        let results = materializer.materialize(&single(&class, Assignment::device(&class, "/dev/sdb", None)));

        assert_eq!(results[0].outcome, LinkOutcome::Created);
        assert!(results[0].path.starts_with(root.path()));
        assert!(fs::symlink_metadata(&results[0].path).is_ok());
        assert_eq!(fs::read_dir(outside.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_directory_assignment_is_deferred() {
        let root = tempfile::tempdir().unwrap();
        let reporter = RecordingReporter::new();
        let owner = OwnerReference::default();
        let materializer = SymlinkMaterializer::new(root.path(), EventContext::new(&reporter, &owner));

        let shared = PathBuf::from("/rootfs/shared1");
        let assignments = single("nfs", Assignment::directory("nfs", shared.clone()));
        let results = materializer.materialize(&assignments);

        let bind_path = root.path().join("nfs").join(generate_bind_name(&shared, "nfs"));
        assert_matches!(
            results.as_slice(),
            [MaterializedLink { outcome: LinkOutcome::BindDeferred, path, .. }] if path == &bind_path
        );
        assert!(!bind_path.exists());
        assert_eq!(fs::read_dir(root.path().join("nfs")).unwrap().count(), 0);
        assert!(reporter.events().is_empty());

        fs::write(&bind_path, "").unwrap();
        let results = materializer.materialize(&assignments);
        assert_eq!(results[0].outcome, LinkOutcome::AlreadyPresent);
    }
}
