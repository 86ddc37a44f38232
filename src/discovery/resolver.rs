//! Stable-ID Resolver
//!
//! Maps raw device names to the stable identifier links that alias them,
//! and identifier links back to their devices.

use crate::error::{Error, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::trace;

/// Base name of a path as an owned string, empty when there is none
pub fn base_name(path: impl AsRef<Path>) -> String {
    path.as_ref()
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Find an identifier link that resolves to `device_name` (e.g. `sdb`).
///
/// The first match in `identifiers` order wins. When several identifiers
/// alias the same device any of them is an acceptable answer; callers must
/// not depend on which one is picked. Links that fail to resolve are skipped.
pub fn resolve_stable_id(device_name: &str, identifiers: &[PathBuf]) -> Result<PathBuf> {
    for id_path in identifiers {
        let device_path = match fs::canonicalize(id_path) {
            Ok(p) => p,
            Err(e) => {
                trace!("Skipping unresolvable device ID {}: {}", id_path.display(), e);
                continue;
            }
        };
        if base_name(&device_path) == device_name {
            return Ok(id_path.clone());
        }
    }

    Err(Error::ResolutionFailed {
        device: device_name.to_string(),
        reason: "no device ID links to it".into(),
    })
}

/// Resolve an identifier link to `(identifier, device path)`.
///
/// Fails when the link is missing or dangling.
pub fn resolve_by_id(id_path: &Path) -> Result<(PathBuf, PathBuf)> {
    let device_path = fs::canonicalize(id_path).map_err(|e| Error::ResolutionFailed {
        device: id_path.display().to_string(),
        reason: e.to_string(),
    })?;
    Ok((id_path.to_path_buf(), device_path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::os::unix::fs::symlink;

    struct Fixture {
        _dir: tempfile::TempDir,
        dev: PathBuf,
        by_id: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let dev = dir.path().join("dev");
        let by_id = dev.join("disk/by-id");
        fs::create_dir_all(&by_id).unwrap();
        for name in ["sdb", "sdc"] {
            fs::write(dev.join(name), "").unwrap();
        }
        symlink(dev.join("sdb"), by_id.join("ata-B")).unwrap();
        symlink("../../sdc", by_id.join("ata-C")).unwrap();
        symlink(dev.join("sdz"), by_id.join("ata-broken")).unwrap();
        Fixture {
            _dir: dir,
            dev,
            by_id,
        }
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("/dev/sdb"), "sdb");
        assert_eq!(base_name("sdb"), "sdb");
        assert_eq!(base_name("/"), "");
    }

    #[test]
    fn test_resolve_stable_id() {
        let f = fixture();
        let ids = vec![
            f.by_id.join("ata-broken"),
            f.by_id.join("ata-B"),
            f.by_id.join("ata-C"),
        ];

        assert_eq!(resolve_stable_id("sdb", &ids).unwrap(), f.by_id.join("ata-B"));
        // relative link target
        assert_eq!(resolve_stable_id("sdc", &ids).unwrap(), f.by_id.join("ata-C"));
    }

    #[test]
    fn test_resolve_stable_id_any_alias() {
        let f = fixture();
        symlink(f.dev.join("sdb"), f.by_id.join("wwn-B")).unwrap();
        let ids = vec![f.by_id.join("wwn-B"), f.by_id.join("ata-B")];

        let found = resolve_stable_id("sdb", &ids).unwrap();
        assert!(ids.contains(&found));
    }

    #[test]
    fn test_resolve_stable_id_missing() {
        let f = fixture();
        let ids = vec![f.by_id.join("ata-B")];

        let err = resolve_stable_id("sdd", &ids).unwrap_err();
        assert_matches!(err, Error::ResolutionFailed { .. });
    }

    #[test]
    fn test_resolve_by_id() {
        let f = fixture();
        let (id, device) = resolve_by_id(&f.by_id.join("ata-B")).unwrap();
        assert_eq!(id, f.by_id.join("ata-B"));
        assert_eq!(base_name(&device), "sdb");
    }

    #[test]
    fn test_resolve_by_id_broken_link() {
        let f = fixture();
        let err = resolve_by_id(&f.by_id.join("ata-broken")).unwrap_err();
        assert_matches!(err, Error::ResolutionFailed { .. });

        let err = resolve_by_id(&f.by_id.join("ata-absent")).unwrap_err();
        assert_matches!(err, Error::ResolutionFailed { .. });
    }
}
