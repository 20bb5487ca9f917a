//! Host path ownership changes for `U` mount options.
//!
//! Only entries whose owner differs from the target are touched, so
//! re-running on an already-owned tree is a no-op. Symlinks are never
//! followed; every change goes through `fchownat(2)` with
//! `AT_SYMLINK_NOFOLLOW`.

use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::fcntl::{AT_FDCWD, AtFlags};
use nix::unistd::{Gid, Uid, fchownat};
use ocigen_common::constants::PROTECTED_HOST_PATHS;
use ocigen_common::error::{OcigenError, Result};

/// Returns whether `path` is a system directory that must not be modified
/// recursively.
#[must_use]
pub fn is_protected_path(path: &Path) -> bool {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    PROTECTED_HOST_PATHS
        .iter()
        .any(|p| resolved == Path::new(p))
}

/// Changes ownership of `path` (and its contents when `recursive`) to
/// `uid`/`gid`.
///
/// # Errors
///
/// Returns [`OcigenError::OwnershipChangeFailed`] for protected paths or
/// when a `fchownat(2)` call fails.
pub fn change_host_path_ownership(path: &Path, recursive: bool, uid: u32, gid: u32) -> Result<()> {
    if is_protected_path(path) {
        return Err(OcigenError::OwnershipChangeFailed {
            path: path.to_path_buf(),
            message: "chowning host path is not allowed".into(),
        });
    }

    let mut pending: Vec<PathBuf> = vec![path.to_path_buf()];
    let mut changed = 0_usize;
    while let Some(current) = pending.pop() {
        let meta = std::fs::symlink_metadata(&current).map_err(|e| OcigenError::OwnershipChangeFailed {
            path: current.clone(),
            message: e.to_string(),
        })?;
        if meta.file_type().is_symlink() {
            continue;
        }
        if meta.uid() != uid || meta.gid() != gid {
            fchownat(
                AT_FDCWD,
                &current,
                Some(Uid::from_raw(uid)),
                Some(Gid::from_raw(gid)),
                AtFlags::AT_SYMLINK_NOFOLLOW,
            )
            .map_err(|e| OcigenError::OwnershipChangeFailed {
                path: current.clone(),
                message: e.to_string(),
            })?;
            changed += 1;
        }
        if recursive && meta.is_dir() {
            let entries = std::fs::read_dir(&current).map_err(|e| OcigenError::io(&current, e))?;
            for entry in entries {
                let entry = entry.map_err(|e| OcigenError::io(&current, e))?;
                pending.push(entry.path());
            }
        }
    }

    tracing::debug!(path = %path.display(), uid, gid, changed, "changed host path ownership");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn current_ids() -> (u32, u32) {
        (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    #[test]
    fn already_owned_tree_is_a_no_op() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("a/b")).expect("mkdir");
        std::fs::write(dir.path().join("a/b/file"), "x").expect("write");
        let (uid, gid) = current_ids();

        change_host_path_ownership(dir.path(), true, uid, gid).expect("first run");
        change_host_path_ownership(dir.path(), true, uid, gid).expect("second run");

        let meta = std::fs::metadata(dir.path().join("a/b/file")).expect("stat");
        assert_eq!((meta.uid(), meta.gid()), (uid, gid));
    }

    #[test]
    fn symlinks_are_not_followed() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::os::unix::fs::symlink("/etc", dir.path().join("etc-link")).expect("symlink");
        let (uid, gid) = current_ids();
        change_host_path_ownership(dir.path(), true, uid, gid).expect("chown");
    }

    #[test]
    fn link_target_outside_tree_keeps_its_owner() {
        let outside = tempfile::tempdir().expect("tempdir");
        let target = outside.path().join("target");
        std::fs::write(&target, "x").expect("write");
        let before = std::fs::metadata(&target).expect("stat");

        let dir = tempfile::tempdir().expect("tempdir");
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link).expect("symlink");
        let (uid, gid) = current_ids();
        change_host_path_ownership(&link, false, uid, gid).expect("chown link");

        let after = std::fs::metadata(&target).expect("stat");
        assert_eq!((after.uid(), after.gid()), (before.uid(), before.gid()));
        assert!(std::fs::symlink_metadata(&link).expect("lstat").file_type().is_symlink());
    }

    #[test]
    fn protected_paths_are_refused() {
        let (uid, gid) = current_ids();
        let err = change_host_path_ownership(Path::new("/etc"), true, uid, gid).unwrap_err();
        assert!(matches!(err, OcigenError::OwnershipChangeFailed { .. }));
        assert!(is_protected_path(Path::new("/usr/")));
        assert!(!is_protected_path(Path::new("/var/lib/ocigen")));
    }

    #[test]
    fn missing_path_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (uid, gid) = current_ids();
        assert!(change_host_path_ownership(&dir.path().join("nope"), false, uid, gid).is_err());
    }
}
