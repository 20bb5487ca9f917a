//! Overlay mount entries and their per-build scratch directories.
//!
//! Scratch content lives under `<static_dir>/overlay/<uuid>` with `upper`,
//! `work` and `merge` subdirectories. Each directory is created with an
//! exclusive `mkdir`, so two builds never share one.

use std::fs::DirBuilder;
use std::io;
use std::os::unix::fs::{DirBuilderExt, MetadataExt};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, chown};
use ocigen_common::constants::OVERLAY_SCRATCH_DIR;
use ocigen_common::error::{OcigenError, Result};
use ocigen_common::types::{MountEntry, MountType};

use super::options::OverlayDirs;

const MAX_ALLOCATION_ATTEMPTS: usize = 8;

/// Scratch directories backing one overlay mount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScratchDir {
    /// `<static_dir>/overlay/<uuid>`
    pub content: PathBuf,
    /// Writable upper layer.
    pub upper: PathBuf,
    /// Overlay work directory.
    pub work: PathBuf,
    /// Merge point.
    pub merge: PathBuf,
}

fn mkdir_private(path: &Path) -> io::Result<()> {
    DirBuilder::new().mode(0o700).create(path)
}

fn chown_if_needed(path: &Path, uid: u32, gid: u32) -> Result<()> {
    let meta = std::fs::symlink_metadata(path).map_err(|e| OcigenError::io(path, e))?;
    if meta.uid() == uid && meta.gid() == gid {
        return Ok(());
    }
    chown(path, Some(Uid::from_raw(uid)), Some(Gid::from_raw(gid))).map_err(|e| {
        OcigenError::OwnershipChangeFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        }
    })
}

/// Creates a fresh scratch directory under `static_dir`, owned by the
/// host IDs of container root.
///
/// # Errors
///
/// Returns an I/O error if the directories cannot be created, or
/// [`OcigenError::OwnershipChangeFailed`] if they cannot be chowned.
pub fn allocate_scratch(static_dir: &Path, root_uid: u32, root_gid: u32) -> Result<ScratchDir> {
    let parent = static_dir.join(OVERLAY_SCRATCH_DIR);
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(&parent)
        .map_err(|e| OcigenError::io(&parent, e))?;

    let mut content = None;
    for _ in 0..MAX_ALLOCATION_ATTEMPTS {
        let candidate = parent.join(uuid::Uuid::new_v4().simple().to_string());
        match mkdir_private(&candidate) {
            Ok(()) => {
                content = Some(candidate);
                break;
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(OcigenError::io(&candidate, e)),
        }
    }
    let content = content.ok_or_else(|| {
        OcigenError::io(
            &parent,
            io::Error::new(io::ErrorKind::AlreadyExists, "no free scratch directory name"),
        )
    })?;

    let scratch = ScratchDir {
        upper: content.join("upper"),
        work: content.join("work"),
        merge: content.join("merge"),
        content,
    };
    chown_if_needed(&scratch.content, root_uid, root_gid)?;
    for dir in [&scratch.upper, &scratch.work, &scratch.merge] {
        mkdir_private(dir).map_err(|e| OcigenError::io(dir, e))?;
        chown_if_needed(dir, root_uid, root_gid)?;
    }

    tracing::debug!(path = %scratch.content.display(), "allocated overlay scratch directory");
    Ok(scratch)
}

/// Escapes the overlay option separators `:` and `,` in a path.
#[must_use]
pub fn escape_overlay_path(path: &Path) -> String {
    let raw = path.to_string_lossy();
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, ':' | ',') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn require_dir(lower: &Path, dir: &Path, what: &str) -> Result<()> {
    if dir.is_dir() {
        return Ok(());
    }
    Err(OcigenError::OverlayMountFailed {
        source_path: lower.to_path_buf(),
        message: format!("{what} {} does not exist", dir.display()),
    })
}

/// Builds a writable overlay of `lower` at `dest`.
///
/// User-provided `dirs` replace the scratch upper and work directories.
///
/// # Errors
///
/// Returns [`OcigenError::OverlayMountFailed`] if `lower` or a
/// user-provided directory does not exist.
pub fn overlay_mount(
    scratch: &ScratchDir,
    lower: &Path,
    dest: &str,
    dirs: Option<&OverlayDirs>,
) -> Result<MountEntry> {
    require_dir(lower, lower, "lower directory")?;
    let (upper, work) = match dirs {
        Some(dirs) => {
            let upper = PathBuf::from(&dirs.upper);
            let work = PathBuf::from(&dirs.work);
            require_dir(lower, &upper, "upperdir")?;
            require_dir(lower, &work, "workdir")?;
            (upper, work)
        }
        None => (scratch.upper.clone(), scratch.work.clone()),
    };
    let options = format!(
        "lowerdir={},upperdir={},workdir={},private",
        escape_overlay_path(lower),
        escape_overlay_path(&upper),
        escape_overlay_path(&work),
    );
    Ok(MountEntry::new(
        MountType::Overlay,
        "overlay",
        dest,
        vec![options],
    ))
}

/// Builds a read-only overlay of `lower` at `dest`, stacking the empty
/// scratch upper directory as an extra lower layer.
///
/// # Errors
///
/// Returns [`OcigenError::OverlayMountFailed`] if `lower` does not exist.
pub fn overlay_mount_read_only(scratch: &ScratchDir, lower: &Path, dest: &str) -> Result<MountEntry> {
    require_dir(lower, lower, "lower directory")?;
    let options = format!(
        "lowerdir={}:{},private",
        escape_overlay_path(lower),
        escape_overlay_path(&scratch.upper),
    );
    Ok(MountEntry::new(
        MountType::Overlay,
        "overlay",
        dest,
        vec![options],
    ))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;

    use super::*;

    fn ids() -> (u32, u32) {
        (nix::unistd::getuid().as_raw(), nix::unistd::getgid().as_raw())
    }

    #[test]
    fn scratch_has_private_subdirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (uid, gid) = ids();
        let scratch = allocate_scratch(dir.path(), uid, gid).unwrap();
        assert!(scratch.content.starts_with(dir.path().join("overlay")));
        for sub in [&scratch.upper, &scratch.work, &scratch.merge] {
            let meta = std::fs::metadata(sub).expect("stat");
            assert!(meta.is_dir());
            assert_eq!(meta.mode() & 0o777, 0o700);
        }
    }

    #[test]
    fn concurrent_allocations_are_unique() {
        let dir = Arc::new(tempfile::tempdir().expect("tempdir"));
        let (uid, gid) = ids();
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                std::thread::spawn(move || {
                    (0..16)
                        .map(|_| allocate_scratch(dir.path(), uid, gid).unwrap().content)
                        .collect::<Vec<_>>()
                })
            })
            .collect();
        let mut seen = HashSet::new();
        for handle in handles {
            for path in handle.join().expect("thread") {
                assert!(seen.insert(path), "scratch directory handed out twice");
            }
        }
        assert_eq!(seen.len(), 128);
    }

    #[test]
    fn separators_are_escaped() {
        assert_eq!(escape_overlay_path(Path::new("/a:b,c")), r"/a\:b\,c");
        assert_eq!(escape_overlay_path(Path::new("/plain")), "/plain");
    }

    #[test]
    fn writable_overlay_uses_scratch_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lower = tempfile::tempdir().expect("tempdir");
        let (uid, gid) = ids();
        let scratch = allocate_scratch(dir.path(), uid, gid).unwrap();
        let mount = overlay_mount(&scratch, lower.path(), "/data", None).unwrap();
        assert_eq!(mount.mount_type, MountType::Overlay);
        assert_eq!(mount.destination, "/data");
        assert_eq!(
            mount.options,
            vec![format!(
                "lowerdir={},upperdir={},workdir={},private",
                lower.path().display(),
                scratch.upper.display(),
                scratch.work.display()
            )]
        );
    }

    #[test]
    fn user_dirs_must_exist() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lower = tempfile::tempdir().expect("tempdir");
        let (uid, gid) = ids();
        let scratch = allocate_scratch(dir.path(), uid, gid).unwrap();
        let dirs = OverlayDirs {
            upper: "/nonexistent/upper".into(),
            work: "/nonexistent/work".into(),
        };
        let err = overlay_mount(&scratch, lower.path(), "/data", Some(&dirs)).unwrap_err();
        assert!(matches!(err, OcigenError::OverlayMountFailed { .. }));
    }

    #[test]
    fn missing_lower_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (uid, gid) = ids();
        let scratch = allocate_scratch(dir.path(), uid, gid).unwrap();
        assert!(overlay_mount_read_only(&scratch, &dir.path().join("gone"), "/img").is_err());
    }

    #[test]
    fn read_only_overlay_stacks_upper_as_lower() {
        let dir = tempfile::tempdir().expect("tempdir");
        let lower = tempfile::tempdir().expect("tempdir");
        let (uid, gid) = ids();
        let scratch = allocate_scratch(dir.path(), uid, gid).unwrap();
        let mount = overlay_mount_read_only(&scratch, lower.path(), "/img").unwrap();
        assert_eq!(
            mount.options,
            vec![format!(
                "lowerdir={}:{},private",
                lower.path().display(),
                scratch.upper.display()
            )]
        );
    }
}
