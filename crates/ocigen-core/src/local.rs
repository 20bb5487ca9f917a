//! Directory-backed implementations of the volume, image, and namespace
//! collaborators.

use std::path::PathBuf;

use ocigen_common::error::{OcigenError, Result};
use ocigen_common::types::{ContainerId, NamespaceKind};

use crate::provider::{ImageStore, NamespaceLookup, VolumeManager};

/// Volumes stored as `<root>/<name>/_data`.
#[derive(Debug, Clone)]
pub struct DirVolumeManager {
    root: PathBuf,
}

impl DirVolumeManager {
    /// Creates a manager over `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl VolumeManager for DirVolumeManager {
    fn mount_point(&self, name: &str) -> Result<PathBuf> {
        if name.is_empty() || name.contains('/') || name == ".." {
            return Err(OcigenError::Config {
                message: format!("invalid volume name {name:?}"),
            });
        }
        let data = self.root.join(name).join("_data");
        if !data.is_dir() {
            return Err(OcigenError::NotFound {
                kind: "volume",
                id: name.to_owned(),
            });
        }
        Ok(data)
    }
}

/// Images unpacked as `<root>/<escaped-ref>/rootfs`.
///
/// References are escaped by replacing `/` and `:` with `_`.
#[derive(Debug, Clone)]
pub struct DirImageStore {
    root: PathBuf,
}

impl DirImageStore {
    /// Creates a store over `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory name an image reference is stored under.
    #[must_use]
    pub fn escape_reference(image: &str) -> String {
        image.replace(['/', ':'], "_")
    }
}

impl ImageStore for DirImageStore {
    fn mount(&self, image: &str) -> Result<PathBuf> {
        let rootfs = self.root.join(Self::escape_reference(image)).join("rootfs");
        if !rootfs.is_dir() {
            return Err(OcigenError::NotFound {
                kind: "image",
                id: image.to_owned(),
            });
        }
        tracing::debug!(image, path = %rootfs.display(), "image mounted");
        Ok(rootfs)
    }
}

/// Resolves namespaces through `<state_dir>/<id>/pid` and `/proc`.
#[derive(Debug, Clone)]
pub struct ProcNamespaceLookup {
    state_dir: PathBuf,
    proc_root: PathBuf,
}

impl ProcNamespaceLookup {
    /// Creates a lookup reading PID files below `state_dir`.
    #[must_use]
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            proc_root: PathBuf::from("/proc"),
        }
    }

    /// Overrides the `/proc` mount used to locate namespace files.
    #[must_use]
    pub fn with_proc_root(mut self, proc_root: impl Into<PathBuf>) -> Self {
        self.proc_root = proc_root.into();
        self
    }
}

impl NamespaceLookup for ProcNamespaceLookup {
    fn namespace_path(&self, container: &ContainerId, kind: NamespaceKind) -> Result<PathBuf> {
        let pid_file = self.state_dir.join(container.as_str()).join("pid");
        let raw = std::fs::read_to_string(&pid_file).map_err(|_| OcigenError::NotFound {
            kind: "running container",
            id: container.to_string(),
        })?;
        let pid: u32 = raw.trim().parse().map_err(|_| OcigenError::Config {
            message: format!("malformed pid file {}", pid_file.display()),
        })?;
        let path = self
            .proc_root
            .join(pid.to_string())
            .join("ns")
            .join(kind.proc_name());
        if std::fs::symlink_metadata(&path).is_err() {
            return Err(OcigenError::NotFound {
                kind: "namespace",
                id: path.display().to_string(),
            });
        }
        Ok(path)
    }
}
