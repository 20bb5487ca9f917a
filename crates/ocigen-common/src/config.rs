//! Global configuration model for the generator and its filesystem-backed
//! collaborators.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{OcigenError, Result};

/// Which cgroup manager the container engine delegates to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CgroupManager {
    /// Direct cgroupfs manipulation; paths are filesystem paths.
    #[default]
    Cgroupfs,
    /// systemd transient units; paths are `slice:prefix:name`.
    Systemd,
}

/// Root configuration for ocigen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OcigenConfig {
    /// Base directory for ocigen state and data.
    pub data_dir: PathBuf,
    /// Identity written into the container-manager annotation.
    pub manager_name: String,
    /// Cgroup manager used to compute cgroup paths.
    pub cgroup_manager: CgroupManager,
    /// Cgroup parent used when the container does not name one.
    pub cgroup_parent: Option<String>,
    /// Directories scanned for OCI hook definitions.
    pub hooks_dirs: Vec<PathBuf>,
    /// Directories scanned for CDI specs.
    pub cdi_spec_dirs: Vec<PathBuf>,
    /// Directory holding one file per secret.
    pub secrets_dir: PathBuf,
    /// Directory holding named volumes.
    pub volumes_dir: PathBuf,
    /// Directory holding unpacked images.
    pub images_dir: PathBuf,
    /// Host device directory scanned when all devices are requested.
    pub host_dev_dir: PathBuf,
    /// Forces rootless behavior on or off; detected from the UID when unset.
    pub rootless: Option<bool>,
}

impl Default for OcigenConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(constants::DEFAULT_DATA_DIR),
            manager_name: constants::DEFAULT_MANAGER_NAME.to_owned(),
            cgroup_manager: CgroupManager::default(),
            cgroup_parent: None,
            hooks_dirs: constants::DEFAULT_HOOKS_DIRS
                .iter()
                .map(PathBuf::from)
                .collect(),
            cdi_spec_dirs: constants::DEFAULT_CDI_SPEC_DIRS
                .iter()
                .map(PathBuf::from)
                .collect(),
            secrets_dir: PathBuf::from(constants::DEFAULT_SECRETS_DIR),
            volumes_dir: PathBuf::from(constants::DEFAULT_VOLUMES_DIR),
            images_dir: PathBuf::from(constants::DEFAULT_IMAGES_DIR),
            host_dev_dir: PathBuf::from(constants::DEFAULT_HOST_DEV_DIR),
            rootless: None,
        }
    }
}

impl OcigenConfig {
    /// Loads the configuration from a JSON file; missing keys take defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| OcigenError::io(path, e))?;
        let config: Self = serde_json::from_str(&raw)?;
        if config.manager_name.is_empty() {
            return Err(OcigenError::Config {
                message: "manager_name must not be empty".into(),
            });
        }
        tracing::debug!(path = %path.display(), "loaded configuration");
        Ok(config)
    }

    /// Loads the configuration from `path` if given, else returns defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if a given file cannot be read or parsed.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::load)
    }
}
