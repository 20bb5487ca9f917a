//! Cgroup path policies for the cgroupfs and systemd managers.

use ocigen_common::config::{CgroupManager, OcigenConfig};
use ocigen_common::constants::{DEFAULT_CGROUPFS_PARENT, DEFAULT_SYSTEMD_SLICE};
use ocigen_common::container::ContainerDescriptor;
use ocigen_common::error::{OcigenError, Result};

use crate::provider::CgroupPathPolicy;

/// Cgroupfs paths: `<parent>/<manager>-<id>`.
///
/// Rootless callers cannot write the cgroupfs tree, so the path is left
/// empty and the runtime decides.
#[derive(Debug, Clone)]
pub struct CgroupfsPolicy {
    manager_name: String,
    default_parent: String,
    rootless: bool,
}

impl CgroupfsPolicy {
    /// Creates a policy; `default_parent` is used when the container names
    /// no parent.
    #[must_use]
    pub fn new(manager_name: impl Into<String>, default_parent: Option<String>, rootless: bool) -> Self {
        Self {
            manager_name: manager_name.into(),
            default_parent: default_parent.unwrap_or_else(|| DEFAULT_CGROUPFS_PARENT.to_owned()),
            rootless,
        }
    }
}

impl CgroupPathPolicy for CgroupfsPolicy {
    fn compute_path(&self, descriptor: &ContainerDescriptor) -> Result<String> {
        if self.rootless {
            return Ok(String::new());
        }
        let parent = if descriptor.cgroup_parent.is_empty() {
            self.default_parent.as_str()
        } else {
            descriptor.cgroup_parent.as_str()
        };
        if parent.ends_with(".slice") {
            return Err(OcigenError::CgroupPathFailed {
                message: format!("systemd slice {parent:?} used as cgroupfs parent"),
            });
        }
        Ok(format!(
            "{}/{}-{}",
            parent.trim_end_matches('/'),
            self.manager_name,
            descriptor.id
        ))
    }
}

/// systemd paths: `<slice>:<manager>:<id>`.
#[derive(Debug, Clone)]
pub struct SystemdPolicy {
    manager_name: String,
    default_slice: String,
}

impl SystemdPolicy {
    /// Creates a policy; `default_slice` is used when the container names
    /// no parent.
    #[must_use]
    pub fn new(manager_name: impl Into<String>, default_slice: Option<String>) -> Self {
        Self {
            manager_name: manager_name.into(),
            default_slice: default_slice.unwrap_or_else(|| DEFAULT_SYSTEMD_SLICE.to_owned()),
        }
    }
}

impl CgroupPathPolicy for SystemdPolicy {
    fn compute_path(&self, descriptor: &ContainerDescriptor) -> Result<String> {
        let slice = if descriptor.cgroup_parent.is_empty() {
            self.default_slice.as_str()
        } else {
            descriptor.cgroup_parent.as_str()
        };
        if !slice.ends_with(".slice") {
            return Err(OcigenError::CgroupPathFailed {
                message: format!("cgroup parent {slice:?} is not a systemd slice"),
            });
        }
        Ok(format!("{slice}:{}:{}", self.manager_name, descriptor.id))
    }
}

/// Selects the policy configured in `config`.
#[must_use]
pub fn policy_for(config: &OcigenConfig, rootless: bool) -> Box<dyn CgroupPathPolicy> {
    match config.cgroup_manager {
        CgroupManager::Cgroupfs => Box::new(CgroupfsPolicy::new(
            config.manager_name.clone(),
            config.cgroup_parent.clone(),
            rootless,
        )),
        CgroupManager::Systemd => Box::new(SystemdPolicy::new(
            config.manager_name.clone(),
            config.cgroup_parent.clone(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use ocigen_common::types::ContainerId;

    use super::*;

    fn descriptor() -> ContainerDescriptor {
        ContainerDescriptor::new(ContainerId::new("abc123"))
    }

    #[test]
    fn cgroupfs_paths() {
        let policy = CgroupfsPolicy::new("ocigen", None, false);
        let mut desc = descriptor();
        assert_eq!(policy.compute_path(&desc).unwrap(), "/ocigen_parent/ocigen-abc123");
        desc.cgroup_parent = "/custom/".into();
        assert_eq!(policy.compute_path(&desc).unwrap(), "/custom/ocigen-abc123");
        desc.cgroup_parent = "user.slice".into();
        assert!(policy.compute_path(&desc).is_err());
    }

    #[test]
    fn rootless_cgroupfs_leaves_path_empty() {
        let policy = CgroupfsPolicy::new("ocigen", None, true);
        assert_eq!(policy.compute_path(&descriptor()).unwrap(), "");
    }

    #[test]
    fn systemd_paths() {
        let policy = SystemdPolicy::new("ocigen", None);
        let mut desc = descriptor();
        assert_eq!(policy.compute_path(&desc).unwrap(), "machine.slice:ocigen:abc123");
        desc.cgroup_parent = "/not/a/slice".into();
        assert!(matches!(
            policy.compute_path(&desc),
            Err(OcigenError::CgroupPathFailed { .. })
        ));
    }

    #[test]
    fn config_selects_policy() {
        let mut config = OcigenConfig::default();
        config.cgroup_manager = CgroupManager::Systemd;
        let path = policy_for(&config, false).compute_path(&descriptor()).unwrap();
        assert!(path.starts_with("machine.slice:"));
    }
}
