//! Contracts of the collaborators the builder consults after mount and
//! namespace resolution.
//!
//! Collaborators never mutate the spec they are shown; they return what
//! they want added and the builder merges it.

use std::collections::BTreeMap;

use ocigen_common::container::ContainerDescriptor;
use ocigen_common::error::Result;
use ocigen_common::spec::{Hook, Hooks, LinuxDevice, Spec};
use ocigen_common::types::MountEntry;

/// Secret payload lookup.
pub trait SecretStore: Send + Sync {
    /// Returns the payload of secret `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret does not exist or cannot be read.
    fn lookup(&self, name: &str) -> Result<Vec<u8>>;
}

/// Hooks selected for a container.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveredHooks {
    /// Hooks for the standard OCI stages.
    pub hooks: Hooks,
    /// Hooks for stages the OCI spec does not define, by stage name.
    pub extension_stages: BTreeMap<String, Vec<Hook>>,
}

/// OCI hook discovery.
pub trait HookDiscovery: Send + Sync {
    /// Selects the hooks that apply to `spec`.
    ///
    /// # Errors
    ///
    /// Returns an error if a hook definition cannot be read or is invalid.
    fn discover(&self, spec: &Spec) -> Result<DiscoveredHooks>;
}

/// Changes a CDI device asks for.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerEdits {
    /// Environment entries as `KEY=VALUE`.
    pub env: Vec<String>,
    /// Device nodes to create.
    pub device_nodes: Vec<LinuxDevice>,
    /// Extra mounts.
    pub mounts: Vec<MountEntry>,
    /// Extra hooks.
    pub hooks: Hooks,
}

impl ContainerEdits {
    /// Appends `other` after the edits already collected.
    pub fn append(&mut self, other: Self) {
        self.env.extend(other.env);
        self.device_nodes.extend(other.device_nodes);
        self.mounts.extend(other.mounts);
        self.hooks.merge(other.hooks);
    }
}

/// Container Device Interface registry.
pub trait DeviceRegistry: Send + Sync {
    /// Reloads device definitions.
    ///
    /// # Errors
    ///
    /// Returns an error if a definition cannot be read; callers treat this
    /// as non-fatal.
    fn refresh(&self) -> Result<()>;

    /// Resolves fully-qualified device references into container edits.
    ///
    /// # Errors
    ///
    /// Returns an error if a reference is malformed or unknown.
    fn inject(&self, spec: &Spec, devices: &[String]) -> Result<ContainerEdits>;
}

/// Cgroup path computation.
pub trait CgroupPathPolicy: Send + Sync {
    /// Returns the `linux.cgroupsPath` of the container; empty means the
    /// runtime decides.
    ///
    /// # Errors
    ///
    /// Returns an error if the configured parent is invalid for the manager.
    fn compute_path(&self, descriptor: &ContainerDescriptor) -> Result<String>;
}
