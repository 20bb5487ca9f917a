//! OCI runtime spec model.
//!
//! Covers the parts of `config.json` the generator reads or writes. Fields
//! it does not interpret (seccomp, rlimits, capabilities, ...) survive a
//! round trip through the `extra` maps.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{IdMap, MountEntry, NamespaceKind};

/// OCI runtime configuration document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Spec {
    /// Version of the runtime spec.
    #[serde(default)]
    pub oci_version: String,
    /// Container process.
    #[serde(default)]
    pub process: Process,
    /// Root filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<Root>,
    /// Container hostname.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Ordered mount table.
    #[serde(default)]
    pub mounts: Vec<MountEntry>,
    /// Lifecycle hooks.
    #[serde(default, skip_serializing_if = "Hooks::is_empty")]
    pub hooks: Hooks,
    /// Arbitrary metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    /// Linux-specific configuration.
    #[serde(default)]
    pub linux: Linux,
    /// Fields not interpreted by the generator.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Spec {
    /// Returns the namespace entry of the given kind, if present.
    #[must_use]
    pub fn namespace(&self, kind: NamespaceKind) -> Option<&LinuxNamespace> {
        self.linux.namespaces.iter().find(|ns| ns.ns_type == kind)
    }

    /// Adds a namespace entry or replaces the existing one of the same kind.
    pub fn add_or_replace_namespace(&mut self, kind: NamespaceKind, path: Option<String>) {
        let entry = LinuxNamespace {
            ns_type: kind,
            path,
        };
        match self.linux.namespaces.iter_mut().find(|ns| ns.ns_type == kind) {
            Some(existing) => *existing = entry,
            None => self.linux.namespaces.push(entry),
        }
    }

    /// Returns whether a mount already claims `destination`.
    #[must_use]
    pub fn mount_exists(&self, destination: &str) -> bool {
        self.mounts.iter().any(|m| m.destination == destination)
    }

    /// Sets an annotation, replacing any previous value.
    pub fn add_annotation(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.annotations.insert(key.into(), value.into());
    }
}

/// Root filesystem of the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Root {
    /// Path to the root filesystem.
    pub path: String,
    /// Whether the root filesystem is mounted read-only.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub readonly: bool,
}

/// Container process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Process {
    /// Whether a terminal is attached.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub terminal: bool,
    /// Process identity.
    #[serde(default)]
    pub user: User,
    /// Command and arguments.
    #[serde(default)]
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` strings.
    #[serde(default)]
    pub env: Vec<String>,
    /// Working directory.
    #[serde(default)]
    pub cwd: String,
    /// AppArmor profile name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub apparmor_profile: Option<String>,
    /// SELinux process label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selinux_label: Option<String>,
    /// Fields not interpreted by the generator.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Process {
    /// Returns the value of environment variable `key`, if set.
    #[must_use]
    pub fn env_value(&self, key: &str) -> Option<&str> {
        self.env.iter().find_map(|entry| {
            let (k, v) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            (k == key).then_some(v)
        })
    }

    /// Returns whether environment variable `key` is set.
    #[must_use]
    pub fn has_env(&self, key: &str) -> bool {
        self.env_value(key).is_some()
    }

    /// Sets environment variable `key`, replacing an existing value in place.
    pub fn add_env(&mut self, key: &str, value: &str) {
        let entry = format!("{key}={value}");
        let existing = self
            .env
            .iter_mut()
            .find(|e| e.split_once('=').map_or(e.as_str(), |(k, _)| k) == key);
        match existing {
            Some(slot) => *slot = entry,
            None => self.env.push(entry),
        }
    }

    /// Adds a supplementary GID unless it is already present.
    pub fn add_additional_gid(&mut self, gid: u32) {
        if !self.user.additional_gids.contains(&gid) {
            self.user.additional_gids.push(gid);
        }
    }
}

/// Process identity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// User ID.
    #[serde(default)]
    pub uid: u32,
    /// Group ID.
    #[serde(default)]
    pub gid: u32,
    /// File mode creation mask.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umask: Option<u32>,
    /// Supplementary group IDs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub additional_gids: Vec<u32>,
}

/// Linux-specific configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Linux {
    /// Namespaces to create or join.
    #[serde(default)]
    pub namespaces: Vec<LinuxNamespace>,
    /// User ID mappings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub uid_mappings: Vec<IdMap>,
    /// Group ID mappings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub gid_mappings: Vec<IdMap>,
    /// Device nodes created in the container.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<LinuxDevice>,
    /// Resource limits and device cgroup rules.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<LinuxResources>,
    /// Cgroup path of the container.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cgroups_path: Option<String>,
    /// Propagation mode of the root mount.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rootfs_propagation: Option<String>,
    /// SELinux label applied to mounts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_label: Option<String>,
    /// Fields not interpreted by the generator.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A namespace entry; a `path` means join, no path means create.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxNamespace {
    /// Namespace kind.
    #[serde(rename = "type")]
    pub ns_type: NamespaceKind,
    /// Namespace file to join.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A device node created in the container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinuxDevice {
    /// Path inside the container.
    pub path: String,
    /// `c` for character, `b` for block devices.
    #[serde(rename = "type")]
    pub device_type: String,
    /// Major number.
    pub major: i64,
    /// Minor number.
    pub minor: i64,
    /// Permission bits.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_mode: Option<u32>,
    /// Owner UID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// Owner GID.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
}

/// Resource section; only device cgroup rules are interpreted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinuxResources {
    /// Device cgroup rules.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub devices: Vec<LinuxDeviceCgroup>,
    /// Fields not interpreted by the generator.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A device cgroup allow/deny rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinuxDeviceCgroup {
    /// Whether the rule allows access.
    pub allow: bool,
    /// Device type (`a`, `c`, `b`); all types when absent.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub device_type: Option<String>,
    /// Major number; all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub major: Option<i64>,
    /// Minor number; all when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minor: Option<i64>,
    /// Access string made of `r`, `w`, `m`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
}

/// A lifecycle hook command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hook {
    /// Absolute path of the executable.
    pub path: String,
    /// Arguments including `argv[0]`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment as `KEY=VALUE` strings.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    /// Timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<i64>,
}

/// OCI lifecycle stage a hook runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookStage {
    /// Deprecated stage run after the container is created.
    Prestart,
    /// Run in the runtime namespace after the container is created.
    CreateRuntime,
    /// Run in the container namespace after the container is created.
    CreateContainer,
    /// Run in the container namespace before the user process starts.
    StartContainer,
    /// Run after the user process started.
    Poststart,
    /// Run after the container is deleted.
    Poststop,
}

impl HookStage {
    /// Parses an OCI stage name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "prestart" => Some(Self::Prestart),
            "createRuntime" => Some(Self::CreateRuntime),
            "createContainer" => Some(Self::CreateContainer),
            "startContainer" => Some(Self::StartContainer),
            "poststart" => Some(Self::Poststart),
            "poststop" => Some(Self::Poststop),
            _ => None,
        }
    }
}

/// Hooks grouped by lifecycle stage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hooks {
    /// Deprecated prestart hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub prestart: Vec<Hook>,
    /// `createRuntime` hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_runtime: Vec<Hook>,
    /// `createContainer` hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub create_container: Vec<Hook>,
    /// `startContainer` hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub start_container: Vec<Hook>,
    /// `poststart` hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststart: Vec<Hook>,
    /// `poststop` hooks.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub poststop: Vec<Hook>,
}

impl Hooks {
    /// Returns whether no stage has any hook.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.prestart.is_empty()
            && self.create_runtime.is_empty()
            && self.create_container.is_empty()
            && self.start_container.is_empty()
            && self.poststart.is_empty()
            && self.poststop.is_empty()
    }

    /// Returns the hook list of `stage`.
    pub fn stage_mut(&mut self, stage: HookStage) -> &mut Vec<Hook> {
        match stage {
            HookStage::Prestart => &mut self.prestart,
            HookStage::CreateRuntime => &mut self.create_runtime,
            HookStage::CreateContainer => &mut self.create_container,
            HookStage::StartContainer => &mut self.start_container,
            HookStage::Poststart => &mut self.poststart,
            HookStage::Poststop => &mut self.poststop,
        }
    }

    /// Appends every hook of `other` to the matching stage of `self`.
    pub fn merge(&mut self, other: Self) {
        self.prestart.extend(other.prestart);
        self.create_runtime.extend(other.create_runtime);
        self.create_container.extend(other.create_container);
        self.start_container.extend(other.start_container);
        self.poststart.extend(other.poststart);
        self.poststop.extend(other.poststop);
    }
}
