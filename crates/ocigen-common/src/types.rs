//! Domain primitive types used across the ocigen workspace.

use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Serialize};

/// Unique identifier for a container instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ContainerId(String);

impl ContainerId {
    /// Creates a new container ID from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A contiguous linear mapping of `size` IDs starting at `container_id`
/// inside the namespace and at `host_id` outside of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IdMap {
    /// First ID inside the container.
    #[serde(rename = "containerID")]
    pub container_id: u32,
    /// First ID on the host.
    #[serde(rename = "hostID")]
    pub host_id: u32,
    /// Number of IDs in the range.
    pub size: u32,
}

impl IdMap {
    /// Creates a mapping entry.
    #[must_use]
    pub const fn new(container_id: u32, host_id: u32, size: u32) -> Self {
        Self {
            container_id,
            host_id,
            size,
        }
    }

    /// Returns whether `id` falls in the container side of this range.
    #[must_use]
    pub fn contains_container_id(&self, id: u32) -> bool {
        let start = u64::from(self.container_id);
        (start..start + u64::from(self.size)).contains(&u64::from(id))
    }

    /// Translates an in-container ID to its host ID, if covered.
    #[must_use]
    pub fn to_host(&self, id: u32) -> Option<u32> {
        if !self.contains_container_id(id) {
            return None;
        }
        u32::try_from(u64::from(self.host_id) + u64::from(id - self.container_id)).ok()
    }
}

/// Kind of Linux namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NamespaceKind {
    /// System V IPC and POSIX message queues.
    #[serde(rename = "ipc")]
    Ipc,
    /// Mount table.
    #[serde(rename = "mount")]
    Mount,
    /// Network stack.
    #[serde(rename = "network")]
    Net,
    /// Process IDs.
    #[serde(rename = "pid")]
    Pid,
    /// User and group IDs.
    #[serde(rename = "user")]
    User,
    /// Hostname and domain name.
    #[serde(rename = "uts")]
    Uts,
    /// Cgroup root.
    #[serde(rename = "cgroup")]
    Cgroup,
}

impl NamespaceKind {
    /// All kinds, in the order the generator resolves them.
    pub const ALL: [Self; 7] = [
        Self::Ipc,
        Self::Mount,
        Self::Net,
        Self::Pid,
        Self::User,
        Self::Uts,
        Self::Cgroup,
    ];

    /// Name used in the OCI runtime spec.
    #[must_use]
    pub const fn oci_name(self) -> &'static str {
        match self {
            Self::Ipc => "ipc",
            Self::Mount => "mount",
            Self::Net => "network",
            Self::Pid => "pid",
            Self::User => "user",
            Self::Uts => "uts",
            Self::Cgroup => "cgroup",
        }
    }

    /// Name of the namespace file under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Net => "net",
            other => other.oci_name(),
        }
    }
}

impl fmt::Display for NamespaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.oci_name())
    }
}

/// Filesystem type of a mount entry.
///
/// Types the generator acts on are named; everything else is carried
/// through untouched as [`MountType::Other`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MountType {
    /// Bind mount of an existing path.
    Bind,
    /// Memory-backed filesystem.
    Tmpfs,
    /// Layered overlay filesystem.
    Overlay,
    /// Any other filesystem type, passed through verbatim.
    Other(String),
}

impl MountType {
    /// Returns the type string used in the OCI runtime spec.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Bind => "bind",
            Self::Tmpfs => "tmpfs",
            Self::Overlay => "overlay",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for MountType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "bind" => Self::Bind,
            "tmpfs" => Self::Tmpfs,
            "overlay" => Self::Overlay,
            _ => Self::Other(value),
        }
    }
}

impl From<&str> for MountType {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<MountType> for String {
    fn from(value: MountType) -> Self {
        match value {
            MountType::Other(s) => s,
            named => named.as_str().to_owned(),
        }
    }
}

impl fmt::Display for MountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single mount of the runtime descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MountEntry {
    /// Absolute destination inside the container.
    pub destination: String,
    /// Filesystem type.
    #[serde(rename = "type")]
    pub mount_type: MountType,
    /// Source device or host path.
    #[serde(default)]
    pub source: String,
    /// Ordered mount options.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<String>,
}

impl MountEntry {
    /// Creates a mount entry.
    #[must_use]
    pub fn new(
        mount_type: impl Into<MountType>,
        source: impl Into<String>,
        destination: impl Into<String>,
        options: Vec<String>,
    ) -> Self {
        Self {
            destination: destination.into(),
            mount_type: mount_type.into(),
            source: source.into(),
            options,
        }
    }

    /// Creates a bind mount entry.
    #[must_use]
    pub fn bind(source: impl Into<String>, destination: impl Into<String>, options: Vec<String>) -> Self {
        Self::new(MountType::Bind, source, destination, options)
    }

    /// Returns whether the option list contains `option` verbatim.
    #[must_use]
    pub fn has_option(&self, option: &str) -> bool {
        self.options.iter().any(|o| o == option)
    }

    /// Number of path components in the lexically cleaned destination.
    ///
    /// `/` has depth 0, `/a` depth 1, `/a/b` depth 2.
    #[must_use]
    pub fn depth(&self) -> usize {
        let mut depth = 0_usize;
        for component in Path::new(&self.destination).components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::ParentDir => depth = depth.saturating_sub(1),
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }
        depth
    }
}
