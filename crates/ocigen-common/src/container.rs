//! Stored container configuration and runtime state consumed by the
//! generator.
//!
//! Both structures are read-only for the duration of a build; the caller
//! holds the container lock while the generator runs.

use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_STOP_SIGNAL;
use crate::spec::Spec;
use crate::types::{ContainerId, IdMap, NamespaceKind};

/// A managed volume mounted by name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamedVolume {
    /// Volume name known to the volume manager.
    pub name: String,
    /// Destination inside the container.
    pub dest: String,
    /// Mount options, including `O`, `U`, `z`/`Z` markers.
    #[serde(default)]
    pub options: Vec<String>,
}

/// An overlay layered over an arbitrary host directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayVolume {
    /// Host directory used as the lower layer.
    pub source: PathBuf,
    /// Destination inside the container.
    pub dest: String,
    /// Mount options, including `upperdir=`/`workdir=` and `U`.
    #[serde(default)]
    pub options: Vec<String>,
}

/// An image mounted as an overlay volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageVolume {
    /// Image reference resolved by the image store.
    pub source: String,
    /// Destination inside the container.
    pub dest: String,
    /// Whether writes are allowed (into a scratch upper directory).
    #[serde(default)]
    pub read_write: bool,
}

/// UID/GID mapping tables of the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdMappings {
    /// UID ranges.
    #[serde(default)]
    pub uid_map: Vec<IdMap>,
    /// GID ranges.
    #[serde(default)]
    pub gid_map: Vec<IdMap>,
    /// Whether the user namespace is sized automatically.
    #[serde(default)]
    pub auto_userns: bool,
}

/// Where a shared namespace comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NamespaceSource {
    /// Join the namespace of another container.
    Container(ContainerId),
    /// Join the namespace file at this path.
    Path(PathBuf),
}

/// Stored configuration of a container.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerDescriptor {
    /// Unique identifier.
    pub id: ContainerId,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Base OCI spec the descriptor is generated from.
    #[serde(default)]
    pub spec: Spec,
    /// User string: `user`, `uid`, `user:group`, `uid:gid`, or empty.
    #[serde(default)]
    pub user: String,
    /// Extra groups (names or GIDs) added to the process.
    #[serde(default)]
    pub groups: Vec<String>,
    /// Users resolved against the host databases when absent from the image.
    #[serde(default)]
    pub host_users: Vec<String>,
    /// Named volumes.
    #[serde(default)]
    pub named_volumes: Vec<NamedVolume>,
    /// Overlay volumes.
    #[serde(default)]
    pub overlay_volumes: Vec<OverlayVolume>,
    /// Image volumes.
    #[serde(default)]
    pub image_volumes: Vec<ImageVolume>,
    /// ID mapping tables.
    #[serde(default)]
    pub id_mappings: IdMappings,
    /// Namespace sharing, at most one source per kind.
    #[serde(default)]
    pub namespaces: BTreeMap<NamespaceKind, NamespaceSource>,
    /// Whether a network namespace is created for the container.
    #[serde(default)]
    pub create_netns: bool,
    /// Whether the network namespace is configured after the container exists.
    #[serde(default)]
    pub post_configure_netns: bool,
    /// CDI device references (`vendor/class=name`).
    #[serde(default)]
    pub cdi_devices: Vec<String>,
    /// Environment variable name to secret name.
    #[serde(default)]
    pub env_secrets: BTreeMap<String, String>,
    /// Octal umask string.
    #[serde(default)]
    pub umask: Option<String>,
    /// Whether the container runs systemd as init.
    #[serde(default)]
    pub systemd: bool,
    /// Whether every host device is exposed (privileged containers).
    #[serde(default)]
    pub mount_all_devices: bool,
    /// Whether the root filesystem is read-only.
    #[serde(default)]
    pub read_only: bool,
    /// Hostname used when the container has its own UTS namespace.
    #[serde(default)]
    pub hostname: String,
    /// Host directory backing `/dev/shm`.
    #[serde(default)]
    pub shm_dir: PathBuf,
    /// Creation time of the container.
    #[serde(default = "Utc::now")]
    pub created: DateTime<Utc>,
    /// Signal used to stop the container; `0` means unset.
    #[serde(default)]
    pub stop_signal: u32,
    /// SELinux process label.
    #[serde(default)]
    pub process_label: String,
    /// SELinux mount label.
    #[serde(default)]
    pub mount_label: String,
    /// Cgroup parent; the policy default is used when empty.
    #[serde(default)]
    pub cgroup_parent: String,
    /// Host path of the sd-notify socket proxied into the container.
    #[serde(default)]
    pub notify_socket: Option<PathBuf>,
}

impl ContainerDescriptor {
    /// Creates a descriptor with defaults for everything but the ID.
    #[must_use]
    pub fn new(id: ContainerId) -> Self {
        Self {
            name: id.to_string(),
            hostname: id.as_str().chars().take(12).collect(),
            id,
            spec: Spec::default(),
            user: String::new(),
            groups: Vec::new(),
            host_users: Vec::new(),
            named_volumes: Vec::new(),
            overlay_volumes: Vec::new(),
            image_volumes: Vec::new(),
            id_mappings: IdMappings::default(),
            namespaces: BTreeMap::new(),
            create_netns: false,
            post_configure_netns: false,
            cdi_devices: Vec::new(),
            env_secrets: BTreeMap::new(),
            umask: None,
            systemd: false,
            mount_all_devices: false,
            read_only: false,
            shm_dir: PathBuf::new(),
            created: Utc::now(),
            stop_signal: 0,
            process_label: String::new(),
            mount_label: String::new(),
            cgroup_parent: String::new(),
            notify_socket: None,
        }
    }

    /// Stop signal, falling back to `SIGTERM` when unset.
    #[must_use]
    pub const fn effective_stop_signal(&self) -> u32 {
        if self.stop_signal == 0 {
            DEFAULT_STOP_SIGNAL
        } else {
            self.stop_signal
        }
    }

    /// Returns whether the user string names a group explicitly.
    #[must_use]
    pub fn user_has_group(&self) -> bool {
        self.user.contains(':')
    }
}

/// Runtime state of a container, maintained outside the generator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContainerRuntimeState {
    /// Mountpoint of the container root filesystem.
    pub mountpoint: PathBuf,
    /// Implicit bind mounts, destination to host source.
    #[serde(default)]
    pub bind_mounts: BTreeMap<String, PathBuf>,
    /// Path of the network namespace created for the container.
    #[serde(default)]
    pub netns_path: Option<PathBuf>,
    /// Per-container directory for generated content.
    pub static_dir: PathBuf,
    /// Whether template-mount ownership changes already ran at creation.
    #[serde(default)]
    pub ownership_applied: bool,
}
