//! Contracts of the external systems the resolvers consult.
//!
//! Implementations block; the generator runs one synchronous pass per
//! container and never retries a failed call.

use std::io;
use std::path::{Path, PathBuf};

use ocigen_common::error::Result;
use ocigen_common::types::{ContainerId, IdMap, NamespaceKind};

use crate::identity::ExecUser;

/// Locates managed volumes.
pub trait VolumeManager: Send + Sync {
    /// Returns the host mount point of volume `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the volume does not exist or is not mounted.
    fn mount_point(&self, name: &str) -> Result<PathBuf>;
}

/// Mounts images as read-only filesystem trees.
pub trait ImageStore: Send + Sync {
    /// Mounts `image` and returns the host path of its root.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is unknown or cannot be mounted.
    fn mount(&self, image: &str) -> Result<PathBuf>;
}

/// Resolves users and groups against user databases.
pub trait IdentityDb: Send + Sync {
    /// Resolves a user string against the databases under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if the user or group does not exist.
    fn lookup(&self, user: &str, root: &Path) -> Result<ExecUser>;

    /// Resolves a user name against the host databases.
    ///
    /// # Errors
    ///
    /// Returns an error if the user does not exist on the host.
    fn lookup_host(&self, user: &str) -> Result<ExecUser>;

    /// Resolves group names or numeric GIDs against the databases under `root`.
    ///
    /// # Errors
    ///
    /// Returns an error if a named group does not exist.
    fn groups(&self, groups: &[String], root: &Path) -> Result<Vec<u32>>;
}

/// Reports the ID ranges available to the current user namespace.
///
/// Errors are plain I/O errors so callers can tell a missing kernel
/// interface (`NotFound`) from a real failure.
pub trait IdRangeQuery: Send + Sync {
    /// Returns the available UID and GID ranges, keyed by in-namespace ID.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the kernel does not expose the mapping files.
    fn available_maps(&self) -> io::Result<(Vec<IdMap>, Vec<IdMap>)>;

    /// Returns how many GIDs the current user namespace can use.
    ///
    /// # Errors
    ///
    /// Returns an error if the GID mapping cannot be read.
    fn available_gids(&self) -> io::Result<u32>;
}

/// Security label engine: SELinux relabel and AppArmor profile checks.
pub trait SecurityLabeler: Send + Sync {
    /// Relabels `path` recursively with `label`; `shared` drops the MCS
    /// categories so several containers can use the content.
    ///
    /// # Errors
    ///
    /// Returns an error if the label cannot be applied.
    fn relabel(&self, path: &Path, label: &str, shared: bool) -> Result<()>;

    /// Verifies `profile` is usable and returns the name to put in the spec.
    ///
    /// # Errors
    ///
    /// Returns an error if the profile is not loaded or `AppArmor` is off.
    fn check_and_load_profile(&self, profile: &str) -> Result<String>;
}

/// Resolves the namespaces of other containers.
pub trait NamespaceLookup: Send + Sync {
    /// Returns the joinable namespace path of `kind` owned by `container`.
    ///
    /// # Errors
    ///
    /// Returns an error if the container is gone or not running.
    fn namespace_path(&self, container: &ContainerId, kind: NamespaceKind) -> Result<PathBuf>;
}
