//! Unified error types for the ocigen workspace.
//!
//! Every variant aborts the build pass it is raised from. Variants carry
//! enough context (volume, namespace kind, mount) for the caller to report
//! an actionable container-creation failure.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::NamespaceKind;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum OcigenError {
    /// `upperdir=`/`workdir=` options are empty or not given as a pair.
    #[error("invalid overlay options: {message}")]
    InvalidOverlayOptions {
        /// Description of the malformed pairing.
        message: String,
    },

    /// The configured user could not be resolved.
    #[error("unable to find user {user}: {message}")]
    UserLookupFailed {
        /// User string as configured on the container.
        user: String,
        /// Description of the lookup failure.
        message: String,
    },

    /// A container ID is not covered by any ID-mapping range.
    #[error("container {kind} {id} is not mapped in the user namespace")]
    UnmappedId {
        /// Either `"uid"` or `"gid"`.
        kind: &'static str,
        /// The unmapped in-container ID.
        id: u32,
    },

    /// The ID ranges granted to the current context could not be read.
    #[error("cannot read available ID ranges: {source}")]
    IdMapUnavailable {
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A named volume could not be located.
    #[error("error retrieving volume {volume}: {message}")]
    VolumeResolutionFailed {
        /// Volume name.
        volume: String,
        /// Description of the failure.
        message: String,
    },

    /// An overlay mount could not be constructed.
    #[error("mounting overlay failed {source_path:?}: {message}")]
    OverlayMountFailed {
        /// Lower directory of the overlay.
        source_path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// An image volume could not be mounted.
    #[error("error mounting image volume {image}:{destination}: {message}")]
    ImageMountFailed {
        /// Image reference.
        image: String,
        /// Destination inside the container.
        destination: String,
        /// Description of the failure.
        message: String,
    },

    /// A namespace of another container could not be joined.
    #[error("cannot join {kind} namespace of container {container}: {message}")]
    NamespaceJoinFailed {
        /// Namespace kind being joined.
        kind: NamespaceKind,
        /// Container owning the namespace.
        container: String,
        /// Description of the failure.
        message: String,
    },

    /// OCI hook discovery failed.
    #[error("error setting up OCI hooks: {message}")]
    HookSetupFailed {
        /// Description of the failure.
        message: String,
    },

    /// A secret referenced from the environment could not be read.
    #[error("error looking up secret {secret}: {message}")]
    SecretLookupFailed {
        /// Secret name.
        secret: String,
        /// Description of the failure.
        message: String,
    },

    /// CDI devices could not be injected.
    #[error("error setting up CDI devices: {message}")]
    DeviceInjectionFailed {
        /// Description of the failure.
        message: String,
    },

    /// A mount destination could not be resolved inside the root filesystem.
    #[error("error resolving symlinks for mount destination {destination}: {message}")]
    SymlinkResolutionFailed {
        /// Destination as declared.
        destination: String,
        /// Description of the failure.
        message: String,
    },

    /// Ownership of a host path could not be changed.
    #[error("cannot chown {path:?}: {message}")]
    OwnershipChangeFailed {
        /// Path whose ownership was being changed.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A host path could not be relabeled.
    #[error("cannot relabel {path:?}: {message}")]
    RelabelFailed {
        /// Path being relabeled.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// A mandatory access control profile could not be loaded.
    #[error("cannot load profile {profile}: {message}")]
    ProfileLoadFailed {
        /// Profile name as configured.
        profile: String,
        /// Description of the failure.
        message: String,
    },

    /// The cgroup path policy rejected the container.
    #[error("cannot compute cgroup path: {message}")]
    CgroupPathFailed {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl OcigenError {
    /// Wraps an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, OcigenError>;
