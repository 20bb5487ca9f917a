//! Facts about the calling host the builder would otherwise read
//! ambiently.

use std::collections::BTreeMap;

use ocigen_common::constants::LISTEN_ENV_KEYS;
use ocigen_common::error::{OcigenError, Result};

/// Host facts passed into a build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostEnvironment {
    /// Hostname of the host.
    pub hostname: String,
    /// `LISTEN_*` socket-activation variables present in the caller's
    /// environment.
    pub listen_env: BTreeMap<String, String>,
    /// Whether the caller runs without host root.
    pub rootless: bool,
}

impl HostEnvironment {
    /// Reads the hostname, socket-activation variables, and effective UID
    /// of the current process.
    ///
    /// # Errors
    ///
    /// Returns an error if the hostname cannot be read.
    pub fn capture() -> Result<Self> {
        let hostname = nix::unistd::gethostname()
            .map_err(|e| OcigenError::Config {
                message: format!("cannot read host hostname: {e}"),
            })?
            .to_string_lossy()
            .into_owned();
        let listen_env = LISTEN_ENV_KEYS
            .iter()
            .filter_map(|key| std::env::var(key).ok().map(|v| ((*key).to_owned(), v)))
            .collect();
        Ok(Self {
            hostname,
            listen_env,
            rootless: !nix::unistd::geteuid().is_root(),
        })
    }

    /// Overrides rootless detection.
    #[must_use]
    pub fn with_rootless(mut self, rootless: bool) -> Self {
        self.rootless = rootless;
        self
    }
}
