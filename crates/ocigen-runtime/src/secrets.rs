//! Secrets stored as one file per secret.

use std::path::PathBuf;

use ocigen_common::error::{OcigenError, Result};

use crate::provider::SecretStore;

/// [`SecretStore`] reading `<dir>/<name>`.
#[derive(Debug, Clone)]
pub struct FileSecretStore {
    dir: PathBuf,
}

impl FileSecretStore {
    /// Creates a store rooted at `dir`.
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

fn valid_name(name: &str) -> bool {
    !name.is_empty() && name != "." && name != ".." && !name.contains('/') && !name.contains('\0')
}

impl SecretStore for FileSecretStore {
    fn lookup(&self, name: &str) -> Result<Vec<u8>> {
        if !valid_name(name) {
            return Err(OcigenError::SecretLookupFailed {
                secret: name.to_owned(),
                message: "invalid secret name".into(),
            });
        }
        let path = self.dir.join(name);
        std::fs::read(&path).map_err(|e| OcigenError::SecretLookupFailed {
            secret: name.to_owned(),
            message: format!("{}: {e}", path.display()),
        })
    }
}
