//! OCI hook discovery from JSON definition files.
//!
//! Each `*.json` file in the hook directories holds one definition:
//!
//! ```json
//! {
//!   "version": "1.0.0",
//!   "hook": { "path": "/usr/libexec/oci/hooks.d/trace", "args": ["trace", "start"] },
//!   "when": { "annotations": { "^io\\.trace\\..*$": "true" }, "hasBindMounts": true },
//!   "stages": ["prestart", "precreate"]
//! }
//! ```
//!
//! A file in a later directory replaces a file of the same name in an
//! earlier one. Definitions apply in file name order. Patterns in `when`
//! are regular expressions that must match the whole string.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ocigen_common::error::{OcigenError, Result};
use ocigen_common::spec::{Hook, HookStage, Spec};
use ocigen_common::types::MountType;
use regex::Regex;
use serde::Deserialize;

use crate::provider::{DiscoveredHooks, HookDiscovery};

/// Schema version of supported hook files.
pub const HOOK_SCHEMA_VERSION: &str = "1.0.0";

/// Conditions under which a hook applies; any satisfied condition selects
/// the hook.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct When {
    /// Always apply.
    #[serde(default)]
    pub always: bool,
    /// Key pattern to value pattern, matched against annotations.
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Patterns matched against the first process argument.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Apply when the container has bind mounts.
    #[serde(default)]
    pub has_bind_mounts: bool,
}

impl When {
    fn is_empty(&self) -> bool {
        !self.always && self.annotations.is_empty() && self.commands.is_empty() && !self.has_bind_mounts
    }

    /// Compiles the patterns of these conditions.
    ///
    /// # Errors
    ///
    /// Returns [`OcigenError::HookSetupFailed`] if a pattern is not a valid
    /// regular expression.
    pub fn compile(&self) -> Result<WhenMatcher> {
        let annotations = self
            .annotations
            .iter()
            .map(|(key, value)| Ok::<_, OcigenError>((whole_match(key)?, whole_match(value)?)))
            .collect::<Result<_>>()?;
        let commands = self
            .commands
            .iter()
            .map(|c| whole_match(c))
            .collect::<Result<_>>()?;
        Ok(WhenMatcher {
            always: self.always,
            annotations,
            commands,
            has_bind_mounts: self.has_bind_mounts,
        })
    }
}

/// Compiles `pattern` so that it only matches complete strings.
fn whole_match(pattern: &str) -> Result<Regex> {
    Regex::new(&format!("^(?:{pattern})$")).map_err(|e| OcigenError::HookSetupFailed {
        message: format!("invalid pattern {pattern:?}: {e}"),
    })
}

/// Compiled form of [`When`].
#[derive(Debug, Clone)]
pub struct WhenMatcher {
    always: bool,
    annotations: Vec<(Regex, Regex)>,
    commands: Vec<Regex>,
    has_bind_mounts: bool,
}

impl WhenMatcher {
    /// Returns whether the conditions hold for `spec`.
    #[must_use]
    pub fn matches(&self, spec: &Spec) -> bool {
        if self.always {
            return true;
        }
        let annotation_match = self.annotations.iter().any(|(key, value)| {
            spec.annotations
                .iter()
                .any(|(k, v)| key.is_match(k) && value.is_match(v))
        });
        if annotation_match {
            return true;
        }
        if let Some(command) = spec.process.args.first() {
            if self.commands.iter().any(|c| c.is_match(command)) {
                return true;
            }
        }
        self.has_bind_mounts && spec.mounts.iter().any(|m| m.mount_type == MountType::Bind)
    }
}

/// A parsed hook definition file.
#[derive(Debug, Clone, Deserialize)]
pub struct HookDefinition {
    /// Schema version.
    pub version: String,
    /// Command to run.
    pub hook: Hook,
    /// Selection conditions.
    #[serde(default)]
    pub when: When,
    /// Stages the hook runs in.
    pub stages: Vec<String>,
}

impl HookDefinition {
    fn validate(&self, file: &Path) -> Result<()> {
        let invalid = |message: String| OcigenError::HookSetupFailed {
            message: format!("{}: {message}", file.display()),
        };
        if self.version != HOOK_SCHEMA_VERSION {
            return Err(invalid(format!("unsupported hook version {:?}", self.version)));
        }
        if !Path::new(&self.hook.path).is_absolute() {
            return Err(invalid(format!("hook path {:?} is not absolute", self.hook.path)));
        }
        if self.stages.is_empty() {
            return Err(invalid("no stages set".into()));
        }
        if self.when.is_empty() {
            return Err(invalid("no when conditions set".into()));
        }
        Ok(())
    }
}

/// A validated definition with its conditions compiled.
#[derive(Debug, Clone)]
pub struct LoadedHook {
    /// The definition as read.
    pub definition: HookDefinition,
    /// Compiled `when` conditions.
    pub matcher: WhenMatcher,
}

/// [`HookDiscovery`] over hook definition directories.
#[derive(Debug, Clone)]
pub struct FileHookDiscovery {
    dirs: Vec<PathBuf>,
}

impl FileHookDiscovery {
    /// Creates a discovery over `dirs`, lowest precedence first.
    #[must_use]
    pub const fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    /// Reads and compiles every definition, keyed by file name.
    ///
    /// # Errors
    ///
    /// Returns [`OcigenError::HookSetupFailed`] if a file cannot be read,
    /// parsed, validated or compiled.
    pub fn load(&self) -> Result<BTreeMap<String, LoadedHook>> {
        let mut definitions = BTreeMap::new();
        for dir in &self.dirs {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(OcigenError::HookSetupFailed {
                        message: format!("{}: {e}", dir.display()),
                    });
                }
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();
            for file in files {
                let raw = std::fs::read_to_string(&file).map_err(|e| OcigenError::HookSetupFailed {
                    message: format!("{}: {e}", file.display()),
                })?;
                let definition: HookDefinition =
                    serde_json::from_str(&raw).map_err(|e| OcigenError::HookSetupFailed {
                        message: format!("{}: {e}", file.display()),
                    })?;
                definition.validate(&file)?;
                let matcher = definition.when.compile().map_err(|e| OcigenError::HookSetupFailed {
                    message: format!("{}: {e}", file.display()),
                })?;
                let name = file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                if definitions
                    .insert(name.clone(), LoadedHook { definition, matcher })
                    .is_some()
                {
                    tracing::debug!(file = %name, dir = %dir.display(), "hook definition overridden");
                }
            }
        }
        Ok(definitions)
    }
}

impl HookDiscovery for FileHookDiscovery {
    fn discover(&self, spec: &Spec) -> Result<DiscoveredHooks> {
        let mut discovered = DiscoveredHooks::default();
        for (name, LoadedHook { definition, matcher }) in self.load()? {
            if !matcher.matches(spec) {
                continue;
            }
            tracing::debug!(file = %name, path = %definition.hook.path, "hook selected");
            for stage in &definition.stages {
                match HookStage::from_name(stage) {
                    Some(s) => discovered.hooks.stage_mut(s).push(definition.hook.clone()),
                    None => discovered
                        .extension_stages
                        .entry(stage.clone())
                        .or_default()
                        .push(definition.hook.clone()),
                }
            }
        }
        Ok(discovered)
    }
}
