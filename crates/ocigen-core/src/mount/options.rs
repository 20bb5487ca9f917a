//! Typed view of per-mount option tokens.

use std::fmt;

use ocigen_common::error::{OcigenError, Result};

/// Mount propagation flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Propagation {
    /// `private`
    Private,
    /// `rprivate`
    RPrivate,
    /// `shared`
    Shared,
    /// `rshared`
    RShared,
    /// `slave`
    Slave,
    /// `rslave`
    RSlave,
    /// `unbindable`
    Unbindable,
    /// `runbindable`
    RUnbindable,
}

impl Propagation {
    /// Parses a propagation token.
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        Some(match token {
            "private" => Self::Private,
            "rprivate" => Self::RPrivate,
            "shared" => Self::Shared,
            "rshared" => Self::RShared,
            "slave" => Self::Slave,
            "rslave" => Self::RSlave,
            "unbindable" => Self::Unbindable,
            "runbindable" => Self::RUnbindable,
            _ => return None,
        })
    }

    /// Token form of the flag.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Private => "private",
            Self::RPrivate => "rprivate",
            Self::Shared => "shared",
            Self::RShared => "rshared",
            Self::Slave => "slave",
            Self::RSlave => "rslave",
            Self::Unbindable => "unbindable",
            Self::RUnbindable => "runbindable",
        }
    }

    /// Whether events propagate out of the mount.
    #[must_use]
    pub const fn is_shared(self) -> bool {
        matches!(self, Self::Shared | Self::RShared)
    }

    /// Whether events propagate into the mount only.
    #[must_use]
    pub const fn is_slave(self) -> bool {
        matches!(self, Self::Slave | Self::RSlave)
    }
}

/// A single classified mount option token.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MountOption {
    /// `O`: mount the source as an overlay.
    Overlay,
    /// `U`: chown the source to the exec user.
    Chown,
    /// `z` (shared) or `Z` (private): relabel the source.
    Relabel {
        /// Whether the label is shared between containers.
        shared: bool,
    },
    /// `upperdir=<path>`
    UpperDir(String),
    /// `workdir=<path>`
    WorkDir(String),
    /// A propagation flag.
    Propagation(Propagation),
    /// Any other token, handed to the runtime verbatim.
    PassThrough(String),
}

impl MountOption {
    /// Classifies one token.
    #[must_use]
    pub fn parse(token: &str) -> Self {
        match token {
            "O" => return Self::Overlay,
            "U" => return Self::Chown,
            "z" => return Self::Relabel { shared: true },
            "Z" => return Self::Relabel { shared: false },
            _ => {}
        }
        if let Some(p) = Propagation::from_token(token) {
            return Self::Propagation(p);
        }
        if let Some(dir) = token.strip_prefix("upperdir=") {
            return Self::UpperDir(dir.to_owned());
        }
        if let Some(dir) = token.strip_prefix("workdir=") {
            return Self::WorkDir(dir.to_owned());
        }
        Self::PassThrough(token.to_owned())
    }

    /// Whether the token is a marker consumed by the generator rather than
    /// a real mount flag.
    #[must_use]
    pub const fn is_marker(&self) -> bool {
        matches!(
            self,
            Self::Overlay | Self::Chown | Self::Relabel { .. } | Self::UpperDir(_) | Self::WorkDir(_)
        )
    }
}

impl fmt::Display for MountOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overlay => f.write_str("O"),
            Self::Chown => f.write_str("U"),
            Self::Relabel { shared: true } => f.write_str("z"),
            Self::Relabel { shared: false } => f.write_str("Z"),
            Self::UpperDir(dir) => write!(f, "upperdir={dir}"),
            Self::WorkDir(dir) => write!(f, "workdir={dir}"),
            Self::Propagation(p) => f.write_str(p.as_str()),
            Self::PassThrough(token) => f.write_str(token),
        }
    }
}

/// Classifies every token of an option list, preserving order.
#[must_use]
pub fn parse_options(options: &[String]) -> Vec<MountOption> {
    options.iter().map(|o| MountOption::parse(o)).collect()
}

/// Returns whether `options` carries the given marker.
#[must_use]
pub fn has_marker(options: &[String], marker: &MountOption) -> bool {
    options.iter().any(|o| MountOption::parse(o) == *marker)
}

/// User-provided overlay upper and work directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayDirs {
    /// Writable upper layer.
    pub upper: String,
    /// Overlay work directory.
    pub work: String,
}

/// Extracts the `upperdir=`/`workdir=` pair from an option list.
///
/// Returns `None` when neither is given, in which case scratch
/// directories are derived by the caller. Tokens starting with
/// `upperdir`/`workdir` but carrying no `=` are ignored. When a key
/// repeats, the last value wins.
///
/// # Errors
///
/// Returns [`OcigenError::InvalidOverlayOptions`] if a value is empty or
/// only one of the two is given.
pub fn overlay_upper_and_work_dir(options: &[String]) -> Result<Option<OverlayDirs>> {
    let mut upper: Option<&str> = None;
    let mut work: Option<&str> = None;
    for option in options {
        if option.starts_with("upperdir") {
            if let Some((_, value)) = option.split_once('=') {
                if value.is_empty() {
                    return Err(OcigenError::InvalidOverlayOptions {
                        message: "cannot accept empty value for upperdir".into(),
                    });
                }
                upper = Some(value);
            }
        }
        if option.starts_with("workdir") {
            if let Some((_, value)) = option.split_once('=') {
                if value.is_empty() {
                    return Err(OcigenError::InvalidOverlayOptions {
                        message: "cannot accept empty value for workdir".into(),
                    });
                }
                work = Some(value);
            }
        }
    }
    match (upper, work) {
        (None, None) => Ok(None),
        (Some(upper), Some(work)) => Ok(Some(OverlayDirs {
            upper: upper.to_owned(),
            work: work.to_owned(),
        })),
        _ => Err(OcigenError::InvalidOverlayOptions {
            message: "must specify both upperdir and workdir".into(),
        }),
    }
}
