//! Namespace directives and user namespace mappings.
//!
//! Each namespace kind is resolved independently into a create or join
//! directive. Kinds without a directive keep whatever the template spec
//! declares.

use std::io;
use std::path::PathBuf;

use ocigen_common::container::{ContainerDescriptor, ContainerRuntimeState, NamespaceSource};
use ocigen_common::error::{OcigenError, Result};
use ocigen_common::spec::Linux;
use ocigen_common::types::{ContainerId, IdMap, NamespaceKind};

use crate::idmap::fit_mappings;
use crate::provider::{IdRangeQuery, NamespaceLookup};

/// How a namespace is obtained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamespaceMode {
    /// A fresh namespace, optionally pre-created at `path`.
    Create {
        /// Namespace file created ahead of the container, if any.
        path: Option<PathBuf>,
    },
    /// Join the namespace file at this path.
    JoinPath(PathBuf),
    /// Join the namespace of another container.
    JoinContainer {
        /// Owner of the namespace.
        container: ContainerId,
        /// Resolved namespace file.
        path: PathBuf,
    },
}

/// Resolved namespace setting for one kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDirective {
    /// Namespace kind.
    pub kind: NamespaceKind,
    /// Create or join.
    pub mode: NamespaceMode,
}

impl NamespaceDirective {
    /// Path written to the namespace entry; `None` creates a namespace.
    #[must_use]
    pub fn spec_path(&self) -> Option<String> {
        let path = match &self.mode {
            NamespaceMode::Create { path } => path.as_ref()?,
            NamespaceMode::JoinPath(path) | NamespaceMode::JoinContainer { path, .. } => path,
        };
        Some(path.to_string_lossy().into_owned())
    }

    /// Whether the directive joins another container.
    #[must_use]
    pub const fn joins_container(&self) -> bool {
        matches!(self.mode, NamespaceMode::JoinContainer { .. })
    }
}

/// Directives and ID mappings for the runtime descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedNamespaces {
    /// One directive per kind that overrides the template.
    pub directives: Vec<NamespaceDirective>,
    /// Final UID mappings.
    pub uid_mappings: Vec<IdMap>,
    /// Final GID mappings.
    pub gid_mappings: Vec<IdMap>,
}

impl ResolvedNamespaces {
    /// Returns the directive of `kind`, if any.
    #[must_use]
    pub fn directive(&self, kind: NamespaceKind) -> Option<&NamespaceDirective> {
        self.directives.iter().find(|d| d.kind == kind)
    }
}

fn directive_for(
    kind: NamespaceKind,
    descriptor: &ContainerDescriptor,
    state: &ContainerRuntimeState,
    lookup: &dyn NamespaceLookup,
) -> Result<Option<NamespaceMode>> {
    match descriptor.namespaces.get(&kind) {
        Some(NamespaceSource::Container(container)) => {
            let path = lookup.namespace_path(container, kind).map_err(|e| {
                OcigenError::NamespaceJoinFailed {
                    kind,
                    container: container.to_string(),
                    message: e.to_string(),
                }
            })?;
            return Ok(Some(NamespaceMode::JoinContainer {
                container: container.clone(),
                path,
            }));
        }
        Some(NamespaceSource::Path(path)) => return Ok(Some(NamespaceMode::JoinPath(path.clone()))),
        None => {}
    }

    match kind {
        NamespaceKind::Net if descriptor.create_netns => {
            if descriptor.post_configure_netns {
                return Ok(Some(NamespaceMode::Create { path: None }));
            }
            let path = state.netns_path.clone().ok_or_else(|| OcigenError::Config {
                message: "network namespace requested but none was created".into(),
            })?;
            Ok(Some(NamespaceMode::Create { path: Some(path) }))
        }
        NamespaceKind::User if descriptor.id_mappings.auto_userns => {
            Ok(Some(NamespaceMode::Create { path: None }))
        }
        _ => Ok(None),
    }
}

/// Resolves one directive per configured kind.
///
/// # Errors
///
/// Returns [`OcigenError::NamespaceJoinFailed`] if another container's
/// namespace cannot be found, or a configuration error if an immediately
/// created network namespace has no path.
pub fn resolve_directives(
    descriptor: &ContainerDescriptor,
    state: &ContainerRuntimeState,
    lookup: &dyn NamespaceLookup,
) -> Result<Vec<NamespaceDirective>> {
    let mut directives = Vec::new();
    for kind in NamespaceKind::ALL {
        if let Some(mode) = directive_for(kind, descriptor, state, lookup)? {
            tracing::debug!(namespace = %kind, ?mode, "namespace directive");
            directives.push(NamespaceDirective { kind, mode });
        }
    }
    Ok(directives)
}

/// Computes UID/GID mappings for the chosen user namespace directive.
///
/// Joining another container's user namespace needs at least one entry
/// per table, so empty tables receive `{0, 0, 1}`. An automatically
/// sized user namespace replaces the template mappings with the
/// configured ones.
#[must_use]
pub fn user_mappings(
    user: Option<&NamespaceDirective>,
    descriptor: &ContainerDescriptor,
    template: &Linux,
) -> (Vec<IdMap>, Vec<IdMap>) {
    let mut uids = template.uid_mappings.clone();
    let mut gids = template.gid_mappings.clone();
    match user {
        Some(d) if d.joins_container() => {
            if uids.is_empty() {
                uids.push(IdMap::new(0, 0, 1));
            }
            if gids.is_empty() {
                gids.push(IdMap::new(0, 0, 1));
            }
        }
        Some(NamespaceDirective {
            mode: NamespaceMode::Create { .. },
            ..
        }) if descriptor.id_mappings.auto_userns => {
            uids.clone_from(&descriptor.id_mappings.uid_map);
            gids.clone_from(&descriptor.id_mappings.gid_map);
        }
        _ => {}
    }
    (uids, gids)
}

/// Narrows mappings to the ranges the current context owns.
///
/// Kernels without the mapping files are skipped.
///
/// # Errors
///
/// Returns [`OcigenError::IdMapUnavailable`] for any other query failure.
pub fn fit_to_available(
    uids: Vec<IdMap>,
    gids: Vec<IdMap>,
    ranges: &dyn IdRangeQuery,
) -> Result<(Vec<IdMap>, Vec<IdMap>)> {
    match ranges.available_maps() {
        Ok((available_uids, available_gids)) => Ok((
            fit_mappings(&uids, &available_uids),
            fit_mappings(&gids, &available_gids),
        )),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(error = %e, "user or group ID mappings not available");
            Ok((uids, gids))
        }
        Err(source) => Err(OcigenError::IdMapUnavailable { source }),
    }
}

/// Resolves directives and mappings in one pass.
///
/// # Errors
///
/// See [`resolve_directives`] and [`fit_to_available`].
pub fn resolve_namespaces(
    descriptor: &ContainerDescriptor,
    state: &ContainerRuntimeState,
    template: &Linux,
    lookup: &dyn NamespaceLookup,
    ranges: &dyn IdRangeQuery,
) -> Result<ResolvedNamespaces> {
    let directives = resolve_directives(descriptor, state, lookup)?;
    let user = directives.iter().find(|d| d.kind == NamespaceKind::User);
    let (uids, gids) = user_mappings(user, descriptor, template);
    let (uid_mappings, gid_mappings) = fit_to_available(uids, gids, ranges)?;
    Ok(ResolvedNamespaces {
        directives,
        uid_mappings,
        gid_mappings,
    })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;

    struct Peers;

    impl NamespaceLookup for Peers {
        fn namespace_path(&self, container: &ContainerId, kind: NamespaceKind) -> Result<PathBuf> {
            if container.as_str() == "peer" {
                Ok(Path::new("/proc/42/ns").join(kind.proc_name()))
            } else {
                Err(OcigenError::NotFound {
                    kind: "container",
                    id: container.to_string(),
                })
            }
        }
    }

    struct Ranges(io::ErrorKind, Option<(Vec<IdMap>, Vec<IdMap>)>);

    impl IdRangeQuery for Ranges {
        fn available_maps(&self) -> io::Result<(Vec<IdMap>, Vec<IdMap>)> {
            self.1.clone().ok_or_else(|| io::Error::from(self.0))
        }

        fn available_gids(&self) -> io::Result<u32> {
            Ok(65536)
        }
    }

    fn unsupported() -> Ranges {
        Ranges(io::ErrorKind::NotFound, None)
    }

    fn descriptor() -> ContainerDescriptor {
        ContainerDescriptor::new(ContainerId::new("c1"))
    }

    #[test]
    fn joins_peer_namespaces() {
        let mut desc = descriptor();
        let _ = desc
            .namespaces
            .insert(NamespaceKind::Ipc, NamespaceSource::Container(ContainerId::new("peer")));
        let _ = desc
            .namespaces
            .insert(NamespaceKind::Uts, NamespaceSource::Path("/run/uts/x".into()));
        let directives = resolve_directives(&desc, &ContainerRuntimeState::default(), &Peers).unwrap();
        assert_eq!(directives.len(), 2);
        assert_eq!(directives[0].kind, NamespaceKind::Ipc);
        assert_eq!(directives[0].spec_path().as_deref(), Some("/proc/42/ns/ipc"));
        assert_eq!(directives[1].mode, NamespaceMode::JoinPath("/run/uts/x".into()));
    }

    #[test]
    fn missing_peer_is_fatal() {
        let mut desc = descriptor();
        let _ = desc
            .namespaces
            .insert(NamespaceKind::Pid, NamespaceSource::Container(ContainerId::new("gone")));
        let err = resolve_directives(&desc, &ContainerRuntimeState::default(), &Peers).unwrap_err();
        assert!(matches!(
            err,
            OcigenError::NamespaceJoinFailed { kind: NamespaceKind::Pid, .. }
        ));
    }

    #[test]
    fn network_namespace_creation_modes() {
        let mut desc = descriptor();
        desc.create_netns = true;
        let mut state = ContainerRuntimeState {
            netns_path: Some("/run/netns/c1".into()),
            ..ContainerRuntimeState::default()
        };
        let directives = resolve_directives(&desc, &state, &Peers).unwrap();
        assert_eq!(directives[0].spec_path().as_deref(), Some("/run/netns/c1"));

        desc.post_configure_netns = true;
        let directives = resolve_directives(&desc, &state, &Peers).unwrap();
        assert_eq!(directives[0].mode, NamespaceMode::Create { path: None });
        assert_eq!(directives[0].spec_path(), None);

        desc.post_configure_netns = false;
        state.netns_path = None;
        assert!(resolve_directives(&desc, &state, &Peers).is_err());
    }

    #[test]
    fn joined_user_namespace_gets_placeholder_mappings() {
        let mut desc = descriptor();
        let _ = desc
            .namespaces
            .insert(NamespaceKind::User, NamespaceSource::Container(ContainerId::new("peer")));
        let resolved = resolve_namespaces(
            &desc,
            &ContainerRuntimeState::default(),
            &Linux::default(),
            &Peers,
            &unsupported(),
        )
        .unwrap();
        assert_eq!(resolved.uid_mappings, vec![IdMap::new(0, 0, 1)]);
        assert_eq!(resolved.gid_mappings, vec![IdMap::new(0, 0, 1)]);
    }

    #[test]
    fn joined_user_namespace_keeps_existing_mappings() {
        let mut desc = descriptor();
        let _ = desc
            .namespaces
            .insert(NamespaceKind::User, NamespaceSource::Container(ContainerId::new("peer")));
        let template = Linux {
            uid_mappings: vec![IdMap::new(0, 1000, 1)],
            ..Linux::default()
        };
        let (uids, gids) = user_mappings(
            resolve_directives(&desc, &ContainerRuntimeState::default(), &Peers)
                .unwrap()
                .first(),
            &desc,
            &template,
        );
        assert_eq!(uids, vec![IdMap::new(0, 1000, 1)]);
        assert_eq!(gids, vec![IdMap::new(0, 0, 1)]);
    }

    #[test]
    fn auto_userns_rebuilds_from_configured_tables() {
        let mut desc = descriptor();
        desc.id_mappings.auto_userns = true;
        desc.id_mappings.uid_map = vec![IdMap::new(0, 100_000, 1024)];
        desc.id_mappings.gid_map = vec![IdMap::new(0, 200_000, 1024)];
        let template = Linux {
            uid_mappings: vec![IdMap::new(0, 0, 65536)],
            ..Linux::default()
        };
        let resolved = resolve_namespaces(
            &desc,
            &ContainerRuntimeState::default(),
            &template,
            &Peers,
            &unsupported(),
        )
        .unwrap();
        assert_eq!(
            resolved.directive(NamespaceKind::User).map(|d| &d.mode),
            Some(&NamespaceMode::Create { path: None })
        );
        assert_eq!(resolved.uid_mappings, desc.id_mappings.uid_map);
        assert_eq!(resolved.gid_mappings, desc.id_mappings.gid_map);
    }

    #[test]
    fn mappings_are_fitted_to_available_ranges() {
        let available = vec![IdMap::new(0, 1000, 1), IdMap::new(1, 100_000, 65536)];
        let ranges = Ranges(io::ErrorKind::Other, Some((available.clone(), available)));
        let (uids, _) = fit_to_available(vec![IdMap::new(0, 0, 10)], Vec::new(), &ranges).unwrap();
        assert_eq!(uids, vec![IdMap::new(0, 0, 1), IdMap::new(1, 1, 9)]);
    }

    #[test]
    fn unavailable_ranges_other_than_missing_are_fatal() {
        let ranges = Ranges(io::ErrorKind::PermissionDenied, None);
        let err = fit_to_available(Vec::new(), Vec::new(), &ranges).unwrap_err();
        assert!(matches!(err, OcigenError::IdMapUnavailable { .. }));
    }
}
