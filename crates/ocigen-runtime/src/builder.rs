//! Runtime descriptor generation.
//!
//! [`SpecGenerator::build`] starts from a copy of the container's template
//! spec and layers the resolved identity, mounts, namespaces and
//! environment on top of it. The template itself is never modified. The
//! first fatal error aborts the build and nothing is returned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use ocigen_common::constants::{
    DEFAULT_HOST_DEV_DIR, LISTEN_ENV_KEYS, NOTIFY_SOCKET_DIR, NOTIFY_SOCKET_NAME, OCI_VERSION,
};
use ocigen_common::container::{ContainerDescriptor, ContainerRuntimeState};
use ocigen_common::error::{OcigenError, Result};
use ocigen_common::spec::{Hook, Root, Spec};
use ocigen_common::types::{MountEntry, NamespaceKind};
use ocigen_core::identity::{ResolvedIdentity, resolve_identity};
use ocigen_core::idmap::{filter_supplemental_groups, gid_domain};
use ocigen_core::mount::pipeline::{finalize, resolve_volumes};
use ocigen_core::mount::MountContext;
use ocigen_core::namespace::resolve_namespaces;
use ocigen_core::provider::{
    IdRangeQuery, IdentityDb, ImageStore, NamespaceLookup, SecurityLabeler, VolumeManager,
};

use crate::annotations::apply_lifecycle_annotations;
use crate::environment::HostEnvironment;
use crate::provider::{CgroupPathPolicy, ContainerEdits, DeviceRegistry, HookDiscovery, SecretStore};
use crate::{devices, systemd};

/// External systems a build consults.
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    /// User and group databases.
    pub identity: &'a dyn IdentityDb,
    /// ID ranges owned by the calling user namespace.
    pub id_ranges: &'a dyn IdRangeQuery,
    /// Named volume lookup.
    pub volumes: &'a dyn VolumeManager,
    /// Image volume mounts.
    pub images: &'a dyn ImageStore,
    /// SELinux relabel and `AppArmor` profile checks.
    pub labeler: &'a dyn SecurityLabeler,
    /// Namespaces of other containers.
    pub namespaces: &'a dyn NamespaceLookup,
    /// Secret payloads.
    pub secrets: &'a dyn SecretStore,
    /// OCI hook selection.
    pub hooks: &'a dyn HookDiscovery,
    /// CDI devices.
    pub devices: &'a dyn DeviceRegistry,
    /// Cgroup path computation.
    pub cgroup: &'a dyn CgroupPathPolicy,
}

/// Result of a build.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeDescriptor {
    /// Complete OCI runtime configuration.
    pub spec: Spec,
    /// Hooks for stages the OCI spec does not define, by stage name. The
    /// caller runs them itself.
    pub extension_stage_hooks: BTreeMap<String, Vec<Hook>>,
}

impl RuntimeDescriptor {
    /// Serializes the spec as pretty-printed `config.json` content.
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the spec cannot be encoded.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.spec)?)
    }

    /// Writes the spec to `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn write_config(&self, path: &Path) -> Result<()> {
        std::fs::write(path, self.to_json()?).map_err(|e| OcigenError::io(path, e))?;
        tracing::info!(path = %path.display(), "wrote runtime configuration");
        Ok(())
    }
}

/// Builds runtime descriptors.
pub struct SpecGenerator<'a> {
    collaborators: Collaborators<'a>,
    manager_name: String,
    host_dev_dir: PathBuf,
}

impl<'a> SpecGenerator<'a> {
    /// Creates a generator that identifies itself as `manager_name`.
    #[must_use]
    pub fn new(collaborators: Collaborators<'a>, manager_name: impl Into<String>) -> Self {
        Self {
            collaborators,
            manager_name: manager_name.into(),
            host_dev_dir: PathBuf::from(DEFAULT_HOST_DEV_DIR),
        }
    }

    /// Scans `dir` instead of `/dev` when all devices are requested.
    #[must_use]
    pub fn with_host_dev_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.host_dev_dir = dir.into();
        self
    }

    /// Generates the runtime descriptor of one container.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error of any step: user lookup, volume,
    /// overlay or image resolution, namespace joins, ID mapping, symlink
    /// resolution, cgroup path, CDI injection, hook setup or secret lookup.
    #[allow(clippy::too_many_lines)]
    pub fn build(
        &self,
        descriptor: &ContainerDescriptor,
        state: &ContainerRuntimeState,
        host: &HostEnvironment,
    ) -> Result<RuntimeDescriptor> {
        let c = &self.collaborators;
        let mut g = descriptor.spec.clone();
        if g.oci_version.is_empty() {
            OCI_VERSION.clone_into(&mut g.oci_version);
        }

        if descriptor.mount_all_devices {
            devices::add_privileged_devices(&mut g, &self.host_dev_dir, host.rootless)?;
        }

        if let Some(profile) = g.process.apparmor_profile.clone().filter(|p| !p.is_empty()) {
            g.process.apparmor_profile = Some(c.labeler.check_and_load_profile(&profile)?);
        }

        if let Some(socket) = &descriptor.notify_socket {
            add_notify_socket(&mut g, socket);
        }

        let identity = resolve_identity(
            c.identity,
            &descriptor.user,
            &state.mountpoint,
            &descriptor.host_users,
            &descriptor.id_mappings.uid_map,
            &descriptor.id_mappings.gid_map,
        )?;

        let ctx = MountContext {
            descriptor,
            state,
            identity: &identity,
            volumes: c.volumes,
            images: c.images,
            labeler: c.labeler,
        };
        g.mounts = resolve_volumes(&ctx, std::mem::take(&mut g.mounts))?;

        if !descriptor.process_label.is_empty() {
            g.process.selinux_label = Some(descriptor.process_label.clone());
        }
        if !descriptor.mount_label.is_empty() {
            g.linux.mount_label = Some(descriptor.mount_label.clone());
        }

        self.apply_process_identity(&mut g, descriptor, state, &identity, host)?;

        let namespaces = resolve_namespaces(
            descriptor,
            state,
            &descriptor.spec.linux,
            c.namespaces,
            c.id_ranges,
        )?;
        for directive in &namespaces.directives {
            g.add_or_replace_namespace(directive.kind, directive.spec_path());
        }
        g.linux.uid_mappings = namespaces.uid_mappings;
        g.linux.gid_mappings = namespaces.gid_mappings;

        apply_hostname(&mut g, descriptor, host);

        g.root = Some(Root {
            path: state.mountpoint.to_string_lossy().into_owned(),
            readonly: descriptor.read_only,
        });

        apply_lifecycle_annotations(
            &mut g,
            descriptor,
            systemd::stop_signal(descriptor),
            &self.manager_name,
        );

        let cgroup_path = c.cgroup.compute_path(descriptor)?;
        if !cgroup_path.is_empty() {
            g.linux.cgroups_path = Some(cgroup_path);
        }

        if !descriptor.cdi_devices.is_empty() {
            self.inject_cdi_devices(&mut g, &descriptor.cdi_devices)?;
        }

        let resolved = finalize(&state.mountpoint, std::mem::take(&mut g.mounts))?;
        g.mounts = resolved.mounts;
        if let Some(propagation) = resolved.root_propagation {
            g.linux.rootfs_propagation = Some(propagation.as_str().to_owned());
        }

        let discovered = c.hooks.discover(&g).map_err(|e| match e {
            e @ OcigenError::HookSetupFailed { .. } => e,
            other => OcigenError::HookSetupFailed {
                message: other.to_string(),
            },
        })?;
        g.hooks.merge(discovered.hooks);

        for (key, secret) in &descriptor.env_secrets {
            let payload = c.secrets.lookup(secret).map_err(|e| match e {
                e @ OcigenError::SecretLookupFailed { .. } => e,
                other => OcigenError::SecretLookupFailed {
                    secret: secret.clone(),
                    message: other.to_string(),
                },
            })?;
            g.process.add_env(key, &String::from_utf8_lossy(&payload));
        }

        for (key, value) in host
            .listen_env
            .iter()
            .filter(|(k, _)| LISTEN_ENV_KEYS.contains(&k.as_str()))
        {
            let value = if key == "LISTEN_PID" { "1" } else { value.as_str() };
            g.process.add_env(key, value);
        }

        tracing::info!(
            container = %descriptor.id,
            mounts = g.mounts.len(),
            namespaces = g.linux.namespaces.len(),
            "generated runtime descriptor"
        );
        Ok(RuntimeDescriptor {
            spec: g,
            extension_stage_hooks: discovered.extension_stages,
        })
    }

    /// Sets `HOME`, UID/GID, umask, supplemental groups and systemd mode.
    fn apply_process_identity(
        &self,
        g: &mut Spec,
        descriptor: &ContainerDescriptor,
        state: &ContainerRuntimeState,
        identity: &ResolvedIdentity,
        host: &HostEnvironment,
    ) -> Result<()> {
        let c = &self.collaborators;
        let exec_user = &identity.exec_user;

        if !exec_user.home.is_empty() && !g.process.has_env("HOME") {
            g.process.add_env("HOME", &exec_user.home);
        }

        if !descriptor.user.is_empty() {
            g.process.user.uid = exec_user.uid;
            g.process.user.gid = exec_user.gid;
            g.process.add_additional_gid(exec_user.gid);
        }

        if let Some(umask) = &descriptor.umask {
            let parsed = u32::from_str_radix(umask, 8).map_err(|e| OcigenError::Config {
                message: format!("invalid umask {umask:?}: {e}"),
            })?;
            g.process.user.umask = Some(parsed);
        }

        if !descriptor.groups.is_empty() {
            for gid in c.identity.groups(&descriptor.groups, &state.mountpoint)? {
                g.process.add_additional_gid(gid);
            }
        }

        if descriptor.systemd {
            systemd::apply_systemd_mode(g, &self.manager_name);
        }

        if !descriptor.user_has_group() && !exec_user.sgids.is_empty() {
            let domain = gid_domain(&descriptor.id_mappings.gid_map, host.rootless, c.id_ranges)?;
            for gid in filter_supplemental_groups(&exec_user.sgids, &domain).kept {
                g.process.add_additional_gid(gid);
            }
        }
        Ok(())
    }

    /// Refreshes the CDI registry and merges the edits of `devices`.
    fn inject_cdi_devices(&self, g: &mut Spec, devices: &[String]) -> Result<()> {
        let registry = self.collaborators.devices;
        if let Err(e) = registry.refresh() {
            tracing::warn!(error = %e, "CDI registry refresh reported errors");
        }
        let edits = registry.inject(g, devices).map_err(|e| match e {
            e @ OcigenError::DeviceInjectionFailed { .. } => e,
            other => OcigenError::DeviceInjectionFailed {
                message: other.to_string(),
            },
        })?;
        apply_container_edits(g, edits);
        tracing::debug!(count = devices.len(), "injected CDI devices");
        Ok(())
    }
}

fn apply_container_edits(g: &mut Spec, edits: ContainerEdits) {
    let ContainerEdits {
        env,
        device_nodes,
        mounts,
        hooks,
    } = edits;
    for entry in env {
        let (key, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
        g.process.add_env(key, value);
    }
    for node in device_nodes {
        match g.linux.devices.iter_mut().find(|d| d.path == node.path) {
            Some(existing) => *existing = node,
            None => g.linux.devices.push(node),
        }
    }
    g.mounts.extend(mounts);
    g.hooks.merge(hooks);
}

/// Binds the directory of the notify socket and points `NOTIFY_SOCKET` at
/// it.
fn add_notify_socket(g: &mut Spec, socket: &Path) {
    let dir = socket.parent().unwrap_or(socket);
    g.mounts.push(MountEntry::bind(
        dir.to_string_lossy(),
        NOTIFY_SOCKET_DIR,
        vec!["bind".into(), "nosuid".into(), "noexec".into(), "nodev".into()],
    ));
    g.process.add_env(
        "NOTIFY_SOCKET",
        &format!("{NOTIFY_SOCKET_DIR}/{NOTIFY_SOCKET_NAME}"),
    );
}

/// Containers with their own UTS namespace get the configured hostname;
/// everything else sees the host's.
fn apply_hostname(g: &mut Spec, descriptor: &ContainerDescriptor, host: &HostEnvironment) {
    let own_uts = g
        .namespace(NamespaceKind::Uts)
        .is_some_and(|ns| ns.path.is_none());
    let hostname = if own_uts {
        g.hostname = Some(descriptor.hostname.clone());
        descriptor.hostname.as_str()
    } else {
        host.hostname.as_str()
    };
    if !g.process.has_env("HOSTNAME") {
        g.process.add_env("HOSTNAME", hostname);
    }
}
