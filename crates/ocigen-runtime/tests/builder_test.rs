//! Integration tests for descriptor generation.
//!
//! Every collaborator is an in-memory stub so each test controls exactly
//! what the builder sees:
//! 1. Identity, groups and environment
//! 2. Namespaces and ID mappings
//! 3. Mount ordering
//! 4. Fatal and non-fatal collaborator failures

#![allow(clippy::expect_used, clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use ocigen_common::container::{
    ContainerDescriptor, ContainerRuntimeState, NamedVolume, NamespaceSource,
};
use ocigen_common::error::{OcigenError, Result};
use ocigen_common::spec::{Hook, Hooks, Spec};
use ocigen_common::types::{ContainerId, IdMap, MountEntry, NamespaceKind};
use ocigen_core::identity::ExecUser;
use ocigen_core::provider::{
    IdRangeQuery, IdentityDb, ImageStore, NamespaceLookup, SecurityLabeler, VolumeManager,
};
use ocigen_runtime::builder::{Collaborators, RuntimeDescriptor, SpecGenerator};
use ocigen_runtime::environment::HostEnvironment;
use ocigen_runtime::provider::{
    CgroupPathPolicy, ContainerEdits, DeviceRegistry, DiscoveredHooks, HookDiscovery, SecretStore,
};

// ── Stubs ────────────────────────────────────────────────────────────

fn not_found(kind: &'static str, id: &str) -> OcigenError {
    OcigenError::NotFound {
        kind,
        id: id.to_owned(),
    }
}

struct Users;

impl IdentityDb for Users {
    fn lookup(&self, user: &str, _root: &Path) -> Result<ExecUser> {
        match user {
            "" => Ok(ExecUser::default()),
            "app" => Ok(ExecUser {
                uid: 1000,
                gid: 1000,
                home: "/home/app".into(),
                sgids: vec![50, 2000],
            }),
            "app:web" => Ok(ExecUser {
                uid: 1000,
                gid: 33,
                home: "/home/app".into(),
                sgids: Vec::new(),
            }),
            "nohome" => Ok(ExecUser {
                uid: 2000,
                gid: 2000,
                home: String::new(),
                sgids: Vec::new(),
            }),
            other => Err(not_found("user", other)),
        }
    }

    fn lookup_host(&self, user: &str) -> Result<ExecUser> {
        Err(not_found("user", user))
    }

    fn groups(&self, groups: &[String], _root: &Path) -> Result<Vec<u32>> {
        groups
            .iter()
            .map(|g| g.parse().map_err(|_| not_found("group", g)))
            .collect()
    }
}

struct NoRangeFiles;

impl IdRangeQuery for NoRangeFiles {
    fn available_maps(&self) -> io::Result<(Vec<IdMap>, Vec<IdMap>)> {
        Err(io::Error::from(io::ErrorKind::NotFound))
    }

    fn available_gids(&self) -> io::Result<u32> {
        Ok(65536)
    }
}

struct Volumes(BTreeMap<String, PathBuf>);

impl VolumeManager for Volumes {
    fn mount_point(&self, name: &str) -> Result<PathBuf> {
        self.0.get(name).cloned().ok_or_else(|| not_found("volume", name))
    }
}

struct NoImages;

impl ImageStore for NoImages {
    fn mount(&self, image: &str) -> Result<PathBuf> {
        Err(not_found("image", image))
    }
}

struct NoopLabeler;

impl SecurityLabeler for NoopLabeler {
    fn relabel(&self, _path: &Path, _label: &str, _shared: bool) -> Result<()> {
        Ok(())
    }

    fn check_and_load_profile(&self, profile: &str) -> Result<String> {
        Ok(profile.to_owned())
    }
}

struct Peers;

impl NamespaceLookup for Peers {
    fn namespace_path(&self, container: &ContainerId, kind: NamespaceKind) -> Result<PathBuf> {
        if container.as_str() == "peer" {
            Ok(Path::new("/proc/42/ns").join(kind.proc_name()))
        } else {
            Err(not_found("container", container.as_str()))
        }
    }
}

struct Secrets(BTreeMap<String, Vec<u8>>);

impl SecretStore for Secrets {
    fn lookup(&self, name: &str) -> Result<Vec<u8>> {
        self.0.get(name).cloned().ok_or_else(|| not_found("secret", name))
    }
}

struct StubHooks(Option<DiscoveredHooks>);

impl HookDiscovery for StubHooks {
    fn discover(&self, _spec: &Spec) -> Result<DiscoveredHooks> {
        self.0.clone().ok_or_else(|| OcigenError::HookSetupFailed {
            message: "hooks.d unreadable".into(),
        })
    }
}

struct StubDevices {
    refresh_fails: bool,
}

impl DeviceRegistry for StubDevices {
    fn refresh(&self) -> Result<()> {
        if self.refresh_fails {
            return Err(OcigenError::DeviceInjectionFailed {
                message: "broken.json: expected value".into(),
            });
        }
        Ok(())
    }

    fn inject(&self, _spec: &Spec, devices: &[String]) -> Result<ContainerEdits> {
        let mut edits = ContainerEdits::default();
        for device in devices {
            if device != "vendor.com/gpu=gpu0" {
                return Err(not_found("CDI device", device));
            }
            edits.env.push("GPU=0".into());
            edits
                .mounts
                .push(MountEntry::bind("/usr/lib/gpu", "/usr/lib/gpu", vec!["ro".into()]));
        }
        Ok(edits)
    }
}

struct FixedCgroup;

impl CgroupPathPolicy for FixedCgroup {
    fn compute_path(&self, descriptor: &ContainerDescriptor) -> Result<String> {
        Ok(format!("/ocigen_parent/ocigen-{}", descriptor.id))
    }
}

struct Harness {
    volumes: Volumes,
    secrets: Secrets,
    hooks: StubHooks,
    devices: StubDevices,
}

impl Harness {
    fn new() -> Self {
        Self {
            volumes: Volumes(BTreeMap::new()),
            secrets: Secrets(BTreeMap::new()),
            hooks: StubHooks(Some(DiscoveredHooks::default())),
            devices: StubDevices {
                refresh_fails: false,
            },
        }
    }

    fn build(
        &self,
        descriptor: &ContainerDescriptor,
        state: &ContainerRuntimeState,
        host: &HostEnvironment,
    ) -> Result<RuntimeDescriptor> {
        let collaborators = Collaborators {
            identity: &Users,
            id_ranges: &NoRangeFiles,
            volumes: &self.volumes,
            images: &NoImages,
            labeler: &NoopLabeler,
            namespaces: &Peers,
            secrets: &self.secrets,
            hooks: &self.hooks,
            devices: &self.devices,
            cgroup: &FixedCgroup,
        };
        SpecGenerator::new(collaborators, "ocigen").build(descriptor, state, host)
    }
}

fn fixture() -> (tempfile::TempDir, ContainerDescriptor, ContainerRuntimeState) {
    let dir = tempfile::tempdir().expect("tempdir");
    let rootfs = dir.path().join("rootfs");
    let static_dir = dir.path().join("static");
    std::fs::create_dir_all(&rootfs).expect("mkdir rootfs");
    std::fs::create_dir_all(&static_dir).expect("mkdir static");
    let mut descriptor = ContainerDescriptor::new(ContainerId::new("c0ffee"));
    descriptor.spec.process.args = vec!["/bin/sh".into()];
    let state = ContainerRuntimeState {
        mountpoint: rootfs,
        static_dir,
        ..ContainerRuntimeState::default()
    };
    (dir, descriptor, state)
}

fn host() -> HostEnvironment {
    HostEnvironment {
        hostname: "buildhost".into(),
        ..HostEnvironment::default()
    }
}

// ── Identity and environment ─────────────────────────────────────────

#[test]
fn listen_pid_is_rewritten_and_others_pass_through() {
    let (_dir, descriptor, state) = fixture();
    let mut host = host();
    let _ = host.listen_env.insert("LISTEN_PID".into(), "4821".into());
    let _ = host.listen_env.insert("LISTEN_FDS".into(), "2".into());

    let out = Harness::new().build(&descriptor, &state, &host).expect("build");
    assert_eq!(out.spec.process.env_value("LISTEN_PID"), Some("1"));
    assert_eq!(out.spec.process.env_value("LISTEN_FDS"), Some("2"));
    assert!(!out.spec.process.has_env("LISTEN_FDNAMES"));
}

#[test]
fn only_socket_activation_keys_are_forwarded() {
    let (_dir, descriptor, state) = fixture();
    let mut host = host();
    let _ = host.listen_env.insert("LISTEN_FDNAMES".into(), "web".into());
    let _ = host.listen_env.insert("LD_PRELOAD".into(), "/tmp/evil.so".into());

    let out = Harness::new().build(&descriptor, &state, &host).expect("build");
    assert_eq!(out.spec.process.env_value("LISTEN_FDNAMES"), Some("web"));
    assert!(!out.spec.process.has_env("LD_PRELOAD"));
}

#[test]
fn user_without_home_leaves_home_unset() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.user = "nohome".into();

    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.process.user.uid, 2000);
    assert!(!out.spec.process.has_env("HOME"));
}

#[test]
fn user_sets_ids_home_and_filtered_groups() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.user = "app".into();
    descriptor.id_mappings.gid_map = vec![IdMap::new(0, 100_000, 1001)];
    descriptor.groups = vec!["10".into()];

    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    let user = &out.spec.process.user;
    assert_eq!((user.uid, user.gid), (1000, 1000));
    assert_eq!(user.additional_gids, vec![1000, 10, 50]);
    assert_eq!(out.spec.process.env_value("HOME"), Some("/home/app"));
}

#[test]
fn explicit_group_skips_supplemental_groups() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.user = "app:web".into();

    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.process.user.gid, 33);
    assert_eq!(out.spec.process.user.additional_gids, vec![33]);
}

#[test]
fn empty_user_keeps_template_ids() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.spec.process.env.push("HOME=/custom".into());

    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.process.user.uid, 0);
    assert!(out.spec.process.user.additional_gids.is_empty());
    assert_eq!(out.spec.process.env_value("HOME"), Some("/custom"));
}

#[test]
fn umask_is_parsed_as_octal() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.umask = Some("0027".into());
    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.process.user.umask, Some(0o027));

    descriptor.umask = Some("089".into());
    let err = Harness::new().build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(err, OcigenError::Config { .. }));
}

#[test]
fn hostname_root_annotations_and_cgroup() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.hostname = "web-1".into();
    descriptor.read_only = true;
    descriptor
        .spec
        .add_or_replace_namespace(NamespaceKind::Uts, None);

    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.hostname.as_deref(), Some("web-1"));
    assert_eq!(out.spec.process.env_value("HOSTNAME"), Some("web-1"));
    let root = out.spec.root.as_ref().expect("root");
    assert_eq!(Path::new(&root.path), state.mountpoint);
    assert!(root.readonly);
    assert_eq!(
        out.spec.linux.cgroups_path.as_deref(),
        Some("/ocigen_parent/ocigen-c0ffee")
    );
    assert_eq!(out.spec.annotations["io.container.manager"], "ocigen");
    assert_eq!(out.spec.oci_version, "1.0.2");
}

#[test]
fn secrets_become_environment() {
    let (_dir, mut descriptor, state) = fixture();
    let _ = descriptor
        .env_secrets
        .insert("DB_PASSWORD".into(), "db-pass".into());
    let mut harness = Harness::new();
    let _ = harness.secrets.0.insert("db-pass".into(), b"hunter2".to_vec());

    let out = harness.build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.process.env_value("DB_PASSWORD"), Some("hunter2"));
}

// ── Namespaces ───────────────────────────────────────────────────────

#[test]
fn joining_user_namespace_synthesizes_single_mappings() {
    let (_dir, mut descriptor, state) = fixture();
    let _ = descriptor.namespaces.insert(
        NamespaceKind::User,
        NamespaceSource::Container(ContainerId::new("peer")),
    );
    let _ = descriptor.namespaces.insert(
        NamespaceKind::Ipc,
        NamespaceSource::Path("/run/ipc-ns".into()),
    );

    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.linux.uid_mappings, vec![IdMap::new(0, 0, 1)]);
    assert_eq!(out.spec.linux.gid_mappings, vec![IdMap::new(0, 0, 1)]);
    let user = out.spec.namespace(NamespaceKind::User).expect("user ns");
    assert_eq!(user.path.as_deref(), Some("/proc/42/ns/user"));
    let ipc = out.spec.namespace(NamespaceKind::Ipc).expect("ipc ns");
    assert_eq!(ipc.path.as_deref(), Some("/run/ipc-ns"));
}

#[test]
fn missing_peer_container_is_fatal() {
    let (_dir, mut descriptor, state) = fixture();
    let _ = descriptor.namespaces.insert(
        NamespaceKind::Net,
        NamespaceSource::Container(ContainerId::new("gone")),
    );
    let err = Harness::new().build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(
        err,
        OcigenError::NamespaceJoinFailed {
            kind: NamespaceKind::Net,
            ..
        }
    ));
}

// ── Mounts ───────────────────────────────────────────────────────────

#[test]
fn mounts_are_sorted_by_depth_with_cdi_mounts_included() {
    let (dir, mut descriptor, state) = fixture();
    let volume = dir.path().join("volumes/data/_data");
    std::fs::create_dir_all(&volume).expect("mkdir volume");
    descriptor.spec.mounts = vec![
        MountEntry::bind("/host/a/b/c", "/a/b/c", vec!["rbind".into()]),
        MountEntry::bind("/host/a", "/a", vec!["rbind".into()]),
    ];
    descriptor.named_volumes.push(NamedVolume {
        name: "data".into(),
        dest: "/srv/data".into(),
        options: Vec::new(),
    });
    descriptor.cdi_devices = vec!["vendor.com/gpu=gpu0".into()];
    let mut harness = Harness::new();
    let _ = harness.volumes.0.insert("data".into(), volume);

    let out = harness.build(&descriptor, &state, &host()).expect("build");
    let depths: Vec<usize> = out.spec.mounts.iter().map(MountEntry::depth).collect();
    assert!(depths.windows(2).all(|w| w[0] <= w[1]), "{depths:?}");
    assert!(out.spec.mount_exists("/srv/data"));
    assert!(out.spec.mount_exists("/usr/lib/gpu"));
    assert_eq!(out.spec.process.env_value("GPU"), Some("0"));
}

#[test]
fn duplicate_destination_keeps_first_claimant() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.spec.mounts = vec![
        MountEntry::bind("/first", "/shared", Vec::new()),
        MountEntry::bind("/second", "/shared/", Vec::new()),
    ];
    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    let shared: Vec<_> = out
        .spec
        .mounts
        .iter()
        .filter(|m| Path::new(&m.destination) == Path::new("/shared"))
        .collect();
    assert_eq!(shared.len(), 1);
    assert_eq!(shared[0].source, "/first");
}

// ── Failures ─────────────────────────────────────────────────────────

#[test]
fn unknown_volume_is_fatal() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.named_volumes.push(NamedVolume {
        name: "missing".into(),
        dest: "/data".into(),
        options: Vec::new(),
    });
    let err = Harness::new().build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(err, OcigenError::VolumeResolutionFailed { ref volume, .. } if volume == "missing"));
}

#[test]
fn missing_secret_is_fatal() {
    let (_dir, mut descriptor, state) = fixture();
    let _ = descriptor
        .env_secrets
        .insert("TOKEN".into(), "absent".into());
    let err = Harness::new().build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(err, OcigenError::SecretLookupFailed { ref secret, .. } if secret == "absent"));
}

#[test]
fn hook_discovery_failure_is_fatal() {
    let (_dir, descriptor, state) = fixture();
    let mut harness = Harness::new();
    harness.hooks = StubHooks(None);
    let err = harness.build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(err, OcigenError::HookSetupFailed { .. }));
}

#[test]
fn discovered_hooks_are_merged_and_extension_stages_returned() {
    let (_dir, descriptor, state) = fixture();
    let hook = Hook {
        path: "/usr/libexec/trace".into(),
        args: Vec::new(),
        env: Vec::new(),
        timeout: None,
    };
    let mut harness = Harness::new();
    harness.hooks = StubHooks(Some(DiscoveredHooks {
        hooks: Hooks {
            prestart: vec![hook.clone()],
            ..Hooks::default()
        },
        extension_stages: BTreeMap::from([("precreate".to_owned(), vec![hook.clone()])]),
    }));

    let out = harness.build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.hooks.prestart, vec![hook.clone()]);
    assert_eq!(out.extension_stage_hooks["precreate"], vec![hook]);
}

#[test]
fn cdi_injection_failure_is_fatal_but_refresh_failure_is_not() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.cdi_devices = vec!["vendor.com/gpu=gpu0".into()];
    let mut harness = Harness::new();
    harness.devices.refresh_fails = true;
    let out = harness.build(&descriptor, &state, &host()).expect("build");
    assert_eq!(out.spec.process.env_value("GPU"), Some("0"));

    descriptor.cdi_devices = vec!["vendor.com/gpu=gpu9".into()];
    let err = harness.build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(err, OcigenError::DeviceInjectionFailed { .. }));
}

#[test]
fn unknown_user_is_fatal() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.user = "nobody-here".into();
    let err = Harness::new().build(&descriptor, &state, &host()).unwrap_err();
    assert!(matches!(err, OcigenError::UserLookupFailed { .. }));
}

#[test]
fn template_is_left_untouched() {
    let (_dir, mut descriptor, state) = fixture();
    descriptor.user = "app".into();
    let before = descriptor.spec.clone();
    let out = Harness::new().build(&descriptor, &state, &host()).expect("build");
    assert_eq!(descriptor.spec, before);
    assert_ne!(out.spec, before);
    let json: serde_json::Value = serde_json::from_str(&out.to_json().expect("json")).expect("parse");
    assert_eq!(json["process"]["user"]["uid"], 1000);
}
