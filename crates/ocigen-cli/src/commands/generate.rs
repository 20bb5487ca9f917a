//! `ocigen generate` — Build and write the runtime descriptor of a container.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Args;
use ocigen_common::config::OcigenConfig;
use ocigen_common::container::{ContainerDescriptor, ContainerRuntimeState};
use ocigen_core::identity::EtcIdentityDb;
use ocigen_core::idmap::ProcIdRangeQuery;
use ocigen_core::label::HostSecurityLabeler;
use ocigen_core::local::{DirImageStore, DirVolumeManager, ProcNamespaceLookup};
use ocigen_runtime::builder::{Collaborators, SpecGenerator};
use ocigen_runtime::cdi::FileDeviceRegistry;
use ocigen_runtime::cgroup::policy_for;
use ocigen_runtime::environment::HostEnvironment;
use ocigen_runtime::hooks::FileHookDiscovery;
use ocigen_runtime::secrets::FileSecretStore;
use serde::de::DeserializeOwned;

/// Arguments for the `generate` command.
#[derive(Args, Debug)]
pub struct GenerateArgs {
    /// Stored container configuration (JSON).
    #[arg(long)]
    pub container: PathBuf,

    /// Runtime state of the container (JSON).
    #[arg(long)]
    pub state: PathBuf,

    /// Where to write `config.json`; printed to stdout when omitted.
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Executes the `generate` command.
///
/// Wires the filesystem-backed collaborators from the configuration,
/// builds the descriptor, and writes it out.
///
/// # Errors
///
/// Returns an error if an input cannot be read or the build fails.
pub fn execute(args: GenerateArgs, config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = OcigenConfig::load_or_default(config_path)?;
    let descriptor: ContainerDescriptor = read_json(&args.container)?;
    let state: ContainerRuntimeState = read_json(&args.state)?;

    let mut host = HostEnvironment::capture()?;
    if let Some(rootless) = config.rootless {
        host = host.with_rootless(rootless);
    }

    let identity = EtcIdentityDb::default();
    let id_ranges = ProcIdRangeQuery::default();
    let volumes = DirVolumeManager::new(config.volumes_dir.clone());
    let images = DirImageStore::new(config.images_dir.clone());
    let labeler = HostSecurityLabeler::default();
    let namespaces = ProcNamespaceLookup::new(config.data_dir.join("containers"));
    let secrets = FileSecretStore::new(config.secrets_dir.clone());
    let hooks = FileHookDiscovery::new(config.hooks_dirs.clone());
    let devices = FileDeviceRegistry::new(config.cdi_spec_dirs.clone());
    let cgroup = policy_for(&config, host.rootless);

    let collaborators = Collaborators {
        identity: &identity,
        id_ranges: &id_ranges,
        volumes: &volumes,
        images: &images,
        labeler: &labeler,
        namespaces: &namespaces,
        secrets: &secrets,
        hooks: &hooks,
        devices: &devices,
        cgroup: cgroup.as_ref(),
    };
    let generator = SpecGenerator::new(collaborators, config.manager_name.clone())
        .with_host_dev_dir(config.host_dev_dir.clone());

    tracing::info!(container = %descriptor.id, rootless = host.rootless, "generating runtime descriptor");
    let runtime = generator
        .build(&descriptor, &state, &host)
        .with_context(|| format!("generating descriptor of container {}", descriptor.id))?;

    for (stage, selected) in &runtime.extension_stage_hooks {
        tracing::info!(stage = %stage, count = selected.len(), "extension stage hooks selected");
    }

    match args.output {
        Some(path) => runtime.write_config(&path)?,
        None => println!("{}", runtime.to_json()?),
    }
    Ok(())
}
