//! Container Device Interface registry backed by JSON spec files.
//!
//! Devices are referenced as `vendor/class=name`. A spec file declares one
//! `kind` (`vendor/class`), its devices, and edits shared by all of them.
//! When a device is declared twice, the spec found in the later
//! directory wins.

use std::collections::BTreeMap;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use ocigen_common::error::{OcigenError, Result};
use ocigen_common::spec::{Hook, HookStage, Hooks, LinuxDevice, Spec};
use ocigen_common::types::MountEntry;
use serde::Deserialize;

use crate::provider::{ContainerEdits, DeviceRegistry};

/// A device node edit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiDeviceNode {
    /// Path inside the container.
    pub path: String,
    /// Path on the host; defaults to `path`.
    #[serde(default)]
    pub host_path: Option<String>,
    /// `c` or `b`; read from the host node when absent.
    #[serde(rename = "type", default)]
    pub device_type: Option<String>,
    /// Major number; read from the host node when absent.
    #[serde(default)]
    pub major: Option<i64>,
    /// Minor number; read from the host node when absent.
    #[serde(default)]
    pub minor: Option<i64>,
    /// Permission bits.
    #[serde(default)]
    pub file_mode: Option<u32>,
    /// Owner UID.
    #[serde(default)]
    pub uid: Option<u32>,
    /// Owner GID.
    #[serde(default)]
    pub gid: Option<u32>,
}

/// A mount edit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiMount {
    /// Host path.
    pub host_path: String,
    /// Destination inside the container.
    pub container_path: String,
    /// Filesystem type; bind when absent.
    #[serde(rename = "type", default)]
    pub mount_type: Option<String>,
    /// Mount options.
    #[serde(default)]
    pub options: Vec<String>,
}

/// A hook edit.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiHook {
    /// OCI stage name.
    pub hook_name: String,
    /// Hook command.
    #[serde(flatten)]
    pub hook: Hook,
}

/// Edits a spec or device applies.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiEdits {
    /// Environment entries.
    #[serde(default)]
    pub env: Vec<String>,
    /// Device nodes.
    #[serde(default)]
    pub device_nodes: Vec<CdiDeviceNode>,
    /// Mounts.
    #[serde(default)]
    pub mounts: Vec<CdiMount>,
    /// Hooks.
    #[serde(default)]
    pub hooks: Vec<CdiHook>,
}

/// One device of a spec.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiDevice {
    /// Device name, unique within the kind.
    pub name: String,
    /// Edits for this device.
    #[serde(default)]
    pub container_edits: CdiEdits,
}

/// A CDI spec file.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CdiSpec {
    /// Spec version.
    #[serde(default)]
    pub cdi_version: String,
    /// `vendor/class`.
    pub kind: String,
    /// Declared devices.
    pub devices: Vec<CdiDevice>,
    /// Edits applied once whenever any device of this spec is used.
    #[serde(default)]
    pub container_edits: CdiEdits,
}

/// Splits `vendor/class=name` into kind and name.
///
/// # Errors
///
/// Returns [`OcigenError::DeviceInjectionFailed`] on malformed references.
pub fn parse_device_ref(reference: &str) -> Result<(&str, &str)> {
    let malformed = || OcigenError::DeviceInjectionFailed {
        message: format!("unresolvable CDI device {reference:?}: expected vendor/class=name"),
    };
    let (kind, name) = reference.split_once('=').ok_or_else(malformed)?;
    let (vendor, class) = kind.split_once('/').ok_or_else(malformed)?;
    if vendor.is_empty() || class.is_empty() || name.is_empty() {
        return Err(malformed());
    }
    Ok((kind, name))
}

fn device_node(node: &CdiDeviceNode) -> Result<LinuxDevice> {
    let (device_type, major, minor) = match (&node.device_type, node.major, node.minor) {
        (Some(t), Some(major), Some(minor)) => (t.clone(), major, minor),
        _ => {
            let host = Path::new(node.host_path.as_deref().unwrap_or(&node.path));
            let meta = std::fs::metadata(host).map_err(|e| OcigenError::DeviceInjectionFailed {
                message: format!("device node {}: {e}", host.display()),
            })?;
            let rdev = meta.rdev();
            let kind = if meta.file_type().is_block_device() { "b" } else { "c" };
            (
                node.device_type.clone().unwrap_or_else(|| kind.to_owned()),
                node.major.unwrap_or_else(|| i64::from(libc::major(rdev))),
                node.minor.unwrap_or_else(|| i64::from(libc::minor(rdev))),
            )
        }
    };
    Ok(LinuxDevice {
        path: node.path.clone(),
        device_type,
        major,
        minor,
        file_mode: node.file_mode,
        uid: node.uid,
        gid: node.gid,
    })
}

fn convert_edits(edits: &CdiEdits) -> Result<ContainerEdits> {
    let mut hooks = Hooks::default();
    for h in &edits.hooks {
        let stage = HookStage::from_name(&h.hook_name).ok_or_else(|| OcigenError::DeviceInjectionFailed {
            message: format!("unknown hook stage {:?}", h.hook_name),
        })?;
        hooks.stage_mut(stage).push(h.hook.clone());
    }
    Ok(ContainerEdits {
        env: edits.env.clone(),
        device_nodes: edits
            .device_nodes
            .iter()
            .map(device_node)
            .collect::<Result<_>>()?,
        mounts: edits
            .mounts
            .iter()
            .map(|m| {
                MountEntry::new(
                    m.mount_type.as_deref().unwrap_or("bind"),
                    m.host_path.as_str(),
                    m.container_path.as_str(),
                    m.options.clone(),
                )
            })
            .collect(),
        hooks,
    })
}

#[derive(Debug, Default)]
struct Catalog {
    /// Spec index per kind and device name.
    devices: BTreeMap<(String, String), usize>,
    specs: Vec<CdiSpec>,
}

/// [`DeviceRegistry`] over CDI spec directories.
#[derive(Debug)]
pub struct FileDeviceRegistry {
    dirs: Vec<PathBuf>,
    catalog: RwLock<Catalog>,
}

impl FileDeviceRegistry {
    /// Creates a registry over `dirs`, lowest precedence first. Nothing is
    /// loaded until [`DeviceRegistry::refresh`].
    #[must_use]
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            catalog: RwLock::new(Catalog::default()),
        }
    }

    fn poisoned() -> OcigenError {
        OcigenError::DeviceInjectionFailed {
            message: "CDI registry lock poisoned".into(),
        }
    }
}

impl DeviceRegistry for FileDeviceRegistry {
    fn refresh(&self) -> Result<()> {
        let mut catalog = Catalog::default();
        let mut errors = Vec::new();
        for dir in &self.dirs {
            let Ok(entries) = std::fs::read_dir(dir) else {
                continue;
            };
            let mut files: Vec<PathBuf> = entries
                .filter_map(std::result::Result::ok)
                .map(|e| e.path())
                .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
                .collect();
            files.sort();
            for file in files {
                let parsed = std::fs::read_to_string(&file)
                    .map_err(|e| e.to_string())
                    .and_then(|raw| serde_json::from_str::<CdiSpec>(&raw).map_err(|e| e.to_string()));
                let spec = match parsed {
                    Ok(spec) => spec,
                    Err(e) => {
                        errors.push(format!("{}: {e}", file.display()));
                        continue;
                    }
                };
                if parse_device_ref(&format!("{}=x", spec.kind)).is_err() {
                    errors.push(format!("{}: invalid kind {:?}", file.display(), spec.kind));
                    continue;
                }
                let index = catalog.specs.len();
                for device in &spec.devices {
                    let _ = catalog
                        .devices
                        .insert((spec.kind.clone(), device.name.clone()), index);
                }
                catalog.specs.push(spec);
            }
        }
        tracing::debug!(devices = catalog.devices.len(), "CDI registry refreshed");
        *self.catalog.write().map_err(|_| Self::poisoned())? = catalog;
        if errors.is_empty() {
            Ok(())
        } else {
            Err(OcigenError::DeviceInjectionFailed {
                message: errors.join("; "),
            })
        }
    }

    fn inject(&self, _spec: &Spec, devices: &[String]) -> Result<ContainerEdits> {
        let catalog = self.catalog.read().map_err(|_| Self::poisoned())?;
        let mut edits = ContainerEdits::default();
        let mut spec_edits_applied = Vec::new();
        for reference in devices {
            let (kind, name) = parse_device_ref(reference)?;
            let index = *catalog
                .devices
                .get(&(kind.to_owned(), name.to_owned()))
                .ok_or_else(|| OcigenError::DeviceInjectionFailed {
                    message: format!("unresolvable CDI device {reference}"),
                })?;
            let spec = &catalog.specs[index];
            if !spec_edits_applied.contains(&index) {
                edits.append(convert_edits(&spec.container_edits)?);
                spec_edits_applied.push(index);
            }
            if let Some(device) = spec.devices.iter().rev().find(|d| d.name == name) {
                edits.append(convert_edits(&device.container_edits)?);
            }
            tracing::debug!(device = %reference, "CDI device injected");
        }
        Ok(edits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const GPU_SPEC: &str = r#"{
        "cdiVersion": "0.5.0",
        "kind": "vendor.com/gpu",
        "containerEdits": {"env": ["GPU_VENDOR=vendor"]},
        "devices": [
            {"name": "gpu0", "containerEdits": {
                "env": ["GPU=0"],
                "deviceNodes": [{"path": "/dev/gpu0", "type": "c", "major": 195, "minor": 0}],
                "mounts": [{"hostPath": "/usr/lib/gpu", "containerPath": "/usr/lib/gpu", "options": ["ro", "rbind"]}],
                "hooks": [{"hookName": "createContainer", "path": "/usr/bin/gpu-hook", "args": ["gpu-hook"]}]
            }},
            {"name": "null", "containerEdits": {"deviceNodes": [{"path": "/dev/null"}]}}
        ]
    }"#;

    fn registry() -> (tempfile::TempDir, FileDeviceRegistry) {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("gpu.json"), GPU_SPEC).expect("write");
        let registry = FileDeviceRegistry::new(vec![dir.path().to_path_buf()]);
        registry.refresh().expect("refresh");
        (dir, registry)
    }

    #[test]
    fn references_are_validated() {
        assert_eq!(parse_device_ref("vendor.com/gpu=gpu0").unwrap(), ("vendor.com/gpu", "gpu0"));
        assert!(parse_device_ref("gpu0").is_err());
        assert!(parse_device_ref("vendor.com=gpu0").is_err());
        assert!(parse_device_ref("vendor.com/gpu=").is_err());
    }

    #[test]
    fn injects_device_and_spec_edits() {
        let (_dir, registry) = registry();
        let edits = registry
            .inject(&Spec::default(), &["vendor.com/gpu=gpu0".into()])
            .unwrap();
        assert_eq!(edits.env, vec!["GPU_VENDOR=vendor", "GPU=0"]);
        assert_eq!(edits.device_nodes[0].major, 195);
        assert_eq!(edits.mounts[0].destination, "/usr/lib/gpu");
        assert_eq!(edits.hooks.create_container[0].path, "/usr/bin/gpu-hook");
    }

    #[test]
    fn missing_numbers_are_read_from_host() {
        let (_dir, registry) = registry();
        let edits = registry
            .inject(&Spec::default(), &["vendor.com/gpu=null".into()])
            .unwrap();
        assert_eq!(edits.device_nodes[0].device_type, "c");
        assert_eq!((edits.device_nodes[0].major, edits.device_nodes[0].minor), (1, 3));
    }

    #[test]
    fn unknown_device_is_fatal() {
        let (_dir, registry) = registry();
        let err = registry
            .inject(&Spec::default(), &["vendor.com/gpu=gpu9".into()])
            .unwrap_err();
        assert!(matches!(err, OcigenError::DeviceInjectionFailed { .. }));
    }

    #[test]
    fn refresh_reports_broken_files_but_keeps_good_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("a.json"), GPU_SPEC).expect("write");
        std::fs::write(dir.path().join("b.json"), "{").expect("write");
        let registry = FileDeviceRegistry::new(vec![dir.path().to_path_buf()]);
        assert!(registry.refresh().is_err());
        assert!(
            registry
                .inject(&Spec::default(), &["vendor.com/gpu=gpu0".into()])
                .is_ok()
        );
    }
}
