//! Exposure of every host device to privileged containers.

use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};

use ocigen_common::error::{OcigenError, Result};
use ocigen_common::spec::{LinuxDevice, LinuxDeviceCgroup, LinuxResources, Spec};
use ocigen_common::types::MountEntry;

const SKIPPED_DIRS: [&str; 3] = ["pts", "shm", "mqueue"];

/// A device node found on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostDevice {
    /// Path on the host.
    pub host_path: PathBuf,
    /// Device description for the container, at `/dev/<relative path>`.
    pub device: LinuxDevice,
}

/// Walks `dev_dir` and returns every character and block device, sorted
/// by container path.
///
/// # Errors
///
/// Returns an I/O error if a directory cannot be listed.
pub fn host_devices(dev_dir: &Path) -> Result<Vec<HostDevice>> {
    let mut found = Vec::new();
    let mut pending = vec![dev_dir.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if dir != dev_dir => {
                tracing::debug!(path = %dir.display(), error = %e, "skipping unreadable device directory");
                continue;
            }
            Err(e) => return Err(OcigenError::io(&dir, e)),
        };
        for entry in entries {
            let entry = entry.map_err(|e| OcigenError::io(&dir, e))?;
            let path = entry.path();
            let Ok(meta) = std::fs::symlink_metadata(&path) else {
                continue;
            };
            let file_type = meta.file_type();
            if file_type.is_dir() {
                let skipped = dir == dev_dir
                    && SKIPPED_DIRS
                        .iter()
                        .any(|s| entry.file_name() == std::ffi::OsStr::new(s));
                if !skipped {
                    pending.push(path);
                }
                continue;
            }
            let device_type = if file_type.is_char_device() {
                "c"
            } else if file_type.is_block_device() {
                "b"
            } else {
                continue;
            };
            let Ok(relative) = path.strip_prefix(dev_dir) else {
                continue;
            };
            let rdev = meta.rdev();
            found.push(HostDevice {
                device: LinuxDevice {
                    path: Path::new("/dev").join(relative).to_string_lossy().into_owned(),
                    device_type: device_type.to_owned(),
                    major: i64::from(libc::major(rdev)),
                    minor: i64::from(libc::minor(rdev)),
                    file_mode: Some(meta.mode() & 0o777),
                    uid: Some(meta.uid()),
                    gid: Some(meta.gid()),
                },
                host_path: path,
            });
        }
    }
    found.sort_by(|a, b| a.device.path.cmp(&b.device.path));
    Ok(found)
}

/// Adds every host device to `spec`.
///
/// Privileged callers get device nodes and an allow-all device cgroup
/// rule. Rootless callers cannot create device nodes, so devices are
/// bind-mounted instead.
///
/// # Errors
///
/// Returns an I/O error if the device directory cannot be walked.
pub fn add_privileged_devices(spec: &mut Spec, dev_dir: &Path, rootless: bool) -> Result<()> {
    let devices = host_devices(dev_dir)?;
    let count = devices.len();
    for HostDevice { host_path, device } in devices {
        if rootless {
            if !spec.mount_exists(&device.path) {
                spec.mounts.push(MountEntry::bind(
                    host_path.to_string_lossy(),
                    device.path,
                    ["slave", "nosuid", "noexec", "rw", "rbind"]
                        .map(str::to_owned)
                        .to_vec(),
                ));
            }
        } else if !spec.linux.devices.iter().any(|d| d.path == device.path) {
            spec.linux.devices.push(device);
        }
    }
    if !rootless {
        spec.linux
            .resources
            .get_or_insert_with(LinuxResources::default)
            .devices = vec![LinuxDeviceCgroup {
            allow: true,
            device_type: None,
            major: None,
            minor: None,
            access: Some("rwm".to_owned()),
        }];
    }
    tracing::debug!(count, rootless, "added host devices");
    Ok(())
}
