//! Adjustments for containers running systemd as init.

use ocigen_common::constants::SYSTEMD_STOP_SIGNAL;
use ocigen_common::container::ContainerDescriptor;
use ocigen_common::spec::Spec;
use ocigen_common::types::{MountEntry, MountType};

const TMPFS_DESTINATIONS: [&str; 4] = ["/run", "/run/lock", "/tmp", "/var/log/journal"];
const TMPFS_OPTIONS: [&str; 5] = ["rw", "rprivate", "nosuid", "nodev", "tmpcopyup"];
const CGROUP_DESTINATION: &str = "/sys/fs/cgroup";
const CGROUP_OPTIONS: [&str; 5] = ["rprivate", "nosuid", "noexec", "nodev", "rw"];

/// Stop signal of the container; systemd containers without an explicit
/// signal stop with `SIGRTMIN+3`.
#[must_use]
pub const fn stop_signal(descriptor: &ContainerDescriptor) -> u32 {
    if descriptor.systemd && descriptor.stop_signal == 0 {
        SYSTEMD_STOP_SIGNAL
    } else {
        descriptor.effective_stop_signal()
    }
}

/// Adds the tmpfs mounts systemd expects, a writable cgroup tree, and the
/// `container` environment variable.
pub fn apply_systemd_mode(spec: &mut Spec, manager_name: &str) {
    for dest in TMPFS_DESTINATIONS {
        if spec.mount_exists(dest) {
            continue;
        }
        spec.mounts.push(MountEntry::new(
            MountType::Tmpfs,
            "tmpfs",
            dest,
            TMPFS_OPTIONS.map(str::to_owned).to_vec(),
        ));
    }

    spec.mounts.retain(|m| m.destination != CGROUP_DESTINATION);
    spec.mounts.push(MountEntry::new(
        "cgroup",
        "cgroup",
        CGROUP_DESTINATION,
        CGROUP_OPTIONS.map(str::to_owned).to_vec(),
    ));

    if !spec.process.has_env("container") {
        spec.process.add_env("container", manager_name);
    }
    tracing::debug!("added systemd mounts");
}
