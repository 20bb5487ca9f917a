//! System-wide constants and default paths.

/// Default base directory for ocigen data.
pub const DEFAULT_DATA_DIR: &str = "/var/lib/ocigen";
/// Default directory holding named volumes (`<name>/_data`).
pub const DEFAULT_VOLUMES_DIR: &str = "/var/lib/ocigen/volumes";
/// Default directory holding unpacked image trees (`<image>/rootfs`).
pub const DEFAULT_IMAGES_DIR: &str = "/var/lib/ocigen/images";
/// Default directory holding secret payloads.
pub const DEFAULT_SECRETS_DIR: &str = "/var/lib/ocigen/secrets";
/// Default OCI hook definition directories, in precedence order.
pub const DEFAULT_HOOKS_DIRS: &[&str] = &[
    "/usr/share/containers/oci/hooks.d",
    "/etc/containers/oci/hooks.d",
];
/// Default CDI spec directories, in precedence order.
pub const DEFAULT_CDI_SPEC_DIRS: &[&str] = &["/etc/cdi", "/var/run/cdi"];
/// Host device directory scanned when all devices are requested.
pub const DEFAULT_HOST_DEV_DIR: &str = "/dev";
/// Default cgroup parent for the cgroupfs manager.
pub const DEFAULT_CGROUPFS_PARENT: &str = "/ocigen_parent";
/// Default slice for the systemd cgroup manager.
pub const DEFAULT_SYSTEMD_SLICE: &str = "machine.slice";

/// Container-manager identity written into the manager annotation.
pub const DEFAULT_MANAGER_NAME: &str = "ocigen";

/// Annotation holding the container creation timestamp.
pub const ANNOTATION_CREATED: &str = "io.container.created";
/// Annotation holding the identity of the managing engine.
pub const ANNOTATION_CONTAINER_MANAGER: &str = "io.container.manager";
/// Annotation holding the numeric stop signal.
pub const ANNOTATION_STOP_SIGNAL: &str = "org.opencontainers.image.stopSignal";

/// OCI runtime spec version emitted in `config.json`.
pub const OCI_VERSION: &str = "1.0.2";

/// Shared-memory mount destination inside the container.
pub const SHM_DESTINATION: &str = "/dev/shm";

/// Sub-directory of the static dir holding overlay scratch content.
pub const OVERLAY_SCRATCH_DIR: &str = "overlay";

/// Destination the notify socket directory is bind-mounted at.
pub const NOTIFY_SOCKET_DIR: &str = "/run/notify";
/// File name of the notify socket inside [`NOTIFY_SOCKET_DIR`].
pub const NOTIFY_SOCKET_NAME: &str = "notify.sock";

/// `SIGRTMIN+3`, the signal systemd expects for a clean shutdown.
pub const SYSTEMD_STOP_SIGNAL: u32 = 37;
/// `SIGTERM`, the default stop signal.
pub const DEFAULT_STOP_SIGNAL: u32 = 15;

/// Environment variables forwarded from the caller for socket activation.
pub const LISTEN_ENV_KEYS: &[&str] = &["LISTEN_PID", "LISTEN_FDS", "LISTEN_FDNAMES"];

/// Host paths that must never be chowned or relabeled recursively.
pub const PROTECTED_HOST_PATHS: &[&str] = &[
    "/", "/bin", "/boot", "/dev", "/etc", "/home", "/lib", "/lib64", "/media", "/opt", "/proc",
    "/root", "/run", "/sbin", "/srv", "/sys", "/tmp", "/usr", "/var",
];
