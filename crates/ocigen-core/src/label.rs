//! Host [`SecurityLabeler`]: SELinux relabel through extended attributes
//! and `AppArmor` profile checks through securityfs.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use ocigen_common::error::{OcigenError, Result};

use crate::ownership::is_protected_path;
use crate::provider::SecurityLabeler;

const SELINUX_XATTR: &str = "security.selinux";
const UNCONFINED_PROFILE: &str = "unconfined";

/// Replaces the MCS level of `label` with `s0` so it can be shared.
#[must_use]
pub fn shared_label(label: &str) -> String {
    let fields: Vec<&str> = label.splitn(4, ':').collect();
    match fields.as_slice() {
        [user, role, kind, _level] => format!("{user}:{role}:{kind}:s0"),
        _ => label.to_owned(),
    }
}

fn lsetxattr(path: &Path, name: &str, value: &str) -> std::io::Result<()> {
    let c_path = CString::new(path.as_os_str().as_bytes())?;
    let c_name = CString::new(name)?;
    // SAFETY: both strings are valid NUL-terminated C strings that outlive
    // the call, and the value pointer/length pair describes `value`.
    let rc = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    if rc == -1 {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// Labeler acting on the host's SELinux and `AppArmor` interfaces.
#[derive(Debug, Clone)]
pub struct HostSecurityLabeler {
    selinuxfs: PathBuf,
    apparmor_enabled: PathBuf,
    apparmor_profiles: PathBuf,
}

impl Default for HostSecurityLabeler {
    fn default() -> Self {
        Self {
            selinuxfs: PathBuf::from("/sys/fs/selinux"),
            apparmor_enabled: PathBuf::from("/sys/module/apparmor/parameters/enabled"),
            apparmor_profiles: PathBuf::from("/sys/kernel/security/apparmor/profiles"),
        }
    }
}

impl HostSecurityLabeler {
    /// Creates a labeler reading kernel interfaces below `sys_root`.
    #[must_use]
    pub fn with_sys_root(sys_root: &Path) -> Self {
        Self {
            selinuxfs: sys_root.join("fs/selinux"),
            apparmor_enabled: sys_root.join("module/apparmor/parameters/enabled"),
            apparmor_profiles: sys_root.join("kernel/security/apparmor/profiles"),
        }
    }

    fn selinux_enabled(&self) -> bool {
        self.selinuxfs.join("enforce").exists()
    }

    fn apparmor_enabled(&self) -> bool {
        std::fs::read_to_string(&self.apparmor_enabled).is_ok_and(|s| s.trim() == "Y")
    }
}

impl SecurityLabeler for HostSecurityLabeler {
    fn relabel(&self, path: &Path, label: &str, shared: bool) -> Result<()> {
        if label.is_empty() || !self.selinux_enabled() {
            return Ok(());
        }
        if is_protected_path(path) {
            return Err(OcigenError::RelabelFailed {
                path: path.to_path_buf(),
                message: "relabeling system content is not allowed".into(),
            });
        }
        let label = if shared { shared_label(label) } else { label.to_owned() };

        let mut pending = vec![path.to_path_buf()];
        while let Some(current) = pending.pop() {
            lsetxattr(&current, SELINUX_XATTR, &label).map_err(|e| OcigenError::RelabelFailed {
                path: current.clone(),
                message: e.to_string(),
            })?;
            let meta = std::fs::symlink_metadata(&current).map_err(|e| OcigenError::io(&current, e))?;
            if meta.is_dir() {
                for entry in std::fs::read_dir(&current).map_err(|e| OcigenError::io(&current, e))? {
                    pending.push(entry.map_err(|e| OcigenError::io(&current, e))?.path());
                }
            }
        }
        tracing::debug!(path = %path.display(), label, "relabeled");
        Ok(())
    }

    fn check_and_load_profile(&self, profile: &str) -> Result<String> {
        if profile == UNCONFINED_PROFILE {
            return Ok(profile.to_owned());
        }
        if !self.apparmor_enabled() {
            return Err(OcigenError::ProfileLoadFailed {
                profile: profile.to_owned(),
                message: "AppArmor profile specified but AppArmor is disabled on the host".into(),
            });
        }
        let loaded = std::fs::read_to_string(&self.apparmor_profiles)
            .map_err(|e| OcigenError::io(&self.apparmor_profiles, e))?;
        let prefix = format!("{profile} (");
        if loaded.lines().any(|l| l.starts_with(&prefix)) {
            Ok(profile.to_owned())
        } else {
            Err(OcigenError::ProfileLoadFailed {
                profile: profile.to_owned(),
                message: "profile is not loaded".into(),
            })
        }
    }
}
