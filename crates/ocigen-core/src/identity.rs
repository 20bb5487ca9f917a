//! Exec user resolution against `/etc/passwd` and `/etc/group`.
//!
//! The user string of a container takes one of the forms `""`, `user`,
//! `uid`, `user:group`, `uid:gid` (or mixed). Names must exist in the
//! databases; bare numbers that are missing are used as-is.

use std::path::{Path, PathBuf};

use ocigen_common::error::{OcigenError, Result};
use ocigen_common::types::IdMap;

use crate::idmap;
use crate::provider::IdentityDb;

/// Identity the container process runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecUser {
    /// In-container UID.
    pub uid: u32,
    /// In-container primary GID.
    pub gid: u32,
    /// Home directory; empty when unknown.
    pub home: String,
    /// Groups the user is a member of in the group database.
    pub sgids: Vec<u32>,
}

impl Default for ExecUser {
    fn default() -> Self {
        Self {
            uid: 0,
            gid: 0,
            home: "/".to_owned(),
            sgids: Vec::new(),
        }
    }
}

/// The exec user together with the host IDs derived from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedIdentity {
    /// User as seen inside the container.
    pub exec_user: ExecUser,
    /// Host UID owning files written by the exec user.
    pub host_uid: u32,
    /// Host GID owning files written by the exec user.
    pub host_gid: u32,
    /// Host UID of container root.
    pub root_uid: u32,
    /// Host GID of container root.
    pub root_gid: u32,
}

/// Looks up `user` in the container's databases, falling back to the host
/// databases when the user is listed in `host_users`.
///
/// # Errors
///
/// Returns [`OcigenError::UserLookupFailed`] if neither lookup succeeds.
pub fn resolve_exec_user(
    db: &dyn IdentityDb,
    user: &str,
    root: &Path,
    host_users: &[String],
) -> Result<ExecUser> {
    match db.lookup(user, root) {
        Ok(exec_user) => Ok(exec_user),
        Err(container_err) => {
            if !host_users.iter().any(|u| u == user) {
                return Err(OcigenError::UserLookupFailed {
                    user: user.to_owned(),
                    message: container_err.to_string(),
                });
            }
            tracing::debug!(user, "user not in image, resolving against host");
            db.lookup_host(user)
                .map_err(|e| OcigenError::UserLookupFailed {
                    user: user.to_owned(),
                    message: e.to_string(),
                })
        }
    }
}

/// Resolves the exec user and maps it, and container root, to host IDs.
///
/// # Errors
///
/// Returns an error if the user cannot be found or an ID is unmapped.
pub fn resolve_identity(
    db: &dyn IdentityDb,
    user: &str,
    root: &Path,
    host_users: &[String],
    uid_map: &[IdMap],
    gid_map: &[IdMap],
) -> Result<ResolvedIdentity> {
    let exec_user = resolve_exec_user(db, user, root, host_users)?;
    let (host_uid, host_gid) = idmap::host_ids(uid_map, gid_map, exec_user.uid, exec_user.gid)?;
    let (root_uid, root_gid) = root_host_ids(uid_map, gid_map);
    Ok(ResolvedIdentity {
        exec_user,
        host_uid,
        host_gid,
        root_uid,
        root_gid,
    })
}

/// Host owner of container root.
///
/// A lone size-one entry maps root to its host ID, otherwise the entry
/// starting at container ID 0 does. Anything else falls back to 0 since
/// the result only owns scratch directories.
#[must_use]
pub fn root_host_ids(uid_map: &[IdMap], gid_map: &[IdMap]) -> (u32, u32) {
    fn root_of(map: &[IdMap]) -> u32 {
        match map {
            [only] if only.size == 1 => only.host_id,
            _ => map
                .iter()
                .find(|m| m.container_id == 0)
                .map_or(0, |m| m.host_id),
        }
    }
    (root_of(uid_map), root_of(gid_map))
}

#[derive(Debug, Clone)]
struct PasswdEntry {
    name: String,
    uid: u32,
    gid: u32,
    home: String,
}

#[derive(Debug, Clone)]
struct GroupEntry {
    name: String,
    gid: u32,
    members: Vec<String>,
}

fn parse_passwd(contents: &str) -> Vec<PasswdEntry> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 7 {
                return None;
            }
            Some(PasswdEntry {
                name: fields[0].to_owned(),
                uid: fields[2].parse().ok()?,
                gid: fields[3].parse().ok()?,
                home: fields[5].to_owned(),
            })
        })
        .collect()
}

fn parse_group(contents: &str) -> Vec<GroupEntry> {
    contents
        .lines()
        .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            if fields.len() < 4 {
                return None;
            }
            Some(GroupEntry {
                name: fields[0].to_owned(),
                gid: fields[2].parse().ok()?,
                members: fields[3]
                    .split(',')
                    .filter(|m| !m.is_empty())
                    .map(str::to_owned)
                    .collect(),
            })
        })
        .collect()
}

/// Reads a database file; a missing file is an empty database.
fn read_db(path: &Path) -> Result<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(contents),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(e) => Err(OcigenError::io(path, e)),
    }
}

/// [`IdentityDb`] reading `etc/passwd` and `etc/group` below a root.
#[derive(Debug, Clone)]
pub struct EtcIdentityDb {
    host_root: PathBuf,
}

impl Default for EtcIdentityDb {
    fn default() -> Self {
        Self::new("/")
    }
}

impl EtcIdentityDb {
    /// Creates a database whose host lookups read below `host_root`.
    #[must_use]
    pub fn new(host_root: impl Into<PathBuf>) -> Self {
        Self {
            host_root: host_root.into(),
        }
    }

    fn load(root: &Path) -> Result<(Vec<PasswdEntry>, Vec<GroupEntry>)> {
        let passwd = parse_passwd(&read_db(&root.join("etc/passwd"))?);
        let group = parse_group(&read_db(&root.join("etc/group"))?);
        Ok((passwd, group))
    }

    fn find_group(groups: &[GroupEntry], spec: &str) -> Result<u32> {
        if let Some(g) = groups.iter().find(|g| g.name == spec) {
            return Ok(g.gid);
        }
        spec.parse::<u32>().map_err(|_| OcigenError::NotFound {
            kind: "group",
            id: spec.to_owned(),
        })
    }
}

impl IdentityDb for EtcIdentityDb {
    fn lookup(&self, user: &str, root: &Path) -> Result<ExecUser> {
        let (passwd, groups) = Self::load(root)?;
        let (user_part, group_part) = match user.split_once(':') {
            Some((u, g)) => (u, Some(g)),
            None => (user, None),
        };

        let mut exec_user = ExecUser::default();
        let entry = if user_part.is_empty() {
            passwd.iter().find(|p| p.uid == 0)
        } else {
            passwd.iter().find(|p| p.name == user_part).or_else(|| {
                user_part
                    .parse::<u32>()
                    .ok()
                    .and_then(|uid| passwd.iter().find(|p| p.uid == uid))
            })
        };

        match entry {
            Some(p) => {
                exec_user.uid = p.uid;
                exec_user.gid = p.gid;
                if !p.home.is_empty() {
                    exec_user.home.clone_from(&p.home);
                }
            }
            None if user_part.is_empty() => {}
            None => {
                exec_user.uid = user_part.parse().map_err(|_| OcigenError::NotFound {
                    kind: "user",
                    id: user_part.to_owned(),
                })?;
            }
        }

        match group_part {
            Some(g) if !g.is_empty() => exec_user.gid = Self::find_group(&groups, g)?,
            _ => {
                if let Some(p) = entry {
                    exec_user.sgids = groups
                        .iter()
                        .filter(|g| g.members.iter().any(|m| *m == p.name))
                        .map(|g| g.gid)
                        .collect();
                }
            }
        }

        Ok(exec_user)
    }

    fn lookup_host(&self, user: &str) -> Result<ExecUser> {
        let mut exec_user = self.lookup(user, &self.host_root)?;
        exec_user.sgids.clear();
        Ok(exec_user)
    }

    fn groups(&self, groups: &[String], root: &Path) -> Result<Vec<u32>> {
        let (_, entries) = Self::load(root)?;
        groups
            .iter()
            .map(|g| Self::find_group(&entries, g))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PASSWD: &str = "root:x:0:0:root:/root:/bin/sh\n\
                          # comment\n\
                          daemon:x:1:1::/usr/sbin:/sbin/nologin\n\
                          app:x:1000:1000:App:/home/app:/bin/sh\n";
    const GROUP: &str = "root:x:0:\n\
                         wheel:x:10:app,root\n\
                         video:x:44:app\n\
                         app:x:1000:\n";

    fn rootfs() -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::create_dir_all(dir.path().join("etc")).expect("mkdir");
        std::fs::write(dir.path().join("etc/passwd"), PASSWD).expect("passwd");
        std::fs::write(dir.path().join("etc/group"), GROUP).expect("group");
        dir
    }

    #[test]
    fn empty_user_is_root() {
        let root = rootfs();
        let user = EtcIdentityDb::default().lookup("", root.path()).unwrap();
        assert_eq!((user.uid, user.gid), (0, 0));
        assert_eq!(user.home, "/root");
    }

    #[test]
    fn named_user_collects_supplemental_groups() {
        let root = rootfs();
        let user = EtcIdentityDb::default().lookup("app", root.path()).unwrap();
        assert_eq!((user.uid, user.gid), (1000, 1000));
        assert_eq!(user.home, "/home/app");
        assert_eq!(user.sgids, vec![10, 44]);
    }

    #[test]
    fn single_entry_maps_do_not_require_root() {
        let root = rootfs();
        let map = [IdMap::new(1000, 1000, 1)];
        let identity = resolve_identity(
            &EtcIdentityDb::default(),
            "1000:1000",
            root.path(),
            &[],
            &map,
            &map,
        )
        .unwrap();
        assert_eq!((identity.host_uid, identity.host_gid), (1000, 1000));
        assert_eq!((identity.root_uid, identity.root_gid), (1000, 1000));
    }

    #[test]
    fn root_owner_falls_back_to_zero() {
        let uid_map = [IdMap::new(1, 100_000, 10), IdMap::new(0, 5000, 1)];
        let gid_map = [IdMap::new(1000, 1000, 2)];
        assert_eq!(root_host_ids(&uid_map, &gid_map), (5000, 0));
        assert_eq!(root_host_ids(&[], &[]), (0, 0));
    }

    #[test]
    fn explicit_group_overrides_primary_gid() {
        let root = rootfs();
        let db = EtcIdentityDb::default();
        let user = db.lookup("app:video", root.path()).unwrap();
        assert_eq!((user.uid, user.gid), (1000, 44));
        assert!(user.sgids.is_empty());
        let numeric = db.lookup("1000:4242", root.path()).unwrap();
        assert_eq!((numeric.uid, numeric.gid), (1000, 4242));
    }

    #[test]
    fn unknown_numeric_user_is_used_verbatim() {
        let root = rootfs();
        let user = EtcIdentityDb::default().lookup("5000", root.path()).unwrap();
        assert_eq!((user.uid, user.gid), (5000, 0));
        assert_eq!(user.home, "/");
    }

    #[test]
    fn unknown_named_user_fails() {
        let root = rootfs();
        let err = EtcIdentityDb::default().lookup("ghost", root.path()).unwrap_err();
        assert!(matches!(err, OcigenError::NotFound { kind: "user", .. }));
    }

    #[test]
    fn host_users_fall_back_to_host_database() {
        let image = tempfile::tempdir().expect("tempdir");
        let host = rootfs();
        let db = EtcIdentityDb::new(host.path());
        let user = resolve_exec_user(&db, "app", image.path(), &["app".into()]).unwrap();
        assert_eq!(user.uid, 1000);
        assert!(user.sgids.is_empty());

        let err = resolve_exec_user(&db, "app", image.path(), &[]).unwrap_err();
        assert!(matches!(err, OcigenError::UserLookupFailed { .. }));
    }

    #[test]
    fn group_names_and_numbers_resolve() {
        let root = rootfs();
        let gids = EtcIdentityDb::default()
            .groups(&["wheel".into(), "777".into()], root.path())
            .unwrap();
        assert_eq!(gids, vec![10, 777]);
        assert!(
            EtcIdentityDb::default()
                .groups(&["nogroup".into()], root.path())
                .is_err()
        );
    }

    #[test]
    fn identity_maps_through_id_tables() {
        let root = rootfs();
        let uid_map = [IdMap::new(0, 100_000, 65536)];
        let gid_map = [IdMap::new(0, 200_000, 65536)];
        let identity = resolve_identity(
            &EtcIdentityDb::default(),
            "app",
            root.path(),
            &[],
            &uid_map,
            &gid_map,
        )
        .unwrap();
        assert_eq!((identity.host_uid, identity.host_gid), (101_000, 201_000));
        assert_eq!((identity.root_uid, identity.root_gid), (100_000, 200_000));
    }
}
