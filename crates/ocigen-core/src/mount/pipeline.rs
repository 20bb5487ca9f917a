//! Staged mount resolution.
//!
//! Each stage takes the list produced by the previous one and returns a
//! new list. Destinations are claimed by the first writer; later
//! candidates for a claimed destination are dropped with a warning.
//!
//! Stage order:
//! 1. named volumes
//! 2. option normalization (`U`, `z`, `Z`) of template and named mounts
//! 3. runtime bind mounts
//! 4. overlay volumes
//! 5. image volumes
//!
//! [`finalize`] then canonicalizes tmpfs destinations, sorts by depth and
//! derives the root propagation.

use std::path::Path;

use ocigen_common::constants::SHM_DESTINATION;
use ocigen_common::container::{ContainerDescriptor, ContainerRuntimeState};
use ocigen_common::error::{OcigenError, Result};
use ocigen_common::types::{MountEntry, MountType};

use super::options::{MountOption, Propagation, has_marker, overlay_upper_and_work_dir};
use super::overlay::{allocate_scratch, overlay_mount, overlay_mount_read_only};
use super::securejoin::resolve_in_root;
use crate::identity::ResolvedIdentity;
use crate::ownership::change_host_path_ownership;
use crate::provider::{ImageStore, SecurityLabeler, VolumeManager};

const HARDENING_OPTIONS: [&str; 3] = ["nosuid", "noexec", "nodev"];

/// Everything the stages read.
#[derive(Clone, Copy)]
pub struct MountContext<'a> {
    /// Stored container configuration.
    pub descriptor: &'a ContainerDescriptor,
    /// Current runtime state.
    pub state: &'a ContainerRuntimeState,
    /// Exec user and the host IDs derived from it.
    pub identity: &'a ResolvedIdentity,
    /// Named volume lookup.
    pub volumes: &'a dyn VolumeManager,
    /// Image volume mounts.
    pub images: &'a dyn ImageStore,
    /// Relabel engine for `z`/`Z`.
    pub labeler: &'a dyn SecurityLabeler,
}

/// Root filesystem propagation derived from the mounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RootPropagation {
    /// Some mount is shared.
    Shared,
    /// Some mount is a slave and none is shared.
    RSlave,
}

impl RootPropagation {
    /// Value of `linux.rootfsPropagation`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::RSlave => "rslave",
        }
    }
}

/// Final mount table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedMounts {
    /// Mounts in non-decreasing destination depth.
    pub mounts: Vec<MountEntry>,
    /// Propagation the root must have for the mounts to work.
    pub root_propagation: Option<RootPropagation>,
}

fn same_destination(a: &str, b: &str) -> bool {
    Path::new(a) == Path::new(b)
}

/// Appends `candidate` unless its destination is already taken.
///
/// Returns whether the candidate was kept.
pub fn claim(mounts: &mut Vec<MountEntry>, candidate: MountEntry) -> bool {
    if let Some(existing) = mounts
        .iter()
        .find(|m| same_destination(&m.destination, &candidate.destination))
    {
        tracing::warn!(
            destination = %candidate.destination,
            kept = %existing.source,
            dropped = %candidate.source,
            "duplicate mount destination, keeping the first one"
        );
        return false;
    }
    mounts.push(candidate);
    true
}

/// Stage 1: named volumes, as overlays when marked `O` and as plain binds
/// otherwise.
///
/// # Errors
///
/// Returns [`OcigenError::VolumeResolutionFailed`] for unknown volumes, and
/// overlay or ownership errors for `O`/`U` volumes.
pub fn add_named_volumes(ctx: &MountContext<'_>, mut mounts: Vec<MountEntry>) -> Result<Vec<MountEntry>> {
    for volume in &ctx.descriptor.named_volumes {
        let mount_point = ctx
            .volumes
            .mount_point(&volume.name)
            .map_err(|e| OcigenError::VolumeResolutionFailed {
                volume: volume.name.clone(),
                message: format!("adding to container {}: {e}", ctx.descriptor.id),
            })?;

        if !has_marker(&volume.options, &MountOption::Overlay) {
            let _ = claim(
                &mut mounts,
                MountEntry::bind(
                    mount_point.to_string_lossy(),
                    volume.dest.as_str(),
                    volume.options.clone(),
                ),
            );
            continue;
        }

        let dirs = overlay_upper_and_work_dir(&volume.options)?;
        let scratch = allocate_scratch(
            &ctx.state.static_dir,
            ctx.identity.root_uid,
            ctx.identity.root_gid,
        )?;
        let entry = overlay_mount(&scratch, &mount_point, &volume.dest, dirs.as_ref())?;
        if has_marker(&volume.options, &MountOption::Chown) {
            let (uid, gid) = (ctx.identity.host_uid, ctx.identity.host_gid);
            change_host_path_ownership(&mount_point, true, uid, gid)?;
            change_host_path_ownership(&scratch.content, true, uid, gid)?;
        }
        tracing::debug!(volume = %volume.name, dest = %volume.dest, "named volume mounted as overlay");
        let _ = claim(&mut mounts, entry);
    }
    Ok(mounts)
}

/// Stage 2: consumes `U`, `z` and `Z` markers.
///
/// `U` on tmpfs becomes `uid=`/`gid=` of the exec user; elsewhere it
/// chowns the source to the exec user's host IDs, unless ownership was
/// already applied at creation. `z`/`Z` relabel the source with the
/// container mount label.
///
/// # Errors
///
/// Returns ownership or relabel errors.
pub fn normalize_options(ctx: &MountContext<'_>, mounts: Vec<MountEntry>) -> Result<Vec<MountEntry>> {
    let exec_user = &ctx.identity.exec_user;
    mounts
        .into_iter()
        .map(|mut mount| {
            let mut options = Vec::with_capacity(mount.options.len());
            for token in &mount.options {
                match MountOption::parse(token) {
                    MountOption::Chown if mount.mount_type == MountType::Tmpfs => {
                        options.push(format!("uid={}", exec_user.uid));
                        options.push(format!("gid={}", exec_user.gid));
                    }
                    MountOption::Chown => {
                        if !ctx.state.ownership_applied {
                            change_host_path_ownership(
                                Path::new(&mount.source),
                                true,
                                ctx.identity.host_uid,
                                ctx.identity.host_gid,
                            )?;
                        }
                    }
                    MountOption::Relabel { shared } => {
                        ctx.labeler
                            .relabel(Path::new(&mount.source), &ctx.descriptor.mount_label, shared)?;
                    }
                    _ => options.push(token.clone()),
                }
            }
            mount.options = options;
            Ok(mount)
        })
        .collect()
}

/// Stage 3: implicit bind mounts from the runtime state.
///
/// Destinations already declared by the user win.
#[must_use]
pub fn add_bind_mounts(ctx: &MountContext<'_>, mut mounts: Vec<MountEntry>) -> Vec<MountEntry> {
    for (dest, source) in &ctx.state.bind_mounts {
        let mut options = vec!["bind".to_owned(), "rprivate".to_owned()];
        let is_shm = dest == SHM_DESTINATION;
        if ctx.descriptor.read_only && !is_shm {
            options.push("ro".to_owned());
            options.extend(HARDENING_OPTIONS.map(str::to_owned));
        }
        if is_shm && *source == ctx.descriptor.shm_dir {
            options.extend(HARDENING_OPTIONS.map(str::to_owned));
        }

        if mounts.iter().any(|m| same_destination(&m.destination, dest)) {
            tracing::info!(destination = %dest, "user mount overriding generated mount");
            continue;
        }
        mounts.push(MountEntry::bind(source.to_string_lossy(), dest.as_str(), options));
    }
    mounts
}

/// Stage 4: overlays over arbitrary host directories.
///
/// # Errors
///
/// Returns option, overlay, or ownership errors.
pub fn add_overlay_volumes(ctx: &MountContext<'_>, mut mounts: Vec<MountEntry>) -> Result<Vec<MountEntry>> {
    for volume in &ctx.descriptor.overlay_volumes {
        let dirs = overlay_upper_and_work_dir(&volume.options)?;
        let scratch = allocate_scratch(
            &ctx.state.static_dir,
            ctx.identity.root_uid,
            ctx.identity.root_gid,
        )?;
        let entry = overlay_mount(&scratch, &volume.source, &volume.dest, dirs.as_ref())?;
        if has_marker(&volume.options, &MountOption::Chown) {
            let (uid, gid) = (ctx.identity.host_uid, ctx.identity.host_gid);
            change_host_path_ownership(&volume.source, true, uid, gid)?;
            change_host_path_ownership(&scratch.content, true, uid, gid)?;
        }
        let _ = claim(&mut mounts, entry);
    }
    Ok(mounts)
}

/// Stage 5: images mounted as read-only or read-write overlays.
///
/// # Errors
///
/// Returns [`OcigenError::ImageMountFailed`] if the image cannot be mounted
/// or the overlay cannot be built.
pub fn add_image_volumes(ctx: &MountContext<'_>, mut mounts: Vec<MountEntry>) -> Result<Vec<MountEntry>> {
    for volume in &ctx.descriptor.image_volumes {
        let failed = |message: String| OcigenError::ImageMountFailed {
            image: volume.source.clone(),
            destination: volume.dest.clone(),
            message,
        };
        let mount_point = ctx.images.mount(&volume.source).map_err(|e| failed(e.to_string()))?;
        let scratch = allocate_scratch(
            &ctx.state.static_dir,
            ctx.identity.root_uid,
            ctx.identity.root_gid,
        )?;
        let entry = if volume.read_write {
            overlay_mount(&scratch, &mount_point, &volume.dest, None)
        } else {
            overlay_mount_read_only(&scratch, &mount_point, &volume.dest)
        }
        .map_err(|e| failed(e.to_string()))?;
        let _ = claim(&mut mounts, entry);
    }
    Ok(mounts)
}

/// Runs stages 1 through 5 over the template mounts.
///
/// # Errors
///
/// Returns the first error raised by a stage.
pub fn resolve_volumes(ctx: &MountContext<'_>, template: Vec<MountEntry>) -> Result<Vec<MountEntry>> {
    let mounts = add_named_volumes(ctx, template)?;
    let mounts = normalize_options(ctx, mounts)?;
    let mounts = add_bind_mounts(ctx, mounts);
    let mounts = add_overlay_volumes(ctx, mounts)?;
    add_image_volumes(ctx, mounts)
}

/// Derives the root propagation: shared if any mount is shared, else
/// rslave if any is a slave.
#[must_use]
pub fn derive_root_propagation(mounts: &[MountEntry]) -> Option<RootPropagation> {
    let flags: Vec<Propagation> = mounts
        .iter()
        .flat_map(|m| m.options.iter())
        .filter_map(|o| Propagation::from_token(o))
        .collect();
    if flags.iter().any(|p| p.is_shared()) {
        Some(RootPropagation::Shared)
    } else if flags.iter().any(|p| p.is_slave()) {
        Some(RootPropagation::RSlave)
    } else {
        None
    }
}

/// Canonicalizes tmpfs destinations inside `rootfs`, drops duplicate
/// destinations, sorts by depth and derives the root propagation.
///
/// # Errors
///
/// Returns [`OcigenError::SymlinkResolutionFailed`] if a tmpfs destination
/// cannot be resolved.
pub fn finalize(rootfs: &Path, mounts: Vec<MountEntry>) -> Result<ResolvedMounts> {
    let mut resolved = Vec::with_capacity(mounts.len());
    for mut mount in mounts {
        if mount.mount_type == MountType::Tmpfs {
            mount.destination = resolve_in_root(rootfs, &mount.destination).map_err(|e| {
                OcigenError::SymlinkResolutionFailed {
                    destination: mount.destination.clone(),
                    message: e.to_string(),
                }
            })?;
        }
        let _ = claim(&mut resolved, mount);
    }
    resolved.sort_by_key(MountEntry::depth);

    let root_propagation = derive_root_propagation(&resolved);
    if let Some(p) = root_propagation {
        tracing::debug!(propagation = p.as_str(), "set root propagation");
    }
    Ok(ResolvedMounts {
        mounts: resolved,
        root_propagation,
    })
}
