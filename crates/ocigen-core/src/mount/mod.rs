//! Mount table resolution.
//!
//! Named, overlay, and image volumes plus runtime bind mounts are folded
//! into the template mounts by [`pipeline`], one stage at a time.

pub mod options;
pub mod overlay;
pub mod pipeline;
pub mod securejoin;

pub use options::{MountOption, OverlayDirs, Propagation};
pub use pipeline::{MountContext, ResolvedMounts, RootPropagation};
