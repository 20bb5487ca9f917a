//! # ocigen-core
//!
//! Resolution primitives the spec builder sequences:
//! - **Identity**: exec user lookup against the image's user databases and
//!   translation to host IDs.
//! - **ID mappings**: GID availability domains and fitting mappings to the
//!   ranges granted to the current user namespace.
//! - **Ownership & labels**: idempotent recursive chown and SELinux relabel.
//! - **Mounts**: option parsing, overlay construction, root-confined symlink
//!   resolution, and the staged mount pipeline.
//! - **Namespaces**: create/join directives and user namespace mappings.
//!
//! External systems (volume manager, image store, namespace owners) are
//! reached through the traits in [`provider`].

#![allow(unsafe_code)]
#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod identity;
pub mod idmap;
pub mod label;
pub mod local;
pub mod mount;
pub mod namespace;
pub mod ownership;
pub mod provider;
