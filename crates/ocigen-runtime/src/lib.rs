//! # ocigen-runtime
//!
//! Builds the OCI runtime descriptor of a container from its stored
//! configuration and runtime state.
//!
//! [`builder::SpecGenerator`] sequences the resolvers of `ocigen-core` and
//! adds the rest of the descriptor: hostname, environment, annotations,
//! cgroup path, OCI hooks, CDI devices, and secrets. External systems are
//! reached through the traits in [`provider`]; filesystem-backed
//! implementations live in [`hooks`], [`cdi`], [`secrets`] and [`cgroup`].

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod annotations;
pub mod builder;
pub mod cdi;
pub mod cgroup;
pub mod devices;
pub mod environment;
pub mod hooks;
pub mod provider;
pub mod secrets;
pub mod systemd;
