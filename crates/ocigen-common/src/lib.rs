//! # ocigen-common
//!
//! Shared types, error definitions, configuration models, and constants
//! used across the entire ocigen workspace.
//!
//! This crate is the leaf of the dependency graph. It depends on no other
//! internal crate and provides the container descriptor consumed by the
//! generator as well as the OCI runtime spec model it produces.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

pub mod config;
pub mod constants;
pub mod container;
pub mod error;
pub mod spec;
pub mod types;
