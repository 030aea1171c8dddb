//! Core domain model
//!
//! Versions, package infos, ports, the provides index and the dependency
//! resolver. Nothing in here talks to a worker; file and process access
//! belongs in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`version`] - Version comparison
//! - [`resolvable`] - Provides and requires expressions
//! - [`package_info`] - Package info records
//! - [`port`] - Ports, packages and the port catalog
//! - [`platform`] - Target architectures and implicit provides
//! - [`provides`] - Provides index
//! - [`resolver`] - Dependency resolution
//! - [`graph`] - Dependency graph ordering
//! - [`builder_conf`] - Worker-side build tool configuration
//! - [`schedule`] - Scheduled, skipped and recorded builds
//! - [`status`] - Status snapshots

pub mod builder_conf;
pub mod graph;
pub mod package_info;
pub mod platform;
pub mod port;
pub mod provides;
pub mod resolvable;
pub mod resolver;
pub mod schedule;
pub mod status;
pub mod version;
