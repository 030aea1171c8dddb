//! Buildmaster - distributed build coordinator for ports trees
//!
//! Resolves requested ports into a dependency-ordered set of builds and
//! dispatches them to remote workers over SSH (or to local builders),
//! moving required and produced artifacts between the master repository
//! and the workers.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Domain model and dependency resolution
//! - [`builder`] - Workers and their state machine
//! - [`master`] - Planning, scheduling and status reporting
//! - [`infra`] - Infrastructure layer (filesystem, SSH, processes)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod builder;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;
pub mod master;

#[cfg(test)]
pub mod test_utils;
