//! Error types for buildmaster
//!
//! Domain-specific error types using thiserror. Transport and worker faults
//! live next to their seams in [`crate::infra::transport`] and
//! [`crate::builder`].

use std::path::PathBuf;
use thiserror::Error;

use crate::builder::WorkerFault;
use crate::infra::git::GitError;
use crate::infra::transport::TransportError;

/// Configuration errors, fatal at startup
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to read a configuration file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: PathBuf, error: String },

    /// Failed to parse a configuration file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: PathBuf, error: String },

    /// Required field missing
    #[error("Config file '{path}' is missing required field '{field}'")]
    MissingField { path: PathBuf, field: String },

    /// Semantically invalid configuration
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },
}

/// Filesystem errors
#[derive(Error, Debug)]
pub enum FilesystemError {
    /// Failed to create directory
    #[error("Failed to create directory '{path}': {error}")]
    CreateDir { path: PathBuf, error: String },

    /// Failed to write file
    #[error("Failed to write file '{path}': {error}")]
    WriteFile { path: PathBuf, error: String },

    /// Failed to read file
    #[error("Failed to read file '{path}': {error}")]
    ReadFile { path: PathBuf, error: String },

    /// Failed to rename or move a file
    #[error("Failed to move '{from}' to '{to}': {error}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        error: String,
    },
}

/// Dependency resolution errors
#[derive(Error, Debug)]
pub enum ResolverError {
    /// A requires expression could not be satisfied, even after restarts
    #[error("Unable to resolve dependencies of '{package}':\n\t{}", messages.join("\n\t"))]
    Unresolvable {
        package: String,
        messages: Vec<String>,
    },

    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },

    /// Package info could not be read or parsed
    #[error("Invalid package info '{path}': {error}")]
    InvalidPackageInfo { path: PathBuf, error: String },
}

/// Artifact repository errors
#[derive(Error, Debug)]
pub enum RepositoryError {
    /// IO error on a repository path
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// File name does not follow `<name>-<version>-<revision>-<arch>.<ext>`
    #[error("Not an artifact file name: '{name}'")]
    InvalidFileName { name: String },

    /// Artifact is neither local nor otherwise available
    #[error("Package '{name}' unavailable")]
    Unavailable { name: String },

    /// Filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Errors while turning requested ports into scheduled builds
#[derive(Error, Debug)]
pub enum PlanError {
    /// Request is not `<name>[-<version>[-<revision>]]`
    #[error("Invalid port specifier '{request}'")]
    InvalidRequest { request: String },

    /// Port is not in the catalog
    #[error("Port '{name}' not found in catalog")]
    UnknownPort { name: String },

    /// Requested revision differs from the catalog
    #[error("Port {port} isn't available in revision {requested} (found revision {found} instead)")]
    RevisionMismatch {
        port: String,
        requested: u32,
        found: u32,
    },

    /// Port status forbids building it on the target architecture
    #[error("Port {port} is {status} on this architecture")]
    NotBuildable { port: String, status: String },

    /// A resolved package has no port producing it
    #[error("Inconsistency: '{port}' requires '{package}' but no corresponding port was found")]
    NoPortForPackage { port: String, package: String },

    /// Port requires one of its own packages to be built first
    #[error("Port '{port}' depends on itself")]
    SelfDependency { port: String },

    /// Port was already skipped earlier in this run
    #[error("Port '{port}' was skipped: {reason}")]
    Skipped { port: String, reason: String },

    /// A required port could not be planned
    #[error("Dependency '{dependency}' of '{port}' cannot be built")]
    DependencyNotBuildable { port: String, dependency: String },

    /// Resolution failure
    #[error(transparent)]
    Resolver(#[from] ResolverError),

    /// Scheduling failure
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Scheduler errors
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// A build with the same name was already scheduled
    #[error("Build '{name}' is already scheduled")]
    DuplicateBuild { name: String },

    /// No builders were configured or could be loaded
    #[error("No builders available")]
    NoBuilders,

    /// Every builder has been lost
    #[error("All builders lost")]
    AllBuildersLost,

    /// Status or record output failed
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// Top-level buildmaster error type
#[derive(Error, Debug)]
pub enum BuildmasterError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Resolver error
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Filesystem error
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] FilesystemError),

    /// Repository error
    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    /// Planning error
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Scheduler error
    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    /// Transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Worker fault
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerFault),

    /// Ports tree identity could not be read
    #[error("Git error: {0}")]
    Git(#[from] GitError),

    /// IO error
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },
}
