//! Workers
//!
//! A [`Builder`] runs one build at a time. Remote builders keep a state
//! machine around their SSH session; local builders are always available.
//!
//! - [`session`] - atomic transfers and command execution on a worker
//! - [`remote`] - remote worker state machine and build dispatch
//! - [`local`] - builds on the master itself

pub mod local;
pub mod remote;
pub mod session;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::MasterConfig;
use crate::core::port::{PackageIdentifier, Port};
use crate::core::schedule::ScheduledBuild;
use crate::error::FilesystemError;
use crate::infra::git::PortsTreeInfo;
use crate::infra::logs::LogFile;
use crate::infra::transport::TransportError;

pub use local::LocalBuilder;
pub use remote::RemoteBuilder;

/// Availability of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BuilderState {
    /// Not connected yet, or dropped mid command
    NotAvailable,
    /// Waiting to (re)connect on the next assignment
    Reconnecting,
    /// Connected and prepared
    Available,
    /// Permanently excluded
    Lost,
}

impl BuilderState {
    /// Whether builds may still be assigned
    pub fn is_usable(self) -> bool {
        self != Self::Lost
    }
}

impl fmt::Display for BuilderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotAvailable => "Not Available",
            Self::Reconnecting => "Reconnecting",
            Self::Available => "Available",
            Self::Lost => "Lost",
        })
    }
}

/// Result of one build attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Artifacts were produced and fetched
    pub success: bool,
    /// The failure was not the port's fault
    pub reschedule: bool,
}

impl BuildOutcome {
    /// Successful build
    pub fn success() -> Self {
        Self {
            success: true,
            reschedule: false,
        }
    }

    /// The build itself failed
    pub fn failure() -> Self {
        Self {
            success: false,
            reschedule: false,
        }
    }

    /// The worker failed; the port might build elsewhere
    pub fn worker_failure() -> Self {
        Self {
            success: false,
            reschedule: true,
        }
    }
}

/// Why a build attempt did not succeed
#[derive(Error, Debug)]
pub enum WorkerFault {
    /// The build tool exited non-zero
    #[error("build failure (exit status {status})")]
    BuildFailure { status: i32 },

    /// The command lost its connection
    #[error("builder disconnected")]
    Disconnected,

    /// The worker has been lost
    #[error("builder lost")]
    Lost,

    /// Preparing the worker failed
    #[error("{step} failed: {error}")]
    Setup { step: String, error: String },

    /// An expected artifact was not produced
    #[error("artifact '{name}' missing after build")]
    MissingArtifact { name: String },

    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Local filesystem failure
    #[error(transparent)]
    Filesystem(#[from] FilesystemError),
}

/// A build handed to a worker
#[derive(Debug, Clone)]
pub struct BuildJob {
    /// Build number
    pub number: u64,
    /// Port to build
    pub port: Arc<Port>,
    /// Artifacts the build must produce
    pub resulting_packages: Vec<PackageIdentifier>,
    /// Local paths of the artifacts the build needs
    pub required: Vec<PathBuf>,
}

impl BuildJob {
    /// Job for a scheduled build
    pub fn new(number: u64, build: &ScheduledBuild) -> Self {
        Self {
            number,
            port: Arc::clone(&build.port),
            resulting_packages: build.resulting_packages.clone(),
            required: build.required.clone(),
        }
    }

    /// The port's versioned name
    pub fn name(&self) -> String {
        self.port.versioned_name()
    }
}

/// Build currently running on a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurrentBuild {
    /// Port versioned name
    pub build: String,
    /// Build number
    pub number: u64,
}

/// Serializable view of a worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderStatus {
    /// Worker name
    pub name: String,
    /// State
    pub state: BuilderState,
    /// Artifacts cached on the worker
    pub available_packages: usize,
    /// Consecutive connection errors
    pub connection_errors: u32,
    /// Limit of consecutive connection errors
    pub max_connection_errors: u32,
    /// Running build
    pub current_build: Option<CurrentBuild>,
}

/// Settings every worker of a run shares
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Primary target architecture
    pub target_architecture: String,
    /// Secondary target architectures
    pub secondary_architectures: Vec<String>,
    /// Packager identity override
    pub packager: Option<String>,
    /// Build untested ports
    pub allow_untested: bool,
    /// Accept sources without checksums
    pub allow_unsafe_sources: bool,
    /// Create source packages
    pub create_source_packages: bool,
    /// Consecutive connection errors before a worker is lost
    pub max_connection_errors: u32,
    /// Script sourced before the build tool runs
    pub env_setup: String,
    /// Build tool run by local builders
    pub build_tool: String,
    /// Installed system packages (checked on the master)
    pub system_packages_dir: PathBuf,
    /// Master ports tree identity the workers sync to
    pub ports_tree: PortsTreeInfo,
    /// Master ports tree
    pub ports_tree_path: PathBuf,
    /// Master artifact directory
    pub packages_dir: PathBuf,
    /// Per-worker logs and generated configs
    pub builders_output_dir: PathBuf,
}

impl WorkerSettings {
    /// Settings from the master configuration
    pub fn from_config(config: &MasterConfig, ports_tree: PortsTreeInfo) -> Self {
        Self {
            target_architecture: config.target_architecture.clone(),
            secondary_architectures: config.secondary_architectures.clone(),
            packager: config.packager.clone(),
            allow_untested: config.allow_untested,
            allow_unsafe_sources: config.allow_unsafe_sources,
            create_source_packages: config.create_source_packages,
            max_connection_errors: config.max_connection_errors,
            env_setup: config.env_setup.clone(),
            build_tool: config.build_tool.clone(),
            system_packages_dir: PathBuf::from(&config.system_packages_dir),
            ports_tree,
            ports_tree_path: config.ports_tree(),
            packages_dir: config.packages_dir(),
            builders_output_dir: config.output_dir().join("builders"),
        }
    }
}

/// A worker that can run builds
#[async_trait]
pub trait Builder: Send + Sync {
    /// Unique worker name
    fn name(&self) -> &str;

    /// Current state
    fn state(&self) -> BuilderState;

    /// Serializable view
    fn status(&self) -> BuilderStatus;

    /// Run one build end to end, streaming output into `log`
    async fn build(&self, job: &BuildJob, log: &LogFile) -> BuildOutcome;
}
