//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod builders;
pub mod check;
pub mod prune;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::config::MasterConfig;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Plan and run a distributed build of the given ports
    Build {
        /// Ports to build, as `<name>[-<version>[-<revision>]]`
        #[arg(required = true)]
        ports: Vec<String>,

        /// Build locally with N builders (defaults to the number of CPUs)
        #[arg(long, value_name = "N")]
        local: Option<Option<usize>>,

        /// Also build ports whose status is untested
        #[arg(long)]
        allow_untested: bool,

        /// Master ports tree
        #[arg(long, value_name = "DIR")]
        ports_tree: Option<PathBuf>,

        /// Directory for logs, records and status
        #[arg(long, value_name = "DIR")]
        output: Option<PathBuf>,
    },

    /// Move obsolete artifacts out of the packages directory
    Prune,

    /// Check that every artifact's requires can be satisfied
    Check,

    /// Load and validate the worker configuration files
    Builders,
}

impl Commands {
    /// Whether the command runs builds and keeps a master log
    pub fn writes_master_log(&self) -> bool {
        matches!(self, Self::Build { .. })
    }

    /// Apply command-line values over the configuration file
    pub fn apply_overrides(&self, config: &mut MasterConfig) {
        if let Self::Build {
            local,
            allow_untested,
            ports_tree,
            output,
            ..
        } = self
        {
            if let Some(local) = local {
                config.local_builders = local.unwrap_or_else(num_cpus::get).max(1);
            }
            if *allow_untested {
                config.allow_untested = true;
            }
            if let Some(ports_tree) = ports_tree {
                config.paths.ports_tree = Some(ports_tree.clone());
            }
            if let Some(output) = output {
                config.paths.output = Some(output.clone());
            }
        }
    }

    /// Execute the command
    pub async fn run(&self, config: MasterConfig, quiet: bool) -> Result<()> {
        match self {
            Self::Build { ports, .. } => build::execute(config, ports, quiet).await,
            Self::Prune => prune::execute(&config).await,
            Self::Check => check::execute(&config).await,
            Self::Builders => builders::execute(&config).await,
        }
    }
}
