//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! Scheduling and building live in [`crate::master`] and [`crate::builder`].

pub mod commands;
pub mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::Level;

use crate::config::{defaults, MasterConfig};
use commands::Commands;

/// Buildmaster - distributed port builds
///
/// Resolves ports into dependency-ordered builds and runs them on remote
/// workers or local builders.
#[derive(Parser, Debug)]
#[command(name = "buildmaster")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Master configuration file
    #[arg(short, long, global = true, default_value = defaults::MASTER_CONFIG_FILE)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

impl Cli {
    /// Most detailed level shown on stderr
    pub fn log_level(&self) -> Level {
        if self.quiet {
            return Level::ERROR;
        }
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            _ => Level::DEBUG,
        }
    }

    /// Load the master configuration and apply command-line overrides
    pub fn load_config(&self) -> Result<MasterConfig> {
        let mut config = MasterConfig::load_from_path(&self.config)
            .with_context(|| format!("Failed to load {}", self.config.display()))?;
        if let Some(command) = &self.command {
            command.apply_overrides(&mut config);
        }
        config
            .validate()
            .context("Invalid configuration after command-line overrides")?;
        Ok(config)
    }

    /// Where the master log goes, for commands that run builds
    pub fn master_log_path(&self) -> Option<PathBuf> {
        match &self.command {
            Some(command) if command.writes_master_log() => self
                .load_config()
                .ok()
                .map(|config| config.output_dir().join(defaults::MASTER_LOG_FILE)),
            _ => None,
        }
    }

    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        let Some(command) = &self.command else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            return Ok(());
        };
        let config = self.load_config()?;
        command.run(config, self.quiet).await
    }
}
