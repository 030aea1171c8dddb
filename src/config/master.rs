//! Master configuration
//!
//! Read from `buildmaster.toml`. Every field has a default, so a missing
//! file yields a usable configuration. Command-line flags override values
//! after loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::error::ConfigError;

/// Master configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// Primary target architecture
    pub target_architecture: String,

    /// Secondary target architectures
    pub secondary_architectures: Vec<String>,

    /// Packager identity; defaults to one derived from the builder name
    pub packager: Option<String>,

    /// Build ports whose status is untested
    pub allow_untested: bool,

    /// Accept sources without checksums
    pub allow_unsafe_sources: bool,

    /// Also create source packages
    pub create_source_packages: bool,

    /// Consecutive connection errors before a builder is lost
    pub max_connection_errors: u32,

    /// Use this many local builders instead of remote ones
    pub local_builders: usize,

    /// Build tool run by local builders
    pub build_tool: String,

    /// Script sourced before the build tool runs on a worker
    pub env_setup: String,

    /// Command used to list package files
    pub package_command: String,

    /// Installed system packages on the workers
    pub system_packages_dir: String,

    /// Directory layout
    pub paths: PathsConfig,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            target_architecture: defaults::DEFAULT_TARGET_ARCHITECTURE.to_string(),
            secondary_architectures: Vec::new(),
            packager: None,
            allow_untested: false,
            allow_unsafe_sources: false,
            create_source_packages: false,
            max_connection_errors: defaults::DEFAULT_MAX_CONNECTION_ERRORS,
            local_builders: 0,
            build_tool: defaults::DEFAULT_BUILD_TOOL.to_string(),
            env_setup: defaults::DEFAULT_ENV_SETUP.to_string(),
            package_command: defaults::DEFAULT_PACKAGE_COMMAND.to_string(),
            system_packages_dir: defaults::DEFAULT_SYSTEM_PACKAGES_DIR.to_string(),
            paths: PathsConfig::default(),
        }
    }
}

/// Directory layout of the master
///
/// Unset entries are derived from `ports_tree`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Master ports tree
    pub ports_tree: Option<PathBuf>,
    /// Recipe-derived package infos
    pub repository: Option<PathBuf>,
    /// Built artifacts
    pub packages: Option<PathBuf>,
    /// Worker configuration files
    pub builders: Option<PathBuf>,
    /// Logs, records and status
    pub output: Option<PathBuf>,
}

impl MasterConfig {
    /// Load configuration from a specific path
    ///
    /// If the file doesn't exist, returns default configuration.
    /// If it exists but is invalid, returns an error.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check values that parse but make no sense
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.target_architecture.is_empty() {
            return Err(ConfigError::Invalid {
                message: "target_architecture must not be empty".to_string(),
            });
        }
        if self
            .secondary_architectures
            .iter()
            .any(|arch| *arch == self.target_architecture)
        {
            return Err(ConfigError::Invalid {
                message: format!(
                    "secondary architectures must not contain the target architecture '{}'",
                    self.target_architecture
                ),
            });
        }
        Ok(())
    }

    /// Master ports tree
    pub fn ports_tree(&self) -> PathBuf {
        self.paths.ports_tree.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Directory of recipe-derived package infos
    pub fn repository_dir(&self) -> PathBuf {
        self.paths
            .repository
            .clone()
            .unwrap_or_else(|| self.ports_tree().join("repository"))
    }

    /// Directory of built artifacts
    pub fn packages_dir(&self) -> PathBuf {
        self.paths
            .packages
            .clone()
            .unwrap_or_else(|| self.ports_tree().join(defaults::PACKAGES_DIR))
    }

    /// Directory of worker configuration files
    pub fn builders_dir(&self) -> PathBuf {
        self.paths
            .builders
            .clone()
            .unwrap_or_else(|| self.ports_tree().join("buildmaster").join("builders"))
    }

    /// Directory for logs, records and status
    pub fn output_dir(&self) -> PathBuf {
        self.paths
            .output
            .clone()
            .unwrap_or_else(|| self.ports_tree().join("buildmaster").join("output"))
    }

    /// Port catalog of the ports tree
    pub fn port_catalog(&self) -> PathBuf {
        self.ports_tree().join(defaults::PORT_CATALOG_FILE)
    }
}
