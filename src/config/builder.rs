//! Worker configuration files
//!
//! One file per worker in the builders directory. Files ending in `.json`
//! are read with `serde_json`, files ending in `.toml` with `toml`; other
//! files are ignored. Field names are camelCase in both formats.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::defaults;
use crate::error::ConfigError;

/// Resolved configuration of one remote worker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuilderConfig {
    /// Unique worker name
    pub name: String,
    /// SSH endpoint and credentials
    pub ssh: SshConfig,
    /// Worker-side directories
    pub portstree: PortsTreeConfig,
    /// Worker-side build tool
    pub haikuporter: BuildToolConfig,
    /// File the configuration was read from
    #[serde(skip)]
    pub source: PathBuf,
}

/// SSH endpoint and credentials
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshConfig {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Private key, absolute
    pub private_key_file: PathBuf,
    /// Trusted host keys, absolute
    pub host_key_file: PathBuf,
    /// Optional jump host
    pub jump: Option<JumpHostConfig>,
}

/// Host the SSH connection is tunnelled through
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JumpHostConfig {
    /// Host name or address
    pub host: String,
    /// Port
    pub port: u16,
    /// Login user
    pub user: String,
    /// Private key, absolute
    pub private_key_file: PathBuf,
}

/// Worker-side directories
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PortsTreeConfig {
    /// Ports tree
    pub path: String,
    /// Where built artifacts land
    pub packages_path: String,
    /// Where uploaded required artifacts are cached
    pub packages_cache_path: String,
    /// Where the master writes the worker's build tool config
    pub builder_config: String,
}

/// Worker-side build tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildToolConfig {
    /// Command
    pub path: String,
    /// Extra arguments, passed verbatim
    pub args: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConfig {
    name: Option<String>,
    ssh: Option<RawSsh>,
    portstree: Option<RawPortsTree>,
    #[serde(default)]
    haikuporter: RawBuildTool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSsh {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    private_key_file: Option<PathBuf>,
    host_key_file: Option<PathBuf>,
    jump: Option<RawJump>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawJump {
    host: Option<String>,
    port: Option<u16>,
    user: Option<String>,
    private_key_file: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawPortsTree {
    path: Option<String>,
    packages_path: Option<String>,
    packages_cache_path: Option<String>,
    builder_config: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuildTool {
    path: Option<String>,
    args: Option<String>,
}

fn required<T>(value: Option<T>, path: &Path, field: &str) -> Result<T, ConfigError> {
    value.ok_or_else(|| ConfigError::MissingField {
        path: path.to_path_buf(),
        field: field.to_string(),
    })
}

fn relative_to(base: &Path, file: PathBuf) -> PathBuf {
    if file.is_absolute() {
        file
    } else {
        base.join(file)
    }
}

impl BuilderConfig {
    /// Whether `path` looks like a worker configuration file
    pub fn is_config_file(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("json" | "toml")
        )
    }

    /// Parse configuration content; the extension of `path` picks the format
    pub fn parse(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let parse_error = |error: String| ConfigError::ParseError {
            path: path.to_path_buf(),
            error,
        };
        let raw: RawConfig = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(content).map_err(|e| parse_error(e.to_string()))?,
            _ => serde_json::from_str(content).map_err(|e| parse_error(e.to_string()))?,
        };
        Self::resolve(path, raw)
    }

    /// Load one configuration file
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::parse(path, &content)
    }

    /// Load every configuration file in `dir`, ordered by file name
    pub fn load_dir(dir: &Path) -> Result<Vec<Self>, ConfigError> {
        let entries = fs::read_dir(dir).map_err(|e| ConfigError::ReadError {
            path: dir.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut files: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && Self::is_config_file(path))
            .collect();
        files.sort();

        let mut names = HashSet::new();
        let mut configs = Vec::with_capacity(files.len());
        for file in files {
            let config = Self::load_from_path(&file)?;
            if !names.insert(config.name.clone()) {
                return Err(ConfigError::Invalid {
                    message: format!("duplicate builder name '{}' in '{}'", config.name, file.display()),
                });
            }
            configs.push(config);
        }
        Ok(configs)
    }

    fn resolve(path: &Path, raw: RawConfig) -> Result<Self, ConfigError> {
        let base = path.parent().unwrap_or_else(|| Path::new("."));

        let name = required(raw.name, path, "name")?;
        let ssh = required(raw.ssh, path, "ssh")?;
        let jump = ssh
            .jump
            .map(|jump| -> Result<JumpHostConfig, ConfigError> {
                Ok(JumpHostConfig {
                    host: required(jump.host, path, "ssh.jump.host")?,
                    port: jump.port.unwrap_or(defaults::DEFAULT_SSH_PORT),
                    user: required(jump.user, path, "ssh.jump.user")?,
                    private_key_file: relative_to(
                        base,
                        required(jump.private_key_file, path, "ssh.jump.privateKeyFile")?,
                    ),
                })
            })
            .transpose()?;
        let ssh = SshConfig {
            host: required(ssh.host, path, "ssh.host")?,
            port: ssh.port.unwrap_or(defaults::DEFAULT_SSH_PORT),
            user: required(ssh.user, path, "ssh.user")?,
            private_key_file: relative_to(
                base,
                required(ssh.private_key_file, path, "ssh.privateKeyFile")?,
            ),
            host_key_file: relative_to(
                base,
                ssh.host_key_file
                    .unwrap_or_else(|| PathBuf::from(defaults::DEFAULT_HOST_KEY_FILE)),
            ),
            jump,
        };

        let tree = required(raw.portstree, path, "portstree")?;
        let tree_path = required(tree.path, path, "portstree.path")?;
        let packages_path = tree
            .packages_path
            .unwrap_or_else(|| format!("{tree_path}/{}", defaults::PACKAGES_DIR));
        let packages_cache_path = tree
            .packages_cache_path
            .unwrap_or_else(|| format!("{packages_path}/{}", defaults::PACKAGES_CACHE_DIR));
        let builder_config = tree
            .builder_config
            .unwrap_or_else(|| format!("{tree_path}/{}", defaults::BUILDER_CONFIG_FILE));

        Ok(Self {
            name,
            ssh,
            portstree: PortsTreeConfig {
                path: tree_path,
                packages_path,
                packages_cache_path,
                builder_config,
            },
            haikuporter: BuildToolConfig {
                path: raw
                    .haikuporter
                    .path
                    .unwrap_or_else(|| defaults::DEFAULT_BUILD_TOOL.to_string()),
                args: raw.haikuporter.args.unwrap_or_default(),
            },
            source: path.to_path_buf(),
        })
    }
}
