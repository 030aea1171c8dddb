//! Ports tree identity
//!
//! Workers are synchronised to the master's ports tree by origin URL and
//! HEAD commit, both read with gix.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Git errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Not a git repository
    #[error("Invalid repository at '{path}': {error}")]
    InvalidRepository { path: PathBuf, error: String },

    /// No `origin` remote with a fetch URL
    #[error("Repository at '{path}' has no origin remote")]
    NoOrigin { path: PathBuf },

    /// HEAD does not point to a commit
    #[error("Failed to resolve HEAD of '{path}': {error}")]
    NoHead { path: PathBuf, error: String },
}

/// Origin URL and HEAD commit of a ports tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortsTreeInfo {
    /// Fetch URL of `origin`
    pub origin_url: String,
    /// Hex commit id of HEAD
    pub head: String,
}

impl PortsTreeInfo {
    /// Read the identity of the repository at `path`
    pub fn discover(path: &Path) -> Result<Self, GitError> {
        let repo = gix::open(path).map_err(|e| GitError::InvalidRepository {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let origin_url = repo
            .find_remote("origin")
            .ok()
            .and_then(|remote| {
                remote
                    .url(gix::remote::Direction::Fetch)
                    .map(|url| url.to_bstring().to_string())
            })
            .ok_or_else(|| GitError::NoOrigin {
                path: path.to_path_buf(),
            })?;

        let head = repo
            .head_id()
            .map_err(|e| GitError::NoHead {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?
            .to_string();

        Ok(Self { origin_url, head })
    }
}
