//! Artifact repository
//!
//! The master's packages directory. Artifacts are never deleted; pruning
//! moves them into `.obsolete/` below the directory.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::config::defaults;
use crate::core::package_info::is_artifact_path;
use crate::core::port::{PackageIdentifier, PortLookup};
use crate::core::version::version_compare;
use crate::error::RepositoryError;
use crate::infra::filesystem;

/// An artifact moved out of the repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObsoletedPackage {
    /// Artifact file name
    pub file_name: String,
    /// Why it was obsoleted
    pub reason: String,
}

/// Directory of built artifacts
#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    dir: PathBuf,
}

impl ArtifactRepository {
    /// Repository rooted at `dir`
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Repository directory
    pub fn path(&self) -> &Path {
        &self.dir
    }

    /// Directory obsoleted artifacts are moved to
    pub fn obsolete_dir(&self) -> PathBuf {
        self.dir.join(defaults::OBSOLETE_DIR)
    }

    /// Create the repository directory if needed
    pub fn ensure_exists(&self) -> Result<(), RepositoryError> {
        filesystem::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Path an artifact with this file name has
    pub fn package_path(&self, file_name: &str) -> PathBuf {
        self.dir.join(file_name)
    }

    /// Whether a non-empty artifact with this file name exists
    pub fn has_package(&self, file_name: &str) -> bool {
        fs::metadata(self.package_path(file_name)).is_ok_and(|m| m.is_file() && m.len() > 0)
    }

    /// Artifact paths, sorted by file name
    pub fn list(&self) -> Result<Vec<PathBuf>, RepositoryError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&self.dir).map_err(|e| RepositoryError::Io {
            path: self.dir.clone(),
            error: e.to_string(),
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.path())
            .filter(|path| path.is_file() && is_artifact_path(path))
            .collect();
        paths.sort();
        Ok(paths)
    }

    /// Artifacts with parseable file names
    pub fn identifiers(&self) -> Result<Vec<(PathBuf, PackageIdentifier)>, RepositoryError> {
        let mut result = Vec::new();
        for path in self.list()? {
            let Some(file_name) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
                continue;
            };
            match PackageIdentifier::from_file_name(&file_name) {
                Ok(id) => result.push((path, id)),
                Err(e) => tracing::warn!("Skipping {}: {e}", path.display()),
            }
        }
        Ok(result)
    }

    /// Move an artifact into the obsolete directory
    pub fn obsolete(&self, path: &Path, reason: &str) -> Result<ObsoletedPackage, RepositoryError> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| RepositoryError::InvalidFileName {
                name: path.display().to_string(),
            })?;

        tracing::info!("Obsoleting package {file_name}: {reason}");
        let obsolete_dir = self.obsolete_dir();
        filesystem::create_dir_all(&obsolete_dir)?;
        filesystem::rename(path, &obsolete_dir.join(&file_name)).map_err(RepositoryError::from)?;

        Ok(ObsoletedPackage {
            file_name,
            reason: reason.to_string(),
        })
    }

    /// Apply the three prune policies in order
    ///
    /// 1. artifacts without an active port
    /// 2. artifacts newer than what the active port produces
    /// 3. all but the newest artifact of each package name
    pub fn prune(&self, ports: &dyn PortLookup) -> Result<Vec<ObsoletedPackage>, RepositoryError> {
        let mut obsoleted = Vec::new();

        for (path, id) in self.identifiers()? {
            if ports.active_full_version(&id.name).is_none() {
                obsoleted.push(self.obsolete(&path, "no port for it exists")?);
            }
        }

        for (path, id) in self.identifiers()? {
            let Some(active) = ports.active_full_version(&id.name) else {
                continue;
            };
            if version_compare(&id.full_version(), &active).is_gt() {
                obsoleted.push(self.obsolete(&path, &format!("newer than active {active}"))?);
            }
        }

        let mut newest: HashMap<String, (PathBuf, String)> = HashMap::new();
        for (path, id) in self.identifiers()? {
            let version = id.full_version();
            match newest.remove(&id.name) {
                Some((newest_path, newest_version)) => {
                    if version_compare(&newest_version, &version).is_gt() {
                        obsoleted.push(self.obsolete(
                            &path,
                            &format!("newer version {newest_version} available"),
                        )?);
                        newest.insert(id.name, (newest_path, newest_version));
                    } else {
                        obsoleted.push(
                            self.obsolete(&newest_path, &format!("newer version {version} available"))?,
                        );
                        newest.insert(id.name, (path, version));
                    }
                }
                None => {
                    newest.insert(id.name, (path, version));
                }
            }
        }

        Ok(obsoleted)
    }
}
