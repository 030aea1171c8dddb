//! Reading package infos from disk
//!
//! `.DependencyInfo` files are JSON and parsed directly. Artifacts
//! (`.hpkg`) and `.PackageInfo` files are read through the platform's
//! `package list -i` command; results are cached by modification time.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::SystemTime;

use tokio::process::Command;
use walkdir::WalkDir;

use crate::config::defaults;
use crate::core::package_info::PackageInfo;
use crate::error::ResolverError;

const PACKAGE_INFO_EXTENSION: &str = "PackageInfo";

type CacheEntry = (Option<SystemTime>, Arc<PackageInfo>);

/// Reads package infos, shelling out for binary packages
#[derive(Debug)]
pub struct PackageTool {
    command: String,
    cache: Mutex<HashMap<PathBuf, CacheEntry>>,
}

impl PackageTool {
    /// Tool running `command list -i <file>`
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Whether `path` is a file this tool can read
    pub fn is_package_info_path(path: &Path) -> bool {
        path.extension().and_then(|e| e.to_str()).is_some_and(|ext| {
            ext == defaults::PACKAGE_EXTENSION
                || ext == defaults::DEPENDENCY_INFO_EXTENSION
                || ext == PACKAGE_INFO_EXTENSION
        })
    }

    /// Read the package info of one file
    pub async fn read(&self, path: &Path) -> Result<Arc<PackageInfo>, ResolverError> {
        let modified = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        if let Some((cached_modified, info)) = self.lock_cache().get(path) {
            if *cached_modified == modified {
                return Ok(Arc::clone(info));
            }
        }

        let info = Arc::new(self.read_uncached(path).await?);
        self.lock_cache()
            .insert(path.to_path_buf(), (modified, Arc::clone(&info)));
        Ok(info)
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, HashMap<PathBuf, CacheEntry>> {
        self.cache.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn read_uncached(&self, path: &Path) -> Result<PackageInfo, ResolverError> {
        let invalid = |error: String| ResolverError::InvalidPackageInfo {
            path: path.to_path_buf(),
            error,
        };

        let is_dependency_info = path
            .extension()
            .is_some_and(|ext| ext == defaults::DEPENDENCY_INFO_EXTENSION);
        if is_dependency_info {
            let content = tokio::fs::read_to_string(path)
                .await
                .map_err(|e| invalid(e.to_string()))?;
            return PackageInfo::from_dependency_info(path, &content);
        }

        let output = Command::new(&self.command)
            .arg("list")
            .arg("-i")
            .arg(path)
            .output()
            .await
            .map_err(|e| invalid(format!("failed to run '{}': {e}", self.command)))?;
        if !output.status.success() {
            return Err(invalid(String::from_utf8_lossy(&output.stderr).trim().to_string()));
        }
        PackageInfo::from_listing(path, &String::from_utf8_lossy(&output.stdout))
    }

    /// Read every package info directly inside `dirs`
    ///
    /// Unreadable files are reported and skipped; missing directories are
    /// ignored.
    pub async fn scan(&self, dirs: &[PathBuf]) -> Vec<Arc<PackageInfo>> {
        let mut paths: Vec<PathBuf> = dirs
            .iter()
            .filter(|dir| dir.is_dir())
            .flat_map(|dir| {
                WalkDir::new(dir)
                    .min_depth(1)
                    .max_depth(1)
                    .sort_by_file_name()
                    .into_iter()
                    .filter_map(Result::ok)
                    .filter(|entry| entry.file_type().is_file())
                    .map(walkdir::DirEntry::into_path)
                    .filter(|path| Self::is_package_info_path(path))
            })
            .collect();
        paths.dedup();

        let mut infos = Vec::with_capacity(paths.len());
        for path in paths {
            match self.read(&path).await {
                Ok(info) => infos.push(info),
                Err(e) => tracing::warn!("{e}"),
            }
        }
        infos
    }
}
