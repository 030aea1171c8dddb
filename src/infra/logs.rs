//! Timestamped log files for workers and builds

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::Local;

use crate::error::FilesystemError;
use crate::infra::filesystem;

/// Append-only text log; every line gets a local timestamp prefix
#[derive(Debug)]
pub struct LogFile {
    path: PathBuf,
    file: Mutex<File>,
}

impl LogFile {
    /// Open `path` for appending, creating parent directories
    pub fn open(path: &Path) -> Result<Self, FilesystemError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            filesystem::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| FilesystemError::WriteFile {
                path: path.to_path_buf(),
                error: e.to_string(),
            })?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    /// Log file path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one line
    pub fn line(&self, message: &str) {
        let timestamp = Local::now().format("%Y-%m-%d %H:%M:%S");
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        if let Err(e) = writeln!(file, "{timestamp}: {message}") {
            tracing::warn!("Failed to write {}: {e}", self.path.display());
        }
    }
}
