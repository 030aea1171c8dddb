//! Filesystem operations
//!
//! Files other tasks may read are written next to their final name and
//! renamed into place, so readers see either the old or the new content.

use std::ffi::OsString;
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::defaults;
use crate::error::FilesystemError;

/// Create a directory and all parent directories
pub fn create_dir_all(path: &Path) -> Result<(), FilesystemError> {
    fs::create_dir_all(path).map_err(|e| FilesystemError::CreateDir {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// `<path>.<suffix>`
pub fn sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

/// Move a file, replacing the target
pub fn rename(from: &Path, to: &Path) -> Result<(), FilesystemError> {
    fs::rename(from, to).map_err(|e| FilesystemError::Rename {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        error: e.to_string(),
    })
}

/// Write content to a temporary sidecar and rename it into place
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<(), FilesystemError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        create_dir_all(parent)?;
    }

    let temp = sidecar_path(path, defaults::TEMP_SUFFIX);
    fs::write(&temp, content).map_err(|e| FilesystemError::WriteFile {
        path: temp.clone(),
        error: e.to_string(),
    })?;
    rename(&temp, path)
}

/// Read content from a file
pub fn read_file(path: &Path) -> Result<String, FilesystemError> {
    fs::read_to_string(path).map_err(|e| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    })
}

/// Hex encoded SHA-256 of a file
pub fn sha256_file(path: &Path) -> Result<String, FilesystemError> {
    let read_error = |e: std::io::Error| FilesystemError::ReadFile {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut file = fs::File::open(path).map_err(read_error)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buffer).map_err(read_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}
