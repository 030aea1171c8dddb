//! Worker session
//!
//! Wraps a [`RemoteTransport`] with the guarantees the worker logic relies
//! on: transfers land under their final name only once complete, commands
//! report a dropped connection as such, and directories are created
//! idempotently.

use std::path::Path;
use std::sync::Arc;

use crate::config::defaults;
use crate::infra::filesystem;
use crate::infra::logs::LogFile;
use crate::infra::transport::{FileKind, RemoteTransport, TransportError};

use super::WorkerFault;

/// Session with one worker
#[derive(Clone)]
pub struct WorkerSession {
    transport: Arc<dyn RemoteTransport>,
}

impl std::fmt::Debug for WorkerSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSession")
            .field("endpoint", &self.transport.endpoint())
            .finish()
    }
}

impl WorkerSession {
    /// Session over `transport`
    pub fn new(transport: Arc<dyn RemoteTransport>) -> Self {
        Self { transport }
    }

    /// Underlying transport
    pub fn transport(&self) -> &dyn RemoteTransport {
        self.transport.as_ref()
    }

    /// Connect
    pub async fn connect(&self) -> Result<(), TransportError> {
        self.transport.connect().await
    }

    /// Close the connection
    pub async fn close(&self) {
        self.transport.close().await;
    }

    /// Upload to `<remote>.upload`, then rename into place
    ///
    /// Attempted up to three times.
    pub async fn put_atomic(&self, local: &Path, remote: &str, log: &LogFile) -> Result<(), TransportError> {
        let upload_path = format!("{remote}.{}", defaults::UPLOAD_SUFFIX);
        let mut last_error = None;

        for attempt in 1..=defaults::TRANSFER_ATTEMPTS {
            let result = async {
                self.transport.upload(local, &upload_path).await?;
                self.transport.rename(&upload_path, remote).await
            }
            .await;

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    log.line(&format!("error putting {remote} (attempt {attempt}): {e}"));
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| TransportError::Transfer {
            path: remote.to_string(),
            error: "no attempts made".to_string(),
        }))
    }

    /// Download to `<local>.download`, then rename into place
    ///
    /// Attempted up to three times. An interrupted transfer leaves only the
    /// sidecar behind.
    pub async fn get_atomic(&self, remote: &str, local: &Path, log: &LogFile) -> Result<(), WorkerFault> {
        let download_path = filesystem::sidecar_path(local, defaults::DOWNLOAD_SUFFIX);
        let mut last_error = None;

        for attempt in 1..=defaults::TRANSFER_ATTEMPTS {
            match self.transport.download(remote, &download_path).await {
                Ok(()) => {
                    filesystem::rename(&download_path, local)?;
                    return Ok(());
                }
                Err(e) => {
                    log.line(&format!("error getting {remote} (attempt {attempt}): {e}"));
                    last_error = Some(e);
                }
            }
        }

        Err(WorkerFault::Transport(last_error.unwrap_or_else(|| {
            TransportError::Transfer {
                path: remote.to_string(),
                error: "no attempts made".to_string(),
            }
        })))
    }

    /// Create `path` unless it already is a directory
    pub async fn ensure_dir(&self, path: &str) -> Result<(), TransportError> {
        match self.transport.stat(path).await? {
            Some(FileKind::Directory) => Ok(()),
            Some(_) => Err(TransportError::Remote {
                operation: "mkdir".to_string(),
                path: path.to_string(),
                error: "file exists".to_string(),
            }),
            None => self.transport.mkdir(path).await,
        }
    }

    /// Run `command`, appending its output to `log`, and return its status
    ///
    /// A negative status on a dead connection is reported as
    /// [`WorkerFault::Disconnected`].
    pub async fn run(&self, command: &str, log: &LogFile) -> Result<i32, WorkerFault> {
        log.line(&format!("running command: {command}"));
        let mut process = self.transport.exec(command).await?;
        while let Some(line) = process.next_line().await {
            log.line(&line);
        }

        let status = process.wait().await;
        log.line(&format!("command exit status: {status}"));
        if status < 0 && !self.transport.is_alive().await {
            return Err(WorkerFault::Disconnected);
        }
        Ok(status)
    }
}
