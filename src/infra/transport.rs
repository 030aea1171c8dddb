//! Remote transport seam
//!
//! A worker is reached through a [`RemoteTransport`]: command execution with
//! a combined output stream plus a handful of file operations. Paths on the
//! remote side are plain strings since the worker's filesystem is POSIX
//! regardless of the master's platform.

use std::path::Path;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};

/// Transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Could not establish the connection
    #[error("Failed to connect to '{endpoint}': {error}")]
    Connection { endpoint: String, error: String },

    /// The connection dropped while in use
    #[error("Connection to '{endpoint}' lost: {error}")]
    Disconnected { endpoint: String, error: String },

    /// The SSH layer rejected the session (authentication, host key, protocol)
    #[error("SSH protocol failure on '{endpoint}': {error}")]
    Protocol { endpoint: String, error: String },

    /// Upload or download failed
    #[error("Transfer of '{path}' failed: {error}")]
    Transfer { path: String, error: String },

    /// A remote filesystem operation failed
    #[error("Remote {operation} '{path}' failed: {error}")]
    Remote {
        operation: String,
        path: String,
        error: String,
    },

    /// A local client program could not be started
    #[error("Failed to run '{program}': {error}")]
    Spawn { program: String, error: String },
}

/// How a transport failure affects the worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultSeverity {
    /// Connection level; the worker should reconnect
    Recoverable,
    /// The worker cannot be used anymore
    Terminal,
    /// Only the current operation failed
    Operation,
}

impl TransportError {
    /// Classification used by the worker state machine
    pub fn severity(&self) -> FaultSeverity {
        match self {
            Self::Connection { .. } | Self::Disconnected { .. } | Self::Transfer { .. } => {
                FaultSeverity::Recoverable
            }
            Self::Protocol { .. } | Self::Spawn { .. } => FaultSeverity::Terminal,
            Self::Remote { .. } => FaultSeverity::Operation,
        }
    }
}

/// Kind of a remote directory entry, without following symlinks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Regular file
    File,
    /// Directory
    Directory,
    /// Symbolic link
    Symlink,
    /// Anything else
    Other,
}

/// A running remote command
///
/// Lines of combined stdout/stderr arrive in order; the exit status becomes
/// available after the stream closes. A negative status means the command
/// did not report one, typically because the connection dropped.
#[derive(Debug)]
pub struct RemoteProcess {
    lines: mpsc::Receiver<String>,
    status: oneshot::Receiver<i32>,
}

impl RemoteProcess {
    /// Process fed by the given channels
    pub fn new(lines: mpsc::Receiver<String>, status: oneshot::Receiver<i32>) -> Self {
        Self { lines, status }
    }

    /// Process that already finished with `output` and `status`
    pub fn finished(output: &str, status: i32) -> Self {
        let lines: Vec<&str> = output.lines().collect();
        let (line_tx, line_rx) = mpsc::channel(lines.len().max(1));
        for line in lines {
            let _ = line_tx.try_send(line.to_string());
        }
        let (status_tx, status_rx) = oneshot::channel();
        let _ = status_tx.send(status);
        Self::new(line_rx, status_rx)
    }

    /// Start `command` with piped output
    ///
    /// stdout and stderr are merged line by line; `exit_code` maps the
    /// final status.
    pub fn spawn(mut command: Command, exit_code: fn(ExitStatus) -> i32) -> std::io::Result<Self> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let (line_tx, line_rx) = mpsc::channel(256);
        let (status_tx, status_rx) = oneshot::channel();

        tokio::spawn(async move {
            let out = stdout.map(|s| tokio::spawn(forward_lines(s, line_tx.clone())));
            let err = stderr.map(|s| tokio::spawn(forward_lines(s, line_tx.clone())));
            drop(line_tx);
            for task in [out, err].into_iter().flatten() {
                let _ = task.await;
            }

            let code = match child.wait().await {
                Ok(status) => exit_code(status),
                Err(_) => -1,
            };
            let _ = status_tx.send(code);
        });

        Ok(Self::new(line_rx, status_rx))
    }

    /// Next output line, `None` once the stream closed
    pub async fn next_line(&mut self) -> Option<String> {
        self.lines.recv().await
    }

    /// Drain remaining output and return the exit status
    pub async fn wait(mut self) -> i32 {
        while self.lines.recv().await.is_some() {}
        self.status.await.unwrap_or(-1)
    }
}

/// Decode raw output bytes, replacing invalid UTF-8
pub fn decode_line(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes)
        .trim_end_matches(['\r', '\n'])
        .to_string()
}

async fn forward_lines<R>(reader: R, lines: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut buffer = Vec::new();
    loop {
        buffer.clear();
        match reader.read_until(b'\n', &mut buffer).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                if lines.send(decode_line(&buffer)).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Quote a string for a POSIX shell using double quotes
pub fn shell_quote(value: &str) -> String {
    let mut quoted = String::with_capacity(value.len() + 2);
    quoted.push('"');
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '$' | '`') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

/// Connection to one worker
#[async_trait]
pub trait RemoteTransport: Send + Sync {
    /// Human readable endpoint, for logs
    fn endpoint(&self) -> String;

    /// Establish the connection
    async fn connect(&self) -> Result<(), TransportError>;

    /// Tear the connection down; never fails
    async fn close(&self);

    /// Whether the connection is still usable
    async fn is_alive(&self) -> bool;

    /// Run a shell command on a pseudo terminal
    async fn exec(&self, command: &str) -> Result<RemoteProcess, TransportError>;

    /// Copy a local file to a remote path
    async fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError>;

    /// Copy a remote file to a local path
    async fn download(&self, remote: &str, local: &Path) -> Result<(), TransportError>;

    /// Rename with POSIX semantics, replacing the target
    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError>;

    /// Create a symlink at `link` pointing to `target`
    async fn symlink(&self, target: &str, link: &str) -> Result<(), TransportError>;

    /// Remove a file or symlink
    async fn remove(&self, path: &str) -> Result<(), TransportError>;

    /// Create one directory
    async fn mkdir(&self, path: &str) -> Result<(), TransportError>;

    /// Entry names of a directory, without `.` and `..`
    async fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError>;

    /// Kind of the entry at `path`, `None` if it does not exist
    async fn stat(&self, path: &str) -> Result<Option<FileKind>, TransportError>;
}
