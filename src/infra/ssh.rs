//! OpenSSH-backed transport
//!
//! A master connection (`ControlMaster`) is opened once per worker; commands
//! run through `ssh -tt` and file operations through `sftp -b -`, both
//! multiplexed over the master connection.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::transport::{shell_quote, FileKind, RemoteProcess, RemoteTransport, TransportError};
use crate::config::builder::SshConfig;
use crate::config::defaults;

/// Locate the `ssh` and `sftp` client programs
pub fn find_client_tools() -> Result<(PathBuf, PathBuf), TransportError> {
    let find = |program: &str| {
        which::which(program).map_err(|e| TransportError::Spawn {
            program: program.to_string(),
            error: e.to_string(),
        })
    };
    Ok((find("ssh")?, find("sftp")?))
}

/// Exit status of a remote command; 255 and signals mean no status
fn exit_code(status: ExitStatus) -> i32 {
    match status.code() {
        Some(255) | None => -1,
        Some(code) => code,
    }
}

fn sftp_quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Transport using the system OpenSSH client
#[derive(Debug)]
pub struct OpenSshTransport {
    config: SshConfig,
    ssh: PathBuf,
    sftp: PathBuf,
    control_path: PathBuf,
}

impl OpenSshTransport {
    /// Transport for `config`, keeping its control socket in `control_dir`
    pub fn new(config: SshConfig, control_dir: &Path) -> Result<Self, TransportError> {
        let (ssh, sftp) = find_client_tools()?;
        Ok(Self {
            config,
            ssh,
            sftp,
            control_path: control_dir.join("%C"),
        })
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.config.user, self.config.host)
    }

    /// Options shared by `ssh` and `sftp`
    fn common_args(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-i".to_string(),
            self.config.private_key_file.display().to_string(),
            "-o".to_string(),
            format!("UserKnownHostsFile={}", self.config.host_key_file.display()),
            "-o".to_string(),
            "StrictHostKeyChecking=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", defaults::CONNECT_TIMEOUT_SECS),
            "-o".to_string(),
            format!("ServerAliveInterval={}", defaults::KEEPALIVE_INTERVAL_SECS),
            "-o".to_string(),
            format!("ControlPath={}", self.control_path.display()),
        ];

        if let Some(jump) = &self.config.jump {
            args.push("-o".to_string());
            args.push(format!(
                "ProxyCommand={} -o BatchMode=yes -o IdentitiesOnly=yes -i {} -o UserKnownHostsFile={} -p {} -W %h:%p {}@{}",
                self.ssh.display(),
                jump.private_key_file.display(),
                self.config.host_key_file.display(),
                jump.port,
                jump.user,
                jump.host
            ));
        }
        args
    }

    fn ssh_command(&self) -> Command {
        let mut command = Command::new(&self.ssh);
        command
            .args(self.common_args())
            .arg("-p")
            .arg(self.config.port.to_string());
        command
    }

    fn classify_connect_failure(&self, stderr: &str) -> TransportError {
        let endpoint = self.endpoint();
        let error = stderr.trim().to_string();
        if error.contains("Host key verification failed")
            || error.contains("Permission denied")
            || error.contains("REMOTE HOST IDENTIFICATION HAS CHANGED")
        {
            TransportError::Protocol { endpoint, error }
        } else {
            TransportError::Connection { endpoint, error }
        }
    }

    /// Run `command` without a terminal and capture its output
    async fn run_plain(&self, command: &str) -> Result<std::process::Output, TransportError> {
        self.ssh_command()
            .arg(self.destination())
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| TransportError::Spawn {
                program: self.ssh.display().to_string(),
                error: e.to_string(),
            })
    }

    /// Run an sftp batch; returns the output lines that are not echoed commands
    async fn sftp_batch(&self, operation: &str, path: &str, script: &str) -> Result<Vec<String>, TransportError> {
        let mut child = Command::new(&self.sftp)
            .args(self.common_args())
            .arg("-b")
            .arg("-")
            .arg("-P")
            .arg(self.config.port.to_string())
            .arg(self.destination())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| TransportError::Spawn {
                program: self.sftp.display().to_string(),
                error: e.to_string(),
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(script.as_bytes())
                .await
                .map_err(|e| self.operation_error(operation, path, e.to_string()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| self.operation_error(operation, path, e.to_string()))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if !self.is_alive().await {
                return Err(TransportError::Disconnected {
                    endpoint: self.endpoint(),
                    error,
                });
            }
            return Err(self.operation_error(operation, path, error));
        }

        Ok(String::from_utf8_lossy(&output.stdout)
            .lines()
            .filter(|line| !line.starts_with("sftp>"))
            .map(str::to_string)
            .collect())
    }

    fn operation_error(&self, operation: &str, path: &str, error: String) -> TransportError {
        match operation {
            "put" | "get" => TransportError::Transfer {
                path: path.to_string(),
                error,
            },
            _ => TransportError::Remote {
                operation: operation.to_string(),
                path: path.to_string(),
                error,
            },
        }
    }
}

#[async_trait]
impl RemoteTransport for OpenSshTransport {
    fn endpoint(&self) -> String {
        format!("{}:{}", self.destination(), self.config.port)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        if self.is_alive().await {
            return Ok(());
        }

        let mut command = self.ssh_command();
        command
            .args(["-M", "-f", "-N", "-o", "ControlPersist=yes"])
            .arg(self.destination())
            .stdin(Stdio::null());

        let timeout = Duration::from_secs(defaults::CONNECT_TIMEOUT_SECS * 2);
        let output = tokio::time::timeout(timeout, command.output())
            .await
            .map_err(|_| TransportError::Connection {
                endpoint: self.endpoint(),
                error: "timed out".to_string(),
            })?
            .map_err(|e| TransportError::Spawn {
                program: self.ssh.display().to_string(),
                error: e.to_string(),
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(self.classify_connect_failure(&String::from_utf8_lossy(&output.stderr)))
        }
    }

    async fn close(&self) {
        let result = self
            .ssh_command()
            .args(["-O", "exit"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .output()
            .await;
        if let Err(e) = result {
            tracing::debug!("Closing {} failed: {e}", self.endpoint());
        }
    }

    async fn is_alive(&self) -> bool {
        self.ssh_command()
            .args(["-O", "check"])
            .arg(self.destination())
            .stdin(Stdio::null())
            .output()
            .await
            .is_ok_and(|output| output.status.success())
    }

    async fn exec(&self, command: &str) -> Result<RemoteProcess, TransportError> {
        let mut ssh = self.ssh_command();
        ssh.arg("-tt").arg(self.destination()).arg("--").arg(command);
        RemoteProcess::spawn(ssh, exit_code).map_err(|e| TransportError::Spawn {
            program: self.ssh.display().to_string(),
            error: e.to_string(),
        })
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let script = format!(
            "put {} {}\n",
            sftp_quote(&local.display().to_string()),
            sftp_quote(remote)
        );
        self.sftp_batch("put", remote, &script).await.map(|_| ())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let script = format!(
            "get {} {}\n",
            sftp_quote(remote),
            sftp_quote(&local.display().to_string())
        );
        self.sftp_batch("get", remote, &script).await.map(|_| ())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        // sftp's rename uses the posix-rename extension when the server has it
        let script = format!("rename {} {}\n", sftp_quote(from), sftp_quote(to));
        self.sftp_batch("rename", from, &script).await.map(|_| ())
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), TransportError> {
        let script = format!("ln -s {} {}\n", sftp_quote(target), sftp_quote(link));
        self.sftp_batch("symlink", link, &script).await.map(|_| ())
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        let script = format!("rm {}\n", sftp_quote(path));
        self.sftp_batch("remove", path, &script).await.map(|_| ())
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        let script = format!("mkdir {}\n", sftp_quote(path));
        self.sftp_batch("mkdir", path, &script).await.map(|_| ())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let script = format!("ls -1a {}\n", sftp_quote(path));
        let lines = self.sftp_batch("list", path, &script).await?;
        Ok(lines
            .iter()
            .map(|line| line.trim())
            .map(|line| line.rsplit('/').next().unwrap_or(line))
            .filter(|name| !name.is_empty() && *name != "." && *name != "..")
            .map(str::to_string)
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileKind>, TransportError> {
        let quoted = shell_quote(path);
        let command = format!(
            "if [ -L {quoted} ]; then echo symlink; elif [ -d {quoted} ]; then echo directory; \
             elif [ -f {quoted} ]; then echo file; elif [ -e {quoted} ]; then echo other; \
             else echo missing; fi"
        );
        let output = self.run_plain(&command).await?;
        if !output.status.success() {
            return Err(TransportError::Disconnected {
                endpoint: self.endpoint(),
                error: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(match String::from_utf8_lossy(&output.stdout).trim() {
            "symlink" => Some(FileKind::Symlink),
            "directory" => Some(FileKind::Directory),
            "file" => Some(FileKind::File),
            "other" => Some(FileKind::Other),
            _ => None,
        })
    }
}
