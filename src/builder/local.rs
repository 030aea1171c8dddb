//! Builds on the master itself
//!
//! The build tool runs in the master's ports tree and writes straight into
//! the master's packages directory, so there is nothing to transfer.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::process::Command;

use super::{BuildJob, BuildOutcome, Builder, BuilderState, BuilderStatus, CurrentBuild, WorkerSettings};
use crate::infra::logs::LogFile;
use crate::infra::transport::RemoteProcess;

/// Worker running the build tool locally
#[derive(Debug)]
pub struct LocalBuilder {
    name: String,
    settings: Arc<WorkerSettings>,
    current: Mutex<Option<CurrentBuild>>,
}

impl LocalBuilder {
    /// Local worker called `name`
    pub fn new(name: impl Into<String>, settings: Arc<WorkerSettings>) -> Self {
        Self {
            name: name.into(),
            settings,
            current: Mutex::new(None),
        }
    }

    fn set_current(&self, build: Option<CurrentBuild>) {
        *self.current.lock().unwrap_or_else(PoisonError::into_inner) = build;
    }

    fn command(&self, job: &BuildJob) -> Command {
        let mut command = Command::new(&self.settings.build_tool);
        command
            .current_dir(&self.settings.ports_tree_path)
            .args(["--no-package-obsoletion", "--ignore-messages"])
            .arg(job.name());
        command
    }
}

#[async_trait]
impl Builder for LocalBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> BuilderState {
        BuilderState::Available
    }

    fn status(&self) -> BuilderStatus {
        BuilderStatus {
            name: self.name.clone(),
            state: BuilderState::Available,
            available_packages: 0,
            connection_errors: 0,
            max_connection_errors: self.settings.max_connection_errors,
            current_build: self
                .current
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    async fn build(&self, job: &BuildJob, log: &LogFile) -> BuildOutcome {
        self.set_current(Some(CurrentBuild {
            build: job.name(),
            number: job.number,
        }));
        log.line(&format!("building port {} locally", job.name()));

        let outcome = match RemoteProcess::spawn(self.command(job), |s| s.code().unwrap_or(-1)) {
            Ok(mut process) => {
                while let Some(line) = process.next_line().await {
                    log.line(&line);
                }
                let status = process.wait().await;
                log.line(&format!("command exit status: {status}"));

                let missing: Vec<String> = job
                    .resulting_packages
                    .iter()
                    .map(|package| package.file_name())
                    .filter(|file| !self.settings.packages_dir.join(file).is_file())
                    .collect();

                if status != 0 {
                    log.line("build failed");
                    BuildOutcome::failure()
                } else if !missing.is_empty() {
                    log.line(&format!("build failed: missing artifacts {}", missing.join(", ")));
                    BuildOutcome::failure()
                } else {
                    log.line("build completed successfully");
                    BuildOutcome::success()
                }
            }
            Err(e) => {
                log.line(&format!("failed to start {}: {e}", self.settings.build_tool));
                tracing::error!("Local builder {} cannot start build tool: {e}", self.name);
                BuildOutcome::worker_failure()
            }
        };

        self.set_current(None);
        outcome
    }
}
