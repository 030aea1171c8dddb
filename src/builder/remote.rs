//! Remote worker
//!
//! State machine around one worker's session. Before the first build, and
//! after every connection problem, the worker is set up again: connect,
//! clone and sync the ports tree, write the build tool config, create the
//! package directories and take stock of the package cache.
//!
//! Required artifacts are uploaded into the worker's cache once and made
//! visible to a build by symlinking them into the packages directory.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use super::session::WorkerSession;
use super::{BuildJob, BuildOutcome, Builder, BuilderState, BuilderStatus, CurrentBuild, WorkerFault, WorkerSettings};
use crate::config::builder::BuilderConfig;
use crate::config::defaults;
use crate::core::builder_conf::{default_packager, BuilderConfParams};
use crate::core::package_info::is_artifact_path;
use crate::error::FilesystemError;
use crate::infra::filesystem;
use crate::infra::logs::LogFile;
use crate::infra::repository::ArtifactRepository;
use crate::infra::transport::{shell_quote, FaultSeverity, FileKind, RemoteTransport};

#[derive(Debug)]
struct WorkerState {
    state: BuilderState,
    connection_errors: u32,
    available: BTreeSet<String>,
    visible: BTreeSet<String>,
    current: Option<CurrentBuild>,
}

/// Worker reached over SSH
#[derive(Debug)]
pub struct RemoteBuilder {
    config: BuilderConfig,
    settings: Arc<WorkerSettings>,
    session: WorkerSession,
    repository: ArtifactRepository,
    log: LogFile,
    worker: Mutex<WorkerState>,
    reconnect_base: Duration,
    reconnect_per_error: Duration,
}

impl RemoteBuilder {
    /// Worker for `config` using `transport`
    ///
    /// Opens `<builders output>/<name>.log`.
    pub fn new(
        config: BuilderConfig,
        settings: Arc<WorkerSettings>,
        transport: Arc<dyn RemoteTransport>,
    ) -> Result<Self, FilesystemError> {
        let log = LogFile::open(
            &settings
                .builders_output_dir
                .join(format!("{}.log", config.name)),
        )?;

        Ok(Self {
            repository: ArtifactRepository::new(&settings.packages_dir),
            session: WorkerSession::new(transport),
            config,
            settings,
            log,
            worker: Mutex::new(WorkerState {
                state: BuilderState::NotAvailable,
                connection_errors: 0,
                available: BTreeSet::new(),
                visible: BTreeSet::new(),
                current: None,
            }),
            reconnect_base: Duration::from_secs_f64(defaults::RECONNECT_DELAY_BASE_SECS),
            reconnect_per_error: Duration::from_secs_f64(defaults::RECONNECT_DELAY_FACTOR_SECS),
        })
    }

    /// Override the delay between connection attempts
    #[must_use]
    pub fn with_reconnect_delay(mut self, base: Duration, per_error: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_per_error = per_error;
        self
    }

    fn worker(&self) -> MutexGuard<'_, WorkerState> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Artifacts cached on the worker
    pub fn available_packages(&self) -> BTreeSet<String> {
        self.worker().available.clone()
    }

    /// Artifacts linked into the worker's packages directory
    pub fn visible_packages(&self) -> BTreeSet<String> {
        self.worker().visible.clone()
    }

    /// Consecutive connection errors
    pub fn connection_errors(&self) -> u32 {
        self.worker().connection_errors
    }

    fn set_state(&self, state: BuilderState) {
        let previous = std::mem::replace(&mut self.worker().state, state);
        if previous != state {
            self.log.line(&format!("state {previous} -> {state}"));
            tracing::debug!("Builder {}: {previous} -> {state}", self.config.name);
        }
    }

    fn cache_path(&self, name: &str) -> String {
        format!("{}/{name}", self.config.portstree.packages_cache_path)
    }

    fn packages_path(&self, name: &str) -> String {
        format!("{}/{name}", self.config.portstree.packages_path)
    }

    async fn connect(&self) -> Result<(), WorkerFault> {
        self.log.line(&format!("trying to connect to {}", self.session.transport().endpoint()));
        match self.session.connect().await {
            Ok(()) => {
                self.log.line("connected to builder");
                self.worker().connection_errors = 0;
                Ok(())
            }
            Err(e) => {
                self.log.line(&format!("failed to connect to builder: {e}"));
                let errors = {
                    let mut worker = self.worker();
                    worker.connection_errors += 1;
                    worker.connection_errors
                };

                if errors >= self.settings.max_connection_errors {
                    self.log.line(&format!(
                        "giving up on builder after {errors} consecutive connection errors"
                    ));
                    tracing::warn!("Builder {} lost after {errors} connection errors", self.config.name);
                    self.set_state(BuilderState::Lost);
                } else {
                    self.set_state(BuilderState::Reconnecting);
                    tokio::time::sleep(self.reconnect_base + self.reconnect_per_error * errors).await;
                }
                Err(e.into())
            }
        }
    }

    /// Bring the worker into the `Available` state
    ///
    /// Returns `false` when the worker is lost.
    async fn setup_for_building(&self) -> Result<bool, WorkerFault> {
        match self.worker().state {
            BuilderState::Available => return Ok(true),
            BuilderState::Lost => return Ok(false),
            BuilderState::NotAvailable | BuilderState::Reconnecting => {}
        }

        if self.settings.max_connection_errors == 0 {
            self.log.line("no connection attempts allowed");
            self.set_state(BuilderState::Lost);
            return Ok(false);
        }

        self.set_state(BuilderState::Reconnecting);
        self.connect().await?;
        self.validate_ports_tree().await?;
        self.sync_ports_tree().await?;
        self.write_builder_config().await?;
        self.create_needed_dirs().await?;
        self.get_available_packages().await?;
        self.remove_obsolete_packages().await?;

        self.set_state(BuilderState::Available);
        Ok(true)
    }

    async fn validate_ports_tree(&self) -> Result<(), WorkerFault> {
        let path = shell_quote(&self.config.portstree.path);
        let command = format!(
            "if [ ! -d {path} ]; then git clone {} {path}; fi",
            shell_quote(&self.settings.ports_tree.origin_url)
        );
        let status = self.session.run(&command, &self.log).await?;
        if status != 0 {
            self.log.line("failed to validate ports tree");
        }
        Ok(())
    }

    async fn sync_ports_tree(&self) -> Result<(), WorkerFault> {
        let command = format!(
            "cd {} && git fetch && git checkout {}",
            shell_quote(&self.config.portstree.path),
            self.settings.ports_tree.head
        );
        let status = self.session.run(&command, &self.log).await?;
        if status != 0 {
            return Err(WorkerFault::Setup {
                step: "sync ports tree".to_string(),
                error: format!("sync command exited with {status}"),
            });
        }
        Ok(())
    }

    async fn write_builder_config(&self) -> Result<(), WorkerFault> {
        let conf = BuilderConfParams {
            tree_path: &self.config.portstree.path,
            packages_path: &self.config.portstree.packages_path,
            packager: self
                .settings
                .packager
                .clone()
                .unwrap_or_else(|| default_packager(&self.config.name)),
            target_architecture: &self.settings.target_architecture,
            secondary_architectures: &self.settings.secondary_architectures,
            allow_untested: self.settings.allow_untested,
            allow_unsafe_sources: self.settings.allow_unsafe_sources,
            create_source_packages: self.settings.create_source_packages,
        }
        .to_conf();

        let local = self
            .settings
            .builders_output_dir
            .join(format!("{}.conf", self.config.name));
        filesystem::write_atomic(&local, conf.render().as_bytes())?;
        self.session
            .put_atomic(&local, &self.config.portstree.builder_config, &self.log)
            .await?;
        Ok(())
    }

    async fn create_needed_dirs(&self) -> Result<(), WorkerFault> {
        self.session.ensure_dir(&self.config.portstree.packages_path).await?;
        self.session
            .ensure_dir(&self.config.portstree.packages_cache_path)
            .await?;
        Ok(())
    }

    async fn get_available_packages(&self) -> Result<(), WorkerFault> {
        self.clear_visible_packages().await?;
        let entries = self
            .session
            .transport()
            .list_dir(&self.config.portstree.packages_cache_path)
            .await?;

        let mut worker = self.worker();
        worker
            .available
            .extend(entries.into_iter().filter(|e| is_artifact_path(Path::new(e))));
        Ok(())
    }

    async fn remove_obsolete_packages(&self) -> Result<(), WorkerFault> {
        let available = self.available_packages();
        for entry in available {
            if self.repository.has_package(&entry)
                || self.settings.system_packages_dir.join(&entry).exists()
            {
                continue;
            }

            self.log.line(&format!("removing obsolete package {entry} from cache"));
            self.session.transport().remove(&self.cache_path(&entry)).await?;
            self.worker().available.remove(&entry);
        }
        Ok(())
    }

    /// Hide every visible artifact again
    ///
    /// Symlinks are removed; real files (build output) move into the cache
    /// and become available.
    async fn clear_visible_packages(&self) -> Result<(), WorkerFault> {
        let transport = self.session.transport();
        let entries = transport.list_dir(&self.config.portstree.packages_path).await?;

        for entry in entries.iter().filter(|e| is_artifact_path(Path::new(e))) {
            let path = self.packages_path(entry);
            match transport.stat(&path).await? {
                Some(FileKind::Symlink) => {
                    transport.remove(&path).await?;
                }
                Some(_) => {
                    self.log.line(&format!("moving real package {entry} to builder cache"));
                    transport.rename(&path, &self.cache_path(entry)).await?;
                    self.worker().available.insert(entry.clone());
                }
                None => {}
            }
        }

        self.worker().visible.clear();
        Ok(())
    }

    async fn make_package_available(&self, local: &Path) -> Result<String, WorkerFault> {
        let name = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| WorkerFault::Setup {
                step: "upload package".to_string(),
                error: format!("'{}' has no file name", local.display()),
            })?;
        if self.worker().available.contains(&name) {
            return Ok(name);
        }

        self.log.line(&format!("upload package {name} to builder cache"));
        self.session
            .put_atomic(local, &self.cache_path(&name), &self.log)
            .await?;
        self.worker().available.insert(name.clone());
        Ok(name)
    }

    async fn make_package_visible(&self, name: &str) -> Result<(), WorkerFault> {
        {
            let worker = self.worker();
            if worker.visible.contains(name) {
                return Ok(());
            }
            if !worker.available.contains(name) {
                return Err(WorkerFault::Setup {
                    step: "make package visible".to_string(),
                    error: format!("{name} is not in the builder cache"),
                });
            }
        }

        self.session
            .transport()
            .symlink(&self.cache_path(name), &self.packages_path(name))
            .await?;
        self.worker().visible.insert(name.to_string());
        Ok(())
    }

    fn build_tool_command(&self, flags: &str, with_args: bool, name: &str) -> String {
        let mut command = format!(
            "cd {} && {} --config={} {flags}",
            shell_quote(&self.config.portstree.path),
            shell_quote(&self.config.haikuporter.path),
            shell_quote(&self.config.portstree.builder_config),
        );
        if with_args && !self.config.haikuporter.args.is_empty() {
            command.push(' ');
            command.push_str(&self.config.haikuporter.args);
        }
        command.push(' ');
        command.push_str(&shell_quote(name));
        command
    }

    /// Remote command building `name`
    pub fn build_command(&self, name: &str) -> String {
        format!(
            "source {} && {}",
            self.settings.env_setup,
            self.build_tool_command(
                "--no-system-packages --no-package-obsoletion --ignore-messages",
                true,
                name
            )
        )
    }

    /// Remote command purging the work directory of `name`
    pub fn purge_command(&self, name: &str) -> String {
        self.build_tool_command("--no-package-obsoletion --ignore-messages --purge", false, name)
    }

    async fn purge_port(&self, job: &BuildJob, log: &LogFile) -> Result<(), WorkerFault> {
        self.session.run(&self.purge_command(&job.name()), log).await?;
        Ok(())
    }

    async fn run_build(&self, job: &BuildJob, log: &LogFile) -> Result<(), WorkerFault> {
        if !self.setup_for_building().await? {
            return Err(WorkerFault::Lost);
        }

        self.purge_port(job, log).await?;
        self.clear_visible_packages().await?;
        for required in &job.required {
            let name = self.make_package_available(required).await?;
            self.make_package_visible(&name).await?;
        }

        log.line(&format!("building port {}", job.name()));
        let status = self.session.run(&self.build_command(&job.name()), log).await?;
        if status != 0 {
            if let Err(e) = self.purge_port(job, log).await {
                log.line(&format!("purge after failure failed: {e}"));
            }
            if let Err(e) = self.clear_visible_packages().await {
                log.line(&format!("cleanup after failure failed: {e}"));
            }
            return Err(WorkerFault::BuildFailure { status });
        }

        for package in &job.resulting_packages {
            let file_name = package.file_name();
            let remote = self.packages_path(&file_name);
            if self.session.transport().stat(&remote).await?.is_none() {
                return Err(WorkerFault::MissingArtifact { name: file_name });
            }

            log.line(&format!("download package {file_name} from builder"));
            self.session
                .get_atomic(&remote, &self.settings.packages_dir.join(&file_name), log)
                .await?;
        }

        self.purge_port(job, log).await?;
        self.clear_visible_packages().await?;
        Ok(())
    }

    fn handle_fault(&self, fault: &WorkerFault, log: &LogFile) -> BuildOutcome {
        match fault {
            WorkerFault::BuildFailure { .. } | WorkerFault::MissingArtifact { .. } => {
                log.line(&format!("build failed: {fault}"));
                BuildOutcome::failure()
            }
            WorkerFault::Disconnected => {
                log.line(&format!("build failed: {fault}"));
                self.set_state(BuilderState::NotAvailable);
                BuildOutcome::worker_failure()
            }
            WorkerFault::Transport(e) => {
                match e.severity() {
                    FaultSeverity::Recoverable => {
                        log.line(&format!("connection failed: {e}"));
                        if self.worker().state == BuilderState::Available {
                            self.set_state(BuilderState::Reconnecting);
                        }
                    }
                    FaultSeverity::Terminal => {
                        log.line(&format!("builder failed: {e}"));
                        self.set_state(BuilderState::Lost);
                    }
                    FaultSeverity::Operation => log.line(&format!("build failed: {e}")),
                }
                BuildOutcome::worker_failure()
            }
            WorkerFault::Lost | WorkerFault::Setup { .. } | WorkerFault::Filesystem(_) => {
                log.line(&format!("build failed: {fault}"));
                BuildOutcome::worker_failure()
            }
        }
    }
}

#[async_trait]
impl Builder for RemoteBuilder {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn state(&self) -> BuilderState {
        self.worker().state
    }

    fn status(&self) -> BuilderStatus {
        let worker = self.worker();
        BuilderStatus {
            name: self.config.name.clone(),
            state: worker.state,
            available_packages: worker.available.len(),
            connection_errors: worker.connection_errors,
            max_connection_errors: self.settings.max_connection_errors,
            current_build: worker.current.clone(),
        }
    }

    async fn build(&self, job: &BuildJob, log: &LogFile) -> BuildOutcome {
        self.worker().current = Some(CurrentBuild {
            build: job.name(),
            number: job.number,
        });
        self.log.line(&format!("build {} of {} started", job.number, job.name()));

        let outcome = match self.run_build(job, log).await {
            Ok(()) => {
                log.line("build completed successfully");
                BuildOutcome::success()
            }
            Err(fault) => self.handle_fault(&fault, log),
        };

        if !outcome.success && outcome.reschedule {
            self.session.close().await;
        }

        self.log.line(&format!(
            "build {} of {} finished: {}",
            job.number,
            job.name(),
            if outcome.success { "success" } else { "failure" }
        ));
        self.worker().current = None;
        outcome
    }
}
