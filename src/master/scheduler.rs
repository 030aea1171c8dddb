//! Scheduler core
//!
//! Holds the table of scheduled builds, dispatches buildable ones to idle
//! builders and propagates finished (or failed) artifacts into the builds
//! waiting for them.
//!
//! A build is only dispatched once everything it requires is present on the
//! master. Builds are scanned in insertion order and the first buildable one
//! wins.

use std::collections::{BTreeSet, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use super::reporter::StatusSink;
use crate::builder::{BuildJob, BuildOutcome, Builder, BuilderState};
use crate::config::defaults;
use crate::core::graph::DependencyGraph;
use crate::core::port::{PackageIdentifier, Port};
use crate::core::schedule::{ArtifactDigest, BuildRecord, PortSummary, ScheduledBuild, SkippedBuild};
use crate::core::status::{pkg_hour, BuildLists, BuilderLists, ImpulseTracker, StatusSnapshot, Summary};
use crate::error::{FilesystemError, SchedulerError};
use crate::infra::filesystem;
use crate::infra::git::PortsTreeInfo;
use crate::infra::logs::LogFile;

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// Every build finished or was lost
    Complete,
    /// Interrupted by the operator
    Aborted,
    /// No usable builder was left
    AllBuildersLost,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Complete => "complete",
            Self::Aborted => "aborted",
            Self::AllBuildersLost => "all builders lost",
        })
    }
}

/// Final status and snapshot of a run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// How the run ended
    pub status: RunStatus,
    /// Snapshot taken at the end
    pub snapshot: StatusSnapshot,
}

/// Persistent, monotonically increasing build numbers
#[derive(Debug)]
pub struct BuildNumbers {
    path: Option<PathBuf>,
    next: u64,
}

impl BuildNumbers {
    /// Numbers stored in `path`; a missing file starts at 1
    pub fn load(path: &Path) -> Result<Self, FilesystemError> {
        let next = if path.exists() {
            let content = filesystem::read_file(path)?;
            content
                .trim()
                .parse()
                .map_err(|e: std::num::ParseIntError| FilesystemError::ReadFile {
                    path: path.to_path_buf(),
                    error: format!("invalid build number: {e}"),
                })?
        } else {
            1
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            next,
        })
    }

    /// Numbers that are not persisted
    pub fn in_memory(next: u64) -> Self {
        Self { path: None, next }
    }

    /// Number the next build will get
    pub fn peek(&self) -> u64 {
        self.next
    }

    /// Take the next number and persist the one after it
    pub fn allocate(&mut self) -> u64 {
        let number = self.next;
        self.next += 1;
        if let Some(path) = &self.path {
            if let Err(e) = filesystem::write_atomic(path, self.next.to_string().as_bytes()) {
                tracing::warn!("Failed to store build number: {e}");
            }
        }
        number
    }
}

/// Paths and identity a scheduler works with
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Primary target architecture
    pub target_architecture: String,
    /// Master artifact directory
    pub packages_dir: PathBuf,
    /// Build logs, records and status
    pub output_dir: PathBuf,
    /// Master ports tree identity
    pub ports_tree: PortsTreeInfo,
}

#[derive(Debug)]
struct SchedulerState {
    builds: Vec<ScheduledBuild>,
    skipped: Vec<SkippedBuild>,
    busy: Vec<bool>,
    numbers: BuildNumbers,
    build_status: String,
    start_time: Option<DateTime<Utc>>,
    end_time: Option<DateTime<Utc>>,
    impulse: ImpulseTracker,
    aborted: bool,
    all_builders_lost: bool,
}

struct Shared {
    builders: Vec<Arc<dyn Builder>>,
    settings: SchedulerSettings,
    sinks: Vec<Arc<dyn StatusSink>>,
    state: Mutex<SchedulerState>,
    changed: Notify,
}

enum Step {
    Dispatch(usize),
    Wait,
    Done,
}

/// Build scheduler
#[derive(Clone)]
pub struct Scheduler {
    shared: Arc<Shared>,
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("builders", &self.shared.builders.len())
            .field("settings", &self.shared.settings)
            .finish()
    }
}

impl Scheduler {
    /// Scheduler dispatching to `builders`
    pub fn new(
        builders: Vec<Arc<dyn Builder>>,
        settings: SchedulerSettings,
        numbers: BuildNumbers,
        sinks: Vec<Arc<dyn StatusSink>>,
    ) -> Self {
        let busy = vec![false; builders.len()];
        Self {
            shared: Arc::new(Shared {
                builders,
                settings,
                sinks,
                state: Mutex::new(SchedulerState {
                    builds: Vec::new(),
                    skipped: Vec::new(),
                    busy,
                    numbers,
                    build_status: "preparing".to_string(),
                    start_time: None,
                    end_time: None,
                    impulse: ImpulseTracker::new(defaults::IMPULSE_WINDOW),
                    aborted: false,
                    all_builders_lost: false,
                }),
                changed: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Schedule `port`, waiting for `missing` and using the `required` artifacts
    ///
    /// Returns `false` when the port was skipped because some of its
    /// artifacts already exist.
    pub fn schedule<I>(&self, port: Arc<Port>, missing: I, required: Vec<PathBuf>) -> Result<bool, SchedulerError>
    where
        I: IntoIterator<Item = String>,
    {
        let name = port.versioned_name();
        let mut state = self.state();
        if state.builds.iter().any(|b| b.name() == name) {
            return Err(SchedulerError::DuplicateBuild { name });
        }

        let existing = port
            .artifact_names(&self.shared.settings.target_architecture)
            .into_iter()
            .any(|file| self.shared.settings.packages_dir.join(file).exists());
        if existing {
            tracing::info!("Skipping {name}: some packages already exist, revision bump required");
            state.skipped.push(SkippedBuild::port(
                port,
                "some packages already exist, revision bump required",
            ));
            return Ok(false);
        }

        tracing::debug!("Scheduling {name}");
        state.builds.push(ScheduledBuild::new(
            port,
            &self.shared.settings.target_architecture,
            missing,
            required,
        ));
        Ok(true)
    }

    /// Record a port or request that will not be built
    pub fn skip(&self, skipped: SkippedBuild) {
        tracing::info!("Skipping {}: {}", skipped.name, skipped.reason);
        self.state().skipped.push(skipped);
    }

    /// Whether a build with this name is scheduled
    pub fn is_scheduled(&self, name: &str) -> bool {
        self.state().builds.iter().any(|b| b.name() == name)
    }

    /// Whether a build with this name was skipped
    pub fn is_skipped(&self, name: &str) -> bool {
        self.state().skipped.iter().any(|s| s.name == name)
    }

    /// Number of scheduled builds
    pub fn len(&self) -> usize {
        self.state().builds.len()
    }

    /// Whether nothing is scheduled
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Set the human readable run status and report it
    pub fn set_status(&self, status: &str) {
        let changed = {
            let mut state = self.state();
            if state.build_status == status {
                false
            } else {
                state.build_status = status.to_string();
                true
            }
        };
        if changed {
            tracing::info!("Status: {status}");
            self.report();
        }
    }

    /// Stop dispatching; running builds are left to finish
    pub fn abort(&self) {
        self.state().aborted = true;
        self.shared.changed.notify_one();
    }

    /// Current status snapshot
    pub fn snapshot(&self) -> StatusSnapshot {
        let builder_states: Vec<_> = self.shared.builders.iter().map(|b| b.status()).collect();
        let mut builders = BuilderLists::default();
        for status in builder_states {
            if status.state == BuilderState::Lost {
                builders.lost.push(status);
            } else if status.current_build.is_some() {
                builders.active.push(status);
            } else if status.state == BuilderState::Reconnecting {
                builders.reconnecting.push(status);
            } else {
                builders.idle.push(status);
            }
        }

        let now = Utc::now();
        let mut state = self.state();
        let mut builds = BuildLists::default();
        for build in &state.builds {
            let status = build.status();
            if build.lost {
                builds.lost.push(status);
            } else if build.complete && build.failed {
                builds.failed.push(status);
            } else if build.complete {
                builds.complete.push(status);
            } else if build.started {
                builds.active.push(status);
            } else if build.is_buildable() {
                builds.scheduled.push(status);
            } else {
                builds.blocked.push(status);
            }
        }
        builds.skipped = state
            .skipped
            .iter()
            .map(|s| s.status(&self.shared.settings.target_architecture))
            .collect();

        let counts = builds.counts();
        let finished = counts.complete + counts.failed;
        let start_time = state.start_time;
        let end = state.end_time.unwrap_or(now);
        let impulse = state.impulse.sample(now, finished);

        StatusSnapshot {
            summary: Summary {
                builds: counts,
                builders: builders.counts(),
                duration: start_time.map(|start| (end - start).num_milliseconds() as f64 / 1000.0),
                pkg_hour: pkg_hour(start_time, end, finished),
                impulse,
            },
            builds,
            builders,
            next_build_number: state.numbers.peek(),
            ports_tree_origin_url: self.shared.settings.ports_tree.origin_url.clone(),
            ports_tree_head: self.shared.settings.ports_tree.head.clone(),
            build_status: state.build_status.clone(),
            start_time,
            end_time: state.end_time,
        }
    }

    /// Emit a snapshot to every sink
    pub fn report(&self) {
        if self.shared.sinks.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for sink in &self.shared.sinks {
            sink.report(&snapshot);
        }
    }

    /// Run every scheduled build and wait for all of them to finish
    pub async fn run(&self) -> Result<RunReport, SchedulerError> {
        {
            let mut state = self.state();
            state.start_time = Some(Utc::now());
            if !state.builds.is_empty() && self.shared.builders.is_empty() {
                return Err(SchedulerError::NoBuilders);
            }
        }

        self.check_consistency();
        self.set_status("starting builds");

        let semaphore = Arc::new(Semaphore::new(self.shared.builders.len().max(1)));
        let mut tasks = JoinSet::new();

        loop {
            while let Some(result) = tasks.try_join_next() {
                if let Err(e) = result {
                    tracing::error!("Build task failed: {e}");
                }
            }

            match self.next_step() {
                Step::Done => break,
                Step::Wait if tasks.is_empty() => {
                    self.lose_stuck_builds();
                    break;
                }
                Step::Wait => {
                    self.set_status("waiting for packages");
                    self.shared.changed.notified().await;
                }
                Step::Dispatch(index) => {
                    self.set_status("starting builds");
                    match self.acquire_builder(&semaphore).await {
                        Some((permit, slot)) => {
                            let job = self.start_job(index);
                            let scheduler = self.clone();
                            tasks.spawn(async move {
                                scheduler.execute(slot, job).await;
                                drop(permit);
                                scheduler.shared.changed.notify_one();
                            });
                        }
                        None => self.lose_to_lost_builders(Some(index)),
                    }
                }
            }
        }

        if !tasks.is_empty() {
            self.set_status("waiting for all builds to complete");
        }
        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!("Build task failed: {e}");
            }
        }

        let status = {
            let mut state = self.state();
            state.end_time = Some(Utc::now());
            if state.aborted {
                RunStatus::Aborted
            } else if state.all_builders_lost {
                RunStatus::AllBuildersLost
            } else {
                RunStatus::Complete
            }
        };
        self.set_status(&status.to_string());
        self.report();

        Ok(RunReport {
            status,
            snapshot: self.snapshot(),
        })
    }

    fn next_step(&self) -> Step {
        let mut state = self.state();
        if state.aborted {
            return Step::Done;
        }
        if state.builds.iter().all(|b| b.started || b.lost) {
            return Step::Done;
        }

        if self.shared.builders.iter().all(|b| b.state() == BuilderState::Lost) {
            drop(state);
            self.lose_to_lost_builders(None);
            return Step::Done;
        }

        match state.builds.iter().position(ScheduledBuild::is_buildable) {
            Some(index) => {
                state.builds[index].started = true;
                Step::Dispatch(index)
            }
            None => Step::Wait,
        }
    }

    /// Lowest idle slot of a usable builder, waiting for one if needed
    async fn acquire_builder(&self, semaphore: &Arc<Semaphore>) -> Option<(OwnedSemaphorePermit, usize)> {
        loop {
            if semaphore.available_permits() == 0 {
                self.set_status("waiting for available builders");
            }
            let permit = Arc::clone(semaphore).acquire_owned().await.ok()?;

            {
                let mut state = self.state();
                let slot = (0..self.shared.builders.len())
                    .find(|slot| !state.busy[*slot] && self.shared.builders[*slot].state().is_usable());
                if let Some(slot) = slot {
                    state.busy[slot] = true;
                    return Some((permit, slot));
                }
            }

            if self.shared.builders.iter().all(|b| !b.state().is_usable()) {
                return None;
            }
            drop(permit);
            self.set_status("waiting for available builders");
            self.shared.changed.notified().await;
        }
    }

    fn start_job(&self, index: usize) -> BuildJob {
        let mut state = self.state();
        let number = state.numbers.allocate();
        let build = &mut state.builds[index];
        build.build_numbers.push(number);
        BuildJob::new(number, build)
    }

    async fn execute(&self, slot: usize, job: BuildJob) {
        let builder = Arc::clone(&self.shared.builders[slot]);
        tracing::info!("Build {} of {} started on {}", job.number, job.name(), builder.name());
        self.report();

        let start_time = Utc::now();
        let log_path = self
            .shared
            .settings
            .output_dir
            .join("builds")
            .join(format!("{}.log", job.number));
        let outcome = match LogFile::open(&log_path) {
            Ok(log) => builder.build(&job, &log).await,
            Err(e) => {
                tracing::error!("Cannot open build log for {}: {e}", job.name());
                BuildOutcome::worker_failure()
            }
        };
        let duration = (Utc::now() - start_time).num_milliseconds() as f64 / 1000.0;

        if outcome.success {
            tracing::info!("Build {} of {} succeeded on {}", job.number, job.name(), builder.name());
        } else {
            tracing::warn!(
                "Build {} of {} failed on {}{}",
                job.number,
                job.name(),
                builder.name(),
                if outcome.reschedule { " (builder failure)" } else { "" }
            );
        }

        let artifacts = if outcome.success {
            self.artifact_digests(&job.resulting_packages)
        } else {
            Vec::new()
        };

        let build_numbers = {
            let mut state = self.state();
            let numbers = match state.builds.iter_mut().find(|b| b.name() == job.name()) {
                Some(build) => {
                    build.complete = true;
                    build.failed = !outcome.success;
                    build.build_numbers.clone()
                }
                None => vec![job.number],
            };
            self.packages_completed(&mut state, job.resulting_packages.clone(), outcome.success);
            state.busy[slot] = false;
            numbers
        };

        self.write_record(&BuildRecord {
            number: job.number,
            port: PortSummary::from(job.port.as_ref()),
            build_numbers,
            builder: builder.name().to_string(),
            start_time,
            duration,
            success: outcome.success,
            artifacts,
        });
        self.report();
    }

    fn artifact_digests(&self, packages: &[PackageIdentifier]) -> Vec<ArtifactDigest> {
        packages
            .iter()
            .filter_map(|package| {
                let file = package.file_name();
                match filesystem::sha256_file(&self.shared.settings.packages_dir.join(&file)) {
                    Ok(sha256) => Some(ArtifactDigest { file, sha256 }),
                    Err(e) => {
                        tracing::warn!("Cannot hash {file}: {e}");
                        None
                    }
                }
            })
            .collect()
    }

    fn write_record(&self, record: &BuildRecord) {
        let path = self
            .shared
            .settings
            .output_dir
            .join("records")
            .join(format!("{}.json", record.number));
        let result = serde_json::to_vec_pretty(record)
            .map_err(|e| FilesystemError::WriteFile {
                path: path.clone(),
                error: e.to_string(),
            })
            .and_then(|content| filesystem::write_atomic(&path, &content));
        if let Err(e) = result {
            tracing::warn!("Failed to write build record: {e}");
        }
    }

    /// Propagate finished or lost artifacts into waiting builds
    ///
    /// Builds that get lost propagate their own artifacts as lost.
    fn packages_completed(&self, state: &mut SchedulerState, packages: Vec<PackageIdentifier>, available: bool) {
        let mut queue: VecDeque<(PackageIdentifier, bool)> =
            packages.into_iter().map(|p| (p, available)).collect();
        let mut notify = false;

        while let Some((package, available)) = queue.pop_front() {
            for build in state.builds.iter_mut().filter(|b| !b.is_terminal() && !b.started) {
                if !build.package_completed(&package, available, &self.shared.settings.packages_dir) {
                    continue;
                }

                if build.lost {
                    tracing::warn!(
                        "Build {} lost: {}",
                        build.name(),
                        build.lost_reason.as_deref().unwrap_or("dependency lost")
                    );
                    queue.extend(build.resulting_packages.iter().cloned().map(|p| (p, false)));
                    notify = true;
                } else if build.is_buildable() {
                    notify = true;
                }
            }
        }

        if notify {
            self.shared.changed.notify_one();
        }
    }

    fn lose_build(&self, state: &mut SchedulerState, index: usize, reason: &str) {
        let build = &mut state.builds[index];
        build.started = false;
        build.mark_lost(reason);
        tracing::warn!("Build {} lost: {reason}", build.name());
        let packages = build.resulting_packages.clone();
        self.packages_completed(state, packages, false);
    }

    /// Lose every unstarted build, plus `also`, once no builder is usable
    fn lose_to_lost_builders(&self, also: Option<usize>) {
        let mut state = self.state();
        state.all_builders_lost = true;
        let indices: Vec<usize> = (0..state.builds.len())
            .filter(|i| Some(*i) == also || (!state.builds[*i].started && !state.builds[*i].lost))
            .collect();
        for index in indices {
            if !state.builds[index].lost {
                self.lose_build(&mut state, index, "all builders lost");
            }
        }
    }

    fn lose_stuck_builds(&self) {
        let mut state = self.state();
        let indices: Vec<usize> = (0..state.builds.len())
            .filter(|i| !state.builds[*i].started && !state.builds[*i].lost)
            .collect();
        for index in indices {
            if !state.builds[index].lost {
                self.lose_build(&mut state, index, "dependencies never became available");
            }
        }
    }

    /// Lose builds that can never become buildable
    ///
    /// Artifacts of skipped ports count as available if they exist and as
    /// lost otherwise. Missing packages no scheduled build produces and
    /// dependency cycles lose their builds too.
    fn check_consistency(&self) {
        let mut state = self.state();
        let target = self.shared.settings.target_architecture.clone();

        let skipped: Vec<PackageIdentifier> = state
            .skipped
            .iter()
            .filter_map(|s| s.port.as_ref())
            .flat_map(|port| port.package_identifiers(&target))
            .collect();
        let (present, absent): (Vec<_>, Vec<_>) = skipped
            .into_iter()
            .partition(|p| self.shared.settings.packages_dir.join(p.file_name()).is_file());
        self.packages_completed(&mut state, present, true);
        self.packages_completed(&mut state, absent, false);

        let produced: BTreeSet<String> = state
            .builds
            .iter()
            .filter(|b| !b.lost)
            .flat_map(|b| b.resulting_packages.iter().map(PackageIdentifier::versioned_name))
            .collect();
        for index in 0..state.builds.len() {
            let build = &state.builds[index];
            if build.lost {
                continue;
            }
            let unproduced = build.missing.iter().find(|m| !produced.contains(*m)).cloned();
            if let Some(missing) = unproduced {
                self.lose_build(&mut state, index, &format!("{missing} is not built by any scheduled build"));
            }
        }

        let mut graph = DependencyGraph::new();
        for build in state.builds.iter().filter(|b| !b.lost) {
            let dependencies = state
                .builds
                .iter()
                .filter(|other| !other.lost)
                .filter(|other| {
                    other
                        .resulting_packages
                        .iter()
                        .any(|p| build.missing.contains(&p.versioned_name()))
                })
                .map(ScheduledBuild::name)
                .collect();
            graph.add_node(&build.name(), dependencies);
        }
        for name in graph.blocked_nodes() {
            if let Some(index) = state.builds.iter().position(|b| b.name() == name && !b.lost) {
                self.lose_build(&mut state, index, "self-depending");
            }
        }
    }
}
