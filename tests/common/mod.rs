//! Common test utilities and helpers
//!
//! This module provides shared fixtures for integration tests: an in-memory
//! worker reachable through [`RemoteTransport`], a scripted [`Builder`] and
//! helpers to set up catalogs, settings and schedulers.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;

use buildmaster::builder::{BuildJob, BuildOutcome, Builder, BuilderState, BuilderStatus, CurrentBuild, WorkerSettings};
use buildmaster::config::builder::{BuildToolConfig, PortsTreeConfig, SshConfig};
use buildmaster::config::BuilderConfig;
use buildmaster::core::port::{Port, PortCatalog};
use buildmaster::infra::git::PortsTreeInfo;
use buildmaster::infra::logs::LogFile;
use buildmaster::infra::transport::{FileKind, RemoteProcess, RemoteTransport, TransportError};
use buildmaster::master::reporter::StatusSink;
use buildmaster::master::scheduler::{BuildNumbers, Scheduler, SchedulerSettings};

/// Worker-side ports tree used by every in-memory worker
pub const REMOTE_TREE: &str = "/work/ports";
/// Worker-side packages directory
pub const REMOTE_PACKAGES: &str = "/work/ports/packages";
/// Worker-side package cache
pub const REMOTE_CACHE: &str = "/work/ports/packages/.cache";

/// When a build ran, as seen by a worker
#[derive(Debug, Clone)]
pub struct BuildEvent {
    /// Worker name
    pub worker: String,
    /// Port versioned name
    pub build: String,
    /// Build started
    pub started: Instant,
    /// Build finished
    pub finished: Instant,
}

/// Build events shared between workers of one test
pub type EventLog = Arc<Mutex<Vec<BuildEvent>>>;

/// Entry of the in-memory worker filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryEntry {
    /// Regular file
    File(Vec<u8>),
    /// Directory
    Dir,
    /// Symlink to a path
    Symlink(String),
}

/// Filesystem and behavior of an in-memory worker
#[derive(Debug, Default)]
pub struct MemoryWorker {
    /// Files, directories and symlinks by absolute path
    pub entries: BTreeMap<String, MemoryEntry>,
    /// Connection established
    pub connected: bool,
    /// Every connection attempt fails
    pub refuse_connections: bool,
    /// Number of connection attempts
    pub connect_attempts: u32,
    /// Every command run, in order
    pub commands: Vec<String>,
    /// Remote artifact paths a build of a port writes
    pub outputs: HashMap<String, Vec<String>>,
    /// Ports whose build exits non-zero
    pub failing: HashSet<String>,
    /// Ports during whose build the connection drops
    pub disconnect_during: HashSet<String>,
    /// Number of downloads that break off halfway
    pub interrupted_downloads: u32,
    /// How long each build takes
    pub build_delay: Duration,
}

/// [`RemoteTransport`] over an in-memory worker
#[derive(Debug)]
pub struct MemoryTransport {
    name: String,
    worker: Mutex<MemoryWorker>,
    events: EventLog,
}

impl MemoryTransport {
    /// Worker called `name` recording builds into `events`
    pub fn new(name: &str, events: EventLog) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            worker: Mutex::new(MemoryWorker::default()),
            events,
        })
    }

    /// Worker state, for scripting and inspection
    pub fn worker(&self) -> MutexGuard<'_, MemoryWorker> {
        self.worker.lock().unwrap()
    }

    /// Let a build of `port` produce the given artifact files
    pub fn produce(&self, port: &str, files: &[&str]) {
        self.worker().outputs.insert(
            port.to_string(),
            files.iter().map(|f| format!("{REMOTE_PACKAGES}/{f}")).collect(),
        );
    }

    /// Whether `path` exists on the worker
    pub fn exists(&self, path: &str) -> bool {
        self.worker().entries.contains_key(path)
    }

    /// Commands containing `needle`
    pub fn commands_with(&self, needle: &str) -> Vec<String> {
        self.worker()
            .commands
            .iter()
            .filter(|c| c.contains(needle))
            .cloned()
            .collect()
    }

    fn disconnected(&self) -> TransportError {
        TransportError::Disconnected {
            endpoint: self.name.clone(),
            error: "not connected".to_string(),
        }
    }

    fn connected_worker(&self) -> Result<MutexGuard<'_, MemoryWorker>, TransportError> {
        let worker = self.worker();
        if worker.connected {
            Ok(worker)
        } else {
            Err(self.disconnected())
        }
    }
}

fn missing(operation: &str, path: &str) -> TransportError {
    TransportError::Remote {
        operation: operation.to_string(),
        path: path.to_string(),
        error: "no such file".to_string(),
    }
}

fn parent_of(path: &str) -> &str {
    path.rsplit_once('/').map_or("", |(parent, _)| parent)
}

fn unquote(token: &str) -> String {
    token.trim_matches('"').to_string()
}

#[async_trait]
impl RemoteTransport for MemoryTransport {
    fn endpoint(&self) -> String {
        format!("{}@memory", self.name)
    }

    async fn connect(&self) -> Result<(), TransportError> {
        let mut worker = self.worker();
        worker.connect_attempts += 1;
        if worker.refuse_connections {
            return Err(TransportError::Connection {
                endpoint: self.name.clone(),
                error: "connection refused".to_string(),
            });
        }
        worker.connected = true;
        Ok(())
    }

    async fn close(&self) {
        self.worker().connected = false;
    }

    async fn is_alive(&self) -> bool {
        self.worker().connected
    }

    async fn exec(&self, command: &str) -> Result<RemoteProcess, TransportError> {
        let (port, delay) = {
            let mut worker = self.connected_worker()?;
            worker.commands.push(command.to_string());
            if !command.starts_with("source ") {
                return Ok(RemoteProcess::finished("", 0));
            }
            let port = command.split_whitespace().last().map(unquote).unwrap_or_default();
            (port, worker.build_delay)
        };

        let started = Instant::now();
        tokio::time::sleep(delay).await;

        let status = {
            let mut worker = self.worker();
            if worker.disconnect_during.contains(&port) {
                worker.connected = false;
                -1
            } else if worker.failing.contains(&port) {
                1
            } else {
                let outputs = worker.outputs.get(&port).cloned().unwrap_or_default();
                for path in outputs {
                    let content = format!("artifact {path}").into_bytes();
                    worker.entries.insert(path, MemoryEntry::File(content));
                }
                0
            }
        };

        self.events.lock().unwrap().push(BuildEvent {
            worker: self.name.clone(),
            build: port.clone(),
            started,
            finished: Instant::now(),
        });
        Ok(RemoteProcess::finished(&format!("building {port}\n"), status))
    }

    async fn upload(&self, local: &Path, remote: &str) -> Result<(), TransportError> {
        let content = std::fs::read(local).map_err(|e| TransportError::Transfer {
            path: local.display().to_string(),
            error: e.to_string(),
        })?;
        self.connected_worker()?
            .entries
            .insert(remote.to_string(), MemoryEntry::File(content));
        Ok(())
    }

    async fn download(&self, remote: &str, local: &Path) -> Result<(), TransportError> {
        let mut worker = self.connected_worker()?;
        let content = match worker.entries.get(remote) {
            Some(MemoryEntry::File(content)) => content.clone(),
            _ => return Err(missing("download", remote)),
        };

        let interrupted = worker.interrupted_downloads > 0;
        let written = if interrupted {
            worker.interrupted_downloads -= 1;
            &content[..content.len() / 2]
        } else {
            &content[..]
        };
        std::fs::write(local, written).map_err(|e| TransportError::Transfer {
            path: local.display().to_string(),
            error: e.to_string(),
        })?;

        if interrupted {
            return Err(TransportError::Transfer {
                path: remote.to_string(),
                error: "connection reset during transfer".to_string(),
            });
        }
        Ok(())
    }

    async fn rename(&self, from: &str, to: &str) -> Result<(), TransportError> {
        let mut worker = self.connected_worker()?;
        let entry = worker.entries.remove(from).ok_or_else(|| missing("rename", from))?;
        worker.entries.insert(to.to_string(), entry);
        Ok(())
    }

    async fn symlink(&self, target: &str, link: &str) -> Result<(), TransportError> {
        self.connected_worker()?
            .entries
            .insert(link.to_string(), MemoryEntry::Symlink(target.to_string()));
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<(), TransportError> {
        self.connected_worker()?
            .entries
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| missing("remove", path))
    }

    async fn mkdir(&self, path: &str) -> Result<(), TransportError> {
        self.connected_worker()?
            .entries
            .insert(path.to_string(), MemoryEntry::Dir);
        Ok(())
    }

    async fn list_dir(&self, path: &str) -> Result<Vec<String>, TransportError> {
        let worker = self.connected_worker()?;
        if worker.entries.get(path) != Some(&MemoryEntry::Dir) {
            return Err(missing("list", path));
        }
        Ok(worker
            .entries
            .keys()
            .filter(|p| parent_of(p) == path)
            .filter_map(|p| p.rsplit_once('/').map(|(_, name)| name.to_string()))
            .collect())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileKind>, TransportError> {
        Ok(self.connected_worker()?.entries.get(path).map(|entry| match entry {
            MemoryEntry::File(_) => FileKind::File,
            MemoryEntry::Dir => FileKind::Directory,
            MemoryEntry::Symlink(_) => FileKind::Symlink,
        }))
    }
}

/// Scripted builder writing artifacts straight into the packages directory
#[derive(Debug)]
pub struct MockBuilder {
    name: String,
    packages_dir: PathBuf,
    state: Mutex<BuilderState>,
    current: Mutex<Option<CurrentBuild>>,
    delay: Duration,
    failing: HashSet<String>,
    lose_on: HashSet<String>,
    events: EventLog,
}

impl MockBuilder {
    /// Builder called `name` that succeeds after `delay`
    pub fn new(name: &str, packages_dir: &Path, delay: Duration, events: EventLog) -> Self {
        Self {
            name: name.to_string(),
            packages_dir: packages_dir.to_path_buf(),
            state: Mutex::new(BuilderState::Available),
            current: Mutex::new(None),
            delay,
            failing: HashSet::new(),
            lose_on: HashSet::new(),
            events,
        }
    }

    /// Builds of `port` fail
    pub fn failing(mut self, port: &str) -> Self {
        self.failing.insert(port.to_string());
        self
    }

    /// The builder gets lost while building `port`
    pub fn lost_on(mut self, port: &str) -> Self {
        self.lose_on.insert(port.to_string());
        self
    }

    /// Start in `state`
    pub fn with_state(self, state: BuilderState) -> Self {
        *self.state.lock().unwrap() = state;
        self
    }
}

#[async_trait]
impl Builder for MockBuilder {
    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> BuilderState {
        *self.state.lock().unwrap()
    }

    fn status(&self) -> BuilderStatus {
        BuilderStatus {
            name: self.name.clone(),
            state: self.state(),
            available_packages: 0,
            connection_errors: 0,
            max_connection_errors: 100,
            current_build: self.current.lock().unwrap().clone(),
        }
    }

    async fn build(&self, job: &BuildJob, log: &LogFile) -> BuildOutcome {
        let name = job.name();
        *self.current.lock().unwrap() = Some(CurrentBuild {
            build: name.clone(),
            number: job.number,
        });
        log.line(&format!("building {name} on {}", self.name));

        let started = Instant::now();
        tokio::time::sleep(self.delay).await;

        let outcome = if self.lose_on.contains(&name) {
            *self.state.lock().unwrap() = BuilderState::Lost;
            BuildOutcome::worker_failure()
        } else if self.failing.contains(&name) {
            BuildOutcome::failure()
        } else {
            for package in &job.resulting_packages {
                std::fs::write(self.packages_dir.join(package.file_name()), name.as_bytes()).unwrap();
            }
            BuildOutcome::success()
        };

        self.events.lock().unwrap().push(BuildEvent {
            worker: self.name.clone(),
            build: name,
            started,
            finished: Instant::now(),
        });
        *self.current.lock().unwrap() = None;
        outcome
    }
}

/// Temporary master directories
pub struct TestMaster {
    /// Root of everything
    pub dir: TempDir,
}

impl TestMaster {
    /// Create packages, output and system directories in a temp dir
    pub fn new() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        for sub in ["ports/packages", "output", "system"] {
            std::fs::create_dir_all(dir.path().join(sub)).expect("Failed to create directory");
        }
        Self { dir }
    }

    /// Ports tree
    pub fn ports_tree(&self) -> PathBuf {
        self.dir.path().join("ports")
    }

    /// Master packages directory
    pub fn packages_dir(&self) -> PathBuf {
        self.dir.path().join("ports/packages")
    }

    /// Output directory
    pub fn output_dir(&self) -> PathBuf {
        self.dir.path().join("output")
    }

    /// Scheduler over `builders`
    pub fn scheduler(&self, builders: Vec<Arc<dyn Builder>>, sinks: Vec<Arc<dyn StatusSink>>) -> Scheduler {
        Scheduler::new(
            builders,
            SchedulerSettings {
                target_architecture: "x86_64".to_string(),
                packages_dir: self.packages_dir(),
                output_dir: self.output_dir(),
                ports_tree: ports_tree_info(),
            },
            BuildNumbers::in_memory(1),
            sinks,
        )
    }

    /// Settings shared by remote builders
    pub fn worker_settings(&self, max_connection_errors: u32) -> Arc<WorkerSettings> {
        Arc::new(WorkerSettings {
            target_architecture: "x86_64".to_string(),
            secondary_architectures: Vec::new(),
            packager: None,
            allow_untested: false,
            allow_unsafe_sources: false,
            create_source_packages: false,
            max_connection_errors,
            env_setup: "/boot/system/boot/SetupEnvironment".to_string(),
            build_tool: "haikuporter".to_string(),
            system_packages_dir: self.dir.path().join("system"),
            ports_tree: ports_tree_info(),
            ports_tree_path: self.ports_tree(),
            packages_dir: self.packages_dir(),
            builders_output_dir: self.output_dir().join("builders"),
        })
    }
}

impl Default for TestMaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Identity of the master ports tree in tests
pub fn ports_tree_info() -> PortsTreeInfo {
    PortsTreeInfo {
        origin_url: "https://example.org/haikuports.git".to_string(),
        head: "0123456789abcdef".to_string(),
    }
}

/// Configuration of an in-memory worker called `name`
pub fn builder_config(name: &str) -> BuilderConfig {
    BuilderConfig {
        name: name.to_string(),
        ssh: SshConfig {
            host: format!("{name}.example.org"),
            port: 22,
            user: "builder".to_string(),
            private_key_file: PathBuf::from("/keys/id_ed25519"),
            host_key_file: PathBuf::from("/keys/known_hosts"),
            jump: None,
        },
        portstree: PortsTreeConfig {
            path: REMOTE_TREE.to_string(),
            packages_path: REMOTE_PACKAGES.to_string(),
            packages_cache_path: REMOTE_CACHE.to_string(),
            builder_config: format!("{REMOTE_TREE}/builder.conf"),
        },
        haikuporter: BuildToolConfig {
            path: "haikuporter".to_string(),
            args: String::new(),
        },
        source: PathBuf::from(format!("/builders/{name}.json")),
    }
}

/// Parse a TOML port catalog
pub fn catalog(toml: &str) -> PortCatalog {
    PortCatalog::from_toml(Path::new("ports.toml"), toml).expect("Invalid test catalog")
}

/// Port `name` of `catalog`, shared
pub fn port(catalog: &PortCatalog, name: &str) -> Arc<Port> {
    Arc::new(
        catalog
            .ports()
            .iter()
            .find(|p| p.name == name)
            .cloned()
            .expect("Port not in test catalog"),
    )
}

/// Event log for a test
pub fn event_log() -> EventLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Recorded events of `build`
pub fn event_of(events: &EventLog, build: &str) -> BuildEvent {
    events
        .lock()
        .unwrap()
        .iter()
        .find(|e| e.build == build)
        .cloned()
        .expect("Build never ran")
}
