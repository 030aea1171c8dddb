//! Master orchestrator
//!
//! Wires configuration, the ports tree, the provides index and the builders
//! into a [`Scheduler`], plans the requested ports and drives the run.
//!
//! - [`planner`] - Requested ports to scheduled builds
//! - [`scheduler`] - Dispatch, completion broadcast and bookkeeping
//! - [`reporter`] - Status sinks

pub mod planner;
pub mod reporter;
pub mod scheduler;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use crate::builder::local::LocalBuilder;
use crate::builder::remote::RemoteBuilder;
use crate::builder::{Builder, WorkerSettings};
use crate::config::{defaults, BuilderConfig, MasterConfig};
use crate::core::package_info::{PackageInfo, RequiresKind};
use crate::core::platform::BuildPlatform;
use crate::core::port::PortCatalog;
use crate::core::provides::ProvidesIndex;
use crate::core::resolver::DependencyResolver;
use crate::error::{BuildmasterError, SchedulerError};
use crate::infra::filesystem;
use crate::infra::git::PortsTreeInfo;
use crate::infra::package_tool::PackageTool;
use crate::infra::repository::ArtifactRepository;
use crate::infra::ssh::OpenSshTransport;

use planner::Planner;
use reporter::{JsonFileReporter, StatusSink};
use scheduler::{BuildNumbers, RunReport, Scheduler, SchedulerSettings};

/// A prepared build run
pub struct BuildMaster {
    config: MasterConfig,
    catalog: PortCatalog,
    platform: BuildPlatform,
    index: ProvidesIndex,
    scheduler: Scheduler,
}

impl std::fmt::Debug for BuildMaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildMaster")
            .field("ports", &self.catalog.ports().len())
            .field("provides", &self.index.len())
            .field("scheduler", &self.scheduler)
            .finish()
    }
}

impl BuildMaster {
    /// Prepare a run with the builders named by `config`
    pub async fn prepare(
        config: MasterConfig,
        sinks: Vec<Arc<dyn StatusSink>>,
    ) -> Result<Self, BuildmasterError> {
        let ports_tree = discover_ports_tree(&config)?;
        let settings = Arc::new(WorkerSettings::from_config(&config, ports_tree.clone()));
        let builders = load_builders(&config, &settings)?;
        Self::with_builders(config, ports_tree, builders, sinks).await
    }

    /// Prepare a run dispatching to the given builders
    pub async fn with_builders(
        config: MasterConfig,
        ports_tree: PortsTreeInfo,
        builders: Vec<Arc<dyn Builder>>,
        extra_sinks: Vec<Arc<dyn StatusSink>>,
    ) -> Result<Self, BuildmasterError> {
        let output_dir = config.output_dir();
        filesystem::create_dir_all(&output_dir)?;
        ArtifactRepository::new(config.packages_dir()).ensure_exists()?;

        let numbers = BuildNumbers::load(&output_dir.join(defaults::BUILD_NUMBER_FILE))?;
        let catalog = PortCatalog::load_from_path(&config.port_catalog())?;
        let platform = BuildPlatform::new(&config.target_architecture, &config.secondary_architectures);
        let index = build_provides_index(&config, &catalog, &platform).await;
        tracing::info!(
            "Loaded {} ports, {} provides, {} builders",
            catalog.ports().len(),
            index.len(),
            builders.len()
        );

        let mut sinks: Vec<Arc<dyn StatusSink>> = vec![Arc::new(JsonFileReporter::new(&output_dir))];
        sinks.extend(extra_sinks);

        let scheduler = Scheduler::new(
            builders,
            SchedulerSettings {
                target_architecture: config.target_architecture.clone(),
                packages_dir: config.packages_dir(),
                output_dir,
                ports_tree,
            },
            numbers,
            sinks,
        );
        scheduler.report();

        Ok(Self {
            config,
            catalog,
            platform,
            index,
            scheduler,
        })
    }

    /// The scheduler of this run
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Plan the requested ports; returns how many requests were skipped
    pub fn plan<S: AsRef<str>>(&self, requests: &[S]) -> usize {
        self.scheduler.set_status("scheduling");
        let repository_dir = self.config.repository_dir();
        let mut planner = Planner::new(
            &self.catalog,
            &self.platform,
            &self.index,
            &repository_dir,
            &self.scheduler,
        )
        .allow_untested(self.config.allow_untested);

        let mut skipped = 0;
        for request in requests {
            let request = request.as_ref();
            if let Err(e) = planner.request(request) {
                tracing::warn!("Skipping {request}: {e}");
                skipped += 1;
            }
        }
        tracing::info!("Scheduled {} builds", self.scheduler.len());
        skipped
    }

    /// Run every scheduled build; ctrl-c aborts dispatching
    pub async fn run(&self) -> Result<RunReport, BuildmasterError> {
        let scheduler = self.scheduler.clone();
        let interrupt = tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, waiting for running builds to finish");
                scheduler.abort();
            }
        });

        let result = self.scheduler.run().await;
        interrupt.abort();

        let report = result?;
        tracing::info!("Build run {}", report.status);
        Ok(report)
    }
}

/// Ports tree identity; local builders can do without one
pub fn discover_ports_tree(config: &MasterConfig) -> Result<PortsTreeInfo, BuildmasterError> {
    match PortsTreeInfo::discover(&config.ports_tree()) {
        Ok(info) => Ok(info),
        Err(e) if config.local_builders > 0 => {
            tracing::warn!("{e}");
            Ok(PortsTreeInfo {
                origin_url: String::new(),
                head: String::new(),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Local builders when configured, otherwise one remote builder per config file
pub fn load_builders(
    config: &MasterConfig,
    settings: &Arc<WorkerSettings>,
) -> Result<Vec<Arc<dyn Builder>>, BuildmasterError> {
    let mut builders: Vec<Arc<dyn Builder>> = Vec::new();

    if config.local_builders > 0 {
        for i in 0..config.local_builders {
            builders.push(Arc::new(LocalBuilder::new(format!("local-{i}"), Arc::clone(settings))));
        }
    } else {
        let control_dir = config.output_dir().join("control");
        filesystem::create_dir_all(&control_dir)?;

        let mut names = HashSet::new();
        for builder_config in BuilderConfig::load_dir(&config.builders_dir())? {
            if !names.insert(builder_config.name.clone()) {
                tracing::warn!("Ignoring duplicate builder {}", builder_config.name);
                continue;
            }
            let transport = OpenSshTransport::new(builder_config.ssh.clone(), &control_dir)?;
            builders.push(Arc::new(RemoteBuilder::new(
                builder_config,
                Arc::clone(settings),
                Arc::new(transport),
            )?));
        }
    }

    if builders.is_empty() {
        return Err(SchedulerError::NoBuilders.into());
    }
    Ok(builders)
}

/// Index built artifacts first, then recipe packages
pub async fn build_provides_index(
    config: &MasterConfig,
    catalog: &PortCatalog,
    platform: &BuildPlatform,
) -> ProvidesIndex {
    let tool = PackageTool::new(&config.package_command);
    let repository_dir = config.repository_dir();
    let recipes = catalog.package_infos(&repository_dir, &config.target_architecture);
    let known: HashSet<PathBuf> = recipes.iter().map(|info| info.path.clone()).collect();

    let mut infos: Vec<PackageInfo> = tool
        .scan(&[config.packages_dir()])
        .await
        .iter()
        .map(|info| (**info).clone())
        .collect();
    infos.extend(
        tool.scan(&[repository_dir])
            .await
            .iter()
            .filter(|info| !known.contains(&info.path))
            .map(|info| (**info).clone()),
    );
    infos.extend(recipes);

    ProvidesIndex::build(platform, infos)
}

/// An artifact whose requires cannot be satisfied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsistencyProblem {
    /// Artifact file
    pub path: PathBuf,
    /// Resolver message
    pub message: String,
}

/// Resolve the requires of every artifact in the packages directory
///
/// Only artifacts and installed system packages count as providers.
pub async fn check_repository(config: &MasterConfig) -> Result<Vec<ConsistencyProblem>, BuildmasterError> {
    let platform = BuildPlatform::new(&config.target_architecture, &config.secondary_architectures);
    let tool = PackageTool::new(&config.package_command);

    let artifacts = tool.scan(&[config.packages_dir()]).await;
    let system = tool.scan(&[PathBuf::from(&config.system_packages_dir)]).await;
    let index = ProvidesIndex::build(
        &platform,
        artifacts.iter().chain(&system).map(|info| (**info).clone()),
    );

    let mut problems = Vec::new();
    for artifact in &artifacts {
        let result = DependencyResolver::new(&platform, &index, &[RequiresKind::Requires])
            .stop_at_artifacts(false)
            .resolve(std::slice::from_ref(&**artifact));
        if let Err(e) = result {
            tracing::debug!("{}: {e}", artifact.path.display());
            problems.push(ConsistencyProblem {
                path: artifact.path.clone(),
                message: e.to_string(),
            });
        }
    }
    Ok(problems)
}
