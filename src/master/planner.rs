//! Planning
//!
//! Turns requested ports into scheduled builds. Each port is resolved against
//! the provides index; every recipe package in its closure belongs to some
//! other port, and those ports are planned first. Built artifacts found on
//! the way become the build's present requirements.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use regex::Regex;

use super::scheduler::Scheduler;
use crate::core::package_info::RequiresKind;
use crate::core::platform::BuildPlatform;
use crate::core::port::{Port, PortCatalog, PortStatus};
use crate::core::provides::ProvidesIndex;
use crate::core::resolver::{unique_by_versioned_name, DependencyResolver};
use crate::core::schedule::SkippedBuild;
use crate::core::version::version_compare;
use crate::error::PlanError;

/// Requires kinds whose closure has to be present before a port builds
pub const BUILD_DEPENDENCY_KINDS: [RequiresKind; 4] = [
    RequiresKind::Requires,
    RequiresKind::BuildRequires,
    RequiresKind::BuildPrerequires,
    RequiresKind::ScriptletPrerequires,
];

/// `<name>[-<version>[-<revision>]]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortRequest {
    /// Port or package name
    pub name: String,
    /// Exact version
    pub version: Option<String>,
    /// Exact revision
    pub revision: Option<u32>,
}

impl FromStr for PortRequest {
    type Err = PlanError;

    fn from_str(request: &str) -> Result<Self, Self::Err> {
        let invalid = || PlanError::InvalidRequest {
            request: request.to_string(),
        };
        let pattern = Regex::new(r"^(?P<name>[^-\s]+)(?:-(?P<version>[^-\s]+)(?:-(?P<revision>\d+))?)?$")
            .map_err(|_| invalid())?;
        let captures = pattern.captures(request).ok_or_else(invalid)?;

        Ok(Self {
            name: captures["name"].to_string(),
            version: captures.name("version").map(|m| m.as_str().to_string()),
            revision: captures
                .name("revision")
                .map(|m| m.as_str().parse())
                .transpose()
                .map_err(|_| invalid())?,
        })
    }
}

/// Plans requested ports into a [`Scheduler`]
pub struct Planner<'a> {
    catalog: &'a PortCatalog,
    platform: &'a BuildPlatform,
    index: &'a ProvidesIndex,
    repository_dir: &'a Path,
    scheduler: &'a Scheduler,
    allow_untested: bool,
    planned: HashSet<String>,
    failed: HashMap<String, String>,
    in_progress: HashSet<String>,
}

impl<'a> Planner<'a> {
    /// Planner resolving against `index`
    pub fn new(
        catalog: &'a PortCatalog,
        platform: &'a BuildPlatform,
        index: &'a ProvidesIndex,
        repository_dir: &'a Path,
        scheduler: &'a Scheduler,
    ) -> Self {
        Self {
            catalog,
            platform,
            index,
            repository_dir,
            scheduler,
            allow_untested: false,
            planned: HashSet::new(),
            failed: HashMap::new(),
            in_progress: HashSet::new(),
        }
    }

    /// Also plan requested ports whose status is untested
    #[must_use]
    pub fn allow_untested(mut self, allow: bool) -> Self {
        self.allow_untested = allow;
        self
    }

    /// Plan one requested port and everything it needs
    ///
    /// Failures are recorded as skipped builds and returned.
    pub fn request(&mut self, request: &str) -> Result<(), PlanError> {
        let port = match request
            .parse::<PortRequest>()
            .and_then(|parsed| self.find_requested(&parsed))
        {
            Ok(port) => port,
            Err(e) => {
                self.scheduler.skip(SkippedBuild::name(request, e.to_string()));
                return Err(e);
            }
        };

        if let Err(e) = self.check_status(port) {
            self.scheduler
                .skip(SkippedBuild::port(Arc::new(port.clone()), e.to_string()));
            return Err(e);
        }

        self.plan(port)
    }

    fn find_requested(&self, request: &PortRequest) -> Result<&'a Port, PlanError> {
        let port = match &request.version {
            Some(version) => self.catalog.find(&format!("{}-{version}", request.name)),
            None => self.catalog.find(&request.name).or_else(|| {
                // Might be the name of a package rather than a port
                self.catalog
                    .ports()
                    .iter()
                    .filter(|port| port.packages.iter().any(|p| p.name == request.name))
                    .max_by(|a, b| version_compare(&a.version, &b.version))
            }),
        }
        .ok_or_else(|| PlanError::UnknownPort {
            name: request.name.clone(),
        })?;

        match request.revision {
            Some(revision) if revision != port.revision => Err(PlanError::RevisionMismatch {
                port: port.versioned_name(),
                requested: revision,
                found: port.revision,
            }),
            _ => Ok(port),
        }
    }

    fn check_status(&self, port: &Port) -> Result<(), PlanError> {
        match port.status_on(self.platform.target_architecture()) {
            PortStatus::Stable => Ok(()),
            PortStatus::Untested if self.allow_untested => Ok(()),
            status => Err(PlanError::NotBuildable {
                port: port.versioned_name(),
                status: status.to_string(),
            }),
        }
    }

    fn plan(&mut self, port: &'a Port) -> Result<(), PlanError> {
        let name = port.versioned_name();
        if self.planned.contains(&name) || self.scheduler.is_scheduled(&name) {
            return Ok(());
        }
        if let Some(reason) = self.failed.get(&name) {
            return Err(PlanError::Skipped {
                port: name,
                reason: reason.clone(),
            });
        }

        self.in_progress.insert(name.clone());
        let result = self.plan_port(port);
        self.in_progress.remove(&name);

        match result {
            Ok(()) => {
                self.planned.insert(name);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Cannot plan {name}: {e}");
                self.failed.insert(name.clone(), e.to_string());
                if !self.scheduler.is_skipped(&name) {
                    self.scheduler
                        .skip(SkippedBuild::port(Arc::new(port.clone()), e.to_string()));
                }
                Err(e)
            }
        }
    }

    fn plan_port(&mut self, port: &'a Port) -> Result<(), PlanError> {
        let name = port.versioned_name();
        let roots = port.package_infos(self.repository_dir, self.platform.target_architecture());
        let resolution = DependencyResolver::new(self.platform, self.index, &BUILD_DEPENDENCY_KINDS)
            .stop_at_artifacts(false)
            .resolve(&roots)?;

        let mut missing = Vec::new();
        let mut required_ports: Vec<&'a Port> = Vec::new();
        let recipes: Vec<_> = resolution.recipe_packages().cloned().collect();
        for package in unique_by_versioned_name(&recipes) {
            let package_id = package.info.versioned_name();
            let dependency = self.catalog.port_for_package(&package_id).ok_or_else(|| {
                PlanError::NoPortForPackage {
                    port: name.clone(),
                    package: package_id.clone(),
                }
            })?;
            if dependency.versioned_name() == name {
                return Err(PlanError::SelfDependency { port: name });
            }

            missing.push(package_id);
            if !required_ports.iter().any(|p| p.versioned_name() == dependency.versioned_name()) {
                required_ports.push(dependency);
            }
        }

        if !required_ports.is_empty() {
            tracing::debug!(
                "{name} needs {} built first",
                required_ports
                    .iter()
                    .map(|p| p.versioned_name())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }
        for dependency in required_ports {
            let dependency_name = dependency.versioned_name();
            if self.in_progress.contains(&dependency_name) {
                return Err(PlanError::SelfDependency { port: name });
            }
            self.plan(dependency)
                .map_err(|_| PlanError::DependencyNotBuildable {
                    port: name.clone(),
                    dependency: dependency_name,
                })?;
        }

        self.scheduler.schedule(
            Arc::new(port.clone()),
            missing,
            resolution.present_dependency_packages,
        )?;
        Ok(())
    }
}
