//! Dependency resolution
//!
//! Walks the requires closure of a set of root packages against a
//! [`ProvidesIndex`] and returns the packages that must be present before
//! the roots can be built, ordered by ascending dependency count.
//!
//! A requires that cannot be satisfied aborts the walk with a
//! [`RestartRequest`]. The controller in [`DependencyResolver::resolve`]
//! drops the provides of the failing package from its private copy of the
//! index and walks again, so a stale recipe cannot shadow a usable artifact.

use std::collections::{HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;

use super::package_info::{PackageInfo, RequiresKind};
use super::platform::BuildPlatform;
use super::provides::ProvidesIndex;
use super::resolvable::ResolvableExpression;
use crate::error::ResolverError;

/// A package in the requires closure
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    /// Package info
    pub info: Arc<PackageInfo>,
    /// Whether it was reached through a build-host requires
    pub for_build_host: bool,
    /// Number of recipe packages added beneath it
    pub dependency_count: usize,
}

/// Result of a successful resolution
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Required packages, sorted by ascending dependency count
    pub packages: Vec<ResolvedPackage>,
    /// Every built artifact reached during the walk, in discovery order
    pub present_dependency_packages: Vec<PathBuf>,
}

impl Resolution {
    /// Paths of the required packages in order
    pub fn paths(&self) -> Vec<PathBuf> {
        self.packages.iter().map(|p| p.info.path.clone()).collect()
    }

    /// Required packages that still have to be built from a recipe
    pub fn recipe_packages(&self) -> impl Iterator<Item = &ResolvedPackage> {
        self.packages.iter().filter(|p| !p.info.is_artifact())
    }
}

/// Signal from a walk that one package could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestartRequest {
    /// Path of the package whose requires failed
    pub path: PathBuf,
    /// Human readable description
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct NodeKey {
    name: String,
    version: String,
    path: PathBuf,
    for_build_host: bool,
}

#[derive(Debug)]
struct Node {
    info: Arc<PackageInfo>,
    for_build_host: bool,
    dependency_count: usize,
}

impl Node {
    fn key(&self) -> NodeKey {
        NodeKey {
            name: self.info.name.clone(),
            version: self.info.version.clone(),
            path: self.info.path.clone(),
            for_build_host: self.for_build_host,
        }
    }
}

#[derive(Default)]
struct Walk {
    arena: Vec<Node>,
    pending: VecDeque<usize>,
    traversed: HashSet<NodeKey>,
    result: Vec<usize>,
    present: Vec<PathBuf>,
}

impl Walk {
    fn add_node(&mut self, node: Node, add_to_pending: bool) -> bool {
        if !self.traversed.insert(node.key()) {
            return false;
        }
        let index = self.arena.len();
        self.arena.push(node);
        self.result.push(index);
        if add_to_pending {
            self.pending.push_back(index);
        }
        true
    }
}

/// Dependency resolver over a private copy of a provides index
pub struct DependencyResolver<'a> {
    platform: &'a BuildPlatform,
    index: ProvidesIndex,
    kinds: Vec<RequiresKind>,
    stop_at_artifacts: bool,
}

impl<'a> DependencyResolver<'a> {
    /// Create a resolver traversing the given requires kinds
    pub fn new(platform: &'a BuildPlatform, index: &ProvidesIndex, kinds: &[RequiresKind]) -> Self {
        Self {
            platform,
            index: index.clone(),
            kinds: kinds.to_vec(),
            stop_at_artifacts: false,
        }
    }

    /// Do not recurse into the requires of built artifacts
    #[must_use]
    pub fn stop_at_artifacts(mut self, stop: bool) -> Self {
        self.stop_at_artifacts = stop;
        self
    }

    /// Resolve the requires closure of `roots`
    ///
    /// Restarts after each unresolvable requires. Fails when the failing
    /// package is a root or has already caused a restart.
    pub fn resolve(&mut self, roots: &[PackageInfo]) -> Result<Resolution, ResolverError> {
        let mut messages = Vec::new();
        let mut restarted = HashSet::new();

        loop {
            let request = match self.walk(roots) {
                Ok(resolution) => return Ok(resolution),
                Err(request) => request,
            };

            tracing::debug!("Resolution restart requested: {}", request.message);
            messages.push(request.message);

            let is_root = roots.iter().any(|root| root.path == request.path);
            if is_root || !restarted.insert(request.path.clone()) {
                return Err(ResolverError::Unresolvable {
                    package: roots
                        .iter()
                        .map(PackageInfo::versioned_name)
                        .collect::<Vec<_>>()
                        .join(", "),
                    messages,
                });
            }

            let removed = self.index.remove_provides_of(&request.path);
            tracing::debug!(
                "Dropped {} provides of {} before restarting",
                removed,
                request.path.display()
            );
        }
    }

    fn walk(&self, roots: &[PackageInfo]) -> Result<Resolution, RestartRequest> {
        let mut walk = Walk::default();
        let mut kinds = self.kinds.clone();

        for root in roots {
            let node = Node {
                info: Arc::new(root.clone()),
                for_build_host: false,
                dependency_count: 0,
            };
            if walk.traversed.insert(node.key()) {
                walk.pending.push_back(walk.arena.len());
                walk.arena.push(node);
            }
        }

        let initial = walk.pending.len();
        let mut handled = 0;
        let scriptlet_prerequires = self.platform.scriptlet_prerequires();

        while let Some(parent) = walk.pending.pop_front() {
            let info = Arc::clone(&walk.arena[parent].info);
            let parent_for_host = walk.arena[parent].for_build_host;

            for &kind in &kinds {
                let (list, for_build_host) = match kind {
                    RequiresKind::ScriptletPrerequires => (scriptlet_prerequires.as_slice(), true),
                    RequiresKind::BuildPrerequires => (info.requires_of(kind), true),
                    _ => (info.requires_of(kind), parent_for_host),
                };
                for requires in list {
                    self.add_immediate(&mut walk, parent, requires, kind, for_build_host)?;
                }
            }

            // Once the initial batch is handled its runtime requires are
            // needed to run everything that follows.
            handled += 1;
            if handled == initial && !kinds.contains(&RequiresKind::Requires) {
                kinds.push(RequiresKind::Requires);
            }
        }

        let mut packages: Vec<ResolvedPackage> = walk
            .result
            .iter()
            .map(|&index| {
                let node = &walk.arena[index];
                ResolvedPackage {
                    info: Arc::clone(&node.info),
                    for_build_host: node.for_build_host,
                    dependency_count: node.dependency_count,
                }
            })
            .collect();
        packages.sort_by_key(|p| p.dependency_count);

        Ok(Resolution {
            packages,
            present_dependency_packages: walk.present,
        })
    }

    fn add_immediate(
        &self,
        walk: &mut Walk,
        parent: usize,
        requires: &ResolvableExpression,
        kind: RequiresKind,
        for_build_host: bool,
    ) -> Result<(), RestartRequest> {
        if self.platform.is_implicit(&requires.name, for_build_host) {
            return Ok(());
        }

        let Some(entry) = self.index.find_match(requires, kind.is_prerequires(), false) else {
            let parent_info = &walk.arena[parent].info;
            return Err(RestartRequest {
                path: parent_info.path.clone(),
                message: format!(
                    "{} \"{}\" of package \"{}\" could not be resolved",
                    kind.description(),
                    requires,
                    parent_info.versioned_name()
                ),
            });
        };

        let node = Node {
            info: Arc::clone(&entry.package),
            for_build_host,
            dependency_count: 0,
        };

        if entry.is_artifact() {
            if !walk.present.contains(&entry.package.path) {
                walk.present.push(entry.package.path.clone());
            }
            walk.add_node(node, !self.stop_at_artifacts);
        } else {
            walk.arena[parent].dependency_count += 1;
            walk.add_node(node, true);
        }

        Ok(())
    }
}

/// Resolved packages with duplicate versioned names removed, first one kept
pub fn unique_by_versioned_name(packages: &[ResolvedPackage]) -> Vec<&ResolvedPackage> {
    let mut seen = HashSet::new();
    packages
        .iter()
        .filter(|p| seen.insert(p.info.versioned_name()))
        .collect()
}
