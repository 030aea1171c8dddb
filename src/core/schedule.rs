//! Scheduled, skipped and finished builds

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::port::{PackageIdentifier, Port};

/// One unit of work handed to the scheduler
#[derive(Debug, Clone)]
pub struct ScheduledBuild {
    /// Port to build
    pub port: Arc<Port>,
    /// Artifacts the build produces
    pub resulting_packages: Vec<PackageIdentifier>,
    /// Versioned names of required packages not yet built
    pub missing: BTreeSet<String>,
    /// Local paths of required artifacts that are present
    pub required: Vec<PathBuf>,
    /// Dispatched to a builder
    pub started: bool,
    /// Will never be attempted because a dependency failed
    pub lost: bool,
    /// Finished, successfully or not
    pub complete: bool,
    /// Finished unsuccessfully
    pub failed: bool,
    /// Build numbers of every attempt
    pub build_numbers: Vec<u64>,
    /// Why the build was lost, if it was
    pub lost_reason: Option<String>,
}

impl ScheduledBuild {
    /// Create a build waiting for `missing` and using `required`
    pub fn new<I>(port: Arc<Port>, target_architecture: &str, missing: I, required: Vec<PathBuf>) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let resulting_packages = port.package_identifiers(target_architecture);
        Self {
            port,
            resulting_packages,
            missing: missing.into_iter().collect(),
            required,
            started: false,
            lost: false,
            complete: false,
            failed: false,
            build_numbers: Vec::new(),
            lost_reason: None,
        }
    }

    /// Unique build name: the port's versioned name
    pub fn name(&self) -> String {
        self.port.versioned_name()
    }

    /// All dependencies present and neither started nor lost
    pub fn is_buildable(&self) -> bool {
        self.missing.is_empty() && !self.started && !self.lost
    }

    /// Still waiting for dependencies
    pub fn is_blocked(&self) -> bool {
        !self.missing.is_empty() && !self.started && !self.lost
    }

    /// Running on a builder
    pub fn is_active(&self) -> bool {
        self.started && !self.complete
    }

    /// Nothing will happen to this build anymore
    pub fn is_terminal(&self) -> bool {
        self.lost || self.complete
    }

    /// Mark the build lost
    pub fn mark_lost(&mut self, reason: &str) {
        self.lost = true;
        self.lost_reason.get_or_insert_with(|| reason.to_string());
    }

    /// Record that `package` became available or was lost
    ///
    /// Returns whether the package was one this build waited for.
    pub fn package_completed(
        &mut self,
        package: &PackageIdentifier,
        available: bool,
        packages_path: &Path,
    ) -> bool {
        if !self.missing.contains(&package.versioned_name()) {
            return false;
        }

        if available {
            self.missing.remove(&package.versioned_name());
            let path = packages_path.join(package.file_name());
            if !self.required.contains(&path) {
                self.required.push(path);
            }
        } else {
            self.mark_lost(&format!("dependency {} lost", package.versioned_name()));
        }
        true
    }

    /// File names of the present required artifacts
    pub fn required_names(&self) -> Vec<String> {
        self.required
            .iter()
            .filter_map(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .collect()
    }

    /// Serializable view
    pub fn status(&self) -> BuildStatus {
        let mut required_packages = self.required_names();
        required_packages.sort();

        BuildStatus {
            port: PortSummary::from(self.port.as_ref()),
            resulting_packages: self.resulting_packages.iter().map(PackageIdentifier::file_name).collect(),
            required_packages,
            missing_packages: self.missing.iter().cloned().collect(),
            buildable: self.is_buildable(),
            build_numbers: self.build_numbers.clone(),
            lost: self.lost,
        }
    }
}

/// Port fields shown in status output
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSummary {
    /// Port name
    pub name: String,
    /// Version
    pub version: String,
    /// Revision
    pub revision: u32,
    /// `<name>-<version>-<revision>`
    pub revisioned_name: String,
    /// Recipe path relative to the ports tree
    pub recipe_file_path: PathBuf,
}

impl From<&Port> for PortSummary {
    fn from(port: &Port) -> Self {
        Self {
            name: port.name.clone(),
            version: port.version.clone(),
            revision: port.revision,
            revisioned_name: port.revisioned_name(),
            recipe_file_path: port.recipe.clone(),
        }
    }
}

/// Serializable view of a scheduled build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStatus {
    /// Port
    pub port: PortSummary,
    /// Artifact file names the build produces
    pub resulting_packages: Vec<String>,
    /// Present required artifact file names
    pub required_packages: Vec<String>,
    /// Versioned names still missing
    pub missing_packages: Vec<String>,
    /// Whether the build could start now
    pub buildable: bool,
    /// Build numbers of every attempt
    pub build_numbers: Vec<u64>,
    /// Whether the build was lost
    pub lost: bool,
}

/// A requested port that will not be built
#[derive(Debug, Clone)]
pub struct SkippedBuild {
    /// Port, when one was found
    pub port: Option<Arc<Port>>,
    /// Port or request name
    pub name: String,
    /// Why it is skipped
    pub reason: String,
}

impl SkippedBuild {
    /// Skip a known port
    pub fn port(port: Arc<Port>, reason: impl Into<String>) -> Self {
        Self {
            name: port.versioned_name(),
            port: Some(port),
            reason: reason.into(),
        }
    }

    /// Skip a request that did not name a known port
    pub fn name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            port: None,
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Serializable view
    pub fn status(&self, target_architecture: &str) -> SkippedStatus {
        SkippedStatus {
            name: self.name.clone(),
            port: self.port.as_deref().map(PortSummary::from),
            resulting_packages: self
                .port
                .as_ref()
                .map(|port| port.artifact_names(target_architecture))
                .unwrap_or_default(),
            reason: self.reason.clone(),
        }
    }
}

/// Serializable view of a skipped build
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkippedStatus {
    /// Port or request name
    pub name: String,
    /// Port, when known
    pub port: Option<PortSummary>,
    /// Artifacts the port would have produced
    pub resulting_packages: Vec<String>,
    /// Why it was skipped
    pub reason: String,
}

/// Digest of one produced artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactDigest {
    /// Artifact file name
    pub file: String,
    /// Hex encoded SHA-256
    pub sha256: String,
}

/// Persistent record of one finished build
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    /// Build number
    pub number: u64,
    /// Port
    pub port: PortSummary,
    /// Build numbers of every attempt of this port
    pub build_numbers: Vec<u64>,
    /// Builder that ran it
    pub builder: String,
    /// Start time
    pub start_time: DateTime<Utc>,
    /// Duration in seconds
    pub duration: f64,
    /// Whether it succeeded
    pub success: bool,
    /// Produced artifacts, empty on failure
    pub artifacts: Vec<ArtifactDigest>,
}
