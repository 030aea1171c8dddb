//! Port and package model
//!
//! A [`Port`] is one recipe producing one or more [`Package`]s. Recipe
//! parsing happens elsewhere; the ports known to a run come from a
//! [`PortCatalog`] TOML document.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::package_info::PackageInfo;
use super::resolvable::{Resolvable, ResolvableExpression};
use super::version::version_compare;
use crate::config::defaults;
use crate::error::{ConfigError, RepositoryError};

/// Identity of one artifact: `(name, version, revision, architecture)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PackageIdentifier {
    /// Package name
    pub name: String,
    /// Upstream version
    pub version: String,
    /// Packaging revision
    pub revision: String,
    /// Architecture tag, `any` or `source`
    pub architecture: String,
}

impl PackageIdentifier {
    /// Create a new identifier
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        revision: impl Into<String>,
        architecture: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            revision: revision.into(),
            architecture: architecture.into(),
        }
    }

    /// `<name>-<version>`, the key dependents wait on
    pub fn versioned_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// `<version>-<revision>`
    pub fn full_version(&self) -> String {
        format!("{}-{}", self.version, self.revision)
    }

    /// Artifact file name `<name>-<version>-<revision>-<arch>.<ext>`
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{}-{}.{}",
            self.name,
            self.version,
            self.revision,
            self.architecture,
            defaults::PACKAGE_EXTENSION
        )
    }

    /// Parse an artifact file name
    ///
    /// Names and versions never contain `-`, so the fields are split from
    /// the right.
    pub fn from_file_name(file_name: &str) -> Result<Self, RepositoryError> {
        let invalid = || RepositoryError::InvalidFileName {
            name: file_name.to_string(),
        };

        let stem = file_name
            .strip_suffix(defaults::PACKAGE_EXTENSION)
            .and_then(|s| s.strip_suffix('.'))
            .ok_or_else(invalid)?;

        let mut parts = stem.rsplitn(4, '-');
        let architecture = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let revision = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let version = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;
        let name = parts.next().filter(|s| !s.is_empty()).ok_or_else(invalid)?;

        Ok(Self::new(name, version, revision, architecture))
    }
}

impl fmt::Display for PackageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}",
            self.name, self.version, self.revision, self.architecture
        )
    }
}

/// Port status on one architecture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PortStatus {
    /// Known to build and work
    Stable,
    /// Builds, not verified
    Untested,
    /// Known not to build
    Broken,
    /// Not supported on the architecture
    Unsupported,
}

impl fmt::Display for PortStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Stable => "stable",
            Self::Untested => "untested",
            Self::Broken => "broken",
            Self::Unsupported => "unsupported",
        })
    }
}

/// A declared output of a port
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// Package name
    pub name: String,
    /// Architecture override (`any`, `source`); defaults to the target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    /// Provides
    #[serde(default)]
    pub provides: Vec<Resolvable>,
    /// Package specific runtime requires
    #[serde(default)]
    pub requires: Vec<ResolvableExpression>,
}

/// One recipe and the packages it produces
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Port {
    /// Port name
    pub name: String,
    /// Upstream version
    pub version: String,
    /// Packaging revision
    pub revision: u32,
    /// Recipe path relative to the ports tree
    #[serde(default)]
    pub recipe: PathBuf,
    /// Status per architecture; `any` applies to architectures not listed
    #[serde(default)]
    pub architectures: BTreeMap<String, PortStatus>,
    /// Runtime requires of the main package
    #[serde(default)]
    pub requires: Vec<ResolvableExpression>,
    /// Build requires
    #[serde(default)]
    pub build_requires: Vec<ResolvableExpression>,
    /// Build prerequires
    #[serde(default)]
    pub build_prerequires: Vec<ResolvableExpression>,
    /// Test requires
    #[serde(default)]
    pub test_requires: Vec<ResolvableExpression>,
    /// Produced packages, main package first
    #[serde(default, rename = "package")]
    pub packages: Vec<Package>,
}

impl Port {
    /// `<name>-<version>`
    pub fn versioned_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// `<name>-<version>-<revision>`
    pub fn revisioned_name(&self) -> String {
        format!("{}-{}-{}", self.name, self.version, self.revision)
    }

    /// Status on the given architecture
    pub fn status_on(&self, architecture: &str) -> PortStatus {
        self.architectures
            .get(architecture)
            .or_else(|| self.architectures.get(defaults::ANY_ARCHITECTURE))
            .copied()
            .unwrap_or(PortStatus::Unsupported)
    }

    /// Identifiers of every produced artifact
    pub fn package_identifiers(&self, target_architecture: &str) -> Vec<PackageIdentifier> {
        self.packages
            .iter()
            .map(|package| {
                PackageIdentifier::new(
                    &package.name,
                    &self.version,
                    self.revision.to_string(),
                    package
                        .architecture
                        .as_deref()
                        .unwrap_or(target_architecture),
                )
            })
            .collect()
    }

    /// Artifact file names of every produced package
    pub fn artifact_names(&self, target_architecture: &str) -> Vec<String> {
        self.package_identifiers(target_architecture)
            .iter()
            .map(PackageIdentifier::file_name)
            .collect()
    }

    /// Recipe-derived package infos, one per package
    ///
    /// Each info is attributed to `<repository>/<package>-<version>.DependencyInfo`.
    /// The port level requires lists belong to the main package.
    pub fn package_infos(&self, repository: &Path, target_architecture: &str) -> Vec<PackageInfo> {
        self.packages
            .iter()
            .enumerate()
            .map(|(index, package)| {
                let is_main = index == 0;
                let mut requires = package.requires.clone();
                let (build_requires, build_prerequires, test_requires) = if is_main {
                    requires.extend(self.requires.iter().cloned());
                    (
                        self.build_requires.clone(),
                        self.build_prerequires.clone(),
                        self.test_requires.clone(),
                    )
                } else {
                    (Vec::new(), Vec::new(), Vec::new())
                };

                PackageInfo {
                    path: repository.join(format!(
                        "{}-{}.{}",
                        package.name,
                        self.version,
                        defaults::DEPENDENCY_INFO_EXTENSION
                    )),
                    name: package.name.clone(),
                    version: self.version.clone(),
                    architecture: package
                        .architecture
                        .clone()
                        .unwrap_or_else(|| target_architecture.to_string()),
                    provides: package.provides.clone(),
                    requires,
                    build_requires,
                    build_prerequires,
                    test_requires,
                }
            })
            .collect()
    }

    fn fill_default_package(&mut self) {
        if self.packages.is_empty() {
            self.packages.push(Package {
                name: self.name.clone(),
                architecture: None,
                provides: vec![Resolvable::versioned(&self.name, &self.version)],
                requires: Vec::new(),
            });
        }
    }
}

/// Answers which port version is current for a package name
pub trait PortLookup {
    /// `<version>-<revision>` of the active port producing `package_name`
    fn active_full_version(&self, package_name: &str) -> Option<String>;
}

#[derive(Debug, Default, Deserialize)]
struct CatalogDocument {
    #[serde(default)]
    port: Vec<Port>,
}

/// Set of ports known to a run
#[derive(Debug, Clone, Default)]
pub struct PortCatalog {
    ports: Vec<Port>,
}

impl PortCatalog {
    /// Create a catalog from ports; ports without packages get a main package
    pub fn new(ports: Vec<Port>) -> Self {
        let ports = ports
            .into_iter()
            .map(|mut port| {
                port.fill_default_package();
                port
            })
            .collect();
        Self { ports }
    }

    /// Parse a catalog from TOML content
    pub fn from_toml(path: &Path, content: &str) -> Result<Self, ConfigError> {
        let doc: CatalogDocument = toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Ok(Self::new(doc.port))
    }

    /// Load a catalog file; a missing file is an empty catalog
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(path, &content)
    }

    /// All ports
    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    /// Whether the catalog is empty
    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// Active port with the given name, or with the given versioned name
    pub fn find(&self, name: &str) -> Option<&Port> {
        self.ports
            .iter()
            .find(|port| port.versioned_name() == name)
            .or_else(|| {
                self.ports
                    .iter()
                    .filter(|port| port.name == name)
                    .max_by(|a, b| version_compare(&a.version, &b.version))
            })
    }

    /// Port producing the package with versioned name `<name>-<version>`
    pub fn port_for_package(&self, package_versioned_name: &str) -> Option<&Port> {
        self.ports.iter().find(|port| {
            port.packages
                .iter()
                .any(|package| format!("{}-{}", package.name, port.version) == package_versioned_name)
        })
    }

    /// Recipe-derived package infos of every port
    pub fn package_infos(&self, repository: &Path, target_architecture: &str) -> Vec<PackageInfo> {
        self.ports
            .iter()
            .flat_map(|port| port.package_infos(repository, target_architecture))
            .collect()
    }
}

impl PortLookup for PortCatalog {
    fn active_full_version(&self, package_name: &str) -> Option<String> {
        self.ports
            .iter()
            .filter(|port| port.packages.iter().any(|p| p.name == package_name))
            .max_by(|a, b| version_compare(&a.version, &b.version))
            .map(|port| format!("{}-{}", port.version, port.revision))
    }
}
