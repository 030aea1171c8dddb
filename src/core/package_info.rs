//! Package-info records
//!
//! A [`PackageInfo`] is the resolver's view of one package: identity,
//! provides and the requires of each kind. It is read either from a recipe
//! derived `.DependencyInfo` JSON document or from the attribute listing
//! of a built artifact (`package list -i`).

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::Deserialize;

use super::resolvable::{Resolvable, ResolvableExpression};
use crate::config::defaults;
use crate::error::ResolverError;

/// Kinds of requires the resolver can traverse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequiresKind {
    /// Runtime requires
    Requires,
    /// Requires needed to build
    BuildRequires,
    /// Build-host tools needed before building
    BuildPrerequires,
    /// Requires needed to run the tests
    TestRequires,
    /// Tools needed by the packaging scriptlets
    ScriptletPrerequires,
}

impl RequiresKind {
    /// Description used in resolution messages
    pub fn description(self) -> &'static str {
        match self {
            Self::Requires => "requires",
            Self::BuildRequires => "build-requires",
            Self::BuildPrerequires => "build-prerequires",
            Self::TestRequires => "test-requires",
            Self::ScriptletPrerequires => "scriptlet-prerequires",
        }
    }

    /// Prerequires are resolved for the build host and prefer built artifacts
    pub fn is_prerequires(self) -> bool {
        matches!(self, Self::BuildPrerequires | Self::ScriptletPrerequires)
    }
}

impl FromStr for RequiresKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "REQUIRES" => Ok(Self::Requires),
            "BUILD_REQUIRES" => Ok(Self::BuildRequires),
            "BUILD_PREREQUIRES" => Ok(Self::BuildPrerequires),
            "TEST_REQUIRES" => Ok(Self::TestRequires),
            "SCRIPTLET_PREREQUIRES" => Ok(Self::ScriptletPrerequires),
            other => Err(format!("unknown requires kind '{other}'")),
        }
    }
}

impl fmt::Display for RequiresKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Requires => "REQUIRES",
            Self::BuildRequires => "BUILD_REQUIRES",
            Self::BuildPrerequires => "BUILD_PREREQUIRES",
            Self::TestRequires => "TEST_REQUIRES",
            Self::ScriptletPrerequires => "SCRIPTLET_PREREQUIRES",
        })
    }
}

/// Resolver view of one package
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    /// Where this info came from: a `.DependencyInfo` (recipe) or an artifact
    pub path: PathBuf,
    /// Package name
    pub name: String,
    /// Package version; for artifacts this includes the revision
    pub version: String,
    /// Architecture tag
    pub architecture: String,
    /// Provides
    pub provides: Vec<Resolvable>,
    /// Runtime requires
    pub requires: Vec<ResolvableExpression>,
    /// Build requires
    pub build_requires: Vec<ResolvableExpression>,
    /// Build prerequires
    pub build_prerequires: Vec<ResolvableExpression>,
    /// Test requires
    pub test_requires: Vec<ResolvableExpression>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DependencyInfoDocument {
    name: String,
    version: String,
    architecture: String,
    #[serde(default)]
    provides: Vec<String>,
    #[serde(default)]
    requires: Vec<String>,
    #[serde(default)]
    build_requires: Vec<String>,
    #[serde(default)]
    build_prerequires: Vec<String>,
    #[serde(default)]
    test_requires: Vec<String>,
}

impl PackageInfo {
    /// Versioned name `<name>-<version>`, the key used for missing packages
    pub fn versioned_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Whether this info describes an already built artifact
    pub fn is_artifact(&self) -> bool {
        is_artifact_path(&self.path)
    }

    /// Requires of the given kind; scriptlet prerequires are platform-wide
    /// and therefore never stored on a package
    pub fn requires_of(&self, kind: RequiresKind) -> &[ResolvableExpression] {
        match kind {
            RequiresKind::Requires => &self.requires,
            RequiresKind::BuildRequires => &self.build_requires,
            RequiresKind::BuildPrerequires => &self.build_prerequires,
            RequiresKind::TestRequires => &self.test_requires,
            RequiresKind::ScriptletPrerequires => &[],
        }
    }

    /// Parse a `.DependencyInfo` JSON document
    pub fn from_dependency_info(path: &Path, content: &str) -> Result<Self, ResolverError> {
        let invalid = |error: String| ResolverError::InvalidPackageInfo {
            path: path.to_path_buf(),
            error,
        };

        let doc: DependencyInfoDocument =
            serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;

        let provides = doc
            .provides
            .iter()
            .map(|p| p.parse::<Resolvable>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(invalid)?;
        let parse_all = |list: &[String]| {
            list.iter()
                .map(|r| ResolvableExpression::parse(r, false))
                .collect::<Result<Vec<_>, _>>()
        };

        Ok(Self {
            path: path.to_path_buf(),
            name: doc.name,
            version: doc.version,
            architecture: doc.architecture,
            provides,
            requires: parse_all(&doc.requires).map_err(invalid)?,
            build_requires: parse_all(&doc.build_requires).map_err(invalid)?,
            build_prerequires: parse_all(&doc.build_prerequires).map_err(invalid)?,
            test_requires: parse_all(&doc.test_requires).map_err(invalid)?,
        })
    }

    /// Parse the attribute listing printed by `package list -i <file>`
    ///
    /// Artifacts carry only provides and runtime requires; the `base`
    /// qualifier of their requires is not meaningful and is dropped.
    pub fn from_listing(path: &Path, listing: &str) -> Result<Self, ResolverError> {
        let invalid = |error: String| ResolverError::InvalidPackageInfo {
            path: path.to_path_buf(),
            error,
        };
        let field = |name: &str| {
            listing.lines().find_map(|line| {
                let rest = line.trim().strip_prefix(name)?.strip_prefix(':')?;
                rest.split_whitespace().next().map(str::to_string)
            })
        };

        let name = field("name").ok_or_else(|| invalid("missing name".to_string()))?;
        let version = field("version").ok_or_else(|| invalid("missing version".to_string()))?;
        let architecture =
            field("architecture").ok_or_else(|| invalid("missing architecture".to_string()))?;

        let mut provides = Vec::new();
        let mut requires = Vec::new();
        for line in listing.lines().map(str::trim) {
            if let Some(rest) = line.strip_prefix("provides:") {
                provides.push(rest.trim_start().parse::<Resolvable>().map_err(invalid)?);
            } else if let Some(rest) = line.strip_prefix("requires:") {
                requires.push(ResolvableExpression::parse(rest.trim_start(), true).map_err(invalid)?);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            name,
            version,
            architecture,
            provides,
            requires,
            build_requires: Vec::new(),
            build_prerequires: Vec::new(),
            test_requires: Vec::new(),
        })
    }
}

/// Whether a path names a built artifact
pub fn is_artifact_path(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == defaults::PACKAGE_EXTENSION)
}
