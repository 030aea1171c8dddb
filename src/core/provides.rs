//! Provides index
//!
//! Maps each provides name to the ordered list of packages providing it and
//! answers which one satisfies a requires expression.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use super::package_info::PackageInfo;
use super::platform::BuildPlatform;
use super::resolvable::{Resolvable, ResolvableExpression};

/// One provides with the package it belongs to
#[derive(Debug, Clone)]
pub struct ProvidesEntry {
    /// The provides itself
    pub provides: Resolvable,
    /// Owning package
    pub package: Arc<PackageInfo>,
}

impl ProvidesEntry {
    /// Whether the owning package is a built artifact
    pub fn is_artifact(&self) -> bool {
        self.package.is_artifact()
    }
}

/// Index of every provides of every known package
#[derive(Debug, Clone, Default)]
pub struct ProvidesIndex {
    entries: HashMap<String, Vec<ProvidesEntry>>,
}

impl ProvidesIndex {
    /// Create an empty index
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the given packages, skipping architectures the platform ignores
    pub fn build<I>(platform: &BuildPlatform, packages: I) -> Self
    where
        I: IntoIterator<Item = PackageInfo>,
    {
        let mut index = Self::new();
        for package in packages {
            if platform.accepts_architecture(&package.architecture) {
                index.add_package(Arc::new(package));
            }
        }
        index
    }

    /// Add every provides of a package
    pub fn add_package(&mut self, package: Arc<PackageInfo>) {
        for provides in &package.provides {
            self.entries
                .entry(provides.name.clone())
                .or_default()
                .push(ProvidesEntry {
                    provides: provides.clone(),
                    package: Arc::clone(&package),
                });
        }
    }

    /// Number of indexed provides
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    /// Whether nothing is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the provides satisfying `requires`
    ///
    /// Candidates are considered in insertion order. With
    /// `prefer_prerequires` the first matching built artifact wins over any
    /// recipe. A `base` requires is never satisfied by a built artifact
    /// unless `ignore_base` is set.
    pub fn find_match(
        &self,
        requires: &ResolvableExpression,
        prefer_prerequires: bool,
        ignore_base: bool,
    ) -> Option<&ProvidesEntry> {
        let candidates = self.entries.get(&requires.name)?;
        let skip_artifacts = requires.base && !ignore_base;

        let mut matches = candidates
            .iter()
            .filter(|entry| !(skip_artifacts && entry.is_artifact()))
            .filter(|entry| entry.provides.satisfies(requires));

        if !prefer_prerequires {
            return matches.next();
        }

        let mut first = None;
        for entry in matches {
            if entry.is_artifact() {
                return Some(entry);
            }
            first.get_or_insert(entry);
        }
        first
    }

    /// Remove every provides owned by the package at `path`
    ///
    /// Returns the number of removed entries.
    pub fn remove_provides_of(&mut self, path: &Path) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, list| {
            let before = list.len();
            list.retain(|entry| entry.package.path != path);
            removed += before - list.len();
            !list.is_empty()
        });
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolvable::Operator;
    use std::path::PathBuf;

    fn package(path: &str, name: &str, version: &str, provides: &[&str]) -> PackageInfo {
        PackageInfo {
            path: PathBuf::from(path),
            name: name.to_string(),
            version: version.to_string(),
            architecture: "x86_64".to_string(),
            provides: provides.iter().map(|p| p.parse().unwrap()).collect(),
            requires: Vec::new(),
            build_requires: Vec::new(),
            build_prerequires: Vec::new(),
            test_requires: Vec::new(),
        }
    }

    fn index() -> ProvidesIndex {
        let platform = BuildPlatform::new("x86_64", &[]);
        ProvidesIndex::build(
            &platform,
            [
                package("repo/libfoo-2.0.DependencyInfo", "libfoo", "2.0", &["libfoo = 2.0"]),
                package("packages/libfoo-2.1-1-x86_64.hpkg", "libfoo", "2.1-1", &["libfoo = 2.1"]),
                package(
                    "packages/libold-1.0-1-x86_64.hpkg",
                    "libold",
                    "1.0-1",
                    &["libold = 3.0 compat >= 3"],
                ),
            ],
        )
    }

    #[test]
    fn test_first_match_in_insertion_order() {
        let index = index();
        let requires = ResolvableExpression::with_version("libfoo", Operator::GreaterOrEqual, "2");
        let entry = index.find_match(&requires, false, false).unwrap();
        assert!(!entry.is_artifact());
    }

    #[test]
    fn test_prefer_prerequires_picks_artifact() {
        let index = index();
        let requires = ResolvableExpression::with_version("libfoo", Operator::GreaterOrEqual, "2");
        let entry = index.find_match(&requires, true, false).unwrap();
        assert!(entry.is_artifact());
    }

    #[test]
    fn test_version_filter() {
        let index = index();
        let requires = ResolvableExpression::with_version("libfoo", Operator::Greater, "2.0");
        let entry = index.find_match(&requires, false, false).unwrap();
        assert_eq!(entry.provides.version.as_deref(), Some("2.1"));

        let none = ResolvableExpression::with_version("libfoo", Operator::Less, "1");
        assert!(index.find_match(&none, false, false).is_none());
    }

    #[test]
    fn test_compatible_version_floor() {
        let index = index();
        let old = ResolvableExpression::with_version("libold", Operator::GreaterOrEqual, "2");
        assert!(index.find_match(&old, false, false).is_none());
        let new = ResolvableExpression::with_version("libold", Operator::GreaterOrEqual, "3");
        assert!(index.find_match(&new, false, false).is_some());
    }

    #[test]
    fn test_base_requires_skips_artifacts() {
        let index = index();
        let mut requires = ResolvableExpression::named("libold");
        requires.base = true;
        assert!(index.find_match(&requires, false, false).is_none());
        assert!(index.find_match(&requires, false, true).is_some());
    }

    #[test]
    fn test_architecture_filter() {
        let platform = BuildPlatform::new("x86_64", &[]);
        let mut foreign = package("repo/x-1.DependencyInfo", "x", "1", &["x = 1"]);
        foreign.architecture = "arm64".to_string();
        let mut any = package("repo/y-1.DependencyInfo", "y", "1", &["y = 1"]);
        any.architecture = "any".to_string();

        let index = ProvidesIndex::build(&platform, [foreign, any]);
        assert_eq!(index.len(), 1);
        assert!(index.find_match(&ResolvableExpression::named("y"), false, false).is_some());
    }

    #[test]
    fn test_remove_provides_of() {
        let mut index = index();
        let removed = index.remove_provides_of(Path::new("repo/libfoo-2.0.DependencyInfo"));
        assert_eq!(removed, 1);
        let entry = index
            .find_match(&ResolvableExpression::named("libfoo"), false, false)
            .unwrap();
        assert!(entry.is_artifact());
        assert_eq!(index.remove_provides_of(Path::new("nope")), 0);
    }
}
