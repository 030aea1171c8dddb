//! Integration tests for dependency resolution
//!
//! Covers the restart behavior when a recipe package turns out to be
//! unresolvable while a built artifact could satisfy the same requires.

use std::path::PathBuf;

use buildmaster::core::package_info::{PackageInfo, RequiresKind};
use buildmaster::core::platform::BuildPlatform;
use buildmaster::core::provides::ProvidesIndex;
use buildmaster::core::resolver::DependencyResolver;
use buildmaster::error::ResolverError;

fn package(path: &str, name: &str, version: &str, requires: &[&str], build_requires: &[&str]) -> PackageInfo {
    PackageInfo {
        path: PathBuf::from(path),
        name: name.to_string(),
        version: version.to_string(),
        architecture: "x86_64".to_string(),
        provides: vec![format!("{name} = {version}").parse().unwrap()],
        requires: requires.iter().map(|r| r.parse().unwrap()).collect(),
        build_requires: build_requires.iter().map(|r| r.parse().unwrap()).collect(),
        build_prerequires: Vec::new(),
        test_requires: Vec::new(),
    }
}

fn platform() -> BuildPlatform {
    BuildPlatform::new("x86_64", &[])
}

#[test]
fn test_restart_falls_back_to_built_artifact() {
    let platform = platform();
    let stale = package(
        "/repo/libfoo-2.0.DependencyInfo",
        "libfoo",
        "2.0",
        &["libgone >= 1"],
        &[],
    );
    let built = package(
        "/packages/libfoo-2.1-1-x86_64.hpkg",
        "libfoo",
        "2.1",
        &[],
        &[],
    );
    // The stale recipe comes first and wins the first walk
    let index = ProvidesIndex::build(&platform, vec![stale, built]);
    let app = package("/repo/app-1.0.DependencyInfo", "app", "1.0", &[], &["libfoo >= 2"]);

    let resolution = DependencyResolver::new(&platform, &index, &[RequiresKind::BuildRequires])
        .resolve(&[app])
        .unwrap();

    let paths = resolution.paths();
    assert_eq!(paths, vec![PathBuf::from("/packages/libfoo-2.1-1-x86_64.hpkg")]);
    assert_eq!(
        resolution.present_dependency_packages,
        vec![PathBuf::from("/packages/libfoo-2.1-1-x86_64.hpkg")]
    );
    assert_eq!(resolution.recipe_packages().count(), 0);
}

#[test]
fn test_restart_happens_once_per_package() {
    let platform = platform();
    let stale = package(
        "/repo/libfoo-2.0.DependencyInfo",
        "libfoo",
        "2.0",
        &["libgone >= 1"],
        &[],
    );
    let index = ProvidesIndex::build(&platform, vec![stale]);
    let app = package("/repo/app-1.0.DependencyInfo", "app", "1.0", &[], &["libfoo >= 2"]);

    let result = DependencyResolver::new(&platform, &index, &[RequiresKind::BuildRequires]).resolve(&[app]);

    match result {
        Err(ResolverError::Unresolvable { package, messages }) => {
            assert_eq!(package, "app-1.0");
            // One for libgone, then one for libfoo itself after the restart
            assert_eq!(messages.len(), 2);
            assert!(messages[0].contains("libgone"));
            assert!(messages[1].contains("libfoo"));
        }
        other => panic!("expected unresolvable, got {other:?}"),
    }
}

#[test]
fn test_original_index_is_untouched_by_restarts() {
    let platform = platform();
    let stale = package(
        "/repo/libfoo-2.0.DependencyInfo",
        "libfoo",
        "2.0",
        &["libgone >= 1"],
        &[],
    );
    let index = ProvidesIndex::build(&platform, vec![stale]);
    let before = index.len();
    let app = package("/repo/app-1.0.DependencyInfo", "app", "1.0", &[], &["libfoo >= 2"]);

    let _ = DependencyResolver::new(&platform, &index, &[RequiresKind::BuildRequires]).resolve(&[app]);
    assert_eq!(index.len(), before);
}

#[test]
fn test_operator_mismatch_is_unresolvable() {
    let platform = platform();
    let index = ProvidesIndex::build(
        &platform,
        vec![package("/repo/libfoo-1.5.DependencyInfo", "libfoo", "1.5", &[], &[])],
    );
    let app = package("/repo/app-1.0.DependencyInfo", "app", "1.0", &[], &["libfoo >= 2"]);

    assert!(DependencyResolver::new(&platform, &index, &[RequiresKind::BuildRequires])
        .resolve(&[app])
        .is_err());
}
