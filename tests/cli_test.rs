//! Integration tests for the command-line interface
//!
//! Argument parsing is tested through [`Cli`] directly; commands that only
//! read the filesystem are run through the binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use clap::Parser;
use tempfile::TempDir;
use tracing::Level;

use buildmaster::cli::commands::Commands;
use buildmaster::cli::Cli;

fn write_master_config(dir: &Path) -> PathBuf {
    let config = dir.join("buildmaster.toml");
    std::fs::create_dir_all(dir.join("ports/packages")).unwrap();
    std::fs::create_dir_all(dir.join("builders")).unwrap();
    std::fs::create_dir_all(dir.join("system")).unwrap();
    std::fs::write(
        &config,
        format!(
            r#"
system_packages_dir = "{system}"

[paths]
ports_tree = "{ports}"
builders = "{builders}"
output = "{output}"
"#,
            system = dir.join("system").display(),
            ports = dir.join("ports").display(),
            builders = dir.join("builders").display(),
            output = dir.join("output").display(),
        ),
    )
    .unwrap();
    config
}

fn run(config: &Path, args: &[&str]) -> std::process::Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_buildmaster"));
    cmd.arg("--config").arg(config).arg("--quiet");
    for arg in args {
        cmd.arg(arg);
    }
    cmd.output().expect("Failed to execute buildmaster")
}

#[test]
fn test_log_levels() {
    let level = |args: &[&str]| Cli::try_parse_from(args).unwrap().log_level();
    assert_eq!(level(&["buildmaster", "check"]), Level::WARN);
    assert_eq!(level(&["buildmaster", "-v", "check"]), Level::INFO);
    assert_eq!(level(&["buildmaster", "check", "-vvv"]), Level::DEBUG);
    assert_eq!(level(&["buildmaster", "-q", "-vv", "check"]), Level::ERROR);
}

#[test]
fn test_build_requires_ports() {
    assert!(Cli::try_parse_from(["buildmaster", "build"]).is_err());
}

#[test]
fn test_build_overrides_config() {
    let cli = Cli::try_parse_from([
        "buildmaster",
        "--config",
        "/nonexistent/buildmaster.toml",
        "build",
        "--local",
        "3",
        "--allow-untested",
        "--output",
        "/tmp/out",
        "app",
    ])
    .unwrap();

    let config = cli.load_config().unwrap();
    assert_eq!(config.local_builders, 3);
    assert!(config.allow_untested);
    assert_eq!(config.output_dir(), PathBuf::from("/tmp/out"));
    assert_eq!(cli.master_log_path(), Some(PathBuf::from("/tmp/out/master.log")));
}

#[test]
fn test_local_without_count_uses_at_least_one_builder() {
    let cli = Cli::try_parse_from(["buildmaster", "build", "--local", "app"]).unwrap();
    match &cli.command {
        Some(Commands::Build { local, ports, .. }) => {
            assert_eq!(*local, Some(None));
            assert_eq!(ports, &vec!["app".to_string()]);
        }
        other => panic!("unexpected command {other:?}"),
    }
}

#[test]
fn test_only_build_writes_master_log() {
    let cli = Cli::try_parse_from(["buildmaster", "prune"]).unwrap();
    assert!(cli.master_log_path().is_none());
}

#[test]
fn test_builders_lists_configurations() {
    let temp = TempDir::new().unwrap();
    let config = write_master_config(temp.path());
    std::fs::write(
        temp.path().join("builders/alpha.json"),
        r#"{
            "name": "alpha",
            "ssh": { "host": "alpha.local", "user": "user", "privateKeyFile": "alpha.key" },
            "portstree": { "path": "/boot/home/haikuports" }
        }"#,
    )
    .unwrap();

    let output = run(&config, &["builders"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("alpha: user@alpha.local:22"));
    assert!(stdout.contains("1 builders configured"));
}

#[test]
fn test_builders_rejects_invalid_configuration() {
    let temp = TempDir::new().unwrap();
    let config = write_master_config(temp.path());
    std::fs::write(temp.path().join("builders/broken.json"), "{ \"name\": \"broken\" }").unwrap();

    let output = run(&config, &["builders"]);
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ssh"));
}

#[test]
fn test_check_reports_unsatisfiable_requires() {
    let temp = TempDir::new().unwrap();
    let config = write_master_config(temp.path());

    let output = run(&config, &["check"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    std::fs::write(
        temp.path().join("ports/packages/foo-1.0.DependencyInfo"),
        r#"{ "name": "foo", "version": "1.0", "architecture": "x86_64",
             "provides": ["foo = 1.0"], "requires": ["libgone >= 2"] }"#,
    )
    .unwrap();

    let output = run(&config, &["check"]);
    assert!(!output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("foo-1.0.DependencyInfo"));
    assert!(stdout.contains("libgone"));
}

#[test]
fn test_prune_refuses_empty_catalog() {
    let temp = TempDir::new().unwrap();
    let config = write_master_config(temp.path());
    std::fs::write(temp.path().join("ports/packages/foo-1.0-1-x86_64.hpkg"), b"pkg").unwrap();

    let output = run(&config, &["prune"]);
    assert!(!output.status.success());
    assert!(temp.path().join("ports/packages/foo-1.0-1-x86_64.hpkg").exists());
}

#[test]
fn test_prune_moves_unknown_artifacts() {
    let temp = TempDir::new().unwrap();
    let config = write_master_config(temp.path());
    std::fs::write(
        temp.path().join("ports/ports.toml"),
        r#"
[[port]]
name = "foo"
version = "1.0"
revision = 1
[port.architectures]
any = "stable"
"#,
    )
    .unwrap();
    let packages = temp.path().join("ports/packages");
    std::fs::write(packages.join("foo-1.0-1-x86_64.hpkg"), b"pkg").unwrap();
    std::fs::write(packages.join("orphan-2.0-1-x86_64.hpkg"), b"pkg").unwrap();

    let output = run(&config, &["prune"]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(packages.join("foo-1.0-1-x86_64.hpkg").exists());
    assert!(packages.join(".obsolete/orphan-2.0-1-x86_64.hpkg").exists());

    // A second prune finds nothing left to do
    let output = run(&config, &["prune"]);
    assert!(output.status.success());
    assert!(String::from_utf8_lossy(&output.stdout).contains("No obsolete packages"));
}
