//! Integration tests for the remote worker state machine
//!
//! Drives [`RemoteBuilder`] over an in-memory worker.

mod common;

use std::sync::Arc;
use std::time::Duration;

use buildmaster::builder::{BuildJob, BuildOutcome, Builder, BuilderState, RemoteBuilder};
use buildmaster::core::schedule::ScheduledBuild;
use buildmaster::infra::logs::LogFile;
use common::{builder_config, catalog, event_log, port, MemoryEntry, MemoryTransport, TestMaster, REMOTE_CACHE, REMOTE_PACKAGES};

const APP: &str = r#"
[[port]]
name = "app"
version = "1.0"
revision = 1
[port.architectures]
any = "stable"
"#;

const APP_FILE: &str = "app-1.0-1-x86_64.hpkg";
const LIBA_FILE: &str = "liba-1-1-x86_64.hpkg";

struct Fixture {
    master: TestMaster,
    transport: Arc<MemoryTransport>,
    builder: RemoteBuilder,
    log: LogFile,
}

fn fixture(max_connection_errors: u32) -> Fixture {
    let master = TestMaster::new();
    let transport = MemoryTransport::new("w1", event_log());
    transport.produce("app-1.0", &[APP_FILE]);
    let builder = RemoteBuilder::new(
        builder_config("w1"),
        master.worker_settings(max_connection_errors),
        transport.clone(),
    )
    .unwrap()
    .with_reconnect_delay(Duration::ZERO, Duration::ZERO);
    let log = LogFile::open(&master.output_dir().join("builds/1.log")).unwrap();
    Fixture {
        master,
        transport,
        builder,
        log,
    }
}

fn job(f: &Fixture, number: u64) -> BuildJob {
    let ports = catalog(APP);
    let liba = f.master.packages_dir().join(LIBA_FILE);
    std::fs::write(&liba, b"liba contents").unwrap();
    BuildJob::new(
        number,
        &ScheduledBuild::new(port(&ports, "app"), "x86_64", Vec::new(), vec![liba]),
    )
}

fn assert_visible_subset_of_available(builder: &RemoteBuilder) {
    let available = builder.available_packages();
    assert!(builder.visible_packages().iter().all(|p| available.contains(p)));
}

#[tokio::test]
async fn test_successful_build_fetches_artifacts() {
    let f = fixture(100);

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::success());
    assert_eq!(f.builder.state(), BuilderState::Available);

    let fetched = std::fs::read_to_string(f.master.packages_dir().join(APP_FILE)).unwrap();
    assert_eq!(fetched, format!("artifact {REMOTE_PACKAGES}/{APP_FILE}"));

    // Required and built artifacts both end up in the worker cache
    let available = f.builder.available_packages();
    assert!(available.contains(LIBA_FILE));
    assert!(available.contains(APP_FILE));
    assert!(f.builder.visible_packages().is_empty());
    assert!(f.transport.exists(&format!("{REMOTE_CACHE}/{LIBA_FILE}")));
    assert!(!f.transport.exists(&format!("{REMOTE_PACKAGES}/{LIBA_FILE}")));
    assert_visible_subset_of_available(&f.builder);

    assert!(f.transport.exists("/work/ports/builder.conf"));
    assert_eq!(f.transport.commands_with("git checkout 0123456789abcdef").len(), 1);
    assert_eq!(f.transport.commands_with("--purge").len(), 2);
}

#[tokio::test]
async fn test_build_command_line() {
    let f = fixture(100);
    assert_eq!(
        f.builder.build_command("app-1.0"),
        "source /boot/system/boot/SetupEnvironment && cd \"/work/ports\" && \"haikuporter\" \
         --config=\"/work/ports/builder.conf\" --no-system-packages --no-package-obsoletion \
         --ignore-messages \"app-1.0\""
    );
    assert!(f.builder.purge_command("app-1.0").ends_with("--purge \"app-1.0\""));
}

#[tokio::test]
async fn test_failed_build_is_not_rescheduled() {
    let f = fixture(100);
    f.transport.worker().failing.insert("app-1.0".to_string());

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::failure());
    assert_eq!(f.builder.state(), BuilderState::Available);
    assert!(!f.master.packages_dir().join(APP_FILE).exists());
    assert!(f.builder.visible_packages().is_empty());
}

#[tokio::test]
async fn test_missing_artifact_is_build_failure() {
    let f = fixture(100);
    f.transport.worker().outputs.clear();

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::failure());
    let log = std::fs::read_to_string(f.log.path()).unwrap();
    assert!(log.contains("missing after build"));
}

#[tokio::test]
async fn test_disconnect_mid_build_then_reconnect() {
    let f = fixture(100);
    f.transport.worker().disconnect_during.insert("app-1.0".to_string());

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::worker_failure());
    assert_eq!(f.builder.state(), BuilderState::NotAvailable);
    assert!(!f.master.packages_dir().join(APP_FILE).exists());

    f.transport.worker().disconnect_during.clear();
    let outcome = f.builder.build(&job(&f, 2), &f.log).await;
    assert_eq!(outcome, BuildOutcome::success());
    assert_eq!(f.builder.state(), BuilderState::Available);
    assert_eq!(f.transport.worker().connect_attempts, 2);
    assert_visible_subset_of_available(&f.builder);
}

#[tokio::test]
async fn test_zero_connection_errors_is_lost_without_connecting() {
    let f = fixture(0);

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::worker_failure());
    assert_eq!(f.builder.state(), BuilderState::Lost);
    assert_eq!(f.transport.worker().connect_attempts, 0);
}

#[tokio::test]
async fn test_repeated_connection_errors_lose_the_builder() {
    let f = fixture(2);
    f.transport.worker().refuse_connections = true;

    assert_eq!(f.builder.build(&job(&f, 1), &f.log).await, BuildOutcome::worker_failure());
    assert_eq!(f.builder.state(), BuilderState::Reconnecting);
    assert_eq!(f.builder.connection_errors(), 1);

    assert_eq!(f.builder.build(&job(&f, 2), &f.log).await, BuildOutcome::worker_failure());
    assert_eq!(f.builder.state(), BuilderState::Lost);
    assert_eq!(f.builder.connection_errors(), 2);

    // A lost builder does not try again
    assert_eq!(f.builder.build(&job(&f, 3), &f.log).await, BuildOutcome::worker_failure());
    assert_eq!(f.transport.worker().connect_attempts, 2);
}

#[tokio::test]
async fn test_interrupted_download_leaves_only_sidecar() {
    let f = fixture(100);
    f.transport.worker().interrupted_downloads = 3;

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::worker_failure());

    let final_path = f.master.packages_dir().join(APP_FILE);
    let sidecar = f.master.packages_dir().join(format!("{APP_FILE}.download"));
    assert!(!final_path.exists());
    let partial = std::fs::read_to_string(&sidecar).unwrap();
    assert!(partial.len() < format!("artifact {REMOTE_PACKAGES}/{APP_FILE}").len());
}

#[tokio::test]
async fn test_interrupted_download_is_retried() {
    let f = fixture(100);
    f.transport.worker().interrupted_downloads = 1;

    let outcome = f.builder.build(&job(&f, 1), &f.log).await;
    assert_eq!(outcome, BuildOutcome::success());

    let final_path = f.master.packages_dir().join(APP_FILE);
    assert_eq!(
        std::fs::read_to_string(&final_path).unwrap(),
        format!("artifact {REMOTE_PACKAGES}/{APP_FILE}")
    );
    assert!(!f.master.packages_dir().join(format!("{APP_FILE}.download")).exists());
}

#[tokio::test]
async fn test_setup_prunes_obsolete_cache_entries() {
    let f = fixture(100);
    {
        let mut worker = f.transport.worker();
        worker.entries.insert(REMOTE_PACKAGES.to_string(), MemoryEntry::Dir);
        worker.entries.insert(REMOTE_CACHE.to_string(), MemoryEntry::Dir);
        worker.entries.insert(
            format!("{REMOTE_CACHE}/old-0.9-1-x86_64.hpkg"),
            MemoryEntry::File(b"old".to_vec()),
        );
        worker.entries.insert(
            format!("{REMOTE_CACHE}/{LIBA_FILE}"),
            MemoryEntry::File(b"liba contents".to_vec()),
        );
        // Left behind by an earlier run
        worker.entries.insert(
            format!("{REMOTE_PACKAGES}/stale-1-1-x86_64.hpkg"),
            MemoryEntry::Symlink(format!("{REMOTE_CACHE}/stale-1-1-x86_64.hpkg")),
        );
    }

    let job = job(&f, 1);
    assert_eq!(f.builder.build(&job, &f.log).await, BuildOutcome::success());

    assert!(!f.transport.exists(&format!("{REMOTE_CACHE}/old-0.9-1-x86_64.hpkg")));
    assert!(!f.transport.exists(&format!("{REMOTE_PACKAGES}/stale-1-1-x86_64.hpkg")));
    assert!(f.transport.exists(&format!("{REMOTE_CACHE}/{LIBA_FILE}")));
    // liba was cached already, so it was linked rather than uploaded again
    assert!(!f.transport.exists(&format!("{REMOTE_CACHE}/{LIBA_FILE}.upload")));
    assert!(!f.builder.available_packages().contains("old-0.9-1-x86_64.hpkg"));
}

#[tokio::test]
async fn test_status_reports_current_build() {
    let f = fixture(100);
    let status = f.builder.status();
    assert_eq!(status.name, "w1");
    assert_eq!(status.state, BuilderState::NotAvailable);
    assert!(status.current_build.is_none());

    f.builder.build(&job(&f, 1), &f.log).await;
    let status = f.builder.status();
    assert_eq!(status.available_packages, 2);
    assert!(status.current_build.is_none());
}
