//! Integration tests for the scheduler
//!
//! Runs whole build runs against scripted builders.

mod common;

use std::sync::Arc;
use std::time::Duration;

use buildmaster::builder::{Builder, BuilderState};
use buildmaster::error::SchedulerError;
use buildmaster::master::reporter::{JsonFileReporter, StatusSink};
use buildmaster::master::scheduler::RunStatus;
use common::{catalog, event_log, event_of, port, MockBuilder, TestMaster};

const CHAIN: &str = r#"
[[port]]
name = "a"
version = "1"
revision = 1
[port.architectures]
any = "stable"

[[port]]
name = "b"
version = "1"
revision = 1
[port.architectures]
any = "stable"

[[port]]
name = "c"
version = "1"
revision = 1
[port.architectures]
any = "stable"

[[port]]
name = "d"
version = "1"
revision = 1
[port.architectures]
any = "stable"
"#;

const DELAY: Duration = Duration::from_millis(50);

fn builder(master: &TestMaster, name: &str, events: &common::EventLog) -> MockBuilder {
    MockBuilder::new(name, &master.packages_dir(), DELAY, Arc::clone(events))
}

#[tokio::test]
async fn test_linear_chain_builds_in_dependency_order() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(vec![Arc::new(builder(&master, "w1", &events))], Vec::new());

    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "b"), vec!["a-1".to_string()], Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "c"), vec!["b-1".to_string()], Vec::new()).unwrap();

    let report = scheduler.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.snapshot.summary.builds.complete, 3);

    let (a, b, c) = (event_of(&events, "a-1"), event_of(&events, "b-1"), event_of(&events, "c-1"));
    assert!(a.finished <= b.started);
    assert!(b.finished <= c.started);

    // b got a's artifact as a present requirement
    let b_status = report
        .snapshot
        .builds
        .complete
        .iter()
        .find(|s| s.port.name == "b")
        .unwrap();
    assert_eq!(b_status.required_packages, vec!["a-1-1-x86_64.hpkg".to_string()]);
    assert!(b_status.missing_packages.is_empty());
}

#[tokio::test]
async fn test_fan_out_runs_concurrently() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(
        vec![
            Arc::new(builder(&master, "w1", &events)),
            Arc::new(builder(&master, "w2", &events)),
        ],
        Vec::new(),
    );

    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "b"), vec!["a-1".to_string()], Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "c"), vec!["a-1".to_string()], Vec::new()).unwrap();

    let report = scheduler.run().await.unwrap();
    assert_eq!(report.snapshot.summary.builds.complete, 3);

    let (a, b, c) = (event_of(&events, "a-1"), event_of(&events, "b-1"), event_of(&events, "c-1"));
    assert!(a.finished <= b.started && a.finished <= c.started);
    assert!(b.started < c.finished && c.started < b.finished);
    assert_ne!(b.worker, c.worker);
}

#[tokio::test]
async fn test_failure_cascades_lost() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(
        vec![Arc::new(builder(&master, "w1", &events).failing("a-1"))],
        Vec::new(),
    );

    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "b"), vec!["a-1".to_string()], Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "c"), vec!["b-1".to_string()], Vec::new()).unwrap();

    let report = scheduler.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);

    let builds = &report.snapshot.builds;
    assert_eq!(builds.failed.len(), 1);
    assert_eq!(builds.lost.len(), 2);
    assert!(builds.lost.iter().all(|b| b.build_numbers.is_empty()));
    assert_eq!(events.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_worker_loss_mid_build() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let w1 = Arc::new(builder(&master, "w1", &events).lost_on("a-1"));
    let w2 = Arc::new(builder(&master, "w2", &events));
    let scheduler = master.scheduler(vec![w1.clone(), w2], Vec::new());

    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "b"), Vec::new(), Vec::new()).unwrap();

    let report = scheduler.run().await.unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(w1.state(), BuilderState::Lost);

    let builds = &report.snapshot.builds;
    assert_eq!(builds.failed[0].port.name, "a");
    assert_eq!(builds.complete[0].port.name, "b");
    assert_eq!(event_of(&events, "b-1").worker, "w2");
    assert_eq!(report.snapshot.builders.lost.len(), 1);
}

#[tokio::test]
async fn test_no_builds_finishes_immediately() {
    let master = TestMaster::new();
    let scheduler = master.scheduler(
        vec![Arc::new(builder(&master, "w1", &event_log()))],
        Vec::new(),
    );

    let report = tokio::time::timeout(Duration::from_secs(1), scheduler.run())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(report.status, RunStatus::Complete);
    assert_eq!(report.snapshot.summary.builds.total, 0);
    assert!(report.snapshot.end_time.is_some());
}

#[tokio::test]
async fn test_builds_without_builders_is_an_error() {
    let master = TestMaster::new();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(Vec::new(), Vec::new());
    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();

    assert!(matches!(scheduler.run().await, Err(SchedulerError::NoBuilders)));
}

#[tokio::test]
async fn test_all_builders_lost() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(
        vec![Arc::new(builder(&master, "w1", &events).with_state(BuilderState::Lost))],
        Vec::new(),
    );
    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "b"), vec!["a-1".to_string()], Vec::new()).unwrap();

    let report = scheduler.run().await.unwrap();
    assert_eq!(report.status, RunStatus::AllBuildersLost);
    assert_eq!(report.snapshot.builds.lost.len(), 2);
    assert_eq!(report.snapshot.build_status, "all builders lost");
    assert!(events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_at_most_one_build_per_builder() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(
        vec![
            Arc::new(builder(&master, "w1", &events)),
            Arc::new(builder(&master, "w2", &events)),
        ],
        Vec::new(),
    );
    for name in ["a", "b", "c", "d"] {
        scheduler.schedule(port(&ports, name), Vec::new(), Vec::new()).unwrap();
    }

    let report = scheduler.run().await.unwrap();
    assert_eq!(report.snapshot.summary.builds.complete, 4);

    let events = events.lock().unwrap();
    for event in events.iter() {
        let overlapping = events
            .iter()
            .filter(|other| other.started < event.finished && event.started < other.finished)
            .count();
        assert!(overlapping <= 2, "{} overlaps {overlapping} builds", event.build);
    }
}

#[tokio::test]
async fn test_unproduced_dependency_and_cycle_are_lost() {
    let master = TestMaster::new();
    let events = event_log();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(vec![Arc::new(builder(&master, "w1", &events))], Vec::new());

    scheduler.schedule(port(&ports, "a"), vec!["nothere-1".to_string()], Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "b"), vec!["c-1".to_string()], Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "c"), vec!["b-1".to_string()], Vec::new()).unwrap();
    scheduler.schedule(port(&ports, "d"), Vec::new(), Vec::new()).unwrap();

    let report = scheduler.run().await.unwrap();
    let builds = &report.snapshot.builds;
    assert_eq!(builds.complete.len(), 1);
    assert_eq!(builds.complete[0].port.name, "d");
    assert_eq!(builds.lost.len(), 3);
}

#[tokio::test]
async fn test_existing_artifacts_skip_the_port() {
    let master = TestMaster::new();
    let ports = catalog(CHAIN);
    std::fs::write(master.packages_dir().join("a-1-1-x86_64.hpkg"), b"built").unwrap();
    let scheduler = master.scheduler(
        vec![Arc::new(builder(&master, "w1", &event_log()))],
        Vec::new(),
    );

    assert!(!scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap());
    assert!(scheduler.is_skipped("a-1"));

    // The skipped port's artifact exists, so b can still build
    scheduler.schedule(port(&ports, "b"), vec!["a-1".to_string()], Vec::new()).unwrap();
    let report = scheduler.run().await.unwrap();
    assert_eq!(report.snapshot.builds.complete.len(), 1);
    assert_eq!(report.snapshot.builds.skipped.len(), 1);
}

#[tokio::test]
async fn test_duplicate_build_is_rejected() {
    let master = TestMaster::new();
    let ports = catalog(CHAIN);
    let scheduler = master.scheduler(Vec::new(), Vec::new());

    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();
    assert!(matches!(
        scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()),
        Err(SchedulerError::DuplicateBuild { .. })
    ));
}

#[tokio::test]
async fn test_run_writes_records_logs_and_status() {
    let master = TestMaster::new();
    let ports = catalog(CHAIN);
    let sinks: Vec<Arc<dyn StatusSink>> = vec![Arc::new(JsonFileReporter::new(&master.output_dir()))];
    let builders: Vec<Arc<dyn Builder>> = vec![Arc::new(builder(&master, "w1", &event_log()))];
    let scheduler = master.scheduler(builders, sinks);
    scheduler.schedule(port(&ports, "a"), Vec::new(), Vec::new()).unwrap();

    scheduler.run().await.unwrap();

    let output = master.output_dir();
    let log = std::fs::read_to_string(output.join("builds/1.log")).unwrap();
    assert!(log.contains("building a-1 on w1"));

    let record: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.join("records/1.json")).unwrap()).unwrap();
    assert_eq!(record["success"], true);
    assert_eq!(record["builder"], "w1");
    assert_eq!(record["artifacts"][0]["file"], "a-1-1-x86_64.hpkg");

    let status: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(output.join("status.json")).unwrap()).unwrap();
    assert_eq!(status["buildStatus"], "complete");
    assert_eq!(status["summary"]["builds"]["complete"], 1);
    assert_eq!(status["nextBuildNumber"], 2);
}
