//! Build command implementation
//!
//! Implements `buildmaster build` to plan the requested ports and run them
//! on the configured builders.

use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::cli::output::{create_build_bar, create_spinner, status};
use crate::config::MasterConfig;
use crate::core::status::StatusSnapshot;
use crate::error::SchedulerError;
use crate::master::reporter::{ProgressReporter, StatusSink};
use crate::master::scheduler::RunStatus;
use crate::master::BuildMaster;

/// Execute the build command
pub async fn execute(config: MasterConfig, ports: &[String], quiet: bool) -> Result<()> {
    let bar = if quiet {
        indicatif::ProgressBar::hidden()
    } else {
        create_build_bar(0)
    };
    let sinks: Vec<Arc<dyn StatusSink>> = vec![Arc::new(ProgressReporter::new(bar.clone()))];

    let spinner = (!quiet).then(|| create_spinner("Preparing build run..."));
    let prepared = BuildMaster::prepare(config, sinks).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }
    let master = prepared.context("Failed to prepare build run")?;

    let skipped = master.plan(ports);
    if master.scheduler().is_empty() {
        bar.finish_and_clear();
        if skipped > 0 {
            bail!("None of the requested ports can be built");
        }
        println!("{} Nothing to build", status::INFO);
        return Ok(());
    }

    let report = master.run().await.context("Build run failed")?;
    bar.finish_and_clear();

    if !quiet {
        print_summary(&report.snapshot);
    }

    match report.status {
        RunStatus::AllBuildersLost => Err(SchedulerError::AllBuildersLost.into()),
        RunStatus::Aborted => bail!("Build run aborted"),
        RunStatus::Complete => {
            let counts = report.snapshot.summary.builds;
            if counts.failed + counts.lost > 0 {
                bail!("{} builds failed, {} lost", counts.failed, counts.lost);
            }
            Ok(())
        }
    }
}

fn print_summary(snapshot: &StatusSnapshot) {
    let builds = &snapshot.builds;
    for build in &builds.complete {
        println!("{} {}", status::SUCCESS, build.port.revisioned_name);
    }
    for build in &builds.failed {
        println!("{} {} failed", status::ERROR, build.port.revisioned_name);
    }
    for build in &builds.lost {
        println!("{} {} lost", status::WARNING, build.port.revisioned_name);
    }
    for skipped in &builds.skipped {
        println!("{} {} skipped: {}", status::INFO, skipped.name, skipped.reason);
    }

    let counts = snapshot.summary.builds;
    println!(
        "\n{} complete, {} failed, {} lost of {} builds",
        counts.complete, counts.failed, counts.lost, counts.total
    );
    if let Some(duration) = snapshot.summary.duration {
        println!("Finished in {duration:.0}s");
    }
}
