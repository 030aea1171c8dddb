//! Status snapshots
//!
//! The snapshot is what reporters emit on every state change: per-state
//! build lists, per-state builder lists and a summary with throughput.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::schedule::{BuildStatus, SkippedStatus};
use crate::builder::BuilderStatus;
use crate::config::defaults;

/// Builds grouped by state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildLists {
    /// Running on a builder
    pub active: Vec<BuildStatus>,
    /// Buildable, waiting for a builder
    pub scheduled: Vec<BuildStatus>,
    /// Waiting for dependencies
    pub blocked: Vec<BuildStatus>,
    /// Finished successfully
    pub complete: Vec<BuildStatus>,
    /// Finished unsuccessfully
    pub failed: Vec<BuildStatus>,
    /// Will never be attempted
    pub lost: Vec<BuildStatus>,
    /// Never scheduled
    pub skipped: Vec<SkippedStatus>,
}

/// Builders grouped by state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuilderLists {
    /// Running a build
    pub active: Vec<BuilderStatus>,
    /// Waiting to reconnect
    pub reconnecting: Vec<BuilderStatus>,
    /// Usable, not running a build
    pub idle: Vec<BuilderStatus>,
    /// Permanently excluded
    pub lost: Vec<BuilderStatus>,
}

/// Build counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCounts {
    /// Builds in the run
    pub total: usize,
    /// Finished successfully
    pub complete: usize,
    /// Finished unsuccessfully
    pub failed: usize,
    /// Will never be attempted
    pub lost: usize,
    /// Buildable, waiting for a builder
    pub scheduled: usize,
    /// Running
    pub active: usize,
    /// Waiting for dependencies
    pub blocked: usize,
}

/// Builder counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderCounts {
    /// Running a build
    pub active: usize,
    /// Waiting to reconnect
    pub reconnecting: usize,
    /// Usable, not running a build
    pub idle: usize,
    /// Permanently excluded
    pub lost: usize,
}

/// Counters and throughput
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// Build counters
    pub builds: BuildCounts,
    /// Builder counters
    pub builders: BuilderCounts,
    /// Seconds since the run started
    pub duration: Option<f64>,
    /// Finished builds per hour over the whole run
    pub pkg_hour: Option<u64>,
    /// Finished builds per hour over the impulse window
    pub impulse: Option<u64>,
}

impl BuildLists {
    /// Counters for these lists
    pub fn counts(&self) -> BuildCounts {
        BuildCounts {
            total: self.active.len()
                + self.scheduled.len()
                + self.blocked.len()
                + self.complete.len()
                + self.failed.len()
                + self.lost.len(),
            complete: self.complete.len(),
            failed: self.failed.len(),
            lost: self.lost.len(),
            scheduled: self.scheduled.len(),
            active: self.active.len(),
            blocked: self.blocked.len(),
        }
    }
}

impl BuilderLists {
    /// Counters for these lists
    pub fn counts(&self) -> BuilderCounts {
        BuilderCounts {
            active: self.active.len(),
            reconnecting: self.reconnecting.len(),
            idle: self.idle.len(),
            lost: self.lost.len(),
        }
    }
}

/// Full status of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    /// Builds by state
    pub builds: BuildLists,
    /// Builders by state
    pub builders: BuilderLists,
    /// Counters and throughput
    pub summary: Summary,
    /// Number the next build will get
    pub next_build_number: u64,
    /// Origin URL of the master's ports tree
    pub ports_tree_origin_url: String,
    /// HEAD commit of the master's ports tree
    pub ports_tree_head: String,
    /// Human readable run status
    pub build_status: String,
    /// When builds started
    pub start_time: Option<DateTime<Utc>>,
    /// When the run ended
    pub end_time: Option<DateTime<Utc>>,
}

/// Ring of (time, finished count) samples for the impulse rate
#[derive(Debug, Clone)]
pub struct ImpulseTracker {
    samples: Vec<Option<(DateTime<Utc>, usize)>>,
    index: usize,
}

impl Default for ImpulseTracker {
    fn default() -> Self {
        Self::new(defaults::IMPULSE_WINDOW)
    }
}

impl ImpulseTracker {
    /// Tracker remembering `window` samples
    pub fn new(window: usize) -> Self {
        Self {
            samples: vec![None; window.max(1)],
            index: 0,
        }
    }

    /// Record a sample and return the rate against the oldest one
    pub fn sample(&mut self, now: DateTime<Utc>, finished: usize) -> Option<u64> {
        self.index = (self.index + 1) % self.samples.len();
        let previous = self.samples[self.index].replace((now, finished));

        let (then, before) = previous?;
        let elapsed = (now - then).num_milliseconds();
        if elapsed <= 0 || before == 0 {
            return None;
        }
        Some(per_hour(finished.saturating_sub(before), elapsed))
    }
}

/// Finished builds per hour since `start`
pub fn pkg_hour(start: Option<DateTime<Utc>>, now: DateTime<Utc>, finished: usize) -> Option<u64> {
    let elapsed = (now - start?).num_milliseconds();
    (elapsed > 0).then(|| per_hour(finished, elapsed))
}

fn per_hour(count: usize, elapsed_millis: i64) -> u64 {
    let millis = u64::try_from(elapsed_millis).unwrap_or(u64::MAX).max(1);
    (count as u64).saturating_mul(3_600_000) / millis
}
