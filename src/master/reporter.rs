//! Status reporters
//!
//! The scheduler hands a [`StatusSnapshot`] to every [`StatusSink`] whenever
//! something changes.

use std::path::{Path, PathBuf};

use indicatif::ProgressBar;

use crate::config::defaults;
use crate::core::status::StatusSnapshot;
use crate::infra::filesystem;

/// Receives status snapshots
pub trait StatusSink: Send + Sync {
    /// Handle one snapshot; must not block for long
    fn report(&self, snapshot: &StatusSnapshot);
}

/// Writes `status.json` atomically on every report
#[derive(Debug, Clone)]
pub struct JsonFileReporter {
    path: PathBuf,
}

impl JsonFileReporter {
    /// Reporter writing `<output_dir>/status.json`
    pub fn new(output_dir: &Path) -> Self {
        Self {
            path: output_dir.join(defaults::STATUS_FILE),
        }
    }

    /// Status file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl StatusSink for JsonFileReporter {
    fn report(&self, snapshot: &StatusSnapshot) {
        let content = match serde_json::to_vec_pretty(snapshot) {
            Ok(content) => content,
            Err(e) => {
                tracing::warn!("Failed to serialize status: {e}");
                return;
            }
        };
        if let Err(e) = filesystem::write_atomic(&self.path, &content) {
            tracing::warn!("Failed to write status: {e}");
        }
    }
}

/// Drives a progress bar from snapshots
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
}

impl ProgressReporter {
    /// Reporter updating `bar`
    pub fn new(bar: ProgressBar) -> Self {
        Self { bar }
    }
}

impl StatusSink for ProgressReporter {
    fn report(&self, snapshot: &StatusSnapshot) {
        let counts = snapshot.summary.builds;
        self.bar.set_length(counts.total as u64);
        self.bar
            .set_position((counts.complete + counts.failed + counts.lost) as u64);
        self.bar.set_message(format!(
            "{}, {} active, {} failed, {} lost",
            snapshot.build_status, counts.active, counts.failed, counts.lost
        ));
    }
}
