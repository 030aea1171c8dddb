//! Check command implementation
//!
//! Implements `buildmaster check`, resolving the requires of every artifact
//! in the packages directory.

use anyhow::{bail, Context, Result};

use crate::cli::output::{create_spinner, status};
use crate::config::MasterConfig;
use crate::master;

/// Execute the check command
pub async fn execute(config: &MasterConfig) -> Result<()> {
    let spinner = create_spinner("Checking repository consistency...");
    let problems = master::check_repository(config)
        .await
        .context("Repository check failed")?;
    spinner.finish_and_clear();

    if problems.is_empty() {
        println!(
            "{} Every package in {} is installable",
            status::SUCCESS,
            config.packages_dir().display()
        );
        return Ok(());
    }

    for problem in &problems {
        println!("{} {}", status::ERROR, problem.path.display());
        for line in problem.message.lines() {
            println!("    {}", line.trim());
        }
    }
    bail!("{} packages have unsatisfiable requires", problems.len())
}
