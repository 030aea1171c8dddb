//! Builders command implementation
//!
//! Implements `buildmaster builders`, loading every worker configuration
//! file and listing the workers a build run would use.

use anyhow::{Context, Result};

use crate::cli::output::status;
use crate::config::{BuilderConfig, MasterConfig};

/// Execute the builders command
pub async fn execute(config: &MasterConfig) -> Result<()> {
    if config.local_builders > 0 {
        println!(
            "{} Using {} local builders, worker configurations are ignored",
            status::INFO,
            config.local_builders
        );
        return Ok(());
    }

    let dir = config.builders_dir();
    let builders = BuilderConfig::load_dir(&dir)
        .with_context(|| format!("Invalid worker configuration in {}", dir.display()))?;

    if builders.is_empty() {
        println!("{} No worker configurations in {}", status::WARNING, dir.display());
        return Ok(());
    }

    for builder in &builders {
        let via = builder
            .ssh
            .jump
            .as_ref()
            .map(|jump| format!(" via {}@{}:{}", jump.user, jump.host, jump.port))
            .unwrap_or_default();
        println!(
            "{} {}: {}@{}:{}{} ports tree {}",
            status::SUCCESS,
            builder.name,
            builder.ssh.user,
            builder.ssh.host,
            builder.ssh.port,
            via,
            builder.portstree.path
        );
        tracing::debug!("{} loaded from {}", builder.name, builder.source.display());
    }
    println!("\n{} builders configured", builders.len());
    Ok(())
}
