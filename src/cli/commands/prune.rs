//! Prune command implementation
//!
//! Implements `buildmaster prune`, moving artifacts that no active port
//! accounts for into the obsolete directory.

use anyhow::{Context, Result};

use crate::cli::output::status;
use crate::config::MasterConfig;
use crate::core::port::PortCatalog;
use crate::infra::repository::ArtifactRepository;

/// Execute the prune command
pub async fn execute(config: &MasterConfig) -> Result<()> {
    let catalog_path = config.port_catalog();
    let catalog = PortCatalog::load_from_path(&catalog_path)
        .with_context(|| format!("Failed to load port catalog {}", catalog_path.display()))?;
    if catalog.is_empty() {
        anyhow::bail!(
            "Port catalog {} lists no ports; refusing to prune everything",
            catalog_path.display()
        );
    }

    let repository = ArtifactRepository::new(config.packages_dir());
    let obsoleted = repository
        .prune(&catalog)
        .with_context(|| format!("Failed to prune {}", repository.path().display()))?;

    if obsoleted.is_empty() {
        println!("{} No obsolete packages", status::SUCCESS);
    } else {
        for package in &obsoleted {
            println!("  {} {}: {}", status::WARNING, package.file_name, package.reason);
        }
        println!(
            "{} Moved {} packages to {}",
            status::SUCCESS,
            obsoleted.len(),
            repository.obsolete_dir().display()
        );
    }
    Ok(())
}
