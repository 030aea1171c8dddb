//! Buildmaster CLI - distributed port builds
//!
//! Entry point for the buildmaster command-line application.

use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;

use anyhow::Result;
use clap::Parser;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use buildmaster::cli::output::display_error;
use buildmaster::cli::Cli;

fn init_tracing(level: Level, master_log: Option<&Path>) {
    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_default_env().add_directive(level.into()));

    // The master log always records info and above, without colors
    let file = master_log.and_then(|path| {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok()?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path).ok()?;
        Some(
            fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .with_filter(EnvFilter::new("info")),
        )
    });

    tracing_subscriber::registry().with(stderr).with(file).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.log_level(), cli.master_log_path().as_deref());
    tracing::debug!(
        "buildmaster {} ({})",
        env!("CARGO_PKG_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
    );

    // Run the command and handle errors
    match cli.run().await {
        Ok(()) => Ok(()),
        Err(e) => {
            display_error(&e);
            std::process::exit(1);
        }
    }
}
