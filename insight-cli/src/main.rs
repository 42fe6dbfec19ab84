//! Binary crate for the `insight` command-line tool.
//!
//! This crate focuses on:
//! - Parsing CLI arguments
//! - Wiring configuration into the core pipeline
//! - Human-friendly output formatting

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cmd = cli::Cli::parse();
    cmd.run().await
}
