//! Enricher CLI: resumable, rate-limited contact enrichment of a CSV list.
//!
//! Reads the input list, looks each record up against the remote directory
//! API, and appends the enriched rows to an output CSV, checkpointing as it
//! goes so that an interrupted run picks up where it stopped.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli)?;
    commands::run(cli).await
}
