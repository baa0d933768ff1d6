//! coursepack CLI: resumable course material download and PDF assembly.
//!
//! Materializes the resources listed in a subject manifest into a local
//! cache, merges them into one outlined PDF, and verifies the result.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}
