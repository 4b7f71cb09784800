//! OrgPulse CLI — organization contribution activity aggregator.
//!
//! Scrapes the member roster, pulls credited contributions, issue comments,
//! and merge requests, and reports monthly and per-person summaries.

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
