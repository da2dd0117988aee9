//! novelpack CLI: download web novels into EPUB packages.
//!
//! Discovers volumes on a supported site, fetches chapters through a
//! resumable cache, assembles packages with an embedded font, and patches
//! covers into existing packages.

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
