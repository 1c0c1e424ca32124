//! docmodules CLI: turn documentation sites into a module/submodule map.
//!
//! Crawls one or more documentation URLs, normalizes the pages, and asks a
//! local language model to extract the product's functional modules.

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
