//! newsagent CLI: research a topic and write a short article about it.
//!
//! Builds the local knowledge base from a documents directory, then runs the
//! research and writing stages against it and the web.

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
