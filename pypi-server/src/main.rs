//! `pypi-server` binary.

use anyhow::Result;
use clap::Parser;
use pypi_server::cli::{execute_command, Cli};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    execute_command(cli).await
}
