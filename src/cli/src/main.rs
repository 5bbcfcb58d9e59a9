use anyhow::Context;
use clap::Parser;

use acquire_cli::commands::Cli;
use acquire_cli::logging::setup_logging;
use acquire_cli::process_command::process_cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_logging()?;
    let cli = Cli::parse();
    process_cli(cli).await.context("ssm-acquire run failed")?;
    Ok(())
}
