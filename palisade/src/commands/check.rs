use anyhow::Result;
use tracing::*;

use crate::config::load_config;
use crate::Cli;

pub async fn command(cli: &Cli) -> Result<()> {
    load_config(&cli.config)?;
    info!("No problems found");
    Ok(())
}
