use anyhow::Result;
use tracing::*;
use palisade_core::Services;

use crate::config::load_config;
use crate::Cli;

pub async fn command(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let services = Services::new(config).await?;

    info!("Palisade is running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("Shutting down");
    services.stop().await;
    Ok(())
}
