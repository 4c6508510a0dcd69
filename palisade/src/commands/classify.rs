use anyhow::Result;
use palisade_core::Services;

use crate::config::load_config;
use crate::Cli;

pub async fn command(cli: &Cli, address: &str, bypass_cache: bool) -> Result<()> {
    let config = load_config(&cli.config)?;
    let services = Services::new(config).await?;

    let classification = services.reputation.classify(address, bypass_cache).await;
    println!("{}", serde_json::to_string_pretty(&classification)?);

    services.stop().await;
    Ok(())
}
