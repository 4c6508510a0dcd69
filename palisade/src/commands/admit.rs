use anyhow::Result;
use palisade_common::Secret;
use palisade_core::admission::RequestEnvelope;
use palisade_core::Services;

use crate::config::load_config;
use crate::Cli;

pub async fn command(
    cli: &Cli,
    address: Option<String>,
    api_key: Option<String>,
    path: Option<String>,
    method: Option<String>,
    country: Option<String>,
) -> Result<()> {
    let config = load_config(&cli.config)?;
    let services = Services::new(config).await?;

    let envelope = RequestEnvelope {
        address,
        api_key: api_key.map(Secret::new),
        path,
        method,
        country,
        user_agent: None,
    };
    let decision = services.admission.check(&envelope).await;
    println!("{}", serde_json::to_string_pretty(&decision)?);

    services.stop().await;
    Ok(())
}
