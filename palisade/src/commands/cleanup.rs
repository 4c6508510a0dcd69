use anyhow::Result;
use tracing::*;
use palisade_core::Services;

use crate::config::load_config;
use crate::Cli;

/// One-shot retention sweep across every store.
pub async fn command(cli: &Cli) -> Result<()> {
    let config = load_config(&cli.config)?;
    let retention_days = config.retention.request_log_days;
    let services = Services::new(config).await?;

    let buckets = services.counters.cleanup().await?;
    let bans = services.bans.cleanup().await?;
    let log_entries = services.request_log.cleanup(retention_days).await?;
    let reputation = services.reputation_store.cleanup().await?;

    info!(
        buckets,
        bans,
        log_entries,
        reputation = reputation.total(),
        "Cleanup completed"
    );

    services.stop().await;
    Ok(())
}
