use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sea_orm::DatabaseConnection;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use palisade_common::PalisadeConfig;

use crate::admission::AdmissionEngine;
use crate::api_keys::ApiKeyRegistry;
use crate::bans::BanRegistry;
use crate::consts::CLEANUP_INTERVAL_SECONDS;
use crate::db::{connect_to_db, populate_db};
use crate::geo::GeoBlockRegistry;
use crate::rate_limiting::CounterStore;
use crate::reputation::providers::{FreeAsnProvider, ProviderRegistry};
use crate::reputation::{ReputationEngine, ReputationStore, TorListUpdater, TorListUpdaterHandle};
use crate::request_log::RequestLogStore;

/// Everything the process shares: the store handle, the component
/// registries and the two engines. Values are cheap to clone and hold
/// no state beyond the shared connection.
#[derive(Clone)]
pub struct Services {
    pub db: Arc<Mutex<DatabaseConnection>>,
    pub config: Arc<PalisadeConfig>,
    pub counters: Arc<CounterStore>,
    pub bans: Arc<BanRegistry>,
    pub api_keys: Arc<ApiKeyRegistry>,
    pub request_log: Arc<RequestLogStore>,
    pub geo: Arc<GeoBlockRegistry>,
    pub reputation_store: Arc<ReputationStore>,
    pub reputation: Arc<ReputationEngine>,
    pub admission: Arc<AdmissionEngine>,
    tor_updater: Arc<Mutex<Option<TorListUpdaterHandle>>>,
    cleanup_task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Services {
    /// Startup sequence: open the store, migrate, seed, construct the
    /// components, then start the background tasks. Only after this
    /// returns should the process accept requests.
    pub async fn new(config: PalisadeConfig) -> Result<Self> {
        config.validate()?;

        let db = connect_to_db(&config).await?;
        populate_db(&db, &config).await?;
        let db = Arc::new(Mutex::new(db));

        let counters = Arc::new(CounterStore::new(db.clone()));
        let bans = Arc::new(BanRegistry::new(db.clone(), config.abuse.auto_ban_seconds));
        let api_keys = Arc::new(ApiKeyRegistry::new(db.clone(), config.rate_limit.clone()));
        let request_log = Arc::new(RequestLogStore::new(db.clone()));
        let geo = Arc::new(GeoBlockRegistry::new(db.clone()));
        let reputation_store = Arc::new(ReputationStore::new(db.clone()));

        let client = reqwest::Client::new();
        let free_asn = Arc::new(FreeAsnProvider::new(&config.providers, client));
        let providers = Arc::new(ProviderRegistry::from_config(&config.providers));
        let reputation = Arc::new(ReputationEngine::new(
            reputation_store.clone(),
            providers,
            free_asn,
            config.reputation.clone(),
        ));

        let admission = Arc::new(AdmissionEngine::new(
            counters.clone(),
            bans.clone(),
            api_keys.clone(),
            request_log.clone(),
            geo.clone(),
            config.abuse.clone(),
            config.rate_limit.clone(),
            config.log_all_requests,
        ));

        let tor_updater = if config.tor_list.enabled {
            let updater =
                TorListUpdater::new(reputation_store.clone(), config.tor_list.clone());
            Some(updater.spawn())
        } else {
            None
        };

        let cleanup_task = tokio::spawn({
            let counters = counters.clone();
            let bans = bans.clone();
            let request_log = request_log.clone();
            let reputation_store = reputation_store.clone();
            let retention_days = config.retention.request_log_days;
            async move {
                let mut interval =
                    tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECONDS));
                interval.tick().await;
                loop {
                    interval.tick().await;
                    let mut removed = 0u64;
                    match counters.cleanup().await {
                        Ok(n) => removed += n,
                        Err(error) => warn!(?error, "Counter bucket cleanup failed"),
                    }
                    match bans.cleanup().await {
                        Ok(n) => removed += n,
                        Err(error) => warn!(?error, "Ban cleanup failed"),
                    }
                    match request_log.cleanup(retention_days).await {
                        Ok(n) => removed += n,
                        Err(error) => warn!(?error, "Request log cleanup failed"),
                    }
                    match reputation_store.cleanup().await {
                        Ok(stats) => removed += stats.total(),
                        Err(error) => warn!(?error, "Reputation cleanup failed"),
                    }
                    if removed > 0 {
                        info!(removed, "Retention sweep completed");
                    }
                }
            }
        });

        info!("Palisade services started");
        Ok(Self {
            db,
            config: Arc::new(config),
            counters,
            bans,
            api_keys,
            request_log,
            geo,
            reputation_store,
            reputation,
            admission,
            tor_updater: Arc::new(Mutex::new(tor_updater)),
            cleanup_task: Arc::new(Mutex::new(Some(cleanup_task))),
        })
    }

    /// Shutdown: stop the updater (an in-flight fetch may finish), stop
    /// the retention sweep, then let the store handle drop.
    pub async fn stop(&self) {
        if let Some(updater) = self.tor_updater.lock().await.take() {
            updater.stop().await;
        }
        if let Some(task) = self.cleanup_task.lock().await.take() {
            task.abort();
        }
        info!("Palisade services stopped");
    }
}
