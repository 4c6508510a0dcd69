use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use palisade_common::{PalisadeError, TorListConfig};

use super::store::ReputationStore;

/// Background fetcher for the public Tor exit list. At most one fetch is
/// in flight at a time; a failed fetch leaves the previous data intact.
pub struct TorListUpdater {
    store: Arc<ReputationStore>,
    config: TorListConfig,
    client: reqwest::Client,
    in_flight: Arc<AtomicBool>,
    last_update: Arc<RwLock<Option<DateTime<Utc>>>>,
}

pub struct TorListUpdaterHandle {
    shutdown: watch::Sender<bool>,
    join: JoinHandle<()>,
    last_update: Arc<RwLock<Option<DateTime<Utc>>>>,
}

impl TorListUpdaterHandle {
    /// Stops the scheduler; an in-flight fetch is allowed to finish.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.join.await;
    }

    pub async fn last_update(&self) -> Option<DateTime<Utc>> {
        *self.last_update.read().await
    }
}

impl TorListUpdater {
    pub fn new(store: Arc<ReputationStore>, config: TorListConfig) -> Self {
        Self {
            store,
            config,
            client: reqwest::Client::new(),
            in_flight: Arc::new(AtomicBool::new(false)),
            last_update: Arc::new(RwLock::new(None)),
        }
    }

    pub fn spawn(self) -> TorListUpdaterHandle {
        let (shutdown, receiver) = watch::channel(false);
        let last_update = self.last_update.clone();
        let join = tokio::spawn(self.run(receiver));
        TorListUpdaterHandle {
            shutdown,
            join,
            last_update,
        }
    }

    async fn run(self, mut shutdown: watch::Receiver<bool>) {
        if self.config.fetch_on_startup {
            self.fetch_once().await;
        }

        let mut interval = tokio::time::interval(Duration::from_secs(self.config.interval_seconds));
        interval.tick().await; // the first tick is immediate

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.fetch_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("Tor exit list updater stopped");
    }

    /// Fetches and syncs once. Skipped entirely when another fetch is
    /// still running.
    pub async fn fetch_once(&self) {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Tor exit list fetch already in flight, skipping");
            return;
        }

        match self.fetch_inner().await {
            Ok(count) => {
                *self.last_update.write().await = Some(Utc::now());
                info!(count, "Tor exit list synced");
            }
            Err(error) => {
                warn!(?error, "Tor exit list fetch failed, keeping existing data");
            }
        }

        self.in_flight.store(false, Ordering::SeqCst);
    }

    async fn fetch_inner(&self) -> Result<u64, PalisadeError> {
        let deadline = Duration::from_secs(self.config.fetch_timeout_seconds);
        let response = tokio::time::timeout(deadline, self.client.get(&self.config.url).send())
            .await
            .map_err(|_| PalisadeError::Provider("tor exit list fetch timed out".into()))?
            .map_err(|e| PalisadeError::Provider(e.to_string()))?;

        if !response.status().is_success() {
            return Err(PalisadeError::Provider(format!(
                "tor exit list endpoint returned {}",
                response.status()
            )));
        }

        let body = tokio::time::timeout(deadline, response.text())
            .await
            .map_err(|_| PalisadeError::Provider("tor exit list read timed out".into()))?
            .map_err(|e| PalisadeError::Provider(e.to_string()))?;

        let addresses = parse_exit_list(&body);
        if addresses.is_empty() {
            return Err(PalisadeError::Provider(
                "tor exit list parsed to zero addresses".into(),
            ));
        }

        self.store.sync_tor_exits(&addresses).await
    }
}

/// Newline-separated IPv4 literals; comments and blanks are skipped,
/// anything that is not a strict IPv4 literal is discarded.
pub fn parse_exit_list(body: &str) -> Vec<String> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter(|line| line.parse::<Ipv4Addr>().is_ok())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::connect_test_db;

    #[test]
    fn test_parse_exit_list_skips_junk() {
        let body = "# ExitNode list\n1.2.3.4\n\n  5.6.7.8  \nnot-an-ip\n01.2.3.4\n::1\n# trailing\n9.9.9.9";
        assert_eq!(parse_exit_list(body), vec!["1.2.3.4", "5.6.7.8", "9.9.9.9"]);
    }

    #[test]
    fn test_parse_exit_list_empty_input() {
        assert!(parse_exit_list("").is_empty());
        assert!(parse_exit_list("# only comments\n").is_empty());
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_existing_data() {
        let store = Arc::new(ReputationStore::new(connect_test_db().await));
        store.sync_tor_exits(&["1.2.3.4".to_owned()]).await.unwrap();

        let updater = TorListUpdater::new(
            store.clone(),
            TorListConfig {
                url: "http://127.0.0.1:9/exits".to_owned(),
                fetch_timeout_seconds: 1,
                ..Default::default()
            },
        );
        updater.fetch_once().await;

        assert!(store.is_tor_exit("1.2.3.4").await.unwrap());
        assert!(updater.last_update.read().await.is_none());
    }

    #[tokio::test]
    async fn test_spawn_and_stop_without_startup_fetch() {
        let store = Arc::new(ReputationStore::new(connect_test_db().await));
        let updater = TorListUpdater::new(
            store,
            TorListConfig {
                fetch_on_startup: false,
                url: "http://127.0.0.1:9/exits".to_owned(),
                ..Default::default()
            },
        );
        let handle = updater.spawn();
        assert!(handle.last_update().await.is_none());
        handle.stop().await;
    }
}
