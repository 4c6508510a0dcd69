use tracing::{error, warn};
use palisade_common::{AbuseDetectionConfig, PalisadeError};
use palisade_db_entities::Ban;

use crate::bans::BanRegistry;
use crate::request_log::RequestLogStore;

/// Burst and baseline-spike detection over the request log. Fires by
/// creating a system auto-ban; a failed ban write downgrades to
/// not-fired so the request is never denied on a store error.
pub struct AbuseDetector {
    config: AbuseDetectionConfig,
}

impl AbuseDetector {
    pub fn new(config: AbuseDetectionConfig) -> Self {
        Self { config }
    }

    /// Returns the auto-ban when either rule fires.
    pub async fn check(
        &self,
        identifier: &str,
        request_log: &RequestLogStore,
        bans: &BanRegistry,
    ) -> Result<Option<Ban::Model>, PalisadeError> {
        if !self.config.enabled {
            return Ok(None);
        }

        // The request being admitted counts toward the burst
        let current = request_log
            .count_in_window(identifier, self.config.burst_window_seconds)
            .await?
            + 1;

        if current >= self.config.burst_threshold as u64 {
            let reason = format!(
                "Burst detection: {} requests in {}s",
                current, self.config.burst_window_seconds
            );
            return self.fire(bans, identifier, &reason).await;
        }

        let baseline = request_log
            .baseline_rate_per_minute(identifier, 60)
            .await?;
        // The burst itself must not inflate its own baseline
        let baseline = (baseline - (current - 1) as f64 / 60.0).max(0.0);
        let current_rate = current as f64 / (self.config.burst_window_seconds as f64 / 60.0);

        if baseline > 0.0 && current_rate > baseline * self.config.burst_multiplier {
            let reason = format!(
                "Baseline spike: {:.1} req/min vs baseline {:.1}",
                current_rate, baseline
            );
            return self.fire(bans, identifier, &reason).await;
        }

        Ok(None)
    }

    async fn fire(
        &self,
        bans: &BanRegistry,
        identifier: &str,
        reason: &str,
    ) -> Result<Option<Ban::Model>, PalisadeError> {
        match bans.create_auto_ban(identifier, reason).await {
            Ok(ban) => {
                warn!(identifier = %identifier, reason = %reason, "Abuse detector fired");
                Ok(Some(ban))
            }
            Err(error) => {
                error!(
                    identifier = %identifier,
                    ?error,
                    "Auto-ban creation failed, allowing request"
                );
                Ok(None)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use palisade_common::AbuseDetectionConfig;

    use super::*;
    use crate::request_log::NewLogEntry;
    use crate::test_util::connect_test_db;

    fn detector() -> AbuseDetector {
        AbuseDetector::new(AbuseDetectionConfig {
            burst_threshold: 5,
            burst_window_seconds: 10,
            burst_multiplier: 5.0,
            ..Default::default()
        })
    }

    fn entry(identifier: &str) -> NewLogEntry {
        NewLogEntry {
            identifier: identifier.to_owned(),
            allowed: true,
            reason: "ok".to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_quiet_identifier_does_not_fire() {
        let db = connect_test_db().await;
        let log = RequestLogStore::new(db.clone());
        let bans = BanRegistry::new(db, 3600);

        let fired = detector().check("203.0.113.7", &log, &bans).await.unwrap();
        assert!(fired.is_none());
    }

    #[tokio::test]
    async fn test_absolute_rule_fires_at_threshold() {
        let db = connect_test_db().await;
        let log = RequestLogStore::new(db.clone());
        let bans = BanRegistry::new(db, 3600);

        // Four logged requests plus the in-flight one reaches the threshold
        for _ in 0..4 {
            log.log(entry("203.0.113.7")).await.unwrap();
        }
        let ban = detector()
            .check("203.0.113.7", &log, &bans)
            .await
            .unwrap()
            .expect("detector should fire");
        assert!(ban.reason.contains("Burst detection: 5"));
    }

    #[tokio::test]
    async fn test_small_burst_with_no_history_stays_quiet() {
        let db = connect_test_db().await;
        let log = RequestLogStore::new(db.clone());
        let bans = BanRegistry::new(db, 3600);

        for _ in 0..3 {
            log.log(entry("203.0.113.7")).await.unwrap();
        }
        let fired = detector().check("203.0.113.7", &log, &bans).await.unwrap();
        assert!(fired.is_none());
        assert!(bans.is_banned("203.0.113.7").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_baseline_spike_fires_for_established_identifier() {
        let db = connect_test_db().await;
        let log = RequestLogStore::new(db.clone());
        let bans = BanRegistry::new(db, 3600);
        let now = chrono::Utc::now();

        // A steady one-per-minute history, then a sudden small burst
        for i in 1..=60 {
            log.log_at(entry("203.0.113.7"), now - chrono::Duration::minutes(i))
                .await
                .unwrap();
        }
        for _ in 0..3 {
            log.log(entry("203.0.113.7")).await.unwrap();
        }

        let ban = detector()
            .check("203.0.113.7", &log, &bans)
            .await
            .unwrap()
            .expect("baseline rule should fire");
        assert!(ban.reason.contains("Baseline spike"));
    }

    #[tokio::test]
    async fn test_disabled_detector_never_fires() {
        let db = connect_test_db().await;
        let log = RequestLogStore::new(db.clone());
        let bans = BanRegistry::new(db, 3600);
        for _ in 0..50 {
            log.log(entry("203.0.113.7")).await.unwrap();
        }

        let detector = AbuseDetector::new(AbuseDetectionConfig {
            enabled: false,
            ..Default::default()
        });
        let fired = detector.check("203.0.113.7", &log, &bans).await.unwrap();
        assert!(fired.is_none());
    }
}
