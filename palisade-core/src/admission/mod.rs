mod detector;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error};
use palisade_common::helpers::hash::key_fingerprint;
use palisade_common::{
    AbuseDetectionConfig, Identifier, PalisadeError, RateLimitSettings, Secret,
};

use crate::api_keys::{ApiKeyRegistry, KeyLookup};
use crate::bans::BanRegistry;
use crate::geo::GeoBlockRegistry;
use crate::rate_limiting::{CounterStore, RateLimitConfig};
use crate::request_log::{NewLogEntry, RequestLogStore};

pub use detector::AbuseDetector;

/// Metadata envelope describing one inbound request.
#[derive(Debug, Clone, Default)]
pub struct RequestEnvelope {
    pub address: Option<String>,
    pub api_key: Option<Secret<String>>,
    pub path: Option<String>,
    pub method: Option<String>,
    pub country: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionReason {
    Ok,
    RateLimited,
    Banned,
    GeoBlocked,
    InvalidKey,
    ExpiredKey,
}

impl DecisionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DecisionReason::Ok => "ok",
            DecisionReason::RateLimited => "rate_limited",
            DecisionReason::Banned => "banned",
            DecisionReason::GeoBlocked => "geo_blocked",
            DecisionReason::InvalidKey => "invalid_key",
            DecisionReason::ExpiredKey => "expired_key",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub reason: DecisionReason,
    pub remaining: u32,
    /// Epoch seconds.
    pub reset_at: i64,
    pub limit: Option<u32>,
    /// Seconds; present on denials that end.
    pub retry_after: Option<i64>,
}

impl Decision {
    fn denied(reason: DecisionReason) -> Self {
        Decision {
            allowed: false,
            reason,
            remaining: 0,
            reset_at: 0,
            limit: None,
            retry_after: None,
        }
    }

    /// The one decision value produced when the store is down: allow,
    /// with an empty budget.
    fn fail_open() -> Self {
        Decision {
            allowed: true,
            reason: DecisionReason::Ok,
            remaining: 0,
            reset_at: 0,
            limit: None,
            retry_after: None,
        }
    }
}

/// The layered admission check: ban, geo, key, rate limit, abuse.
pub struct AdmissionEngine {
    counters: Arc<CounterStore>,
    bans: Arc<BanRegistry>,
    api_keys: Arc<ApiKeyRegistry>,
    request_log: Arc<RequestLogStore>,
    geo: Arc<GeoBlockRegistry>,
    detector: AbuseDetector,
    rate_limit: RateLimitSettings,
    log_all_requests: bool,
}

impl AdmissionEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        counters: Arc<CounterStore>,
        bans: Arc<BanRegistry>,
        api_keys: Arc<ApiKeyRegistry>,
        request_log: Arc<RequestLogStore>,
        geo: Arc<GeoBlockRegistry>,
        abuse: AbuseDetectionConfig,
        rate_limit: RateLimitSettings,
        log_all_requests: bool,
    ) -> Self {
        Self {
            counters,
            bans,
            api_keys,
            request_log,
            geo,
            detector: AbuseDetector::new(abuse),
            rate_limit,
            log_all_requests,
        }
    }

    /// Never fails: an unexpected store error anywhere in the pipeline
    /// produces the fail-open decision and an error log.
    pub async fn check(&self, envelope: &RequestEnvelope) -> Decision {
        self.check_at(envelope, Utc::now()).await
    }

    /// Deterministic entry point: the caller supplies `now` for the
    /// window arithmetic.
    pub async fn check_at(&self, envelope: &RequestEnvelope, now: DateTime<Utc>) -> Decision {
        match self.check_inner(envelope, now).await {
            Ok(decision) => decision,
            Err(error) => {
                error!(?error, "Admission check failed, failing open");
                Decision::fail_open()
            }
        }
    }

    async fn check_inner(
        &self,
        envelope: &RequestEnvelope,
        now: DateTime<Utc>,
    ) -> Result<Decision, PalisadeError> {
        // The identifier for a keyed request is its fingerprint until the
        // key resolves (plaintext must never reach a log row), then the
        // key id afterwards.
        let (mut identifier, token) = match (&envelope.api_key, &envelope.address) {
            (Some(token), _) => (
                Identifier::api_key(key_fingerprint(token.expose_secret())),
                Some(token.clone()),
            ),
            (None, Some(address)) if !address.is_empty() => {
                (Identifier::address(address.clone()), None)
            }
            _ => return Ok(Decision::denied(DecisionReason::InvalidKey)),
        };

        if let Some(ban) = self.bans.is_banned(identifier.as_str()).await? {
            self.write_log(&identifier, envelope, false, DecisionReason::Banned)
                .await?;
            let retry_after = ban.expires_at.map(|e| (e - now).num_seconds().max(0));
            return Ok(Decision {
                allowed: false,
                reason: DecisionReason::Banned,
                remaining: 0,
                reset_at: ban.expires_at.map(|e| e.timestamp()).unwrap_or(0),
                limit: None,
                retry_after,
            });
        }

        if let Some(country) = &envelope.country {
            if self.geo.is_enabled().await? && self.geo.is_blocked(country).await? {
                self.write_log(&identifier, envelope, false, DecisionReason::GeoBlocked)
                    .await?;
                return Ok(Decision::denied(DecisionReason::GeoBlocked));
            }
        }

        let mut cfg = RateLimitConfig {
            limit: self.rate_limit.limit,
            window_seconds: self.rate_limit.window_seconds,
            sliding: self.rate_limit.sliding,
        };
        if let Some(token) = token {
            match self.api_keys.resolve(token.expose_secret()).await? {
                KeyLookup::Missing => {
                    self.write_log(&identifier, envelope, false, DecisionReason::InvalidKey)
                        .await?;
                    return Ok(Decision::denied(DecisionReason::InvalidKey));
                }
                KeyLookup::Expired(_) => {
                    self.write_log(&identifier, envelope, false, DecisionReason::ExpiredKey)
                        .await?;
                    return Ok(Decision::denied(DecisionReason::ExpiredKey));
                }
                KeyLookup::Valid(key) => {
                    cfg.limit = key.rate_limit.max(0) as u32;
                    cfg.window_seconds = key.window_seconds.max(1) as u64;
                    identifier = Identifier::api_key(key.id.to_string());
                }
            }
        }

        let rate = self.counters.check_at(identifier.as_str(), &cfg, now).await;
        if !rate.allowed {
            self.write_log(&identifier, envelope, false, DecisionReason::RateLimited)
                .await?;
            return Ok(Decision {
                allowed: false,
                reason: DecisionReason::RateLimited,
                remaining: rate.remaining,
                reset_at: rate.reset_at,
                limit: Some(cfg.limit),
                retry_after: Some((rate.reset_at - now.timestamp()).max(0)),
            });
        }

        if let Some(ban) = self
            .detector
            .check(identifier.as_str(), &self.request_log, &self.bans)
            .await?
        {
            self.write_log(&identifier, envelope, false, DecisionReason::Banned)
                .await?;
            let retry_after = ban.expires_at.map(|e| (e - now).num_seconds().max(0));
            return Ok(Decision {
                allowed: false,
                reason: DecisionReason::Banned,
                remaining: 0,
                reset_at: rate.reset_at,
                limit: Some(cfg.limit),
                retry_after,
            });
        }

        if self.log_all_requests {
            self.write_log(&identifier, envelope, true, DecisionReason::Ok)
                .await?;
        }
        debug!(
            identifier = %identifier,
            remaining = rate.remaining,
            "Request admitted"
        );
        Ok(Decision {
            allowed: true,
            reason: DecisionReason::Ok,
            remaining: rate.remaining,
            reset_at: rate.reset_at,
            limit: Some(cfg.limit),
            retry_after: None,
        })
    }

    async fn write_log(
        &self,
        identifier: &Identifier,
        envelope: &RequestEnvelope,
        allowed: bool,
        reason: DecisionReason,
    ) -> Result<(), PalisadeError> {
        self.request_log
            .log(NewLogEntry {
                identifier: identifier.as_str().to_owned(),
                path: envelope.path.clone(),
                method: envelope.method.clone(),
                allowed,
                reason: reason.as_str().to_owned(),
                country: envelope.country.clone(),
                user_agent: envelope.user_agent.clone(),
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use sea_orm::{ActiveModelTrait, DatabaseConnection, Set, Unchanged};
    use tokio::sync::Mutex;
    use palisade_db_entities::{ApiKey, Ban};

    use super::*;
    use crate::api_keys::ApiKeyParams;
    use crate::test_util::connect_test_db;

    struct Fixture {
        db: Arc<Mutex<DatabaseConnection>>,
        engine: AdmissionEngine,
        bans: Arc<BanRegistry>,
        api_keys: Arc<ApiKeyRegistry>,
        geo: Arc<GeoBlockRegistry>,
    }

    async fn fixture(rate: RateLimitSettings, log_all_requests: bool) -> Fixture {
        let db = connect_test_db().await;
        let bans = Arc::new(BanRegistry::new(db.clone(), 3600));
        let api_keys = Arc::new(ApiKeyRegistry::new(db.clone(), rate.clone()));
        let geo = Arc::new(GeoBlockRegistry::new(db.clone()));
        let engine = AdmissionEngine::new(
            Arc::new(CounterStore::new(db.clone())),
            bans.clone(),
            api_keys.clone(),
            Arc::new(RequestLogStore::new(db.clone())),
            geo.clone(),
            AbuseDetectionConfig {
                burst_threshold: 5,
                burst_window_seconds: 10,
                burst_multiplier: 5.0,
                ..Default::default()
            },
            rate,
            log_all_requests,
        );
        Fixture {
            db,
            engine,
            bans,
            api_keys,
            geo,
        }
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 19, 12, 0, 0).unwrap()
    }

    fn from_address(address: &str) -> RequestEnvelope {
        RequestEnvelope {
            address: Some(address.to_owned()),
            path: Some("/api".to_owned()),
            method: Some("GET".to_owned()),
            ..Default::default()
        }
    }

    fn strict() -> RateLimitSettings {
        RateLimitSettings {
            limit: 3,
            window_seconds: 60,
            sliding: false,
        }
    }

    #[tokio::test]
    async fn test_three_requests_then_rate_limited() {
        let fx = fixture(strict(), false).await;
        let envelope = from_address("203.0.113.7");

        for (offset, expected_remaining) in [(0, 2), (5, 1), (10, 0)] {
            let decision = fx
                .engine
                .check_at(&envelope, t0() + chrono::Duration::seconds(offset))
                .await;
            assert!(decision.allowed);
            assert_eq!(decision.reason, DecisionReason::Ok);
            assert_eq!(decision.remaining, expected_remaining);
        }

        let denied = fx
            .engine
            .check_at(&envelope, t0() + chrono::Duration::seconds(12))
            .await;
        assert!(!denied.allowed);
        assert_eq!(denied.reason, DecisionReason::RateLimited);
        assert_eq!(denied.remaining, 0);
        assert_eq!(denied.retry_after, Some(48));
    }

    #[tokio::test]
    async fn test_next_window_resets_the_budget() {
        let fx = fixture(strict(), false).await;
        let envelope = from_address("203.0.113.7");

        for offset in [0, 5, 10, 12] {
            fx.engine
                .check_at(&envelope, t0() + chrono::Duration::seconds(offset))
                .await;
        }
        let next = fx
            .engine
            .check_at(&envelope, t0() + chrono::Duration::seconds(60))
            .await;
        assert!(next.allowed);
        assert_eq!(next.remaining, 2);
    }

    #[tokio::test]
    async fn test_burst_triggers_auto_ban() {
        let fx = fixture(
            RateLimitSettings {
                limit: 1000,
                window_seconds: 60,
                sliding: true,
            },
            true,
        )
        .await;
        let envelope = from_address("203.0.113.7");

        for _ in 0..4 {
            let decision = fx.engine.check(&envelope).await;
            assert!(decision.allowed);
        }

        // The fifth request reaches the absolute threshold and flips
        let fifth = fx.engine.check(&envelope).await;
        assert!(!fifth.allowed);
        assert_eq!(fifth.reason, DecisionReason::Banned);
        assert!(fifth.retry_after.unwrap_or(0) <= 3600);

        let ban = fx.bans.is_banned("203.0.113.7").await.unwrap().unwrap();
        assert!(ban.reason.contains("Burst detection: 5"));
        assert_eq!(ban.created_by, Ban::BanOrigin::System);

        let sixth = fx.engine.check(&envelope).await;
        assert!(!sixth.allowed);
        assert_eq!(sixth.reason, DecisionReason::Banned);
        assert!(sixth.retry_after.unwrap_or(0) <= 3600);
    }

    #[tokio::test]
    async fn test_once_banned_no_more_auto_bans_accumulate() {
        let fx = fixture(
            RateLimitSettings {
                limit: 1000,
                window_seconds: 60,
                sliding: true,
            },
            true,
        )
        .await;
        let envelope = from_address("203.0.113.7");

        for _ in 0..10 {
            fx.engine.check(&envelope).await;
        }

        let db = fx.db.lock().await;
        use sea_orm::EntityTrait;
        let rows = Ban::Entity::find().all(&*db).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_api_key_is_rejected() {
        let fx = fixture(strict(), false).await;
        let envelope = RequestEnvelope {
            api_key: Some(Secret::new("rl_unknown".to_owned())),
            ..Default::default()
        };
        let decision = fx.engine.check(&envelope).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::InvalidKey);
    }

    #[tokio::test]
    async fn test_valid_api_key_uses_its_own_budget() {
        let fx = fixture(strict(), false).await;
        let (key, plaintext) = fx
            .api_keys
            .create(ApiKeyParams {
                name: "partner".into(),
                limit: Some(10),
                window_seconds: Some(60),
                ..Default::default()
            })
            .await
            .unwrap();

        let envelope = RequestEnvelope {
            api_key: Some(plaintext),
            ..Default::default()
        };
        let decision = fx.engine.check(&envelope).await;
        assert!(decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Ok);
        assert_eq!(decision.limit, Some(10));
        assert_eq!(decision.remaining, 9);

        let touched = fx.api_keys.get_by_id(key.id).await.unwrap();
        assert!(touched.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_expired_api_key_is_rejected_as_expired() {
        let fx = fixture(strict(), false).await;
        let (key, plaintext) = fx
            .api_keys
            .create(ApiKeyParams {
                name: "stale".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        {
            let db = fx.db.lock().await;
            ApiKey::ActiveModel {
                id: Unchanged(key.id),
                expires_at: Set(Some(Utc::now() - chrono::Duration::seconds(1))),
                ..Default::default()
            }
            .update(&*db)
            .await
            .unwrap();
        }

        let decision = fx
            .engine
            .check(&RequestEnvelope {
                api_key: Some(plaintext),
                ..Default::default()
            })
            .await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::ExpiredKey);
    }

    #[tokio::test]
    async fn test_missing_address_and_key_is_invalid() {
        let fx = fixture(strict(), false).await;
        let decision = fx.engine.check(&RequestEnvelope::default()).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::InvalidKey);
        assert_eq!(decision.remaining, 0);
        assert_eq!(decision.reset_at, 0);
    }

    #[tokio::test]
    async fn test_geo_block_folds_case() {
        let fx = fixture(strict(), false).await;
        fx.geo.set_enabled(true).await.unwrap();
        fx.geo.add("CN", None).await.unwrap();

        let mut envelope = from_address("1.2.3.4");
        envelope.country = Some("cn".to_owned());
        let blocked = fx.engine.check(&envelope).await;
        assert!(!blocked.allowed);
        assert_eq!(blocked.reason, DecisionReason::GeoBlocked);

        envelope.country = Some("US".to_owned());
        let admitted = fx.engine.check(&envelope).await;
        assert!(admitted.allowed);
        assert_eq!(admitted.reason, DecisionReason::Ok);
    }

    #[tokio::test]
    async fn test_geo_block_ignored_while_disabled() {
        let fx = fixture(strict(), false).await;
        fx.geo.add("CN", None).await.unwrap();

        let mut envelope = from_address("1.2.3.4");
        envelope.country = Some("CN".to_owned());
        let decision = fx.engine.check(&envelope).await;
        assert!(decision.allowed);
    }

    #[tokio::test]
    async fn test_banned_identifier_is_denied_with_retry_after() {
        let fx = fixture(strict(), false).await;
        fx.bans
            .create("203.0.113.7", "manual ban", Some(600), Ban::BanOrigin::Admin)
            .await
            .unwrap();

        let decision = fx.engine.check(&from_address("203.0.113.7")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Banned);
        let retry_after = decision.retry_after.unwrap();
        assert!((598..=600).contains(&retry_after));
    }

    #[tokio::test]
    async fn test_permanent_ban_has_no_retry_after() {
        let fx = fixture(strict(), false).await;
        fx.bans
            .create("203.0.113.7", "permanent", None, Ban::BanOrigin::Admin)
            .await
            .unwrap();

        let decision = fx.engine.check(&from_address("203.0.113.7")).await;
        assert!(!decision.allowed);
        assert_eq!(decision.reason, DecisionReason::Banned);
        assert!(decision.retry_after.is_none());
    }

    #[tokio::test]
    async fn test_plaintext_key_never_reaches_the_request_log() {
        let fx = fixture(strict(), false).await;
        fx.engine
            .check(&RequestEnvelope {
                api_key: Some(Secret::new("rl_supersecrettoken".to_owned())),
                ..Default::default()
            })
            .await;

        let db = fx.db.lock().await;
        use sea_orm::EntityTrait;
        let rows = palisade_db_entities::RequestLog::Entity::find()
            .all(&*db)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert!(!rows[0].identifier.contains("rl_"));
    }
}
