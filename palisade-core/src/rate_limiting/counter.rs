use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
};
use tokio::sync::Mutex;
use tracing::{debug, error};
use uuid::Uuid;
use palisade_common::PalisadeError;
use palisade_db_entities::CounterBucket;

use crate::consts::COUNTER_RETENTION_FLOOR_SECONDS;

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub limit: u32,
    pub window_seconds: u64,
    pub sliding: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    /// Epoch seconds at which the budget resets.
    pub reset_at: i64,
    pub limit: u32,
    pub window_seconds: u64,
}

impl RateLimitDecision {
    /// Degraded decision used when the store is unreachable: let the
    /// request through with no budget rather than falsely denying it.
    fn fail_open(cfg: &RateLimitConfig) -> Self {
        RateLimitDecision {
            allowed: true,
            remaining: 0,
            reset_at: 0,
            limit: cfg.limit,
            window_seconds: cfg.window_seconds,
        }
    }
}

/// Persistent per-identifier window counters (fixed and sliding).
pub struct CounterStore {
    db: Arc<Mutex<DatabaseConnection>>,
}

impl CounterStore {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>) -> Self {
        Self { db }
    }

    pub async fn check(&self, identifier: &str, cfg: &RateLimitConfig) -> RateLimitDecision {
        self.check_at(identifier, cfg, Utc::now()).await
    }

    /// Deterministic entry point: the caller supplies `now`.
    pub async fn check_at(
        &self,
        identifier: &str,
        cfg: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitDecision {
        match self.check_inner(identifier, cfg, now).await {
            Ok(decision) => decision,
            Err(error) => {
                error!(identifier = %identifier, ?error, "Counter check failed, failing open");
                RateLimitDecision::fail_open(cfg)
            }
        }
    }

    async fn check_inner(
        &self,
        identifier: &str,
        cfg: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, PalisadeError> {
        if cfg.sliding {
            self.check_sliding(identifier, cfg, now).await
        } else {
            self.check_fixed(identifier, cfg, now).await
        }
    }

    async fn check_fixed(
        &self,
        identifier: &str,
        cfg: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, PalisadeError> {
        let window = cfg.window_seconds as i64;
        let window_start = align_to_window(now, window);
        let reset_at = window_start.timestamp() + window;

        let db = self.db.lock().await;

        if cfg.limit == 0 {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                limit: cfg.limit,
                window_seconds: cfg.window_seconds,
            });
        }

        if self
            .guarded_increment(&db, identifier, window_start, cfg.limit as i64, now)
            .await?
        {
            let count = self.bucket_count(&db, identifier, window_start).await?;
            return Ok(RateLimitDecision {
                allowed: true,
                remaining: (cfg.limit as i64 - count).max(0) as u32,
                reset_at,
                limit: cfg.limit,
                window_seconds: cfg.window_seconds,
            });
        }

        let existing = CounterBucket::Entity::find()
            .filter(CounterBucket::Column::Identifier.eq(identifier))
            .filter(CounterBucket::Column::WindowStart.eq(window_start))
            .one(&*db)
            .await?;

        if existing.is_some() {
            // Bucket is at the limit
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                limit: cfg.limit,
                window_seconds: cfg.window_seconds,
            });
        }

        // First admitted hit of this window
        let allowed = self
            .create_or_contend(&db, identifier, window_start, cfg.limit as i64, now)
            .await?;
        let remaining = if allowed {
            let count = self.bucket_count(&db, identifier, window_start).await?;
            (cfg.limit as i64 - count).max(0) as u32
        } else {
            0
        };
        Ok(RateLimitDecision {
            allowed,
            remaining,
            reset_at,
            limit: cfg.limit,
            window_seconds: cfg.window_seconds,
        })
    }

    async fn check_sliding(
        &self,
        identifier: &str,
        cfg: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> Result<RateLimitDecision, PalisadeError> {
        let window = cfg.window_seconds as i64;
        let window_start = align_to_window(now, window);
        let prev_start = window_start - chrono::Duration::seconds(window);
        let reset_at = now.timestamp() + window;

        let db = self.db.lock().await;

        let cur = self.bucket_count(&db, identifier, window_start).await?;
        let prev = self.bucket_count(&db, identifier, prev_start).await?;

        let elapsed = (now - window_start).num_milliseconds() as f64 / 1000.0;
        let overlap = ((window as f64 - elapsed) / window as f64).max(0.0);
        let effective = prev as f64 * overlap + cur as f64;

        if effective >= cfg.limit as f64 {
            return Ok(RateLimitDecision {
                allowed: false,
                remaining: 0,
                reset_at,
                limit: cfg.limit,
                window_seconds: cfg.window_seconds,
            });
        }

        // Largest admissible count for the current bucket at this instant;
        // used as the guard so a concurrent check cannot push past the limit.
        let bound = (cfg.limit as f64 - prev as f64 * overlap).ceil() as i64;

        let allowed = if self
            .guarded_increment(&db, identifier, window_start, bound, now)
            .await?
        {
            true
        } else {
            self.create_or_contend(&db, identifier, window_start, bound, now)
                .await?
        };

        let remaining = if allowed {
            (cfg.limit as f64 - effective - 1.0).floor().max(0.0) as u32
        } else {
            0
        };
        Ok(RateLimitDecision {
            allowed,
            remaining,
            reset_at,
            limit: cfg.limit,
            window_seconds: cfg.window_seconds,
        })
    }

    /// Atomically increments the bucket as long as its count stays below
    /// `bound`. Two concurrent checks at the boundary cannot both pass:
    /// the store serializes the conditional updates.
    async fn guarded_increment(
        &self,
        db: &DatabaseConnection,
        identifier: &str,
        window_start: DateTime<Utc>,
        bound: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, PalisadeError> {
        if bound <= 0 {
            return Ok(false);
        }
        let result = CounterBucket::Entity::update_many()
            .col_expr(
                CounterBucket::Column::Count,
                Expr::col(CounterBucket::Column::Count).add(1),
            )
            .col_expr(CounterBucket::Column::LastTouched, Expr::value(now))
            .filter(CounterBucket::Column::Identifier.eq(identifier))
            .filter(CounterBucket::Column::WindowStart.eq(window_start))
            .filter(CounterBucket::Column::Count.lt(bound as i32))
            .exec(db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Lazily creates the bucket with `count = 1`. When another task wins
    /// the creation race, falls back to one more guarded increment.
    async fn create_or_contend(
        &self,
        db: &DatabaseConnection,
        identifier: &str,
        window_start: DateTime<Utc>,
        bound: i64,
        now: DateTime<Utc>,
    ) -> Result<bool, PalisadeError> {
        if bound <= 0 {
            return Ok(false);
        }
        let insert = CounterBucket::ActiveModel {
            id: Set(Uuid::new_v4()),
            identifier: Set(identifier.to_owned()),
            window_start: Set(window_start),
            count: Set(1),
            last_touched: Set(now),
        }
        .insert(db)
        .await;

        match insert {
            Ok(_) => Ok(true),
            Err(_) => {
                debug!(identifier = %identifier, "Lost bucket creation race, retrying increment");
                self.guarded_increment(db, identifier, window_start, bound, now)
                    .await
            }
        }
    }

    async fn bucket_count(
        &self,
        db: &DatabaseConnection,
        identifier: &str,
        window_start: DateTime<Utc>,
    ) -> Result<i64, PalisadeError> {
        Ok(CounterBucket::Entity::find()
            .filter(CounterBucket::Column::Identifier.eq(identifier))
            .filter(CounterBucket::Column::WindowStart.eq(window_start))
            .one(db)
            .await?
            .map(|bucket| bucket.count as i64)
            .unwrap_or(0))
    }

    /// Deletes buckets old enough that neither window algorithm can still
    /// reference them. Returns the number of rows removed.
    pub async fn cleanup(&self) -> Result<u64, PalisadeError> {
        let cutoff = Utc::now() - chrono::Duration::seconds(COUNTER_RETENTION_FLOOR_SECONDS);
        let db = self.db.lock().await;
        let result = CounterBucket::Entity::delete_many()
            .filter(CounterBucket::Column::WindowStart.lt(cutoff))
            .exec(&*db)
            .await?;
        Ok(result.rows_affected)
    }
}

/// Floors `now` to a multiple of `window_seconds` since the epoch.
fn align_to_window(now: DateTime<Utc>, window_seconds: i64) -> DateTime<Utc> {
    let epoch = now.timestamp();
    let aligned = epoch - epoch.rem_euclid(window_seconds);
    #[allow(clippy::unwrap_used)] // derived from a valid timestamp
    DateTime::<Utc>::from_timestamp(aligned, 0).unwrap()
}
