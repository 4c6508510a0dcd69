use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::Serialize;
use tokio::sync::Mutex;
use uuid::Uuid;
use palisade_common::PalisadeError;
use palisade_db_entities::RequestLog;

use crate::api_keys::ApiKeyRegistry;
use crate::bans::BanRegistry;

#[derive(Debug, Clone, Default)]
pub struct NewLogEntry {
    pub identifier: String,
    pub path: Option<String>,
    pub method: Option<String>,
    pub allowed: bool,
    pub reason: String,
    pub country: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LabelledCount {
    pub label: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AdmissionStats {
    pub total: u64,
    pub allowed: u64,
    pub denied: u64,
    pub by_reason: Vec<LabelledCount>,
    pub top_identifiers: Vec<LabelledCount>,
    pub top_paths: Vec<LabelledCount>,
    pub active_bans: u64,
    pub active_keys: u64,
}

/// Append-only decision log. Feeds the burst detector and the admin
/// aggregates; never read on the admission hot path otherwise.
pub struct RequestLogStore {
    db: Arc<Mutex<DatabaseConnection>>,
}

impl RequestLogStore {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>) -> Self {
        Self { db }
    }

    pub async fn log(&self, entry: NewLogEntry) -> Result<(), PalisadeError> {
        self.log_at(entry, Utc::now()).await
    }

    pub async fn log_at(
        &self,
        entry: NewLogEntry,
        timestamp: DateTime<Utc>,
    ) -> Result<(), PalisadeError> {
        let db = self.db.lock().await;
        RequestLog::ActiveModel {
            id: Set(Uuid::new_v4()),
            identifier: Set(entry.identifier),
            path: Set(entry.path),
            method: Set(entry.method),
            allowed: Set(entry.allowed),
            reason: Set(entry.reason),
            country: Set(entry.country),
            user_agent: Set(entry.user_agent),
            timestamp: Set(timestamp),
        }
        .insert(&*db)
        .await?;
        Ok(())
    }

    pub async fn count_in_window(
        &self,
        identifier: &str,
        window_seconds: u64,
    ) -> Result<u64, PalisadeError> {
        let since = Utc::now() - chrono::Duration::seconds(window_seconds as i64);
        let db = self.db.lock().await;
        Ok(RequestLog::Entity::find()
            .filter(RequestLog::Column::Identifier.eq(identifier))
            .filter(RequestLog::Column::Timestamp.gte(since))
            .count(&*db)
            .await?)
    }

    /// Average request rate over the trailing period, in requests per
    /// minute.
    pub async fn baseline_rate_per_minute(
        &self,
        identifier: &str,
        period_minutes: u64,
    ) -> Result<f64, PalisadeError> {
        if period_minutes == 0 {
            return Ok(0.0);
        }
        let count = self
            .count_in_window(identifier, period_minutes * 60)
            .await?;
        Ok(count as f64 / period_minutes as f64)
    }

    pub async fn recent_for(
        &self,
        identifier: &str,
        limit: u64,
    ) -> Result<Vec<RequestLog::Model>, PalisadeError> {
        let db = self.db.lock().await;
        Ok(RequestLog::Entity::find()
            .filter(RequestLog::Column::Identifier.eq(identifier))
            .order_by_desc(RequestLog::Column::Timestamp)
            .limit(limit)
            .all(&*db)
            .await?)
    }

    pub async fn aggregate(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        top_n: u64,
        bans: &BanRegistry,
        api_keys: &ApiKeyRegistry,
    ) -> Result<AdmissionStats, PalisadeError> {
        let (total, allowed, by_reason, top_identifiers, top_paths) = {
            let db = self.db.lock().await;

            let range = RequestLog::Entity::find()
                .filter(RequestLog::Column::Timestamp.gte(start))
                .filter(RequestLog::Column::Timestamp.lt(end));

            let total = range.clone().count(&*db).await?;
            let allowed = range
                .clone()
                .filter(RequestLog::Column::Allowed.eq(true))
                .count(&*db)
                .await?;

            let by_reason: Vec<(String, i64)> = range
                .clone()
                .select_only()
                .column(RequestLog::Column::Reason)
                .column_as(RequestLog::Column::Id.count(), "count")
                .group_by(RequestLog::Column::Reason)
                .order_by_desc(RequestLog::Column::Id.count())
                .into_tuple()
                .all(&*db)
                .await?;

            let top_identifiers: Vec<(String, i64)> = range
                .clone()
                .select_only()
                .column(RequestLog::Column::Identifier)
                .column_as(RequestLog::Column::Id.count(), "count")
                .group_by(RequestLog::Column::Identifier)
                .order_by_desc(RequestLog::Column::Id.count())
                .limit(top_n)
                .into_tuple()
                .all(&*db)
                .await?;

            let top_paths: Vec<(String, i64)> = range
                .select_only()
                .column(RequestLog::Column::Path)
                .column_as(RequestLog::Column::Id.count(), "count")
                .filter(RequestLog::Column::Path.is_not_null())
                .group_by(RequestLog::Column::Path)
                .order_by_desc(RequestLog::Column::Id.count())
                .limit(top_n)
                .into_tuple()
                .all(&*db)
                .await?;

            (total, allowed, by_reason, top_identifiers, top_paths)
        };

        Ok(AdmissionStats {
            total,
            allowed,
            denied: total - allowed,
            by_reason: into_labelled(by_reason),
            top_identifiers: into_labelled(top_identifiers),
            top_paths: into_labelled(top_paths),
            active_bans: bans.count_active().await?,
            active_keys: api_keys.count_active().await?,
        })
    }

    /// Drops entries beyond the retention horizon, returning the number
    /// removed.
    pub async fn cleanup(&self, retention_days: u32) -> Result<u64, PalisadeError> {
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let db = self.db.lock().await;
        let result = RequestLog::Entity::delete_many()
            .filter(RequestLog::Column::Timestamp.lt(cutoff))
            .exec(&*db)
            .await?;
        Ok(result.rows_affected)
    }
}

fn into_labelled(rows: Vec<(String, i64)>) -> Vec<LabelledCount> {
    rows.into_iter()
        .map(|(label, count)| LabelledCount {
            label,
            count: count.max(0) as u64,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use palisade_common::RateLimitSettings;

    use super::*;
    use crate::test_util::connect_test_db;

    fn denied(identifier: &str, reason: &str, path: &str) -> NewLogEntry {
        NewLogEntry {
            identifier: identifier.to_owned(),
            path: Some(path.to_owned()),
            method: Some("GET".to_owned()),
            allowed: false,
            reason: reason.to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_count_in_window_excludes_old_entries() {
        let log = RequestLogStore::new(connect_test_db().await);
        let now = Utc::now();

        log.log_at(denied("203.0.113.7", "rate_limited", "/api"), now)
            .await
            .unwrap();
        log.log_at(
            denied("203.0.113.7", "rate_limited", "/api"),
            now - chrono::Duration::seconds(30),
        )
        .await
        .unwrap();
        log.log_at(
            denied("203.0.113.7", "rate_limited", "/api"),
            now - chrono::Duration::seconds(120),
        )
        .await
        .unwrap();

        assert_eq!(log.count_in_window("203.0.113.7", 60).await.unwrap(), 2);
        assert_eq!(log.count_in_window("203.0.113.8", 60).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_baseline_rate_per_minute() {
        let log = RequestLogStore::new(connect_test_db().await);
        let now = Utc::now();
        for i in 0..30 {
            log.log_at(
                denied("203.0.113.7", "rate_limited", "/api"),
                now - chrono::Duration::minutes(i),
            )
            .await
            .unwrap();
        }
        let rate = log.baseline_rate_per_minute("203.0.113.7", 60).await.unwrap();
        assert!((rate - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_recent_for_returns_newest_first() {
        let log = RequestLogStore::new(connect_test_db().await);
        let now = Utc::now();
        for (i, path) in ["/a", "/b", "/c"].iter().enumerate() {
            log.log_at(
                denied("203.0.113.7", "banned", path),
                now - chrono::Duration::seconds(i as i64),
            )
            .await
            .unwrap();
        }
        let recent = log.recent_for("203.0.113.7", 2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].path.as_deref(), Some("/a"));
        assert_eq!(recent[1].path.as_deref(), Some("/b"));
    }

    #[tokio::test]
    async fn test_aggregate_counts_and_rankings() {
        let db = connect_test_db().await;
        let log = RequestLogStore::new(db.clone());
        let bans = BanRegistry::new(db.clone(), 3600);
        let keys = ApiKeyRegistry::new(db.clone(), RateLimitSettings::default());
        let now = Utc::now();

        for _ in 0..3 {
            log.log_at(denied("203.0.113.7", "rate_limited", "/api"), now)
                .await
                .unwrap();
        }
        log.log_at(denied("203.0.113.8", "banned", "/login"), now)
            .await
            .unwrap();
        log.log_at(
            NewLogEntry {
                identifier: "203.0.113.9".to_owned(),
                allowed: true,
                reason: "ok".to_owned(),
                ..Default::default()
            },
            now,
        )
        .await
        .unwrap();

        let stats = log
            .aggregate(
                now - chrono::Duration::hours(1),
                now + chrono::Duration::seconds(1),
                2,
                &bans,
                &keys,
            )
            .await
            .unwrap();

        assert_eq!(stats.total, 5);
        assert_eq!(stats.allowed, 1);
        assert_eq!(stats.denied, 4);
        assert_eq!(stats.by_reason[0].label, "rate_limited");
        assert_eq!(stats.by_reason[0].count, 3);
        assert_eq!(stats.top_identifiers.len(), 2);
        assert_eq!(stats.top_identifiers[0].label, "203.0.113.7");
        assert_eq!(stats.top_paths[0].label, "/api");
        assert_eq!(stats.active_bans, 0);
        assert_eq!(stats.active_keys, 0);
    }

    #[tokio::test]
    async fn test_cleanup_honors_retention() {
        let log = RequestLogStore::new(connect_test_db().await);
        let now = Utc::now();
        log.log_at(denied("a", "banned", "/x"), now - chrono::Duration::days(31))
            .await
            .unwrap();
        log.log_at(denied("a", "banned", "/x"), now).await.unwrap();
        assert_eq!(log.cleanup(30).await.unwrap(), 1);
    }
}
