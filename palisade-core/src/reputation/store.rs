use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait, Unchanged,
};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use palisade_common::PalisadeError;
use palisade_db_entities::ManualBlock::ManualBlockKind;
use palisade_db_entities::ReputationRecord::ReputationSource;
use palisade_db_entities::{AsnRecord, ManualBlock, ProviderCache, ReputationRecord, StatCounter, TorExit};

use crate::consts::STATS_RETENTION_DAYS;

/// Fields of a classification to be cached for one address.
#[derive(Debug, Clone)]
pub struct NewReputation {
    pub address: String,
    pub is_proxy: bool,
    pub is_vpn: bool,
    pub is_tor: bool,
    pub is_hosting: bool,
    pub is_residential: bool,
    pub confidence: i32,
    pub reason: String,
    pub source: ReputationSource,
    pub asn: Option<i64>,
    pub asn_org: Option<String>,
    pub country: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReputationCleanupStats {
    pub expired_reputation: u64,
    pub expired_asn: u64,
    pub expired_provider_cache: u64,
    pub expired_manual_blocks: u64,
    pub trimmed_stats: u64,
}

impl ReputationCleanupStats {
    pub fn total(&self) -> u64 {
        self.expired_reputation
            + self.expired_asn
            + self.expired_provider_cache
            + self.expired_manual_blocks
            + self.trimmed_stats
    }
}

/// Data-access layer over the reputation tables. Every read is
/// TTL-filtered at the query boundary; writes are upserts on the
/// natural key.
pub struct ReputationStore {
    db: Arc<Mutex<DatabaseConnection>>,
}

impl ReputationStore {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>) -> Self {
        Self { db }
    }

    pub async fn get_reputation(
        &self,
        address: &str,
    ) -> Result<Option<ReputationRecord::Model>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(ReputationRecord::Entity::find()
            .filter(ReputationRecord::Column::Address.eq(address))
            .filter(ReputationRecord::Column::ExpiresAt.gt(now))
            .one(&*db)
            .await?)
    }

    pub async fn upsert_reputation(
        &self,
        rec: NewReputation,
        ttl_seconds: u64,
    ) -> Result<ReputationRecord::Model, PalisadeError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(ttl_seconds as i64);
        let db = self.db.lock().await;
        let existing = ReputationRecord::Entity::find()
            .filter(ReputationRecord::Column::Address.eq(&rec.address))
            .one(&*db)
            .await?;

        let id = match &existing {
            Some(row) => row.id,
            None => Uuid::new_v4(),
        };
        let model = ReputationRecord::ActiveModel {
            id: Set(id),
            address: Set(rec.address),
            is_proxy: Set(rec.is_proxy),
            is_vpn: Set(rec.is_vpn),
            is_tor: Set(rec.is_tor),
            is_hosting: Set(rec.is_hosting),
            is_residential: Set(rec.is_residential),
            confidence: Set(rec.confidence),
            reason: Set(rec.reason),
            source: Set(rec.source),
            asn: Set(rec.asn),
            asn_org: Set(rec.asn_org),
            country: Set(rec.country),
            checked_at: Set(now),
            expires_at: Set(expires_at),
        };
        Ok(if existing.is_some() {
            model.update(&*db).await?
        } else {
            model.insert(&*db).await?
        })
    }

    pub async fn get_asn(&self, asn: i64) -> Result<Option<AsnRecord::Model>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(AsnRecord::Entity::find()
            .filter(AsnRecord::Column::Asn.eq(asn))
            .filter(AsnRecord::Column::ExpiresAt.gt(now))
            .one(&*db)
            .await?)
    }

    pub async fn upsert_asn(
        &self,
        asn: i64,
        org_name: &str,
        is_hosting: bool,
        is_vpn: bool,
        country: Option<String>,
        ttl_seconds: u64,
    ) -> Result<AsnRecord::Model, PalisadeError> {
        let now = Utc::now();
        let expires_at = now + chrono::Duration::seconds(ttl_seconds as i64);
        let db = self.db.lock().await;
        let existing = AsnRecord::Entity::find()
            .filter(AsnRecord::Column::Asn.eq(asn))
            .one(&*db)
            .await?;
        let id = match &existing {
            Some(row) => row.id,
            None => Uuid::new_v4(),
        };
        let model = AsnRecord::ActiveModel {
            id: Set(id),
            asn: Set(asn),
            org_name: Set(org_name.to_owned()),
            is_hosting: Set(is_hosting),
            is_vpn: Set(is_vpn),
            country: Set(country),
            expires_at: Set(expires_at),
        };
        Ok(if existing.is_some() {
            model.update(&*db).await?
        } else {
            model.insert(&*db).await?
        })
    }

    pub async fn is_tor_exit(&self, address: &str) -> Result<bool, PalisadeError> {
        let db = self.db.lock().await;
        Ok(TorExit::Entity::find()
            .filter(TorExit::Column::Address.eq(address))
            .filter(TorExit::Column::IsExit.eq(true))
            .one(&*db)
            .await?
            .is_some())
    }

    /// Replaces the set of known exits in one transaction: every address
    /// in the list is stamped `last_seen = now`; addresses no longer on
    /// the list keep their history with `is_exit = false`.
    pub async fn sync_tor_exits(&self, addresses: &[String]) -> Result<u64, PalisadeError> {
        let now = Utc::now();
        let db = self.db.lock().await;
        let txn = db.begin().await?;

        TorExit::Entity::update_many()
            .col_expr(TorExit::Column::IsExit, Expr::value(false))
            .filter(TorExit::Column::IsExit.eq(true))
            .exec(&txn)
            .await?;

        let mut count = 0;
        for address in addresses {
            let existing = TorExit::Entity::find()
                .filter(TorExit::Column::Address.eq(address))
                .one(&txn)
                .await?;
            match existing {
                Some(row) => {
                    TorExit::ActiveModel {
                        id: Unchanged(row.id),
                        last_seen: Set(now),
                        is_exit: Set(true),
                        ..Default::default()
                    }
                    .update(&txn)
                    .await?;
                }
                None => {
                    TorExit::ActiveModel {
                        id: Set(Uuid::new_v4()),
                        address: Set(address.clone()),
                        first_seen: Set(now),
                        last_seen: Set(now),
                        is_exit: Set(true),
                    }
                    .insert(&txn)
                    .await?;
                }
            }
            count += 1;
        }

        txn.commit().await?;
        Ok(count)
    }

    pub async fn tor_exit_count(&self) -> Result<u64, PalisadeError> {
        let db = self.db.lock().await;
        Ok(TorExit::Entity::find()
            .filter(TorExit::Column::IsExit.eq(true))
            .count(&*db)
            .await?)
    }

    pub async fn get_manual_block(
        &self,
        identifier: &str,
        kind: ManualBlockKind,
    ) -> Result<Option<ManualBlock::Model>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(ManualBlock::Entity::find()
            .filter(ManualBlock::Column::Identifier.eq(identifier))
            .filter(ManualBlock::Column::Kind.eq(kind))
            .filter(
                Condition::any()
                    .add(ManualBlock::Column::ExpiresAt.is_null())
                    .add(ManualBlock::Column::ExpiresAt.gt(now)),
            )
            .one(&*db)
            .await?)
    }

    pub async fn add_manual_block(
        &self,
        identifier: &str,
        kind: ManualBlockKind,
        reason: &str,
        blocked_by: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<ManualBlock::Model, PalisadeError> {
        let db = self.db.lock().await;
        let txn = db.begin().await?;
        ManualBlock::Entity::delete_many()
            .filter(ManualBlock::Column::Identifier.eq(identifier))
            .filter(ManualBlock::Column::Kind.eq(kind))
            .exec(&txn)
            .await?;
        let block = ManualBlock::ActiveModel {
            id: Set(Uuid::new_v4()),
            identifier: Set(identifier.to_owned()),
            kind: Set(kind),
            reason: Set(reason.to_owned()),
            blocked_by: Set(blocked_by.to_owned()),
            blocked_at: Set(Utc::now()),
            expires_at: Set(expires_at),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        info!(identifier = %identifier, kind = ?kind, "Manual block added");
        Ok(block)
    }

    pub async fn remove_manual_block(
        &self,
        identifier: &str,
        kind: ManualBlockKind,
    ) -> Result<(), PalisadeError> {
        let db = self.db.lock().await;
        let result = ManualBlock::Entity::delete_many()
            .filter(ManualBlock::Column::Identifier.eq(identifier))
            .filter(ManualBlock::Column::Kind.eq(kind))
            .exec(&*db)
            .await?;
        if result.rows_affected == 0 {
            return Err(PalisadeError::NotFound("manual block"));
        }
        Ok(())
    }

    pub async fn list_manual_blocks(&self) -> Result<Vec<ManualBlock::Model>, PalisadeError> {
        let db = self.db.lock().await;
        Ok(ManualBlock::Entity::find()
            .order_by_desc(ManualBlock::Column::BlockedAt)
            .all(&*db)
            .await?)
    }

    pub async fn active_cidr_blocks(&self) -> Result<Vec<ManualBlock::Model>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(ManualBlock::Entity::find()
            .filter(ManualBlock::Column::Kind.eq(ManualBlockKind::Cidr))
            .filter(
                Condition::any()
                    .add(ManualBlock::Column::ExpiresAt.is_null())
                    .add(ManualBlock::Column::ExpiresAt.gt(now)),
            )
            .all(&*db)
            .await?)
    }

    pub async fn get_provider_cached(
        &self,
        address: &str,
        provider_name: &str,
    ) -> Result<Option<serde_json::Value>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(ProviderCache::Entity::find()
            .filter(ProviderCache::Column::Address.eq(address))
            .filter(ProviderCache::Column::ProviderName.eq(provider_name))
            .filter(ProviderCache::Column::ExpiresAt.gt(now))
            .one(&*db)
            .await?
            .map(|row| row.raw_response))
    }

    pub async fn set_provider_cached(
        &self,
        address: &str,
        provider_name: &str,
        raw_response: serde_json::Value,
        ttl_seconds: u64,
    ) -> Result<(), PalisadeError> {
        let now = Utc::now();
        let db = self.db.lock().await;
        let txn = db.begin().await?;
        ProviderCache::Entity::delete_many()
            .filter(ProviderCache::Column::Address.eq(address))
            .filter(ProviderCache::Column::ProviderName.eq(provider_name))
            .exec(&txn)
            .await?;
        ProviderCache::ActiveModel {
            id: Set(Uuid::new_v4()),
            address: Set(address.to_owned()),
            provider_name: Set(provider_name.to_owned()),
            raw_response: Set(raw_response),
            expires_at: Set(now + chrono::Duration::seconds(ttl_seconds as i64)),
        }
        .insert(&txn)
        .await?;
        txn.commit().await?;
        Ok(())
    }

    /// Bumps today's bucket for the named statistic.
    pub async fn increment_stat(&self, name: &str, n: i64) -> Result<(), PalisadeError> {
        let today = Utc::now().date_naive();
        let db = self.db.lock().await;
        let updated = StatCounter::Entity::update_many()
            .col_expr(
                StatCounter::Column::Value,
                Expr::col(StatCounter::Column::Value).add(n),
            )
            .filter(StatCounter::Column::Name.eq(name))
            .filter(StatCounter::Column::Day.eq(today))
            .exec(&*db)
            .await?;
        if updated.rows_affected > 0 {
            return Ok(());
        }
        let insert = StatCounter::ActiveModel {
            id: Set(Uuid::new_v4()),
            name: Set(name.to_owned()),
            day: Set(today),
            value: Set(n),
        }
        .insert(&*db)
        .await;
        if insert.is_err() {
            // Lost the creation race; the row exists now
            StatCounter::Entity::update_many()
                .col_expr(
                    StatCounter::Column::Value,
                    Expr::col(StatCounter::Column::Value).add(n),
                )
                .filter(StatCounter::Column::Name.eq(name))
                .filter(StatCounter::Column::Day.eq(today))
                .exec(&*db)
                .await?;
        }
        Ok(())
    }

    /// Lifetime totals per statistic name.
    pub async fn aggregate_stats(&self) -> Result<Vec<(String, i64)>, PalisadeError> {
        let db = self.db.lock().await;
        Ok(StatCounter::Entity::find()
            .select_only()
            .column(StatCounter::Column::Name)
            .column_as(StatCounter::Column::Value.sum(), "total")
            .group_by(StatCounter::Column::Name)
            .order_by_asc(StatCounter::Column::Name)
            .into_tuple()
            .all(&*db)
            .await?)
    }

    /// Expires reputation, ASN and provider caches plus manual blocks,
    /// and trims old statistics.
    pub async fn cleanup(&self) -> Result<ReputationCleanupStats, PalisadeError> {
        let now = Utc::now();
        let db = self.db.lock().await;

        let expired_reputation = ReputationRecord::Entity::delete_many()
            .filter(ReputationRecord::Column::ExpiresAt.lte(now))
            .exec(&*db)
            .await?
            .rows_affected;

        let expired_asn = AsnRecord::Entity::delete_many()
            .filter(AsnRecord::Column::ExpiresAt.lte(now))
            .exec(&*db)
            .await?
            .rows_affected;

        let expired_provider_cache = ProviderCache::Entity::delete_many()
            .filter(ProviderCache::Column::ExpiresAt.lte(now))
            .exec(&*db)
            .await?
            .rows_affected;

        let expired_manual_blocks = ManualBlock::Entity::delete_many()
            .filter(ManualBlock::Column::ExpiresAt.is_not_null())
            .filter(ManualBlock::Column::ExpiresAt.lte(now))
            .exec(&*db)
            .await?
            .rows_affected;

        let stats_cutoff = (now - chrono::Duration::days(STATS_RETENTION_DAYS)).date_naive();
        let trimmed_stats = StatCounter::Entity::delete_many()
            .filter(StatCounter::Column::Day.lt(stats_cutoff))
            .exec(&*db)
            .await?
            .rows_affected;

        Ok(ReputationCleanupStats {
            expired_reputation,
            expired_asn,
            expired_provider_cache,
            expired_manual_blocks,
            trimmed_stats,
        })
    }
}
