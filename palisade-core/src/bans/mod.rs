use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set,
};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use palisade_common::PalisadeError;
use palisade_db_entities::Ban;
use palisade_db_entities::Ban::BanOrigin;

/// Temporary and permanent bans keyed by identifier. At most one ban per
/// identifier is *active* at a time; older rows stay behind as history.
pub struct BanRegistry {
    db: Arc<Mutex<DatabaseConnection>>,
    auto_ban_seconds: u64,
}

fn active_condition(now: DateTime<Utc>) -> Condition {
    Condition::any()
        .add(Ban::Column::ExpiresAt.is_null())
        .add(Ban::Column::ExpiresAt.gt(now))
}

impl BanRegistry {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, auto_ban_seconds: u64) -> Self {
        Self {
            db,
            auto_ban_seconds,
        }
    }

    /// Returns the newest active ban for the identifier, if any.
    pub async fn is_banned(&self, identifier: &str) -> Result<Option<Ban::Model>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(Ban::Entity::find()
            .filter(Ban::Column::Identifier.eq(identifier))
            .filter(active_condition(now))
            .order_by_desc(Ban::Column::BannedAt)
            .one(&*db)
            .await?)
    }

    pub async fn create(
        &self,
        identifier: &str,
        reason: &str,
        duration_seconds: Option<u64>,
        created_by: BanOrigin,
    ) -> Result<Ban::Model, PalisadeError> {
        let now = Utc::now();
        let expires_at = duration_seconds.map(|d| now + chrono::Duration::seconds(d as i64));
        let db = self.db.lock().await;
        let ban = Ban::ActiveModel {
            id: Set(Uuid::new_v4()),
            identifier: Set(identifier.to_owned()),
            reason: Set(reason.to_owned()),
            banned_at: Set(now),
            expires_at: Set(expires_at),
            created_by: Set(created_by),
        }
        .insert(&*db)
        .await?;
        info!(
            identifier = %identifier,
            reason = %reason,
            expires_at = ?expires_at,
            "Ban created"
        );
        Ok(ban)
    }

    /// System-created ban with the configured default duration.
    pub async fn create_auto_ban(
        &self,
        identifier: &str,
        reason: &str,
    ) -> Result<Ban::Model, PalisadeError> {
        self.create(
            identifier,
            reason,
            Some(self.auto_ban_seconds),
            BanOrigin::System,
        )
        .await
    }

    pub async fn get(&self, id: Uuid) -> Result<Ban::Model, PalisadeError> {
        let db = self.db.lock().await;
        Ban::Entity::find_by_id(id)
            .one(&*db)
            .await?
            .ok_or(PalisadeError::NotFound("ban"))
    }

    pub async fn remove(&self, id: Uuid) -> Result<(), PalisadeError> {
        let db = self.db.lock().await;
        let result = Ban::Entity::delete_by_id(id).exec(&*db).await?;
        if result.rows_affected == 0 {
            return Err(PalisadeError::NotFound("ban"));
        }
        Ok(())
    }

    pub async fn remove_all(&self, identifier: &str) -> Result<u64, PalisadeError> {
        let db = self.db.lock().await;
        let result = Ban::Entity::delete_many()
            .filter(Ban::Column::Identifier.eq(identifier))
            .exec(&*db)
            .await?;
        Ok(result.rows_affected)
    }

    pub async fn list_active(
        &self,
        limit: u64,
        offset: u64,
    ) -> Result<Vec<Ban::Model>, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(Ban::Entity::find()
            .filter(active_condition(now))
            .order_by_desc(Ban::Column::BannedAt)
            .limit(limit)
            .offset(offset)
            .all(&*db)
            .await?)
    }

    pub async fn count_active(&self) -> Result<u64, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(Ban::Entity::find()
            .filter(active_condition(now))
            .count(&*db)
            .await?)
    }

    /// Deletes expired ban rows, returning how many were removed.
    pub async fn cleanup(&self) -> Result<u64, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        let result = Ban::Entity::delete_many()
            .filter(Ban::Column::ExpiresAt.is_not_null())
            .filter(Ban::Column::ExpiresAt.lte(now))
            .exec(&*db)
            .await?;
        Ok(result.rows_affected)
    }
}
