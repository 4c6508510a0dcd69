use std::sync::Arc;

use chrono::{DateTime, Utc};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, Unchanged,
};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use palisade_common::helpers::hash::{generate_api_key, key_fingerprint};
use palisade_common::{PalisadeError, RateLimitSettings, Secret};
use palisade_db_entities::ApiKey;

pub const MAX_KEY_NAME_LENGTH: usize = 100;

#[derive(Debug, Clone, Default)]
pub struct ApiKeyParams {
    pub name: String,
    pub limit: Option<u32>,
    pub window_seconds: Option<u64>,
    pub expires_at: Option<DateTime<Utc>>,
    pub metadata: Option<serde_json::Value>,
}

/// Outcome of resolving a presented plaintext key.
#[derive(Debug)]
pub enum KeyLookup {
    Missing,
    Expired(ApiKey::Model),
    Valid(ApiKey::Model),
}

/// Hashed-key storage with per-key rate-limit configuration. The
/// plaintext leaves this module exactly once per create or rotate.
pub struct ApiKeyRegistry {
    db: Arc<Mutex<DatabaseConnection>>,
    defaults: RateLimitSettings,
}

impl ApiKeyRegistry {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>, defaults: RateLimitSettings) -> Self {
        Self { db, defaults }
    }

    pub async fn create(
        &self,
        params: ApiKeyParams,
    ) -> Result<(ApiKey::Model, Secret<String>), PalisadeError> {
        validate_params(&params)?;

        let plaintext = generate_api_key();
        let now = Utc::now();
        let db = self.db.lock().await;
        let key = ApiKey::ActiveModel {
            id: Set(Uuid::new_v4()),
            key_fingerprint: Set(key_fingerprint(plaintext.expose_secret())),
            name: Set(params.name),
            rate_limit: Set(params.limit.unwrap_or(self.defaults.limit) as i32),
            window_seconds: Set(params
                .window_seconds
                .unwrap_or(self.defaults.window_seconds) as i32),
            active: Set(true),
            created_at: Set(now),
            expires_at: Set(params.expires_at),
            last_used_at: Set(None),
            metadata: Set(params.metadata.unwrap_or_else(|| serde_json::json!({}))),
        }
        .insert(&*db)
        .await?;

        info!(id = %key.id, name = %key.name, "API key created");
        Ok((key, plaintext))
    }

    /// Resolves a presented plaintext. Expired keys stay `active = 1` in
    /// storage, so both the flag and the expiry are checked here.
    pub async fn resolve(&self, plaintext: &str) -> Result<KeyLookup, PalisadeError> {
        let fingerprint = key_fingerprint(plaintext);
        let now = Utc::now();
        let db = self.db.lock().await;
        let Some(key) = ApiKey::Entity::find()
            .filter(ApiKey::Column::KeyFingerprint.eq(&fingerprint))
            .filter(ApiKey::Column::Active.eq(true))
            .one(&*db)
            .await?
        else {
            return Ok(KeyLookup::Missing);
        };

        if is_expired_at(&key, now) {
            return Ok(KeyLookup::Expired(key));
        }

        let touched = ApiKey::ActiveModel {
            id: Unchanged(key.id),
            last_used_at: Set(Some(now)),
            ..Default::default()
        }
        .update(&*db)
        .await?;
        Ok(KeyLookup::Valid(touched))
    }

    /// Valid-only projection of `resolve`.
    pub async fn lookup(&self, plaintext: &str) -> Result<Option<ApiKey::Model>, PalisadeError> {
        match self.resolve(plaintext).await? {
            KeyLookup::Valid(key) => Ok(Some(key)),
            _ => Ok(None),
        }
    }

    pub async fn get_by_id(&self, id: Uuid) -> Result<ApiKey::Model, PalisadeError> {
        let db = self.db.lock().await;
        ApiKey::Entity::find_by_id(id)
            .one(&*db)
            .await?
            .ok_or(PalisadeError::NotFound("api key"))
    }

    pub async fn list(&self, limit: u64, offset: u64) -> Result<Vec<ApiKey::Model>, PalisadeError> {
        let db = self.db.lock().await;
        Ok(ApiKey::Entity::find()
            .order_by_desc(ApiKey::Column::CreatedAt)
            .limit(limit)
            .offset(offset)
            .all(&*db)
            .await?)
    }

    /// Replaces the fingerprint with a fresh one and returns the new
    /// plaintext. The record id is unchanged.
    pub async fn rotate(
        &self,
        id: Uuid,
    ) -> Result<(ApiKey::Model, Secret<String>), PalisadeError> {
        let plaintext = generate_api_key();
        let db = self.db.lock().await;
        ApiKey::Entity::find_by_id(id)
            .one(&*db)
            .await?
            .ok_or(PalisadeError::NotFound("api key"))?;

        let key = ApiKey::ActiveModel {
            id: Unchanged(id),
            key_fingerprint: Set(key_fingerprint(plaintext.expose_secret())),
            last_used_at: Set(None),
            ..Default::default()
        }
        .update(&*db)
        .await?;

        info!(id = %key.id, name = %key.name, "API key rotated");
        Ok((key, plaintext))
    }

    pub async fn deactivate(&self, id: Uuid) -> Result<ApiKey::Model, PalisadeError> {
        let db = self.db.lock().await;
        ApiKey::Entity::find_by_id(id)
            .one(&*db)
            .await?
            .ok_or(PalisadeError::NotFound("api key"))?;
        let key = ApiKey::ActiveModel {
            id: Unchanged(id),
            active: Set(false),
            ..Default::default()
        }
        .update(&*db)
        .await?;
        info!(id = %key.id, "API key deactivated");
        Ok(key)
    }

    pub async fn delete(&self, id: Uuid) -> Result<(), PalisadeError> {
        let db = self.db.lock().await;
        let result = ApiKey::Entity::delete_by_id(id).exec(&*db).await?;
        if result.rows_affected == 0 {
            return Err(PalisadeError::NotFound("api key"));
        }
        Ok(())
    }

    pub async fn count_active(&self) -> Result<u64, PalisadeError> {
        let db = self.db.lock().await;
        let now = Utc::now();
        Ok(ApiKey::Entity::find()
            .filter(ApiKey::Column::Active.eq(true))
            .filter(
                Condition::any()
                    .add(ApiKey::Column::ExpiresAt.is_null())
                    .add(ApiKey::Column::ExpiresAt.gt(now)),
            )
            .count(&*db)
            .await?)
    }

    pub fn is_expired(&self, key: &ApiKey::Model) -> bool {
        is_expired_at(key, Utc::now())
    }
}

/// A key expiring exactly now is already expired.
fn is_expired_at(key: &ApiKey::Model, now: DateTime<Utc>) -> bool {
    key.expires_at.map(|e| e <= now).unwrap_or(false)
}

fn validate_params(params: &ApiKeyParams) -> Result<(), PalisadeError> {
    if params.name.is_empty() {
        return Err(PalisadeError::Validation("name must not be empty".into()));
    }
    if params.name.len() > MAX_KEY_NAME_LENGTH {
        return Err(PalisadeError::Validation(format!(
            "name must be at most {MAX_KEY_NAME_LENGTH} characters"
        )));
    }
    if params.limit == Some(0) {
        return Err(PalisadeError::Validation("limit must be at least 1".into()));
    }
    if params.window_seconds == Some(0) {
        return Err(PalisadeError::Validation(
            "window_seconds must be at least 1".into(),
        ));
    }
    if let Some(expires_at) = params.expires_at {
        if expires_at <= Utc::now() {
            return Err(PalisadeError::Validation(
                "expires_at must be in the future".into(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::connect_test_db;

    fn registry(db: Arc<Mutex<DatabaseConnection>>) -> ApiKeyRegistry {
        ApiKeyRegistry::new(db, RateLimitSettings::default())
    }

    fn named(name: &str) -> ApiKeyParams {
        ApiKeyParams {
            name: name.to_owned(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_and_lookup_round_trip() {
        let keys = registry(connect_test_db().await);
        let (created, plaintext) = keys.create(named("ci")).await.unwrap();
        assert!(plaintext.expose_secret().starts_with("rl_"));

        let found = keys.lookup(plaintext.expose_secret()).await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert!(found.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_unknown_plaintext_is_missing() {
        let keys = registry(connect_test_db().await);
        assert!(matches!(
            keys.resolve("rl_unknown").await.unwrap(),
            KeyLookup::Missing
        ));
    }

    #[tokio::test]
    async fn test_rotation_invalidates_old_plaintext() {
        let keys = registry(connect_test_db().await);
        let (created, old_plaintext) = keys.create(named("rotate-me")).await.unwrap();

        let (rotated, new_plaintext) = keys.rotate(created.id).await.unwrap();
        assert_eq!(rotated.id, created.id);
        assert!(rotated.last_used_at.is_none());
        assert_ne!(old_plaintext.expose_secret(), new_plaintext.expose_secret());

        assert!(keys.lookup(old_plaintext.expose_secret()).await.unwrap().is_none());
        assert!(keys.lookup(new_plaintext.expose_secret()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_key_resolves_as_expired() {
        let db = connect_test_db().await;
        let keys = registry(db.clone());
        let (created, plaintext) = keys.create(named("short-lived")).await.unwrap();
        {
            // Backdate the expiry; expired keys stay active=1
            let db = db.lock().await;
            ApiKey::ActiveModel {
                id: Unchanged(created.id),
                expires_at: Set(Some(Utc::now() - chrono::Duration::seconds(1))),
                ..Default::default()
            }
            .update(&*db)
            .await
            .unwrap();
        }

        match keys.resolve(plaintext.expose_secret()).await.unwrap() {
            KeyLookup::Expired(key) => assert!(key.active),
            other => panic!("expected expired, got {other:?}"),
        }
        assert_eq!(keys.count_active().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_key_expiring_exactly_now_is_expired() {
        let keys = registry(connect_test_db().await);
        let (created, _) = keys.create(named("boundary")).await.unwrap();
        let mut key = created;
        let now = Utc::now();
        key.expires_at = Some(now);
        assert!(is_expired_at(&key, now));
    }

    #[tokio::test]
    async fn test_deactivated_key_does_not_resolve() {
        let keys = registry(connect_test_db().await);
        let (created, plaintext) = keys.create(named("to-disable")).await.unwrap();
        keys.deactivate(created.id).await.unwrap();
        assert!(matches!(
            keys.resolve(plaintext.expose_secret()).await.unwrap(),
            KeyLookup::Missing
        ));
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let keys = registry(connect_test_db().await);
        let (first, _) = keys.create(named("first")).await.unwrap();
        keys.create(named("second")).await.unwrap();

        assert_eq!(keys.list(10, 0).await.unwrap().len(), 2);
        keys.delete(first.id).await.unwrap();
        assert_eq!(keys.list(10, 0).await.unwrap().len(), 1);
        assert!(matches!(
            keys.delete(first.id).await,
            Err(PalisadeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_params() {
        let keys = registry(connect_test_db().await);

        for params in [
            named(""),
            named(&"x".repeat(MAX_KEY_NAME_LENGTH + 1)),
            ApiKeyParams {
                name: "zero-limit".into(),
                limit: Some(0),
                ..Default::default()
            },
            ApiKeyParams {
                name: "zero-window".into(),
                window_seconds: Some(0),
                ..Default::default()
            },
            ApiKeyParams {
                name: "past-expiry".into(),
                expires_at: Some(Utc::now() - chrono::Duration::seconds(5)),
                ..Default::default()
            },
        ] {
            let result = keys.create(params).await;
            assert!(matches!(result, Err(PalisadeError::Validation(_))));
        }
    }

    #[tokio::test]
    async fn test_plaintext_never_reaches_storage() {
        let db = connect_test_db().await;
        let keys = registry(db.clone());
        for i in 0..5 {
            keys.create(named(&format!("key-{i}"))).await.unwrap();
        }

        let db = db.lock().await;
        let rows = ApiKey::Entity::find().all(&*db).await.unwrap();
        assert_eq!(rows.len(), 5);
        for row in rows {
            let serialized = serde_json::to_string(&serde_json::json!({
                "fingerprint": row.key_fingerprint,
                "name": row.name,
                "metadata": row.metadata,
            }))
            .unwrap();
            assert!(!serialized.contains("rl_"), "plaintext material stored: {serialized}");
        }
    }
}
