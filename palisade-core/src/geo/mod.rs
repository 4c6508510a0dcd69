use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
    TransactionTrait, Unchanged,
};
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;
use palisade_common::PalisadeError;
use palisade_db_entities::{GeoBlockedCountry, Parameters};

/// Country-level blocking: a single enabled flag plus a set of ISO
/// alpha-2 codes, uppercased on write and on compare.
pub struct GeoBlockRegistry {
    db: Arc<Mutex<DatabaseConnection>>,
}

fn normalize_code(code: &str) -> Result<String, PalisadeError> {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(PalisadeError::Validation(format!(
            "invalid ISO-3166-1 alpha-2 country code: {code:?}"
        )));
    }
    Ok(code.to_ascii_uppercase())
}

impl GeoBlockRegistry {
    pub fn new(db: Arc<Mutex<DatabaseConnection>>) -> Self {
        Self { db }
    }

    pub async fn is_enabled(&self) -> Result<bool, PalisadeError> {
        let db = self.db.lock().await;
        Ok(Parameters::Entity::get(&*db).await?.geo_blocking_enabled)
    }

    pub async fn set_enabled(&self, enabled: bool) -> Result<(), PalisadeError> {
        let db = self.db.lock().await;
        let parameters = Parameters::Entity::get(&*db).await?;
        Parameters::ActiveModel {
            id: Unchanged(parameters.id),
            geo_blocking_enabled: Set(enabled),
        }
        .update(&*db)
        .await?;
        info!(enabled, "Geo-blocking toggled");
        Ok(())
    }

    pub async fn is_blocked(&self, code: &str) -> Result<bool, PalisadeError> {
        let Ok(code) = normalize_code(code) else {
            return Ok(false);
        };
        let db = self.db.lock().await;
        Ok(GeoBlockedCountry::Entity::find()
            .filter(GeoBlockedCountry::Column::CountryCode.eq(code))
            .one(&*db)
            .await?
            .is_some())
    }

    pub async fn add(
        &self,
        code: &str,
        name: Option<String>,
    ) -> Result<GeoBlockedCountry::Model, PalisadeError> {
        let code = normalize_code(code)?;
        let db = self.db.lock().await;
        if let Some(existing) = GeoBlockedCountry::Entity::find()
            .filter(GeoBlockedCountry::Column::CountryCode.eq(&code))
            .one(&*db)
            .await?
        {
            return Ok(existing);
        }
        let entry = GeoBlockedCountry::ActiveModel {
            id: Set(Uuid::new_v4()),
            country_code: Set(code.clone()),
            name: Set(name),
            added_at: Set(Utc::now()),
        }
        .insert(&*db)
        .await?;
        info!(country = %code, "Country added to geo-blocklist");
        Ok(entry)
    }

    pub async fn remove(&self, code: &str) -> Result<(), PalisadeError> {
        let code = normalize_code(code)?;
        let db = self.db.lock().await;
        let result = GeoBlockedCountry::Entity::delete_many()
            .filter(GeoBlockedCountry::Column::CountryCode.eq(&code))
            .exec(&*db)
            .await?;
        if result.rows_affected == 0 {
            return Err(PalisadeError::NotFound("geo-blocked country"));
        }
        info!(country = %code, "Country removed from geo-blocklist");
        Ok(())
    }

    pub async fn list(&self) -> Result<Vec<GeoBlockedCountry::Model>, PalisadeError> {
        let db = self.db.lock().await;
        Ok(GeoBlockedCountry::Entity::find()
            .order_by_asc(GeoBlockedCountry::Column::CountryCode)
            .all(&*db)
            .await?)
    }

    /// Swaps the whole blocklist in one transaction.
    pub async fn replace_all(
        &self,
        entries: Vec<(String, Option<String>)>,
    ) -> Result<(), PalisadeError> {
        let mut normalized = Vec::with_capacity(entries.len());
        for (code, name) in entries {
            normalized.push((normalize_code(&code)?, name));
        }

        let db = self.db.lock().await;
        let txn = db.begin().await?;
        GeoBlockedCountry::Entity::delete_many().exec(&txn).await?;
        let now = Utc::now();
        for (code, name) in normalized {
            GeoBlockedCountry::ActiveModel {
                id: Set(Uuid::new_v4()),
                country_code: Set(code),
                name: Set(name),
                added_at: Set(now),
            }
            .insert(&txn)
            .await?;
        }
        txn.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::connect_test_db;

    #[tokio::test]
    async fn test_enabled_flag_defaults_off_and_toggles() {
        let geo = GeoBlockRegistry::new(connect_test_db().await);
        assert!(!geo.is_enabled().await.unwrap());
        geo.set_enabled(true).await.unwrap();
        assert!(geo.is_enabled().await.unwrap());
    }

    #[tokio::test]
    async fn test_blocking_is_case_insensitive() {
        let geo = GeoBlockRegistry::new(connect_test_db().await);
        geo.add("cn", None).await.unwrap();
        assert!(geo.is_blocked("CN").await.unwrap());
        assert!(geo.is_blocked("cn").await.unwrap());
        assert!(!geo.is_blocked("US").await.unwrap());

        let listed = geo.list().await.unwrap();
        assert_eq!(listed[0].country_code, "CN");
    }

    #[tokio::test]
    async fn test_add_is_idempotent() {
        let geo = GeoBlockRegistry::new(connect_test_db().await);
        let first = geo.add("RU", None).await.unwrap();
        let second = geo.add("ru", None).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(geo.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_codes_rejected_on_write_ignored_on_read() {
        let geo = GeoBlockRegistry::new(connect_test_db().await);
        assert!(matches!(
            geo.add("CHN", None).await,
            Err(PalisadeError::Validation(_))
        ));
        assert!(!geo.is_blocked("C1").await.unwrap());
    }

    #[tokio::test]
    async fn test_replace_all_swaps_the_set() {
        let geo = GeoBlockRegistry::new(connect_test_db().await);
        geo.add("CN", None).await.unwrap();
        geo.replace_all(vec![
            ("kp".to_owned(), Some("North Korea".to_owned())),
            ("IR".to_owned(), None),
        ])
        .await
        .unwrap();

        assert!(!geo.is_blocked("CN").await.unwrap());
        assert!(geo.is_blocked("KP").await.unwrap());
        assert!(geo.is_blocked("IR").await.unwrap());
    }

    #[tokio::test]
    async fn test_remove_missing_code_reports_not_found() {
        let geo = GeoBlockRegistry::new(connect_test_db().await);
        assert!(matches!(
            geo.remove("US").await,
            Err(PalisadeError::NotFound(_))
        ));
    }
}
