use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "api_keys")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Hex-lowercase SHA-256 of the plaintext; the plaintext itself is
    /// never stored. Unique across active and inactive keys.
    #[sea_orm(unique)]
    #[serde(skip)]
    pub key_fingerprint: String,

    pub name: String,

    /// Requests allowed per window for this key.
    pub rate_limit: i32,

    pub window_seconds: i32,

    pub active: bool,

    pub created_at: DateTime<Utc>,

    pub expires_at: Option<DateTime<Utc>>,

    pub last_used_at: Option<DateTime<Utc>>,

    pub metadata: serde_json::Value,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
