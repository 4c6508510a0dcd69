use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Serialize, Clone, Copy, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ReputationSource {
    #[sea_orm(string_value = "cache")]
    Cache,
    #[sea_orm(string_value = "heuristic")]
    Heuristic,
    #[sea_orm(string_value = "provider")]
    Provider,
    #[sea_orm(string_value = "manual")]
    Manual,
    #[sea_orm(string_value = "tor_list")]
    TorList,
}

/// Cached classification for one address. The five flags are mutually
/// exclusive at classification time but stored as independent bits.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "reputation_records")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    #[sea_orm(unique)]
    pub address: String,

    pub is_proxy: bool,
    pub is_vpn: bool,
    pub is_tor: bool,
    pub is_hosting: bool,
    pub is_residential: bool,

    /// 0..100
    pub confidence: i32,

    pub reason: String,

    pub source: ReputationSource,

    pub asn: Option<i64>,

    pub asn_org: Option<String>,

    pub country: Option<String>,

    pub checked_at: DateTime<Utc>,

    pub expires_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
