use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, PartialEq, Eq, Serialize, Clone, Copy, EnumIter, DeriveActiveEnum)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "snake_case")]
pub enum ManualBlockKind {
    #[sea_orm(string_value = "address")]
    Address,
    #[sea_orm(string_value = "asn")]
    Asn,
    #[sea_orm(string_value = "cidr")]
    Cidr,
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "manual_blocks")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Address literal, ASN number or CIDR range, depending on `kind`.
    /// Unique together with `kind`.
    pub identifier: String,

    pub kind: ManualBlockKind,

    pub reason: String,

    pub blocked_by: String,

    pub blocked_at: DateTime<Utc>,

    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
