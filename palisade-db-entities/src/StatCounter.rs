use chrono::NaiveDate;
use sea_orm::entity::prelude::*;
use serde::Serialize;
use uuid::Uuid;

/// Daily bucket for one named statistic.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "stat_counters")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Unique together with `day`.
    pub name: String,

    pub day: NaiveDate,

    pub value: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
