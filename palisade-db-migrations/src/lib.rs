use sea_orm::DatabaseConnection;
use sea_orm_migration::prelude::*;
use sea_orm_migration::MigrationTrait;

mod m00001_create_api_keys;
mod m00002_create_bans;
mod m00003_create_counter_buckets;
mod m00004_create_request_log;
mod m00005_create_geo_blocking;
mod m00006_create_reputation_records;
mod m00007_create_asn_records;
mod m00008_create_tor_exits;
mod m00009_create_manual_blocks;
mod m00010_create_provider_cache;
mod m00011_create_stat_counters;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m00001_create_api_keys::Migration),
            Box::new(m00002_create_bans::Migration),
            Box::new(m00003_create_counter_buckets::Migration),
            Box::new(m00004_create_request_log::Migration),
            Box::new(m00005_create_geo_blocking::Migration),
            Box::new(m00006_create_reputation_records::Migration),
            Box::new(m00007_create_asn_records::Migration),
            Box::new(m00008_create_tor_exits::Migration),
            Box::new(m00009_create_manual_blocks::Migration),
            Box::new(m00010_create_provider_cache::Migration),
            Box::new(m00011_create_stat_counters::Migration),
        ]
    }
}

pub async fn migrate_database(connection: &DatabaseConnection) -> Result<(), DbErr> {
    Migrator::up(connection, None).await
}
