use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod reputation_record {
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
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
        pub confidence: i32,
        pub reason: String,
        pub source: String,
        pub asn: Option<i64>,
        pub asn_org: Option<String>,
        pub country: Option<String>,
        pub checked_at: DateTimeUtc,
        pub expires_at: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00006_create_reputation_records"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(reputation_record::Entity))
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(reputation_record::Entity).to_owned())
            .await
    }
}
