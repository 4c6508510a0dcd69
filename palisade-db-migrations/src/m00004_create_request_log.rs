use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod request_log {
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "request_log")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub identifier: String,
        pub path: Option<String>,
        pub method: Option<String>,
        pub allowed: bool,
        pub reason: String,
        pub country: Option<String>,
        pub user_agent: Option<String>,
        pub timestamp: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00004_create_request_log"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(request_log::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_request_log_identifier_timestamp")
                    .table(request_log::Entity)
                    .col(request_log::Column::Identifier)
                    .col(request_log::Column::Timestamp)
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("idx_request_log_timestamp")
                    .table(request_log::Entity)
                    .col(request_log::Column::Timestamp)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(request_log::Entity).to_owned())
            .await
    }
}
