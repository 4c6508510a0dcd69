use sea_orm::Schema;
use sea_orm_migration::prelude::*;

pub mod counter_bucket {
    use sea_orm::entity::prelude::*;
    use uuid::Uuid;

    #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
    #[sea_orm(table_name = "counter_buckets")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: Uuid,
        pub identifier: String,
        pub window_start: DateTimeUtc,
        pub count: i32,
        pub last_touched: DateTimeUtc,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {}

    impl ActiveModelBehavior for ActiveModel {}
}

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m00003_create_counter_buckets"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        let builder = manager.get_database_backend();
        let schema = Schema::new(builder);
        manager
            .create_table(schema.create_table_from_entity(counter_bucket::Entity))
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("uq_counter_buckets_identifier_window_start")
                    .table(counter_bucket::Entity)
                    .col(counter_bucket::Column::Identifier)
                    .col(counter_bucket::Column::WindowStart)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(counter_bucket::Entity).to_owned())
            .await
    }
}
