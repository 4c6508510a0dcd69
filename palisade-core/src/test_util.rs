use std::sync::Arc;

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use tokio::sync::Mutex;

pub(crate) async fn connect_test_db() -> Arc<Mutex<DatabaseConnection>> {
    // A single pooled connection: every pool member of an in-memory
    // SQLite database would otherwise see its own empty schema.
    let mut options = ConnectOptions::new("sqlite::memory:".to_owned());
    options.max_connections(1).min_connections(1);
    let db = Database::connect(options).await.expect("in-memory database");
    palisade_db_migrations::migrate_database(&db)
        .await
        .expect("migrations");
    Arc::new(Mutex::new(db))
}
