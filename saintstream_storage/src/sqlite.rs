use async_trait::async_trait;
use saintstream_core::KeyValueStore;
use saintstream_entities::kv_entries;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    QueryOrder, Schema, Set,
};
use std::path::Path;
use tracing::{debug, info};

fn is_table_already_exists_error(err: &DbErr) -> bool {
    err.to_string().contains("table") && err.to_string().contains("already exists")
}

/// [`KeyValueStore`] backed by a single SQLite table.
pub struct SqliteKeyValueStore {
    db: DatabaseConnection,
}

impl SqliteKeyValueStore {
    /// Open (creating if needed) the database file and its table.
    pub async fn new(db_path: &Path) -> anyhow::Result<Self> {
        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        info!("Connecting to database: {}", db_url);

        let db = Database::connect(&db_url).await?;

        let backend = db.get_database_backend();
        let schema = Schema::new(backend);
        let stmt = schema.create_table_from_entity(kv_entries::Entity);
        match db
            .execute_unprepared(&backend.build(&stmt).to_string())
            .await
        {
            Ok(_) => {}
            Err(e) if is_table_already_exists_error(&e) => {
                debug!("Table kv_entries already exists, skipping creation");
            }
            Err(e) => return Err(e.into()),
        }

        info!("SqliteKeyValueStore initialized");
        Ok(Self { db })
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> anyhow::Result<Vec<String>> {
        let entries = kv_entries::Entity::find()
            .order_by_asc(kv_entries::Column::Key)
            .all(&self.db)
            .await?;

        Ok(entries.into_iter().map(|e| e.key).collect())
    }
}

#[async_trait]
impl KeyValueStore for SqliteKeyValueStore {
    async fn get(&self, key: &str) -> anyhow::Result<Option<String>> {
        let entry = kv_entries::Entity::find_by_id(key.to_owned())
            .one(&self.db)
            .await?;

        Ok(entry.map(|e| e.value))
    }

    async fn set(&self, key: &str, value: &str) -> anyhow::Result<()> {
        let now = chrono::Utc::now().naive_utc();

        let exists = kv_entries::Entity::find_by_id(key.to_owned())
            .one(&self.db)
            .await?
            .is_some();

        let entry = kv_entries::ActiveModel {
            key: Set(key.to_owned()),
            value: Set(value.to_owned()),
            updated_at: Set(now),
        };

        if exists {
            kv_entries::Entity::update(entry).exec(&self.db).await?;
        } else {
            entry.insert(&self.db).await?;
        }

        debug!("Stored {} bytes under {}", value.len(), key);
        Ok(())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        let result = kv_entries::Entity::delete_by_id(key.to_owned())
            .exec(&self.db)
            .await?;

        debug!("Deleted {} (rows affected: {})", key, result.rows_affected);
        Ok(())
    }
}
