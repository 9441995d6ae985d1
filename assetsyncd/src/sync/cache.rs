use std::{fs, path::Path};

use sqlx::{Row, SqlitePool, migrate::Migrator, sqlite::SqliteConnectOptions};
use thiserror::Error;
use time::OffsetDateTime;

use super::model::ProjectTree;

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

const TREE_KEY: &str = "projects";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("cached tree is not valid JSON: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Local key -> JSON mirror of the project tree.
#[derive(Clone)]
pub struct TreeCache {
    pool: SqlitePool,
}

impl TreeCache {
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn open(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;
        let cache = Self { pool };
        cache.init().await?;
        Ok(cache)
    }

    pub async fn init(&self) -> Result<(), CacheError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn save_tree(&self, tree: &ProjectTree) -> Result<(), CacheError> {
        let payload = serde_json::to_string(tree)?;
        sqlx::query(
            "INSERT INTO tree_cache (key, value, updated_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at",
        )
        .bind(TREE_KEY)
        .bind(payload)
        .bind(OffsetDateTime::now_utc().unix_timestamp())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// `Ok(None)` when nothing has been saved yet.
    pub async fn load_tree(&self) -> Result<Option<ProjectTree>, CacheError> {
        let Some(raw) = self.load_raw().await? else {
            return Ok(None);
        };
        let value: serde_json::Value = serde_json::from_str(&raw)?;
        Ok(Some(ProjectTree::from_value(value)))
    }

    async fn load_raw(&self) -> Result<Option<String>, CacheError> {
        let row = sqlx::query("SELECT value FROM tree_cache WHERE key = ?1")
            .bind(TREE_KEY)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get("value")?)),
            None => Ok(None),
        }
    }

    #[cfg(test)]
    pub(crate) async fn save_raw(&self, raw: &str) -> Result<(), CacheError> {
        sqlx::query(
            "INSERT INTO tree_cache (key, value, updated_at) VALUES (?1, ?2, 0)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        )
        .bind(TREE_KEY)
        .bind(raw)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_cache() -> TreeCache {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    let cache = TreeCache::from_pool(pool);
    cache.init().await.unwrap();
    cache
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sync::model::Project;
    use tempfile::tempdir;

    #[tokio::test]
    async fn empty_cache_loads_none() {
        let cache = memory_cache().await;
        assert_eq!(cache.load_tree().await.unwrap(), None);
    }

    #[tokio::test]
    async fn save_then_load_whole_tree() {
        let cache = memory_cache().await;
        let tree = ProjectTree {
            projects: vec![Project {
                id: "p1".into(),
                name: "Launch".into(),
                ..Project::default()
            }],
        };

        cache.save_tree(&tree).await.unwrap();
        cache.save_tree(&tree).await.unwrap();

        assert_eq!(cache.load_tree().await.unwrap(), Some(tree));
    }

    #[tokio::test]
    async fn undecodable_payload_is_an_error() {
        let cache = memory_cache().await;
        cache.save_raw("{not json").await.unwrap();
        assert!(matches!(
            cache.load_tree().await,
            Err(CacheError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn open_creates_database_file() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("nested/cache.db");
        let cache = TreeCache::open(&db).await.unwrap();
        cache.save_tree(&ProjectTree::default()).await.unwrap();
        assert!(db.exists());
    }
}
