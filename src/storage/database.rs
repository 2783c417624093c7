use std::path::Path;

use sqlx::{migrate::MigrateDatabase, SqlitePool};
use tracing::{debug, info};

use crate::error::Result;

const SCHEMA: &[(&str, &str)] = &[(
    "001_dispatch_audit",
    "CREATE TABLE IF NOT EXISTS dispatch_audit (
        id TEXT PRIMARY KEY,
        recorded_at TEXT NOT NULL,
        operation TEXT NOT NULL,
        task_type TEXT,
        model TEXT,
        tier TEXT,
        success INTEGER NOT NULL,
        tokens_used INTEGER NOT NULL DEFAULT 0,
        processing_time_ms INTEGER NOT NULL DEFAULT 0,
        attempts INTEGER NOT NULL DEFAULT 0,
        error TEXT
    )",
)];

/// SQLite connection used by the audit sink.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn open(db_path: &Path) -> Result<Self> {
        info!("Opening audit database at: {:?}", db_path);

        let url = format!("sqlite:{}", db_path.display());
        if !sqlx::Sqlite::database_exists(&url).await? {
            info!("Audit database doesn't exist, creating it");
            sqlx::Sqlite::create_database(&url).await?;
        }

        let pool = SqlitePool::connect(&format!("{}?mode=rwc", url)).await?;
        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn get_pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    async fn run_migrations(&self) -> Result<()> {
        for (name, sql) in SCHEMA {
            debug!("Applying schema step {}", name);
            sqlx::query(sql).execute(&self.pool).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open(&dir.path().join("audit.db")).await.unwrap();

        let table: Option<String> = sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type='table' AND name='dispatch_audit'",
        )
        .fetch_optional(&db.get_pool())
        .await
        .unwrap();
        assert_eq!(table.as_deref(), Some("dispatch_audit"));
    }

    #[tokio::test]
    async fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.db");
        Database::open(&path).await.unwrap();
        assert!(Database::open(&path).await.is_ok());
    }
}
