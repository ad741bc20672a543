use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply_schema(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Creates all tables and indexes. Safe to run repeatedly.
pub async fn apply_schema(pool: &SqlitePool) -> Result<()> {
    // Pending-queue collection shared with the indexing service.
    // Timestamps are Unix epoch milliseconds.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS query_requests (
            id TEXT PRIMARY KEY,
            query_text TEXT NOT NULL,
            submitted_at INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending'
                CHECK (status IN ('pending', 'complete', 'error')),
            results_json TEXT,
            error_message TEXT,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS knowledge_entries (
            id TEXT PRIMARY KEY,
            extracted_text TEXT NOT NULL,
            source_file_path TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_query_requests_status ON query_requests(status, submitted_at)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_knowledge_entries_source ON knowledge_entries(source_file_path)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
