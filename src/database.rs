//! SQLite pool creation and schema bootstrap
//!
//! Entity tables (devices, labels, functions, integrations, flows) and the
//! append-only history tables live in the same database file.

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;

/// Open (creating if missing) the database at `url` and initialize its schema
pub async fn connect(url: &str) -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(url)
        .map_err(|e| anyhow::anyhow!("Invalid database URL '{}': {}", url, e))?
        .create_if_missing(true);

    if let Some(parent) = options.get_filename().parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| {
                anyhow::anyhow!("Failed to create database directory '{}': {}", parent.display(), e)
            })?;
        }
    }

    tracing::info!("🗄️ Opening database: {}", options.get_filename().display());
    let pool = SqlitePool::connect_with(options).await?;
    init_schema(&pool).await?;

    Ok(pool)
}

/// Single-connection in-memory database with the full schema
///
/// Each SQLite in-memory connection is its own database, so the pool is
/// pinned to one connection that never idles out.
pub async fn connect_in_memory() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    init_schema(&pool).await?;

    Ok(pool)
}

/// Create entity and history tables
///
/// Safe to call multiple times (uses IF NOT EXISTS).
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    let statements = [
        r#"
        CREATE TABLE IF NOT EXISTS devices (
            id TEXT PRIMARY KEY,
            external_id TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'offline',
            metadata JSON NOT NULL DEFAULT '{}'
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS labels (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS device_labels (
            device_id TEXT NOT NULL,
            label_id TEXT NOT NULL,
            PRIMARY KEY (device_id, label_id)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS functions (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            code TEXT NOT NULL,
            parameters JSON NOT NULL DEFAULT '[]',
            config JSON NOT NULL DEFAULT '{}'
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS integrations (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            config JSON NOT NULL DEFAULT '{}'
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS flows (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            definition JSON NOT NULL,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS device_history (
            id TEXT PRIMARY KEY,
            device_id TEXT NOT NULL,
            event TEXT NOT NULL,
            data JSON NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS function_history (
            id TEXT PRIMARY KEY,
            flow_run_id TEXT NOT NULL,
            flow_id TEXT NOT NULL,
            function_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            status TEXT NOT NULL,
            input_data JSON,
            output_data JSON,
            error_message TEXT,
            error_stack TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS integration_history (
            id TEXT PRIMARY KEY,
            flow_run_id TEXT NOT NULL,
            flow_id TEXT NOT NULL,
            integration_id TEXT NOT NULL,
            node_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            status TEXT NOT NULL,
            input_data JSON,
            response_data JSON,
            error_message TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS flow_history (
            id TEXT PRIMARY KEY,
            flow_id TEXT NOT NULL,
            status TEXT NOT NULL,
            trigger_source TEXT NOT NULL,
            source_id TEXT,
            execution_path JSON NOT NULL DEFAULT '[]',
            error_details TEXT,
            input_data JSON,
            output_data JSON,
            start_time TEXT NOT NULL,
            end_time TEXT NOT NULL,
            execution_time_ms INTEGER NOT NULL,
            timestamp TEXT NOT NULL
        )
        "#,
        "CREATE INDEX IF NOT EXISTS idx_devices_external_id ON devices(external_id)",
        "CREATE INDEX IF NOT EXISTS idx_function_history_run ON function_history(flow_run_id)",
        "CREATE INDEX IF NOT EXISTS idx_integration_history_run ON integration_history(flow_run_id)",
        "CREATE INDEX IF NOT EXISTS idx_flow_history_flow ON flow_history(flow_id)",
    ];

    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn schema_init_is_idempotent() {
        let pool = connect_in_memory().await.unwrap();
        init_schema(&pool).await.unwrap();

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .unwrap();
        let names: Vec<&str> = tables.iter().map(|(name,)| name.as_str()).collect();
        assert!(names.contains(&"flows"));
        assert!(names.contains(&"flow_history"));
        assert!(names.contains(&"device_labels"));
    }
}
