// src/store/migration.rs
//! Schema for the error event table.
//! Safe to run at every startup (idempotent).

use sqlx::{Executor, SqlitePool};

use crate::error::Result;

/// Base table. Timestamps are Unix milliseconds.
const CREATE_ERROR_EVENTS: &str = r#"
CREATE TABLE IF NOT EXISTS error_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    fingerprint TEXT NOT NULL,
    severity TEXT NOT NULL,
    payload TEXT NOT NULL,
    source_file TEXT,
    source_line INTEGER,
    occurrence_count INTEGER NOT NULL DEFAULT 1 CHECK (occurrence_count >= 1),
    first_seen_at INTEGER NOT NULL,
    last_seen_at INTEGER NOT NULL,
    resolved INTEGER NOT NULL DEFAULT 0
);
"#;

/// Request-context columns added after the first schema version.
const CONTEXT_COLUMNS: &[(&str, &str)] = &[
    ("actor_id", "ALTER TABLE error_events ADD COLUMN actor_id INTEGER;"),
    ("request_uri", "ALTER TABLE error_events ADD COLUMN request_uri TEXT;"),
    ("request_method", "ALTER TABLE error_events ADD COLUMN request_method TEXT;"),
    ("user_agent", "ALTER TABLE error_events ADD COLUMN user_agent TEXT;"),
    ("client_ip", "ALTER TABLE error_events ADD COLUMN client_ip TEXT;"),
];

const CREATE_INDICES: &str = r#"
CREATE UNIQUE INDEX IF NOT EXISTS idx_error_events_fingerprint ON error_events(fingerprint);
CREATE INDEX IF NOT EXISTS idx_error_events_severity ON error_events(severity);
CREATE INDEX IF NOT EXISTS idx_error_events_actor ON error_events(actor_id);
CREATE INDEX IF NOT EXISTS idx_error_events_last_seen ON error_events(last_seen_at);
"#;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    pool.execute(CREATE_ERROR_EVENTS).await?;

    for (column, alter) in CONTEXT_COLUMNS {
        let exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('error_events') WHERE name = ?",
        )
        .bind(column)
        .fetch_one(pool)
        .await?;

        if !exists {
            pool.execute(*alter).await?;
        }
    }

    pool.execute(CREATE_INDICES).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    #[tokio::test]
    async fn test_migrations_are_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("create in-memory sqlite");

        run_migrations(&pool).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let columns: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM pragma_table_info('error_events')")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(columns, 15);
    }

    #[tokio::test]
    async fn test_upgrades_table_without_context_columns() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .expect("create in-memory sqlite");

        pool.execute(CREATE_ERROR_EVENTS).await.unwrap();
        run_migrations(&pool).await.unwrap();

        let has_client_ip: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM pragma_table_info('error_events') WHERE name = 'client_ip'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(has_client_ip);
    }
}
