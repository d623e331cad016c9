// src/store/mod.rs
//! SQLite persistence for deduplicated error events.
//!
//! One row per fingerprint. Recurrence goes through a single
//! `INSERT ... ON CONFLICT(fingerprint) DO UPDATE` statement, so concurrent
//! writers can never create a second row for the same fingerprint.

pub mod migration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::types::{RequestContext, Severity};

/// SQLite caps bound parameters per statement; bulk actions are chunked.
const BULK_CHUNK: usize = 500;

/// A stored, deduplicated error.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEvent {
    pub id: i64,
    pub fingerprint: String,
    pub severity: Severity,
    pub encrypted_payload: String,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
    pub occurrence_count: i64,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub resolved: bool,
    pub context: RequestContext,
}

/// Everything needed to insert or bump a row.
#[derive(Debug, Clone, Serialize)]
pub struct NewErrorEvent {
    pub fingerprint: String,
    pub severity: Severity,
    pub encrypted_payload: String,
    pub source_file: Option<String>,
    pub source_line: Option<u32>,
    pub context: RequestContext,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub id: i64,
    pub is_new: bool,
    pub occurrence_count: i64,
}

/// Result of a bulk administrative action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BulkOutcome {
    /// No valid ids were given; nothing was touched.
    NothingToDo,
    Affected(u64),
}

impl BulkOutcome {
    pub fn affected(&self) -> u64 {
        match self {
            BulkOutcome::NothingToDo => 0,
            BulkOutcome::Affected(n) => *n,
        }
    }
}

/// Aggregates over a time window, used by the weekly summary.
#[derive(Debug, Clone, Default, Serialize)]
pub struct WindowStats {
    /// Distinct errors seen at least once in the window.
    pub active: i64,
    /// Distinct errors first seen in the window.
    pub new: i64,
    /// Unresolved errors overall.
    pub unresolved: i64,
    /// Most frequent errors active in the window.
    pub top: Vec<ErrorEvent>,
}

/// Open a pool, creating the database file if needed, and run migrations.
pub async fn connect(database_url: &str, max_connections: u32) -> Result<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
    if !database_url.contains(":memory:") {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let max_connections = if database_url.contains(":memory:") { 1 } else { max_connections.max(1) };

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;

    migration::run_migrations(&pool).await?;
    info!("Connected to {} ({} connections)", database_url, max_connections);

    Ok(pool)
}

#[derive(Clone)]
pub struct ErrorStore {
    pub pool: SqlitePool,
}

impl ErrorStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new row or bump the existing one for this fingerprint:
    /// count + 1, touch `last_seen_at`, clear `resolved`. Context columns are
    /// only written on insert.
    pub async fn upsert(&self, event: &NewErrorEvent, seen_at: DateTime<Utc>) -> Result<UpsertOutcome> {
        let seen_ms = seen_at.timestamp_millis();

        let row = sqlx::query(
            r#"
            INSERT INTO error_events (
                fingerprint, severity, payload, source_file, source_line,
                actor_id, request_uri, request_method, user_agent, client_ip,
                occurrence_count, first_seen_at, last_seen_at, resolved
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?, 0)
            ON CONFLICT(fingerprint) DO UPDATE SET
                occurrence_count = occurrence_count + 1,
                last_seen_at = excluded.last_seen_at,
                resolved = 0
            RETURNING id, occurrence_count
            "#,
        )
        .bind(&event.fingerprint)
        .bind(event.severity.as_str())
        .bind(&event.encrypted_payload)
        .bind(&event.source_file)
        .bind(event.source_line.map(i64::from))
        .bind(event.context.actor_id)
        .bind(&event.context.request_uri)
        .bind(&event.context.request_method)
        .bind(&event.context.user_agent)
        .bind(&event.context.client_ip)
        .bind(seen_ms)
        .bind(seen_ms)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        let occurrence_count: i64 = row.try_get("occurrence_count")?;

        debug!(
            id,
            occurrence_count,
            "Upserted error event {}",
            event.fingerprint.get(..12).unwrap_or(&event.fingerprint)
        );

        Ok(UpsertOutcome {
            id,
            is_new: occurrence_count == 1,
            occurrence_count,
        })
    }

    pub async fn get(&self, id: i64) -> Result<Option<ErrorEvent>> {
        let row = sqlx::query(&format!("SELECT {} FROM error_events WHERE id = ?", COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    /// Like `get`, but a missing row is an error.
    pub async fn require(&self, id: i64) -> Result<ErrorEvent> {
        self.get(id).await?.ok_or(Error::NotFound(id))
    }

    pub async fn get_by_fingerprint(&self, fingerprint: &str) -> Result<Option<ErrorEvent>> {
        let row = sqlx::query(&format!("SELECT {} FROM error_events WHERE fingerprint = ?", COLUMNS))
            .bind(fingerprint)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_event).transpose()
    }

    /// Most recently seen first.
    pub async fn list(&self, include_resolved: bool) -> Result<Vec<ErrorEvent>> {
        let filter = if include_resolved { "1 = 1" } else { "resolved = 0" };
        let rows = sqlx::query(&format!(
            "SELECT {} FROM error_events WHERE {} ORDER BY last_seen_at DESC, id DESC",
            COLUMNS, filter
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_event).collect()
    }

    pub async fn count(&self, include_resolved: bool) -> Result<i64> {
        let sql = if include_resolved {
            "SELECT COUNT(*) FROM error_events"
        } else {
            "SELECT COUNT(*) FROM error_events WHERE resolved = 0"
        };
        Ok(sqlx::query_scalar(sql).fetch_one(&self.pool).await?)
    }

    pub async fn bulk_delete(&self, ids: &[i64]) -> Result<BulkOutcome> {
        let ids = sanitize_ids(ids);
        if ids.is_empty() {
            return Ok(BulkOutcome::NothingToDo);
        }

        let mut affected = 0;
        for chunk in ids.chunks(BULK_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("DELETE FROM error_events WHERE id IN (");
            push_id_list(&mut qb, chunk);
            affected += qb.build().execute(&self.pool).await?.rows_affected();
        }

        info!("Deleted {} error events", affected);
        Ok(BulkOutcome::Affected(affected))
    }

    pub async fn bulk_set_resolved(&self, ids: &[i64], resolved: bool) -> Result<BulkOutcome> {
        let ids = sanitize_ids(ids);
        if ids.is_empty() {
            return Ok(BulkOutcome::NothingToDo);
        }

        let mut affected = 0;
        for chunk in ids.chunks(BULK_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE error_events SET resolved = ");
            qb.push_bind(resolved);
            qb.push(" WHERE id IN (");
            push_id_list(&mut qb, chunk);
            affected += qb.build().execute(&self.pool).await?.rows_affected();
        }

        info!("Marked {} error events resolved={}", affected, resolved);
        Ok(BulkOutcome::Affected(affected))
    }

    /// Delete every row last seen strictly before `threshold`.
    pub async fn purge_older_than(&self, threshold: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM error_events WHERE last_seen_at < ?")
            .bind(threshold.timestamp_millis())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn stats_since(&self, since: DateTime<Utc>, top_n: usize) -> Result<WindowStats> {
        let since_ms = since.timestamp_millis();

        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS active,
                   COALESCE(SUM(CASE WHEN first_seen_at >= ? THEN 1 ELSE 0 END), 0) AS new
            FROM error_events
            WHERE last_seen_at >= ?
            "#,
        )
        .bind(since_ms)
        .bind(since_ms)
        .fetch_one(&self.pool)
        .await?;

        let top_rows = sqlx::query(&format!(
            "SELECT {} FROM error_events WHERE last_seen_at >= ? \
             ORDER BY occurrence_count DESC, last_seen_at DESC LIMIT ?",
            COLUMNS
        ))
        .bind(since_ms)
        .bind(top_n as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(WindowStats {
            active: row.try_get("active")?,
            new: row.try_get("new")?,
            unresolved: self.count(false).await?,
            top: top_rows.iter().map(row_to_event).collect::<Result<_>>()?,
        })
    }
}

const COLUMNS: &str = "id, fingerprint, severity, payload, source_file, source_line, \
    occurrence_count, first_seen_at, last_seen_at, resolved, \
    actor_id, request_uri, request_method, user_agent, client_ip";

fn row_to_event(row: &SqliteRow) -> Result<ErrorEvent> {
    let severity: String = row.try_get("severity")?;
    let source_line: Option<i64> = row.try_get("source_line")?;
    let first_seen: i64 = row.try_get("first_seen_at")?;
    let last_seen: i64 = row.try_get("last_seen_at")?;

    Ok(ErrorEvent {
        id: row.try_get("id")?,
        fingerprint: row.try_get("fingerprint")?,
        severity: severity.parse().unwrap_or_default(),
        encrypted_payload: row.try_get("payload")?,
        source_file: row.try_get("source_file")?,
        source_line: source_line.and_then(|l| u32::try_from(l).ok()),
        occurrence_count: row.try_get("occurrence_count")?,
        first_seen_at: from_millis(first_seen),
        last_seen_at: from_millis(last_seen),
        resolved: row.try_get("resolved")?,
        context: RequestContext {
            actor_id: row.try_get("actor_id")?,
            request_uri: row.try_get("request_uri")?,
            request_method: row.try_get("request_method")?,
            user_agent: row.try_get("user_agent")?,
            client_ip: row.try_get("client_ip")?,
        },
    })
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or(DateTime::UNIX_EPOCH)
}

/// Drop non-positive ids and duplicates. Invalid ids are filtered silently.
fn sanitize_ids(ids: &[i64]) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.iter().copied().filter(|id| *id > 0).collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

fn push_id_list(qb: &mut QueryBuilder<'_, Sqlite>, ids: &[i64]) {
    let mut separated = qb.separated(", ");
    for id in ids {
        separated.push_bind(*id);
    }
    separated.push_unseparated(")");
}
