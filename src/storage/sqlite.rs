use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::migrate::Migrator;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use tracing::{debug, info};

use super::KeyValueStore;
use crate::config::DatabaseConfig;
use crate::error::{StorageError, StorageResult};

/// Static migrator that embeds migrations at compile time
static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Fixed-width UTC rendering so stored times compare correctly as text.
fn stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed key/value store and outbox
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

/// A pending remote operation as persisted in the outbox table.
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    /// Unique id of the queued operation.
    pub id: String,
    /// `upsert` or `delete`.
    pub op: String,
    /// Backend table the operation targets.
    pub remote_table: String,
    /// Id of the row in that table.
    pub entity_id: String,
    /// Row body for upserts.
    pub payload: Option<String>,
    /// Failed deliveries so far.
    pub attempts: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Not delivered before this instant.
    pub next_attempt_at: DateTime<Utc>,
    /// When the operation was first queued.
    pub created_at: DateTime<Utc>,
}

impl SqliteStore {
    /// Create a new SQLite store at the configured path
    pub async fn new(config: &DatabaseConfig) -> StorageResult<Self> {
        // Ensure parent directory exists
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StorageError::Connection {
                message: format!("Failed to create database directory: {}", e),
            })?;
        }

        let database_url = format!("sqlite://{}?mode=rwc", config.path.display());

        let options = SqliteConnectOptions::from_str(&database_url)
            .map_err(|e| StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            })?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to connect to database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;

        Ok(store)
    }

    /// Create an in-memory store (tests and throwaway sessions).
    ///
    /// Limited to one connection: every SQLite in-memory connection is its
    /// own database.
    pub async fn new_in_memory() -> StorageResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:").map_err(|e| {
            StorageError::Connection {
                message: format!("Invalid database URL: {}", e),
            }
        })?;

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::Connection {
                message: format!("Failed to open in-memory database: {}", e),
            })?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations using embedded sqlx migrations
    async fn run_migrations(&self) -> StorageResult<()> {
        info!("Running database migrations...");

        MIGRATOR.run(&self.pool).await.map_err(|e| StorageError::Migration {
            message: format!("Failed to run migrations: {}", e),
        })?;

        info!("Database migrations completed successfully");
        Ok(())
    }

    /// Get the underlying pool for advanced queries
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ------------------------------------------------------------------
    // Outbox
    // ------------------------------------------------------------------

    /// Store a pending operation, superseding any earlier pending operation
    /// on the same remote row.
    pub async fn outbox_put(&self, record: &OutboxRecord) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;

        let superseded = sqlx::query("DELETE FROM outbox WHERE remote_table = ? AND entity_id = ?")
            .bind(&record.remote_table)
            .bind(&record.entity_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO outbox (id, op, remote_table, entity_id, payload, attempts, last_error, next_attempt_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.id)
        .bind(&record.op)
        .bind(&record.remote_table)
        .bind(&record.entity_id)
        .bind(&record.payload)
        .bind(record.attempts as i64)
        .bind(&record.last_error)
        .bind(stamp(record.next_attempt_at))
        .bind(stamp(record.created_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if superseded > 0 {
            debug!(
                table = %record.remote_table,
                entity_id = %record.entity_id,
                superseded,
                "Outbox operation replaced pending ones"
            );
        }
        Ok(())
    }

    /// Operations due at `now`, oldest first.
    pub async fn outbox_due(&self, now: DateTime<Utc>, limit: u32) -> StorageResult<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, op, remote_table, entity_id, payload, attempts, last_error, next_attempt_at, created_at
            FROM outbox
            WHERE next_attempt_at <= ?
            ORDER BY created_at ASC, rowid ASC
            LIMIT ?
            "#,
        )
        .bind(stamp(now))
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Every pending operation, oldest first.
    pub async fn outbox_all(&self) -> StorageResult<Vec<OutboxRecord>> {
        let rows: Vec<OutboxRow> = sqlx::query_as(
            r#"
            SELECT id, op, remote_table, entity_id, payload, attempts, last_error, next_attempt_at, created_at
            FROM outbox
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|r| r.into()).collect())
    }

    /// Drop a delivered (or abandoned) operation.
    pub async fn outbox_remove(&self, id: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM outbox WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record a failed attempt and when to try again.
    pub async fn outbox_reschedule(
        &self,
        id: &str,
        attempts: u32,
        error: &str,
        next_attempt_at: DateTime<Utc>,
    ) -> StorageResult<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET attempts = ?, last_error = ?, next_attempt_at = ?
            WHERE id = ?
            "#,
        )
        .bind(attempts as i64)
        .bind(error)
        .bind(stamp(next_attempt_at))
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Number of pending operations.
    pub async fn outbox_len(&self) -> StorageResult<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM outbox")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    /// Forget every pending operation.
    pub async fn outbox_clear(&self) -> StorageResult<()> {
        sqlx::query("DELETE FROM outbox").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn all_keys(&self) -> StorageResult<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM kv_store ORDER BY key")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.into_iter().map(|(key,)| key).collect())
    }

    async fn multi_remove(&self, keys: &[String]) -> StorageResult<()> {
        let mut tx = self.pool.begin().await?;
        for key in keys {
            sqlx::query("DELETE FROM kv_store WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

// Internal row type for SQLx mapping
#[derive(sqlx::FromRow)]
struct OutboxRow {
    id: String,
    op: String,
    remote_table: String,
    entity_id: String,
    payload: Option<String>,
    attempts: i64,
    last_error: Option<String>,
    next_attempt_at: String,
    created_at: String,
}

fn parse_stored_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        Self {
            id: row.id,
            op: row.op,
            remote_table: row.remote_table,
            entity_id: row.entity_id,
            payload: row.payload,
            attempts: row.attempts.max(0) as u32,
            last_error: row.last_error,
            next_attempt_at: parse_stored_time(&row.next_attempt_at),
            created_at: parse_stored_time(&row.created_at),
        }
    }
}
