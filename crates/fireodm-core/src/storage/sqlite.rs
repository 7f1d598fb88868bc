use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value as JsonValue;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::migrations::MIGRATIONS;
use super::{Driver, Record};
use crate::error::{StorageError, StorageResult};

const BUSY_TIMEOUT: Duration = Duration::from_millis(250);
const MAX_RETRIES: usize = 3;

/// A driver storing document bodies as JSON text in a SQLite database.
///
/// Calls run on the blocking pool. Busy or locked databases are retried
/// with exponential backoff before the error is surfaced. A call whose
/// future is dropped (for example by a timeout) before it reaches the
/// connection never executes; one already executing runs to completion.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDriver {
    /// Open (or create) a database at the given path and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if the file cannot be opened or
    /// migrated.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for tests).
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Database`] if migrations fail.
    pub fn open_in_memory() -> StorageResult<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> StorageResult<Self> {
        let driver = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        driver.apply_migrations()?;
        Ok(driver)
    }

    fn apply_migrations(&self) -> StorageResult<()> {
        let conn = lock(&self.conn)?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            )",
            [],
        )?;

        let mut stmt = conn.prepare("SELECT version FROM schema_migrations ORDER BY version")?;
        let applied: Vec<u32> = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        for migration in MIGRATIONS {
            if !applied.contains(&migration.version) {
                log::info!(
                    "Applying migration {} ({})",
                    migration.version,
                    migration.name
                );
                conn.execute_batch(migration.sql)?;
                conn.execute(
                    "INSERT INTO schema_migrations (version, name) VALUES (?1, ?2)",
                    rusqlite::params![migration.version, migration.name],
                )?;
            }
        }

        Ok(())
    }

    /// Run `op` against the connection on the blocking pool, retrying
    /// transient failures.
    async fn run<T, F>(&self, operation: &'static str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: Fn(&Connection) -> StorageResult<T> + Send + Sync + 'static,
    {
        let op = Arc::new(op);
        let abandoned = AbandonOnDrop::default();
        let attempt = || {
            let conn = Arc::clone(&self.conn);
            let op = Arc::clone(&op);
            let abandoned = Arc::clone(&abandoned.0);
            async move {
                tokio::task::spawn_blocking(move || {
                    let conn = lock(&conn)?;
                    if abandoned.load(Ordering::Acquire) {
                        log::debug!("SQLite {operation} abandoned before it ran");
                        return Err(StorageError::Unavailable(format!(
                            "{operation} abandoned by caller"
                        )));
                    }
                    op(&conn)
                })
                .await
                .map_err(|e| StorageError::Unavailable(format!("{operation} task failed: {e}")))?
            }
        };

        attempt
            .retry(
                ExponentialBuilder::default()
                    .with_min_delay(Duration::from_millis(10))
                    .with_max_times(MAX_RETRIES),
            )
            .when(StorageError::is_transient)
            .notify(|err, delay| {
                log::warn!("SQLite {operation} failed ({err}); retrying in {delay:?}");
            })
            .await
    }
}

/// Raises its flag when the owning future is dropped, so a blocking task
/// still queued behind the connection lock knows nobody awaits it.
#[derive(Debug, Default)]
struct AbandonOnDrop(Arc<AtomicBool>);

impl Drop for AbandonOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

fn lock(conn: &Mutex<Connection>) -> StorageResult<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| StorageError::Unavailable("connection mutex poisoned".to_string()))
}

#[async_trait]
impl Driver for SqliteDriver {
    async fn put(&self, collection: &str, id: &str, body: &JsonValue) -> StorageResult<()> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let body = serde_json::to_string(body)?;
        self.run("put", move |conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO documents (collection, id, body, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)
                 ON CONFLICT(collection, id) DO UPDATE SET
                    body = excluded.body,
                    updated_at = excluded.updated_at",
                rusqlite::params![collection, id, body, now],
            )?;
            Ok(())
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> StorageResult<Option<JsonValue>> {
        let (collection, id) = (collection.to_string(), id.to_string());
        let body = self
            .run("get", move |conn| {
                Ok(conn
                    .query_row(
                        "SELECT body FROM documents WHERE collection = ?1 AND id = ?2",
                        rusqlite::params![collection, id],
                        |row| row.get::<_, String>(0),
                    )
                    .optional()?)
            })
            .await?;

        body.map(|text| serde_json::from_str(&text).map_err(StorageError::from))
            .transpose()
    }

    async fn delete(&self, collection: &str, id: &str) -> StorageResult<bool> {
        let (collection, id) = (collection.to_string(), id.to_string());
        self.run("delete", move |conn| {
            let removed = conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
            )?;
            Ok(removed > 0)
        })
        .await
    }

    async fn list(&self, collection: &str) -> StorageResult<Vec<Record>> {
        let collection = collection.to_string();
        let rows = self
            .run("list", move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, body FROM documents WHERE collection = ?1 ORDER BY id",
                )?;
                let rows = stmt
                    .query_map([&collection], |row| {
                        Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, body)| {
                Ok(Record {
                    id,
                    body: serde_json::from_str(&body)?,
                })
            })
            .collect()
    }
}
