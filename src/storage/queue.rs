//! Durable work queue backed by the `work_queue` table
//!
//! Items are JSON repository descriptors. Several named queues may share the
//! table; each `SqliteWorkQueue` reads and writes only its own.

use crate::api::RepositoryDescriptor;
use crate::storage::traits::{StorageResult, WorkQueue};
use crate::storage::{open_connection, DEFAULT_BUSY_TIMEOUT};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Default queue name
pub const DEFAULT_QUEUE: &str = "repositories";

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);

pub struct SqliteWorkQueue {
    conn: Arc<Mutex<Connection>>,
    name: String,
    poll_interval: Duration,
}

impl SqliteWorkQueue {
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_named(path, DEFAULT_QUEUE)
    }

    pub fn open_named(path: &Path, name: &str) -> StorageResult<Self> {
        let conn = open_connection(path, DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            name: name.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
        })
    }

    /// Sets how often `pop` re-checks an empty queue
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Removes and returns the oldest item without waiting
    ///
    /// The select and delete happen in one statement, so concurrent
    /// consumers on any connection never receive the same row. A payload
    /// that fails to decode is still removed and reported as
    /// `StorageError::Serialization`.
    pub fn try_pop(&self) -> StorageResult<Option<RepositoryDescriptor>> {
        pop_row(&self.conn, &self.name)
    }

    /// Drops every pending item
    pub fn clear(&self) -> StorageResult<usize> {
        let removed = lock(&self.conn)
            .execute("DELETE FROM work_queue WHERE queue = ?1", params![self.name])?;
        Ok(removed)
    }

    pub fn len(&self) -> StorageResult<usize> {
        count_rows(&self.conn, &self.name)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    pub fn push_item(&self, item: &RepositoryDescriptor) -> StorageResult<()> {
        let payload = serde_json::to_string(item)?;
        insert_row(&self.conn, &self.name, &payload)
    }

    /// Runs a statement on the blocking pool so a busy database never
    /// stalls the async workers
    async fn blocking<T, F>(&self, f: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Mutex<Connection>, &str) -> StorageResult<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let name = self.name.clone();
        tokio::task::spawn_blocking(move || f(&conn, &name)).await?
    }
}

fn pop_row(conn: &Mutex<Connection>, name: &str) -> StorageResult<Option<RepositoryDescriptor>> {
    let payload: Option<String> = lock(conn)
        .query_row(
            "DELETE FROM work_queue
             WHERE id = (SELECT id FROM work_queue WHERE queue = ?1 ORDER BY id LIMIT 1)
             RETURNING payload",
            params![name],
            |row| row.get(0),
        )
        .optional()?;

    match payload {
        Some(json) => Ok(Some(serde_json::from_str(&json)?)),
        None => Ok(None),
    }
}

fn count_rows(conn: &Mutex<Connection>, name: &str) -> StorageResult<usize> {
    let count: i64 = lock(conn).query_row(
        "SELECT COUNT(*) FROM work_queue WHERE queue = ?1",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

fn insert_row(conn: &Mutex<Connection>, name: &str, payload: &str) -> StorageResult<()> {
    lock(conn).execute(
        "INSERT INTO work_queue (queue, payload, enqueued_at) VALUES (?1, ?2, ?3)",
        params![name, payload, Utc::now().to_rfc3339()],
    )?;
    Ok(())
}

fn lock(conn: &Mutex<Connection>) -> MutexGuard<'_, Connection> {
    conn.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl WorkQueue for SqliteWorkQueue {
    async fn push(&self, item: &RepositoryDescriptor) -> StorageResult<()> {
        let payload = serde_json::to_string(item)?;
        self.blocking(move |conn, name| insert_row(conn, name, &payload))
            .await
    }

    async fn pop(&self, timeout: Duration) -> StorageResult<Option<RepositoryDescriptor>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(item) = self.blocking(pop_row).await? {
                return Ok(Some(item));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn size(&self) -> StorageResult<usize> {
        self.blocking(count_rows).await
    }
}
