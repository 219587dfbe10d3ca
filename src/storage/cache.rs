//! Incremental state cache backed by the `state_cache` table
//!
//! Keys follow `cache:processed:{full_name}` and
//! `cache:last_release:{full_name}`. Writes replace the entry wholesale;
//! expired entries read as absent until `purge_expired` removes them.

use crate::storage::traits::{StateCache, StorageResult};
use crate::storage::{open_connection, DEFAULT_BUSY_TIMEOUT};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

pub fn processed_key(full_name: &str) -> String {
    format!("cache:processed:{}", full_name)
}

pub fn last_release_key(full_name: &str) -> String {
    format!("cache:last_release:{}", full_name)
}

pub struct SqliteStateCache {
    conn: Mutex<Connection>,
}

impl SqliteStateCache {
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = open_connection(path, DEFAULT_BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Reads a live entry
    ///
    /// # Arguments
    ///
    /// * `key` - Full cache key
    /// * `now_ms` - Current unix time in milliseconds
    pub fn get_at(&self, key: &str, now_ms: i64) -> StorageResult<Option<String>> {
        let value = self
            .lock()
            .query_row(
                "SELECT value FROM state_cache WHERE key = ?1 AND expires_at > ?2",
                params![key, now_ms],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    /// Writes an entry expiring `ttl` after `now_ms`
    pub fn set_at(&self, key: &str, value: &str, ttl: Duration, now_ms: i64) -> StorageResult<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_ms.saturating_add(ttl_ms);
        self.lock().execute(
            "INSERT OR REPLACE INTO state_cache (key, value, expires_at) VALUES (?1, ?2, ?3)",
            params![key, value, expires_at],
        )?;
        Ok(())
    }

    /// Deletes entries that expired at or before `now_ms`
    pub fn purge_expired_at(&self, now_ms: i64) -> StorageResult<usize> {
        let removed = self.lock().execute(
            "DELETE FROM state_cache WHERE expires_at <= ?1",
            params![now_ms],
        )?;
        Ok(removed)
    }

    pub fn purge_expired(&self) -> StorageResult<usize> {
        self.purge_expired_at(now_millis())
    }

    pub fn clear(&self) -> StorageResult<usize> {
        let removed = self.lock().execute("DELETE FROM state_cache", [])?;
        Ok(removed)
    }

    pub fn len(&self) -> StorageResult<usize> {
        let count: i64 = self.lock().query_row(
            "SELECT COUNT(*) FROM state_cache WHERE expires_at > ?1",
            params![now_millis()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.len()? == 0)
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StateCache for SqliteStateCache {
    fn is_processed(&self, full_name: &str) -> StorageResult<bool> {
        Ok(self
            .get_at(&processed_key(full_name), now_millis())?
            .is_some())
    }

    fn mark_processed(&self, full_name: &str, ttl: Duration) -> StorageResult<()> {
        self.set_at(&processed_key(full_name), "1", ttl, now_millis())
    }

    fn get_last_release(&self, full_name: &str) -> StorageResult<Option<String>> {
        self.get_at(&last_release_key(full_name), now_millis())
    }

    fn set_last_release(&self, full_name: &str, tag: &str, ttl: Duration) -> StorageResult<()> {
        self.set_at(&last_release_key(full_name), tag, ttl, now_millis())
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
