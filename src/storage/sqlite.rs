//! SQLite store for ingested rows and run bookkeeping
//!
//! `SqliteStore` keeps a small stack of idle connections so several workers
//! can run transactions at once; SQLite's own locking serializes the writes.

use crate::api::{Commit, Release, Repository};
use crate::storage::traits::{Persister, StorageError, StorageResult};
use crate::storage::{
    open_connection, PersistOutcome, RunRecord, RunStatus, RunTally, StoreStats,
    DEFAULT_BUSY_TIMEOUT,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Retry policy for transient transaction failures
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay: Duration::from_secs(1),
        }
    }
}

/// SQLite storage backend
pub struct SqliteStore {
    path: PathBuf,
    busy_timeout: Duration,
    retry: RetryPolicy,
    idle: Mutex<Vec<Connection>>,
}

impl SqliteStore {
    /// Opens (or creates) the database and initializes the schema
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the SQLite database file
    ///
    /// # Returns
    ///
    /// * `Ok(SqliteStore)` - Successfully opened/created database
    /// * `Err(StorageError)` - Failed to open database
    pub fn open(path: &Path) -> StorageResult<Self> {
        Self::open_with(path, DEFAULT_BUSY_TIMEOUT, RetryPolicy::default())
    }

    pub fn open_with(
        path: &Path,
        busy_timeout: Duration,
        retry: RetryPolicy,
    ) -> StorageResult<Self> {
        let conn = open_connection(path, busy_timeout)?;
        Ok(Self {
            path: path.to_path_buf(),
            busy_timeout,
            retry,
            idle: Mutex::new(vec![conn]),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ===== Run Management =====

    pub fn create_run(&self, config_hash: &str) -> StorageResult<i64> {
        self.with_connection(|conn| {
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO runs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
                params![now, config_hash, RunStatus::Running.to_db_string()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Stamps a run with its final status and tally
    pub fn finish_run(&self, run_id: i64, status: RunStatus, tally: RunTally) -> StorageResult<()> {
        self.with_connection(|conn| {
            let now = Utc::now().to_rfc3339();
            let updated = conn.execute(
                "UPDATE runs SET status = ?1, finished_at = ?2, succeeded = ?3, failed = ?4, skipped = ?5
                 WHERE id = ?6",
                params![
                    status.to_db_string(),
                    now,
                    tally.succeeded as i64,
                    tally.failed as i64,
                    tally.skipped as i64,
                    run_id
                ],
            )?;
            if updated == 0 {
                return Err(StorageError::RunNotFound(run_id));
            }
            Ok(())
        })
    }

    pub fn get_run(&self, run_id: i64) -> StorageResult<RunRecord> {
        self.with_connection(|conn| {
            conn.query_row(
                "SELECT id, started_at, finished_at, config_hash, status, succeeded, failed, skipped
                 FROM runs WHERE id = ?1",
                params![run_id],
                map_run,
            )
            .optional()?
            .ok_or(StorageError::RunNotFound(run_id))
        })
    }

    /// Most recent runs, newest first
    pub fn recent_runs(&self, limit: usize) -> StorageResult<Vec<RunRecord>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, started_at, finished_at, config_hash, status, succeeded, failed, skipped
                 FROM runs ORDER BY id DESC LIMIT ?1",
            )?;
            let runs = stmt
                .query_map(params![limit as i64], map_run)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(runs)
        })
    }

    // ===== Statistics =====

    pub fn stats(&self) -> StorageResult<StoreStats> {
        self.with_connection(|conn| {
            let count = |table: &str| -> StorageResult<u64> {
                let n: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                        row.get(0)
                    })?;
                Ok(n as u64)
            };
            Ok(StoreStats {
                repositories: count("repositories")?,
                releases: count("releases")?,
                commits: count("commits")?,
            })
        })
    }

    /// Release tags stored for a repository, newest published first
    pub fn release_tags(&self, full_name: &str) -> StorageResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT r.tag FROM releases r
                 JOIN repositories p ON p.id = r.repo_id
                 WHERE p.full_name = ?1
                 ORDER BY r.published_at DESC, r.id ASC",
            )?;
            let tags = stmt
                .query_map(params![full_name], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(tags)
        })
    }

    /// Commit SHAs linked to a release tag of a repository
    pub fn commits_for_release(&self, full_name: &str, tag: &str) -> StorageResult<Vec<String>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(
                "SELECT c.sha FROM commits c
                 JOIN releases r ON r.id = c.release_id
                 JOIN repositories p ON p.id = r.repo_id
                 WHERE p.full_name = ?1 AND r.tag = ?2
                 ORDER BY c.sha",
            )?;
            let shas = stmt
                .query_map(params![full_name, tag], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(shas)
        })
    }

    pub fn star_count(&self, external_id: i64) -> StorageResult<Option<i64>> {
        self.with_connection(|conn| {
            let stars = conn
                .query_row(
                    "SELECT star_count FROM repositories WHERE external_id = ?1",
                    params![external_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(stars)
        })
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut Connection) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let idle = self.idle_connections().pop();
        let mut conn = match idle {
            Some(conn) => conn,
            None => open_connection(&self.path, self.busy_timeout)?,
        };

        let result = f(&mut conn);
        self.idle_connections().push(conn);
        result
    }

    fn idle_connections(&self) -> MutexGuard<'_, Vec<Connection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Persister for SqliteStore {
    fn upsert(
        &self,
        repository: &Repository,
        releases: &[Release],
        commits: &[Commit],
    ) -> StorageResult<PersistOutcome> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.with_connection(|conn| write_bundle(conn, repository, releases, commits)) {
                Ok(outcome) => return Ok(outcome),
                Err(e) if e.is_transient() && attempt < attempts => {
                    tracing::warn!(
                        full_name = %repository.full_name,
                        attempt,
                        "Transient database error, retrying: {}",
                        e
                    );
                    std::thread::sleep(self.retry.delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Writes one repository's rows in a single immediate transaction
///
/// The transaction rolls back when dropped on any error path.
fn write_bundle(
    conn: &mut Connection,
    repository: &Repository,
    releases: &[Release],
    commits: &[Commit],
) -> StorageResult<PersistOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let repo_id: i64 = tx.query_row(
        "INSERT INTO repositories (external_id, name, full_name, url, star_count, language, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(external_id) DO UPDATE SET star_count = excluded.star_count
         RETURNING id",
        params![
            repository.external_id,
            repository.name,
            repository.full_name,
            repository.url,
            repository.star_count,
            repository.language,
            timestamp(repository.created_at),
        ],
        |row| row.get(0),
    )?;

    let mut releases_written = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO releases (repo_id, name, tag, published_at, url, body)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(repo_id, tag) DO UPDATE SET body = excluded.body
             WHERE releases.body IS NOT excluded.body",
        )?;
        for release in releases {
            releases_written += stmt.execute(params![
                repo_id,
                release.name,
                release.tag,
                timestamp(release.published_at),
                release.url,
                release.body,
            ])?;
        }
    }

    let release_ids: HashMap<String, i64> = {
        let mut stmt = tx.prepare_cached("SELECT tag, id FROM releases WHERE repo_id = ?1")?;
        let rows = stmt
            .query_map(params![repo_id], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<HashMap<_, _>, _>>()?;
        rows
    };

    let mut commits_inserted = 0;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO commits (repo_id, release_id, sha, message, author_name, authored_at, url)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(sha) DO NOTHING",
        )?;
        for commit in commits {
            let release_id = commit
                .release_tag
                .as_ref()
                .and_then(|tag| release_ids.get(tag))
                .copied();
            commits_inserted += stmt.execute(params![
                repo_id,
                release_id,
                commit.sha,
                commit.message,
                commit.author_name,
                timestamp(commit.authored_at),
                commit.url,
            ])?;
        }
    }

    tx.commit()?;

    Ok(PersistOutcome {
        repo_id,
        releases_written,
        commits_inserted,
    })
}

fn timestamp(value: Option<DateTime<Utc>>) -> Option<String> {
    value.map(|dt| dt.to_rfc3339())
}

fn map_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RunRecord> {
    Ok(RunRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: RunStatus::from_db_string(&row.get::<_, String>(4)?).unwrap_or(RunStatus::Failed),
        tally: RunTally {
            succeeded: row.get::<_, i64>(5)? as u64,
            failed: row.get::<_, i64>(6)? as u64,
            skipped: row.get::<_, i64>(7)? as u64,
        },
    })
}
