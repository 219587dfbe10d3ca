//! Storage module for persisting crawl data
//!
//! This module handles all database operations for the crawler, including:
//! - SQLite connection setup and schema management
//! - Transactional, retrying repository/release/commit upserts
//! - The durable work queue shared by discovery and workers
//! - The TTL state cache behind incremental fetching
//! - Run tracking and statistics

mod cache;
mod queue;
mod schema;
mod sqlite;
mod traits;

pub use cache::SqliteStateCache;
pub use queue::SqliteWorkQueue;
pub use sqlite::{RetryPolicy, SqliteStore};
pub use traits::{Persister, StateCache, StorageError, StorageResult, WorkQueue};

use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

/// How long a connection waits on a locked database before reporting busy
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a connection with the crawler's PRAGMAs and schema applied
///
/// # Arguments
///
/// * `path` - Path to the SQLite database file
/// * `busy_timeout` - Wait applied before a locked database yields `SQLITE_BUSY`
///
/// # Returns
///
/// * `Ok(Connection)` - Successfully opened/created database
/// * `Err(rusqlite::Error)` - Failed to open database
pub fn open_connection(path: &Path, busy_timeout: Duration) -> Result<Connection, rusqlite::Error> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(busy_timeout)?;

    conn.execute_batch(
        "
        PRAGMA journal_mode = WAL;
        PRAGMA synchronous = NORMAL;
        PRAGMA foreign_keys = ON;
        PRAGMA temp_store = MEMORY;
    ",
    )?;

    schema::initialize_schema(&conn)?;

    Ok(conn)
}

/// Write counts for one repository upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PersistOutcome {
    pub repo_id: i64,
    /// Release rows inserted or whose body changed
    pub releases_written: usize,
    /// Commit rows newly inserted (duplicates by SHA are not counted)
    pub commits_inserted: usize,
}

/// Final tally of a crawl run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
}

impl RunTally {
    pub fn total(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }

    pub fn merge(&mut self, other: RunTally) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Represents a crawl run
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub id: i64,
    pub started_at: String,
    pub finished_at: Option<String>,
    pub config_hash: String,
    pub status: RunStatus,
    pub tally: RunTally,
}

/// Status of a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Row counts across the ingested tables
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub repositories: u64,
    pub releases: u64,
    pub commits: u64,
}
