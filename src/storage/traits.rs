//! Storage traits and error types
//!
//! This module defines the seams between the crawler and its durable state:
//! the relational `Persister`, the `WorkQueue` handing descriptors to workers,
//! and the `StateCache` recording per-repository progress.

use crate::api::{Commit, Release, Repository, RepositoryDescriptor};
use crate::storage::PersistOutcome;
use async_trait::async_trait;
use rusqlite::ErrorCode;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Run not found: {0}")]
    RunNotFound(i64),

    #[error("Blocking storage task failed: {0}")]
    Blocking(#[from] tokio::task::JoinError),
}

impl StorageError {
    /// Returns true for failures worth retrying the whole transaction
    ///
    /// Lock contention (`SQLITE_BUSY`, `SQLITE_LOCKED`) and I/O failures are
    /// transient. Everything else, including constraint violations, is fatal
    /// for the repository being written.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                ErrorCode::DatabaseBusy
                    | ErrorCode::DatabaseLocked
                    | ErrorCode::SystemIoFailure
                    | ErrorCode::CannotOpen
            ),
            Self::Io(_) => true,
            _ => false,
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Transactional writer for one repository's rows
///
/// Implementations are blocking; async callers run them on the blocking
/// thread pool.
pub trait Persister: Send + Sync {
    /// Upserts a repository with its releases and commits in one transaction
    ///
    /// # Arguments
    ///
    /// * `repository` - Repository row, keyed by external id
    /// * `releases` - Release rows, keyed by (repository, tag)
    /// * `commits` - Commit rows, keyed globally by SHA
    ///
    /// # Returns
    ///
    /// * `Ok(PersistOutcome)` - The repository's row id and write counts
    /// * `Err(StorageError)` - The transaction was rolled back
    fn upsert(
        &self,
        repository: &Repository,
        releases: &[Release],
        commits: &[Commit],
    ) -> StorageResult<PersistOutcome>;
}

/// Durable FIFO of repository descriptors
///
/// `pop` is atomic per item: no two consumers ever receive the same entry.
#[async_trait]
pub trait WorkQueue: Send + Sync {
    async fn push(&self, item: &RepositoryDescriptor) -> StorageResult<()>;

    /// Waits up to `timeout` for an item
    async fn pop(&self, timeout: Duration) -> StorageResult<Option<RepositoryDescriptor>>;

    async fn size(&self) -> StorageResult<usize>;
}

/// TTL-keyed per-repository progress markers
pub trait StateCache: Send + Sync {
    fn is_processed(&self, full_name: &str) -> StorageResult<bool>;

    fn mark_processed(&self, full_name: &str, ttl: Duration) -> StorageResult<()>;

    /// The incremental cursor: newest release tag already ingested
    fn get_last_release(&self, full_name: &str) -> StorageResult<Option<String>>;

    fn set_last_release(&self, full_name: &str, tag: &str, ttl: Duration) -> StorageResult<()>;
}
