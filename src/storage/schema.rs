//! Database schema definitions
//!
//! Every table lives in one SQLite file: the ingested rows, the durable work
//! queue and the TTL state cache.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl runs
CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL,
    succeeded INTEGER NOT NULL DEFAULT 0,
    failed INTEGER NOT NULL DEFAULT 0,
    skipped INTEGER NOT NULL DEFAULT 0
);

-- Ingested repositories
CREATE TABLE IF NOT EXISTS repositories (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    external_id INTEGER NOT NULL UNIQUE,
    name TEXT NOT NULL,
    full_name TEXT NOT NULL,
    url TEXT NOT NULL,
    star_count INTEGER NOT NULL DEFAULT 0,
    language TEXT,
    created_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_repositories_full_name ON repositories(full_name);

-- Releases, published or synthesized from tags
CREATE TABLE IF NOT EXISTS releases (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER NOT NULL REFERENCES repositories(id),
    name TEXT,
    tag TEXT NOT NULL,
    published_at TEXT,
    url TEXT,
    body TEXT,
    UNIQUE(repo_id, tag)
);

-- Commits, unique across all repositories
CREATE TABLE IF NOT EXISTS commits (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    repo_id INTEGER REFERENCES repositories(id),
    release_id INTEGER REFERENCES releases(id),
    sha TEXT NOT NULL UNIQUE,
    message TEXT,
    author_name TEXT,
    authored_at TEXT,
    url TEXT
);

CREATE INDEX IF NOT EXISTS idx_commits_repo ON commits(repo_id);
CREATE INDEX IF NOT EXISTS idx_commits_release ON commits(release_id);

-- Durable FIFO of JSON repository descriptors
CREATE TABLE IF NOT EXISTS work_queue (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    queue TEXT NOT NULL,
    payload TEXT NOT NULL,
    enqueued_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_work_queue_queue ON work_queue(queue, id);

-- Key/value entries with expiry (unix millis)
CREATE TABLE IF NOT EXISTS state_cache (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    expires_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_state_cache_expiry ON state_cache(expires_at);
"#;

/// Initializes the database schema
///
/// # Arguments
///
/// * `conn` - The database connection
///
/// # Returns
///
/// * `Ok(())` - Schema initialized successfully
/// * `Err(rusqlite::Error)` - Failed to initialize schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}
