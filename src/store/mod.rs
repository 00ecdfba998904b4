//! SQLite-backed persistence for scans, their logs and snapshots.
//!
//! All data lives in a single database file at the path resolved by
//! [`crate::Config::db_path`]. The pipeline only sees the [`ScanStore`] trait;
//! other processes (the `cancel` command, a dashboard) write the same tables.

pub mod scans;

pub use scans::SqliteScanStore;

use crate::scan::{LogEntry, ScanSnapshot, ScanStatus, UnknownStatus};
use rusqlite::Connection;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("failed to encode snapshot: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("failed to prepare database directory: {0}")]
    Io(#[from] std::io::Error),

    #[error("scan {0} not found")]
    NotFound(String),

    #[error(transparent)]
    Status(#[from] UnknownStatus),
}

/// Fields recorded when a scan row is created.
#[derive(Debug, Clone, Default)]
pub struct NewScan {
    pub repo_url: String,
    pub commit_sha: Option<String>,
    pub pr_number: Option<u64>,
    pub max_retries: u32,
}

/// Durable scan state shared with other processes.
pub trait ScanStore: Send + Sync {
    /// Insert a `pending` scan and return its id.
    fn create_scan(&self, scan: &NewScan) -> Result<String, StoreError>;

    fn load_status(&self, scan_id: &str) -> Result<ScanStatus, StoreError>;

    /// Write a terminal status unless the scan is already `cancelled`.
    /// Returns whether the row was updated.
    fn finalize_status(&self, scan_id: &str, status: ScanStatus) -> Result<bool, StoreError>;

    /// External cancellation. Only non-terminal scans are affected.
    fn request_cancel(&self, scan_id: &str) -> Result<bool, StoreError>;

    /// Append `logs`, numbered from `first_seq`. Entries whose sequence
    /// number already exists are ignored. Returns the rows inserted.
    fn append_logs(
        &self,
        scan_id: &str,
        first_seq: usize,
        logs: &[LogEntry],
    ) -> Result<usize, StoreError>;

    fn load_logs(&self, scan_id: &str) -> Result<Vec<LogEntry>, StoreError>;

    fn count_logs(&self, scan_id: &str) -> Result<usize, StoreError>;

    fn save_snapshot(&self, scan_id: &str, snapshot: &ScanSnapshot) -> Result<(), StoreError>;

    fn load_snapshot(&self, scan_id: &str) -> Result<Option<ScanSnapshot>, StoreError>;
}

/// Open (creating if needed) the database at `db_path` and ensure the schema.
pub fn init_db(db_path: &Path) -> Result<Connection, StoreError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let conn = Connection::open(db_path)?;
    conn.execute_batch(
        "PRAGMA journal_mode=WAL;
         PRAGMA synchronous=NORMAL;",
    )?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "PRAGMA foreign_keys=ON;

         CREATE TABLE IF NOT EXISTS scan_result (
             id TEXT PRIMARY KEY,
             repo_url TEXT NOT NULL,
             commit_sha TEXT,
             pr_number INTEGER,
             status TEXT NOT NULL,
             max_retries INTEGER NOT NULL,
             report_data TEXT,
             created_at TEXT NOT NULL,
             updated_at TEXT NOT NULL,
             ended_at TEXT
         );

         CREATE TABLE IF NOT EXISTS scan_log (
             id INTEGER PRIMARY KEY AUTOINCREMENT,
             scan_id TEXT NOT NULL REFERENCES scan_result(id) ON DELETE CASCADE,
             seq INTEGER NOT NULL,
             step TEXT NOT NULL,
             tokens_input INTEGER NOT NULL DEFAULT 0,
             tokens_output INTEGER NOT NULL DEFAULT 0,
             model_name TEXT,
             message TEXT NOT NULL,
             created_at TEXT NOT NULL,
             UNIQUE (scan_id, seq)
         );",
    )?;
    Ok(())
}
