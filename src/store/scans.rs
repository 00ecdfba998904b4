//! Scan rows, log rows and report snapshots.

use super::{init_db, init_schema, NewScan, ScanStore, StoreError};
use crate::scan::{LogEntry, ScanSnapshot, ScanStatus};
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub fn insert_scan(conn: &Connection, scan: &NewScan) -> Result<String, StoreError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now().to_rfc3339();
    let pr_number = scan.pr_number.map(|n| i64::try_from(n).unwrap_or(i64::MAX));

    conn.execute(
        "INSERT INTO scan_result (id, repo_url, commit_sha, pr_number, status, max_retries, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        params![
            id,
            scan.repo_url,
            scan.commit_sha,
            pr_number,
            ScanStatus::Pending.as_str(),
            i64::from(scan.max_retries),
            now
        ],
    )?;
    Ok(id)
}

pub fn load_status(conn: &Connection, scan_id: &str) -> Result<ScanStatus, StoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM scan_result WHERE id = ?1",
            params![scan_id],
            |row| row.get(0),
        )
        .optional()?;
    match raw {
        Some(raw) => Ok(raw.parse()?),
        None => Err(StoreError::NotFound(scan_id.to_string())),
    }
}

/// Conditional terminal write: a `cancelled` row is never touched.
pub fn finalize_status(
    conn: &Connection,
    scan_id: &str,
    status: ScanStatus,
) -> Result<bool, StoreError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE scan_result SET status = ?2, ended_at = ?3, updated_at = ?3
         WHERE id = ?1 AND status != 'cancelled'",
        params![scan_id, status.as_str(), now],
    )?;
    if updated == 0 {
        // Distinguish "already cancelled" from "no such scan".
        load_status(conn, scan_id)?;
    }
    Ok(updated > 0)
}

pub fn request_cancel(conn: &Connection, scan_id: &str) -> Result<bool, StoreError> {
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE scan_result SET status = 'cancelled', ended_at = ?2, updated_at = ?2
         WHERE id = ?1 AND status IN ('pending', 'running')",
        params![scan_id, now],
    )?;
    if updated == 0 {
        load_status(conn, scan_id)?;
    }
    Ok(updated > 0)
}

pub fn append_logs(
    conn: &mut Connection,
    scan_id: &str,
    first_seq: usize,
    logs: &[LogEntry],
) -> Result<usize, StoreError> {
    let now = Utc::now().to_rfc3339();
    let tx = conn.transaction()?;
    let mut inserted = 0;
    {
        let mut stmt = tx.prepare(
            "INSERT OR IGNORE INTO scan_log
                 (scan_id, seq, step, tokens_input, tokens_output, model_name, message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )?;
        for (offset, entry) in logs.iter().enumerate() {
            let seq = i64::try_from(first_seq + offset).unwrap_or(i64::MAX);
            inserted += stmt.execute(params![
                scan_id,
                seq,
                entry.step,
                i64::try_from(entry.tokens_input).unwrap_or(i64::MAX),
                i64::try_from(entry.tokens_output).unwrap_or(i64::MAX),
                entry.model_name,
                entry.message,
                now
            ])?;
        }
    }
    tx.commit()?;
    Ok(inserted)
}

pub fn load_logs(conn: &Connection, scan_id: &str) -> Result<Vec<LogEntry>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT step, tokens_input, tokens_output, model_name, message
         FROM scan_log WHERE scan_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map(params![scan_id], |row| {
        let tokens_input: i64 = row.get(1)?;
        let tokens_output: i64 = row.get(2)?;
        Ok(LogEntry {
            step: row.get(0)?,
            tokens_input: u64::try_from(tokens_input).unwrap_or_default(),
            tokens_output: u64::try_from(tokens_output).unwrap_or_default(),
            model_name: row.get(3)?,
            message: row.get(4)?,
        })
    })?;
    Ok(rows.collect::<Result<Vec<_>, _>>()?)
}

pub fn count_logs(conn: &Connection, scan_id: &str) -> Result<usize, StoreError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM scan_log WHERE scan_id = ?1",
        params![scan_id],
        |row| row.get(0),
    )?;
    Ok(usize::try_from(count).unwrap_or_default())
}

pub fn save_snapshot(
    conn: &Connection,
    scan_id: &str,
    snapshot: &ScanSnapshot,
) -> Result<(), StoreError> {
    let report = serde_json::to_string(snapshot)?;
    let now = Utc::now().to_rfc3339();
    let updated = conn.execute(
        "UPDATE scan_result SET report_data = ?2, updated_at = ?3 WHERE id = ?1",
        params![scan_id, report, now],
    )?;
    if updated == 0 {
        return Err(StoreError::NotFound(scan_id.to_string()));
    }
    Ok(())
}

pub fn load_snapshot(conn: &Connection, scan_id: &str) -> Result<Option<ScanSnapshot>, StoreError> {
    let report: Option<Option<String>> = conn
        .query_row(
            "SELECT report_data FROM scan_result WHERE id = ?1",
            params![scan_id],
            |row| row.get(0),
        )
        .optional()?;
    match report {
        None => Err(StoreError::NotFound(scan_id.to_string())),
        Some(None) => Ok(None),
        Some(Some(json)) => Ok(Some(serde_json::from_str(&json)?)),
    }
}

/// [`ScanStore`] over one SQLite connection.
pub struct SqliteScanStore {
    conn: Mutex<Connection>,
}

impl SqliteScanStore {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        Ok(Self {
            conn: Mutex::new(init_db(db_path)?),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl ScanStore for SqliteScanStore {
    fn create_scan(&self, scan: &NewScan) -> Result<String, StoreError> {
        insert_scan(&self.conn.lock(), scan)
    }

    fn load_status(&self, scan_id: &str) -> Result<ScanStatus, StoreError> {
        load_status(&self.conn.lock(), scan_id)
    }

    fn finalize_status(&self, scan_id: &str, status: ScanStatus) -> Result<bool, StoreError> {
        finalize_status(&self.conn.lock(), scan_id, status)
    }

    fn request_cancel(&self, scan_id: &str) -> Result<bool, StoreError> {
        request_cancel(&self.conn.lock(), scan_id)
    }

    fn append_logs(
        &self,
        scan_id: &str,
        first_seq: usize,
        logs: &[LogEntry],
    ) -> Result<usize, StoreError> {
        append_logs(&mut self.conn.lock(), scan_id, first_seq, logs)
    }

    fn load_logs(&self, scan_id: &str) -> Result<Vec<LogEntry>, StoreError> {
        load_logs(&self.conn.lock(), scan_id)
    }

    fn count_logs(&self, scan_id: &str) -> Result<usize, StoreError> {
        count_logs(&self.conn.lock(), scan_id)
    }

    fn save_snapshot(&self, scan_id: &str, snapshot: &ScanSnapshot) -> Result<(), StoreError> {
        save_snapshot(&self.conn.lock(), scan_id, snapshot)
    }

    fn load_snapshot(&self, scan_id: &str) -> Result<Option<ScanSnapshot>, StoreError> {
        load_snapshot(&self.conn.lock(), scan_id)
    }
}
