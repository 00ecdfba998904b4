//! Stage-boundary checkpoints and cancellation polling.

use super::{ScanContext, ScanSnapshot, ScanStatus, StageObserver};
use crate::error::PipelineError;
use crate::store::ScanStore;
use std::sync::Arc;
use tracing::{debug, info};

/// Persists progress after every stage and reports external cancellation.
///
/// Only log entries past the flushed watermark are written, so repeated
/// checkpoints with no new entries write no rows.
pub struct CheckpointRecorder {
    store: Arc<dyn ScanStore>,
    scan_id: String,
    flushed: usize,
}

impl CheckpointRecorder {
    pub fn new(store: Arc<dyn ScanStore>, scan_id: impl Into<String>) -> Self {
        Self {
            store,
            scan_id: scan_id.into(),
            flushed: 0,
        }
    }

    /// Number of log entries already written.
    pub fn flushed(&self) -> usize {
        self.flushed
    }

    /// Flush new logs and the snapshot, then re-read the persisted status.
    /// Returns [`PipelineError::Cancelled`] when the scan was cancelled
    /// externally.
    pub fn checkpoint(&mut self, ctx: &ScanContext) -> Result<(), PipelineError> {
        self.flush(ctx)?;

        if self.store.load_status(&self.scan_id)? == ScanStatus::Cancelled {
            info!(scan_id = %self.scan_id, "Scan was cancelled externally, stopping");
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Flush without checking for cancellation.
    pub fn flush(&mut self, ctx: &ScanContext) -> Result<(), PipelineError> {
        let logs = ctx.logs();
        if logs.len() > self.flushed {
            let pending = &logs[self.flushed..];
            let written = self.store.append_logs(&self.scan_id, self.flushed, pending)?;
            debug!(scan_id = %self.scan_id, written, "Flushed scan logs");
            self.flushed = logs.len();
        }

        self.store
            .save_snapshot(&self.scan_id, &ScanSnapshot::capture(ctx))?;
        Ok(())
    }
}

impl StageObserver for CheckpointRecorder {
    fn stage_completed(&mut self, ctx: &ScanContext) -> Result<(), PipelineError> {
        self.checkpoint(ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::{LogEntry, ScanJob, STEP_ECOSYSTEM, STEP_REMEDIATION};
    use crate::store::{NewScan, SqliteScanStore};

    fn setup() -> (Arc<SqliteScanStore>, ScanContext) {
        let store = Arc::new(SqliteScanStore::open_in_memory().unwrap());
        let id = store.create_scan(&NewScan::default()).unwrap();
        let job: ScanJob = serde_json::from_str(r#"{"repo_path": "/repo"}"#).unwrap();
        (store, ScanContext::new(id, &job, 3))
    }

    #[test]
    fn repeated_checkpoints_write_no_duplicate_logs() {
        let (store, mut ctx) = setup();
        let mut recorder = CheckpointRecorder::new(store.clone(), ctx.scan_id.clone());

        ctx.push_log(LogEntry::new(STEP_ECOSYSTEM, "Resolved 1 extensions"));
        recorder.checkpoint(&ctx).unwrap();
        recorder.checkpoint(&ctx).unwrap();
        assert_eq!(store.count_logs(&ctx.scan_id).unwrap(), 1);

        ctx.push_log(LogEntry::new(STEP_REMEDIATION, "Generated 0 fixes"));
        recorder.checkpoint(&ctx).unwrap();
        assert_eq!(store.count_logs(&ctx.scan_id).unwrap(), 2);
        assert_eq!(recorder.flushed(), 2);

        let snapshot = store.load_snapshot(&ctx.scan_id).unwrap().unwrap();
        assert_eq!(snapshot.logs.len(), 2);
    }

    #[test]
    fn cancellation_is_reported_after_flushing() {
        let (store, mut ctx) = setup();
        let mut recorder = CheckpointRecorder::new(store.clone(), ctx.scan_id.clone());
        store.request_cancel(&ctx.scan_id).unwrap();

        ctx.push_log(LogEntry::new(STEP_ECOSYSTEM, "Resolved 1 extensions"));
        let err = recorder.stage_completed(&ctx).unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(store.count_logs(&ctx.scan_id).unwrap(), 1);
        assert_eq!(store.load_status(&ctx.scan_id).unwrap(), ScanStatus::Cancelled);
    }
}
