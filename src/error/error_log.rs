/// Durable per-instance error log and manual-intervention ledger
///
/// The error log is a JSON array of the most recent errors, rewritten atomically
/// (temp file + rename) on every update. The ledger is append-only JSON lines.
use super::classification::ProcessingError;
use crate::SentinelResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

pub const ERROR_LOG_FILE: &str = "errors.json";
pub const MANUAL_LEDGER_FILE: &str = "manual_interventions.jsonl";

/// Capped, retention-pruned JSON error log
#[derive(Debug)]
pub struct ErrorLog {
    path: PathBuf,
    capacity: usize,
    retention: chrono::Duration,
    write_lock: Mutex<()>,
}

impl ErrorLog {
    pub fn new(instance_dir: &Path, capacity: usize, retention_days: i64) -> Self {
        Self {
            path: instance_dir.join(ERROR_LOG_FILE),
            capacity: capacity.max(1),
            retention: chrono::Duration::days(retention_days.max(1)),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the record for `error.id`, then prune and rewrite
    pub fn record(&self, error: &ProcessingError) -> SentinelResult<()> {
        let _guard = self.write_lock.lock();

        let mut entries = match Self::read(&self.path) {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Error log unreadable, starting fresh");
                Vec::new()
            }
        };

        match entries.iter().position(|existing| existing.id == error.id) {
            Some(index) if is_stale(error, &entries[index]) => {
                tracing::debug!(error_id = %error.id, "Skipping stale error log write");
                return Ok(());
            }
            Some(index) => entries[index] = error.clone(),
            None => entries.push(error.clone()),
        }

        let cutoff = Utc::now() - self.retention;
        entries.retain(|e| e.timestamp >= cutoff);
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }

        self.write_atomic(&entries)
    }

    /// Load the persisted entries; a missing log is empty
    pub fn load(&self) -> SentinelResult<Vec<ProcessingError>> {
        Self::read(&self.path)
    }

    /// Load a log file written by any instance
    pub fn read(path: &Path) -> SentinelResult<Vec<ProcessingError>> {
        match fs::read(path) {
            Ok(bytes) if bytes.is_empty() => Ok(Vec::new()),
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    fn write_atomic(&self, entries: &[ProcessingError]) -> SentinelResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            serde_json::to_writer_pretty(&mut file, entries)?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// One line of the manual-intervention ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManualIntervention {
    pub requested_at: DateTime<Utc>,
    pub reason: String,
    pub error: ProcessingError,
}

/// Append-only JSON lines ledger of errors that need a human
#[derive(Debug)]
pub struct ManualLedger {
    path: PathBuf,
}

impl ManualLedger {
    pub fn new(instance_dir: &Path) -> Self {
        Self {
            path: instance_dir.join(MANUAL_LEDGER_FILE),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, error: &ProcessingError, reason: &str) -> SentinelResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let entry = ManualIntervention {
            requested_at: Utc::now(),
            reason: reason.to_string(),
            error: error.clone(),
        };

        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    pub fn entries(&self) -> SentinelResult<Vec<ManualIntervention>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str::<ManualIntervention>(line).map_err(Into::into))
            .collect()
    }
}

/// `incoming` carries less progress than what is already on disk
fn is_stale(incoming: &ProcessingError, existing: &ProcessingError) -> bool {
    incoming.recovery_attempts < existing.recovery_attempts
        || (existing.is_resolved && !incoming.is_resolved)
        || (!existing.is_recoverable && incoming.is_recoverable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::classification::{ErrorClassifier, ErrorContext, Failure};
    use crate::error::taxonomy::ErrorType;
    use tempfile::TempDir;

    fn sample(message: &str) -> ProcessingError {
        ErrorClassifier::default().classify(
            &Failure::new("TimeoutError", message),
            ErrorContext::new("worker-1", "download_paper"),
            None,
            None,
        )
    }

    #[test]
    fn test_missing_log_loads_empty() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path(), 10, 90);
        assert!(log.load().unwrap().is_empty());
    }

    #[test]
    fn test_record_upserts_by_id() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path(), 10, 90);

        let mut error = sample("timed out");
        log.record(&error).unwrap();
        error.recovery_attempts = 2;
        log.record(&error).unwrap();

        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].recovery_attempts, 2);
        assert_eq!(entries[0].error_type, ErrorType::ConnectionTimeout);
        assert!(!dir.path().join("errors.json.tmp").exists());
    }

    #[test]
    fn test_older_snapshot_does_not_overwrite_newer() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path(), 10, 90);

        let first_attempt = {
            let mut error = sample("timed out");
            error.recovery_attempts = 1;
            error
        };
        let mut second_attempt = first_attempt.clone();
        second_attempt.recovery_attempts = 2;

        log.record(&second_attempt).unwrap();
        log.record(&first_attempt).unwrap();

        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].recovery_attempts, 2);
    }

    #[test]
    fn test_log_is_capped_to_most_recent() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path(), 3, 90);

        for i in 0..5 {
            log.record(&sample(&format!("timed out {}", i))).unwrap();
        }

        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].message, "timed out 2");
        assert_eq!(entries[2].message, "timed out 4");
    }

    #[test]
    fn test_entries_outside_retention_are_pruned() {
        let dir = TempDir::new().unwrap();
        let log = ErrorLog::new(dir.path(), 10, 90);

        let mut old = sample("ancient");
        old.timestamp = Utc::now() - chrono::Duration::days(120);
        log.record(&old).unwrap();
        log.record(&sample("fresh")).unwrap();

        let entries = log.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "fresh");
    }

    #[test]
    fn test_corrupt_log_is_replaced() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(ERROR_LOG_FILE), b"{not json").unwrap();
        let log = ErrorLog::new(dir.path(), 10, 90);

        assert!(log.load().is_err());
        log.record(&sample("timed out")).unwrap();
        assert_eq!(log.load().unwrap().len(), 1);
    }

    #[test]
    fn test_manual_ledger_appends_lines() {
        let dir = TempDir::new().unwrap();
        let ledger = ManualLedger::new(&dir.path().join("worker-1"));

        ledger.append(&sample("first"), "config missing").unwrap();
        ledger.append(&sample("second"), "config missing").unwrap();

        let entries = ledger.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].error.message, "second");
        assert_eq!(entries[0].reason, "config missing");
    }
}
