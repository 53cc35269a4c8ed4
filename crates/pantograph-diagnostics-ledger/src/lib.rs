//! Aggregate error reporting for failed graph runs and crash-recovered jobs.
//!
//! The graph runner's Completion rule (§4.7) rejects a run with "an
//! aggregate error listing causes" rather than the first failure alone.
//! [`RunFailureReport`] is that structured value. [`DiagnosticsLedger`]
//! durably records it (and crash-recovery events from job queue `fixupJobs`)
//! so a host can inspect what went wrong in a run after the process exits.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

/// One task's contribution to a failed run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskFailure {
    pub task_id: String,
    pub task_type: String,
    pub error: String,
    pub error_code: Option<String>,
}

/// The aggregate error a failed graph run rejects with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunFailureReport {
    pub job_run_id: String,
    pub failed_tasks: Vec<TaskFailure>,
}

impl std::fmt::Display for RunFailureReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run {} failed: ", self.job_run_id)?;
        let causes: Vec<String> = self
            .failed_tasks
            .iter()
            .map(|t| format!("{} ({}): {}", t.task_id, t.task_type, t.error))
            .collect();
        write!(f, "{}", causes.join("; "))
    }
}

impl std::error::Error for RunFailureReport {}

/// One crash-recovery event: a job `fixupJobs` found stuck in PROCESSING or
/// ABORTING on server start and reset to PENDING.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrashRecoveryEvent {
    pub job_id: String,
    pub queue_name: String,
    pub previous_status: String,
    pub run_attempts_after_reset: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable append-only ledger of run failures and crash-recovery events.
pub struct DiagnosticsLedger {
    conn: Connection,
}

impl DiagnosticsLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS run_failures (
                job_run_id TEXT PRIMARY KEY,
                report_json TEXT NOT NULL,
                recorded_at TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS crash_recoveries (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                job_id TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                previous_status TEXT NOT NULL,
                run_attempts_after_reset INTEGER NOT NULL,
                recorded_at TEXT NOT NULL
            );",
        )?;
        Ok(Self { conn })
    }

    pub fn record_run_failure(&self, report: &RunFailureReport) -> Result<(), LedgerError> {
        let json = serde_json::to_string(report)?;
        self.conn.execute(
            "INSERT INTO run_failures (job_run_id, report_json, recorded_at)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(job_run_id) DO UPDATE SET
                report_json = excluded.report_json,
                recorded_at = excluded.recorded_at",
            params![report.job_run_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn run_failure(&self, job_run_id: &str) -> Result<Option<RunFailureReport>, LedgerError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT report_json FROM run_failures WHERE job_run_id = ?1",
                params![job_run_id],
                |r| r.get(0),
            )
            .ok();
        Ok(row.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    pub fn record_crash_recovery(&self, event: &CrashRecoveryEvent) -> Result<(), LedgerError> {
        self.conn.execute(
            "INSERT INTO crash_recoveries (job_id, queue_name, previous_status, run_attempts_after_reset, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.job_id,
                event.queue_name,
                event.previous_status,
                event.run_attempts_after_reset,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn crash_recoveries_since(&self, since: DateTime<Utc>) -> Result<Vec<CrashRecoveryEvent>, LedgerError> {
        let mut stmt = self.conn.prepare(
            "SELECT job_id, queue_name, previous_status, run_attempts_after_reset
             FROM crash_recoveries WHERE recorded_at >= ?1 ORDER BY id ASC",
        )?;
        let rows = stmt
            .query_map(params![since.to_rfc3339()], |r| {
                Ok(CrashRecoveryEvent {
                    job_id: r.get(0)?,
                    queue_name: r.get(1)?,
                    previous_status: r.get(2)?,
                    run_attempts_after_reset: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_failure_roundtrips_and_displays() {
        let ledger = DiagnosticsLedger::open_in_memory().unwrap();
        let report = RunFailureReport {
            job_run_id: "run_1".into(),
            failed_tasks: vec![TaskFailure {
                task_id: "task_b".into(),
                task_type: "upper_case".into(),
                error: "boom".into(),
                error_code: Some("EXEC".into()),
            }],
        };
        ledger.record_run_failure(&report).unwrap();
        let loaded = ledger.run_failure("run_1").unwrap().unwrap();
        assert_eq!(loaded.failed_tasks.len(), 1);
        assert!(report.to_string().contains("task_b"));
        assert!(ledger.run_failure("missing").unwrap().is_none());
    }

    #[test]
    fn crash_recoveries_recorded_in_order() {
        let ledger = DiagnosticsLedger::open_in_memory().unwrap();
        let since = Utc::now() - chrono::Duration::seconds(1);
        ledger
            .record_crash_recovery(&CrashRecoveryEvent {
                job_id: "job_1".into(),
                queue_name: "default".into(),
                previous_status: "PROCESSING".into(),
                run_attempts_after_reset: 3,
            })
            .unwrap();
        ledger
            .record_crash_recovery(&CrashRecoveryEvent {
                job_id: "job_2".into(),
                queue_name: "default".into(),
                previous_status: "ABORTING".into(),
                run_attempts_after_reset: 3,
            })
            .unwrap();
        let events = ledger.crash_recoveries_since(since).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].job_id, "job_1");
        assert_eq!(events[1].job_id, "job_2");
    }
}
