//! Provenance metadata attached to a task recording how it was produced.
//!
//! A task's provenance is the audit trail the graph runner attaches when it
//! replicates a task for array fan-out (§4.7): which port(s) drove the
//! replication, this branch's index, and the total fan-out width, so two
//! runs over equivalent inputs land on the same cache key even once fan-out
//! has happened. An optional [`ProvenanceLedger`] persists that trail
//! durably for hosts that want to audit a run after the fact.

use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

/// One port's contribution to a fan-out replication: which element of the
/// source array this branch was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationAxis {
    pub source_port: String,
    pub index: usize,
    pub width: usize,
}

/// Audit metadata recording how a task instance was produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// One axis per fan-out input port; several axes mean the task was
    /// replicated over the Cartesian product of those ports' arrays.
    #[serde(default)]
    pub replication: Vec<ReplicationAxis>,
    /// The job-run id this task's execution belongs to, if queued.
    pub job_run_id: Option<String>,
}

impl Provenance {
    pub fn is_replicated(&self) -> bool {
        !self.replication.is_empty()
    }

    /// Total number of sibling replicas across all fan-out axes.
    pub fn replication_factor(&self) -> usize {
        self.replication.iter().map(|a| a.width).product::<usize>().max(if self.replication.is_empty() { 0 } else { 1 })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

/// Durable, append-only record of task provenance, keyed by (run id, task id).
pub struct ProvenanceLedger {
    conn: Connection,
}

impl ProvenanceLedger {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LedgerError> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, LedgerError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS provenance (
                job_run_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                provenance_json TEXT NOT NULL,
                recorded_at TEXT NOT NULL,
                PRIMARY KEY (job_run_id, task_id)
            )",
        )?;
        Ok(Self { conn })
    }

    pub fn record(&self, job_run_id: &str, task_id: &str, provenance: &Provenance) -> Result<(), LedgerError> {
        let json = serde_json::to_string(provenance)?;
        self.conn.execute(
            "INSERT INTO provenance (job_run_id, task_id, provenance_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(job_run_id, task_id) DO UPDATE SET
                provenance_json = excluded.provenance_json,
                recorded_at = excluded.recorded_at",
            params![job_run_id, task_id, json, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn lookup(&self, job_run_id: &str, task_id: &str) -> Result<Option<Provenance>, LedgerError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT provenance_json FROM provenance WHERE job_run_id = ?1 AND task_id = ?2",
                params![job_run_id, task_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(row.map(|json| serde_json::from_str(&json)).transpose()?)
    }

    pub fn recorded_at(&self, job_run_id: &str, task_id: &str) -> Result<Option<DateTime<Utc>>, LedgerError> {
        let row: Option<String> = self
            .conn
            .query_row(
                "SELECT recorded_at FROM provenance WHERE job_run_id = ?1 AND task_id = ?2",
                params![job_run_id, task_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(row.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replication_factor_multiplies_axes() {
        let p = Provenance {
            replication: vec![
                ReplicationAxis { source_port: "a".into(), index: 0, width: 3 },
                ReplicationAxis { source_port: "b".into(), index: 1, width: 2 },
            ],
            job_run_id: None,
        };
        assert_eq!(p.replication_factor(), 6);
        assert!(p.is_replicated());
    }

    #[test]
    fn unreplicated_has_zero_factor() {
        let p = Provenance::default();
        assert_eq!(p.replication_factor(), 0);
        assert!(!p.is_replicated());
    }

    #[test]
    fn ledger_roundtrips() {
        let ledger = ProvenanceLedger::open_in_memory().unwrap();
        let p = Provenance {
            replication: vec![ReplicationAxis { source_port: "values".into(), index: 1, width: 3 }],
            job_run_id: Some("run_1".into()),
        };
        ledger.record("run_1", "task_b", &p).unwrap();
        let loaded = ledger.lookup("run_1", "task_b").unwrap().unwrap();
        assert_eq!(loaded, p);
        assert!(ledger.lookup("run_1", "missing").unwrap().is_none());
    }

    #[test]
    fn ledger_record_is_upsert() {
        let ledger = ProvenanceLedger::open_in_memory().unwrap();
        ledger.record("run_1", "task_a", &Provenance::default()).unwrap();
        let updated = Provenance {
            replication: vec![ReplicationAxis { source_port: "x".into(), index: 0, width: 1 }],
            job_run_id: Some("run_1".into()),
        };
        ledger.record("run_1", "task_a", &updated).unwrap();
        assert_eq!(ledger.lookup("run_1", "task_a").unwrap().unwrap(), updated);
    }
}
