//! Durable job store.
//!
//! Only the driver that won `claim` mutates a record. Every mutation runs
//! in an IMMEDIATE transaction so concurrent writers serialize on the
//! database lock instead of interleaving read-check-write sequences.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use thiserror::Error;

use super::types::{JobRecord, JobStatus, JobType};
use crate::db::{self, DatabaseError};

#[derive(Error, Debug)]
pub enum JobStoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid status transition {from} -> {to}")]
    InvalidTransition { from: JobStatus, to: JobStatus },

    #[error("Job {0} is terminal and cannot be modified")]
    TerminalRecord(String),

    #[error("Job {0}: stored chunks cannot be rewritten")]
    ChunkRewrite(String),

    #[error("Job {job_id}: chunks can only be appended while processing (status {status})")]
    NotProcessing { job_id: String, status: JobStatus },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Persistence contract for job records.
pub trait JobStore: Send + Sync {
    /// Insert a new record.
    fn create(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    fn read(&self, job_id: &str) -> Result<JobRecord, JobStoreError>;

    /// Atomically replace a record. Rejects status regression, writes to
    /// terminal records, and any change to already-stored chunks.
    fn write(&self, record: &JobRecord) -> Result<(), JobStoreError>;

    /// Append one chunk while processing. Returns the new chunk count.
    fn append_chunk(&self, job_id: &str, chunk: &str) -> Result<usize, JobStoreError>;

    /// Atomic queued → processing. `true` for exactly one caller.
    fn claim(&self, job_id: &str) -> Result<bool, JobStoreError>;
}

/// SQLite-backed job and content store.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: &Path) -> Result<Self, JobStoreError> {
        Ok(Self::new(db::open_database(path)?))
    }

    pub fn open_in_memory() -> Result<Self, JobStoreError> {
        Ok(Self::new(db::open_memory_database()?))
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>, JobStoreError> {
        self.conn.lock().map_err(|_| JobStoreError::LockPoisoned)
    }
}

impl JobStore for SqliteStore {
    fn create(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO generation_jobs
             (id, job_type, status, input_json, result_content_id, generation_metadata,
              error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.job_id,
                record.job_type.as_str(),
                record.status.as_str(),
                serde_json::to_string(&record.input)?,
                record.result_content_id,
                metadata_json(record)?,
                record.error,
                record.created_at,
                record.updated_at,
            ],
        )?;
        for (seq, chunk) in record.chunks.iter().enumerate() {
            insert_chunk(&tx, &record.job_id, seq, chunk)?;
        }
        tx.commit()?;
        Ok(())
    }

    fn read(&self, job_id: &str) -> Result<JobRecord, JobStoreError> {
        let conn = self.lock()?;
        read_record(&conn, job_id)
    }

    fn write(&self, record: &JobRecord) -> Result<(), JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let from = write_record(&tx, record)?;
        tx.commit()?;

        tracing::debug!(
            job_id = %record.job_id,
            from = %from,
            to = %record.status,
            "Job record written"
        );
        Ok(())
    }

    fn append_chunk(&self, job_id: &str, chunk: &str) -> Result<usize, JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let status = read_status(&tx, job_id)?;
        if status != JobStatus::Processing {
            return Err(JobStoreError::NotProcessing {
                job_id: job_id.to_string(),
                status,
            });
        }
        let seq: i64 = tx.query_row(
            "SELECT COUNT(*) FROM job_chunks WHERE job_id = ?1",
            params![job_id],
            |row| row.get(0),
        )?;
        let seq = seq as usize;
        insert_chunk(&tx, job_id, seq, chunk)?;
        tx.execute(
            "UPDATE generation_jobs SET updated_at = ?2 WHERE id = ?1",
            params![job_id, Utc::now()],
        )?;
        tx.commit()?;
        Ok(seq + 1)
    }

    fn claim(&self, job_id: &str) -> Result<bool, JobStoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE generation_jobs SET status = 'processing', updated_at = ?2
             WHERE id = ?1 AND status = 'queued'",
            params![job_id, Utc::now()],
        )?;
        if changed == 1 {
            tracing::info!(job_id = %job_id, "Job claimed");
            return Ok(true);
        }
        // Distinguish "already claimed" from "no such job"
        read_status(&conn, job_id)?;
        Ok(false)
    }
}

// ═══════════════════════════════════════════
// Row helpers
// ═══════════════════════════════════════════

fn metadata_json(record: &JobRecord) -> Result<Option<String>, JobStoreError> {
    record
        .generation_metadata
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(JobStoreError::from)
}

/// Guarded replace of a job row inside an open transaction. Returns the
/// status it replaced.
pub(super) fn write_record(
    conn: &Connection,
    record: &JobRecord,
) -> Result<JobStatus, JobStoreError> {
    let current = read_record(conn, &record.job_id)?;
    if current.status.is_terminal() {
        return Err(JobStoreError::TerminalRecord(record.job_id.clone()));
    }
    if !current.status.can_transition_to(record.status) {
        return Err(JobStoreError::InvalidTransition {
            from: current.status,
            to: record.status,
        });
    }
    if record.chunks.len() < current.chunks.len()
        || record.chunks[..current.chunks.len()] != current.chunks[..]
    {
        return Err(JobStoreError::ChunkRewrite(record.job_id.clone()));
    }

    conn.execute(
        "UPDATE generation_jobs
         SET status = ?2, result_content_id = ?3, generation_metadata = ?4,
             error = ?5, updated_at = ?6
         WHERE id = ?1",
        params![
            record.job_id,
            record.status.as_str(),
            record.result_content_id,
            metadata_json(record)?,
            record.error,
            Utc::now(),
        ],
    )?;
    for (seq, chunk) in record.chunks.iter().enumerate().skip(current.chunks.len()) {
        insert_chunk(conn, &record.job_id, seq, chunk)?;
    }
    Ok(current.status)
}

fn insert_chunk(conn: &Connection, job_id: &str, seq: usize, chunk: &str) -> Result<(), JobStoreError> {
    conn.execute(
        "INSERT INTO job_chunks (job_id, seq, content, created_at) VALUES (?1, ?2, ?3, ?4)",
        params![job_id, seq as i64, chunk, Utc::now()],
    )?;
    Ok(())
}

fn read_status(conn: &Connection, job_id: &str) -> Result<JobStatus, JobStoreError> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT status FROM generation_jobs WHERE id = ?1",
            params![job_id],
            |row| row.get(0),
        )
        .optional()?;
    let raw = raw.ok_or_else(|| JobStoreError::NotFound(format!("job {job_id}")))?;
    JobStatus::from_str(&raw).ok_or_else(|| JobStoreError::Corrupt(format!("status '{raw}'")))
}

struct JobRow {
    id: String,
    job_type: String,
    status: String,
    input_json: String,
    result_content_id: Option<String>,
    generation_metadata: Option<String>,
    error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn read_record(conn: &Connection, job_id: &str) -> Result<JobRecord, JobStoreError> {
    let row = conn
        .query_row(
            "SELECT id, job_type, status, input_json, result_content_id,
                    generation_metadata, error, created_at, updated_at
             FROM generation_jobs WHERE id = ?1",
            params![job_id],
            |row| {
                Ok(JobRow {
                    id: row.get(0)?,
                    job_type: row.get(1)?,
                    status: row.get(2)?,
                    input_json: row.get(3)?,
                    result_content_id: row.get(4)?,
                    generation_metadata: row.get(5)?,
                    error: row.get(6)?,
                    created_at: row.get(7)?,
                    updated_at: row.get(8)?,
                })
            },
        )
        .optional()?
        .ok_or_else(|| JobStoreError::NotFound(format!("job {job_id}")))?;

    let mut stmt = conn.prepare(
        "SELECT content FROM job_chunks WHERE job_id = ?1 ORDER BY seq ASC",
    )?;
    let chunks = stmt
        .query_map(params![job_id], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    record_from_row(row, chunks)
}

fn record_from_row(row: JobRow, chunks: Vec<String>) -> Result<JobRecord, JobStoreError> {
    let job_type = JobType::from_str(&row.job_type)
        .ok_or_else(|| JobStoreError::Corrupt(format!("job_type '{}'", row.job_type)))?;
    let status = JobStatus::from_str(&row.status)
        .ok_or_else(|| JobStoreError::Corrupt(format!("status '{}'", row.status)))?;
    let generation_metadata: Option<serde_json::Value> = row
        .generation_metadata
        .as_deref()
        .map(serde_json::from_str)
        .transpose()?;

    Ok(JobRecord {
        job_id: row.id,
        job_type,
        status,
        chunks,
        result_content_id: row.result_content_id,
        generation_metadata,
        error: row.error,
        input: serde_json::from_str(&row.input_json)?,
        created_at: row.created_at,
        updated_at: row.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::types::JobInput;
    use std::sync::{Arc, Barrier};

    fn topics_input() -> JobInput {
        JobInput::Topics {
            count: 5,
            subject: "tenders".into(),
            keywords: vec![],
            audience: None,
        }
    }

    fn store_with_job() -> (SqliteStore, JobRecord) {
        let store = SqliteStore::open_in_memory().unwrap();
        let record = JobRecord::queued(&topics_input());
        store.create(&record).unwrap();
        (store, record)
    }

    #[test]
    fn create_then_read() {
        let (store, record) = store_with_job();
        let loaded = store.read(&record.job_id).unwrap();
        assert_eq!(loaded.job_id, record.job_id);
        assert_eq!(loaded.status, JobStatus::Queued);
        assert_eq!(loaded.input, record.input);
        assert!(loaded.chunks.is_empty());
    }

    #[test]
    fn read_missing_is_not_found() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.read("nope"), Err(JobStoreError::NotFound(_))));
    }

    #[test]
    fn claim_only_once() {
        let (store, record) = store_with_job();
        assert!(store.claim(&record.job_id).unwrap());
        assert!(!store.claim(&record.job_id).unwrap());
        assert_eq!(store.read(&record.job_id).unwrap().status, JobStatus::Processing);
    }

    #[test]
    fn claim_missing_job_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert!(matches!(store.claim("ghost"), Err(JobStoreError::NotFound(_))));
    }

    #[test]
    fn backward_write_rejected() {
        let (store, record) = store_with_job();
        store.claim(&record.job_id).unwrap();

        let mut regressed = store.read(&record.job_id).unwrap();
        regressed.status = JobStatus::Queued;
        assert!(matches!(
            store.write(&regressed),
            Err(JobStoreError::InvalidTransition {
                from: JobStatus::Processing,
                to: JobStatus::Queued
            })
        ));
    }

    #[test]
    fn terminal_record_is_read_only() {
        let (store, record) = store_with_job();
        store.claim(&record.job_id).unwrap();
        let mut done = store.read(&record.job_id).unwrap();
        done.status = JobStatus::Done;
        store.write(&done).unwrap();

        done.error = Some("late".into());
        assert!(matches!(store.write(&done), Err(JobStoreError::TerminalRecord(_))));
        done.status = JobStatus::Error;
        assert!(matches!(store.write(&done), Err(JobStoreError::TerminalRecord(_))));
    }

    #[test]
    fn queued_cannot_jump_to_done() {
        let (store, mut record) = store_with_job();
        record.status = JobStatus::Done;
        assert!(matches!(
            store.write(&record),
            Err(JobStoreError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn chunks_are_append_only() {
        let (store, record) = store_with_job();
        store.claim(&record.job_id).unwrap();
        assert_eq!(store.append_chunk(&record.job_id, "one").unwrap(), 1);
        assert_eq!(store.append_chunk(&record.job_id, "two").unwrap(), 2);

        let mut rec = store.read(&record.job_id).unwrap();
        assert_eq!(rec.chunks, vec!["one", "two"]);

        rec.chunks.push("three".into());
        store.write(&rec).unwrap();
        assert_eq!(store.read(&record.job_id).unwrap().chunks.len(), 3);

        rec.chunks[0] = "changed".into();
        assert!(matches!(store.write(&rec), Err(JobStoreError::ChunkRewrite(_))));

        rec.chunks = vec!["one".into()];
        assert!(matches!(store.write(&rec), Err(JobStoreError::ChunkRewrite(_))));
    }

    #[test]
    fn append_requires_processing() {
        let (store, record) = store_with_job();
        assert!(matches!(
            store.append_chunk(&record.job_id, "early"),
            Err(JobStoreError::NotProcessing { status: JobStatus::Queued, .. })
        ));
    }

    #[test]
    fn metadata_round_trips() {
        let (store, record) = store_with_job();
        store.claim(&record.job_id).unwrap();
        let mut rec = store.read(&record.job_id).unwrap();
        rec.status = JobStatus::Error;
        rec.error = Some("generation failed".into());
        rec.generation_metadata = Some(serde_json::json!({"retryCount": 1}));
        store.write(&rec).unwrap();

        let loaded = store.read(&record.job_id).unwrap();
        assert_eq!(loaded.status, JobStatus::Error);
        assert_eq!(loaded.error.as_deref(), Some("generation failed"));
        assert_eq!(loaded.generation_metadata.unwrap()["retryCount"], 1);
    }

    #[test]
    fn concurrent_claims_on_shared_store_have_one_winner() {
        let (store, record) = store_with_job();
        let store = Arc::new(store);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                let id = record.job_id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim(&id).unwrap()
                })
            })
            .collect();

        let wins = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(wins, 1);
    }

    #[test]
    fn concurrent_claims_across_connections_have_one_winner() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("jobs.db");
        let first = SqliteStore::open(&path).unwrap();
        let record = JobRecord::queued(&topics_input());
        first.create(&record).unwrap();
        let second = SqliteStore::open(&path).unwrap();

        let barrier = Arc::new(Barrier::new(2));
        let stores = [Arc::new(first), Arc::new(second)];
        let handles: Vec<_> = stores
            .iter()
            .map(|store| {
                let store = Arc::clone(store);
                let barrier = Arc::clone(&barrier);
                let id = record.job_id.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    store.claim(&id).unwrap()
                })
            })
            .collect();

        let results: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results.iter().filter(|w| **w).count(), 1);
        assert_eq!(stores[1].read(&record.job_id).unwrap().status, JobStatus::Processing);
    }
}
