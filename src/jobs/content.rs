//! Content records produced by successful generation jobs.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::store::{write_record, JobStoreError, SqliteStore};
use super::types::JobRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Draft,
    Topics,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Topics => "topics",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(Self::Draft),
            "topics" => Some(Self::Topics),
            _ => None,
        }
    }
}

/// Accepted generated content with its frozen audit metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub id: String,
    pub kind: ContentKind,
    pub title: String,
    pub body_html: Option<String>,
    pub excerpt: Option<String>,
    /// Normalized payload as accepted by the validator.
    pub payload: serde_json::Value,
    pub generation_metadata: serde_json::Value,
    pub source_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub trait ContentStore: Send + Sync {
    fn insert_content(&self, record: &ContentRecord) -> Result<(), JobStoreError>;
    /// Insert `content` and apply the guarded write of `job` in one
    /// transaction. Neither lands if the job write is refused.
    fn insert_with_job(
        &self,
        content: &ContentRecord,
        job: &JobRecord,
    ) -> Result<(), JobStoreError>;
    fn read_content(&self, id: &str) -> Result<ContentRecord, JobStoreError>;
}

impl ContentStore for SqliteStore {
    fn insert_content(&self, record: &ContentRecord) -> Result<(), JobStoreError> {
        let conn = self.lock()?;
        insert_row(&conn, record)
    }

    fn insert_with_job(
        &self,
        content: &ContentRecord,
        job: &JobRecord,
    ) -> Result<(), JobStoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        insert_row(&tx, content)?;
        let from = write_record(&tx, job)?;
        tx.commit()?;

        tracing::debug!(
            job_id = %job.job_id,
            content_id = %content.id,
            from = %from,
            to = %job.status,
            "Content stored with job record"
        );
        Ok(())
    }

    fn read_content(&self, id: &str) -> Result<ContentRecord, JobStoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, kind, title, body_html, excerpt, payload_json,
                        generation_metadata, source_job_id, created_at
                 FROM content_records WHERE id = ?1",
                params![id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, Option<String>>(7)?,
                        row.get::<_, DateTime<Utc>>(8)?,
                    ))
                },
            )
            .optional()?
            .ok_or_else(|| JobStoreError::NotFound(format!("content {id}")))?;

        let (id, kind, title, body_html, excerpt, payload, metadata, source_job_id, created_at) = row;
        let kind = ContentKind::from_str(&kind)
            .ok_or_else(|| JobStoreError::Corrupt(format!("content kind '{kind}'")))?;

        Ok(ContentRecord {
            id,
            kind,
            title,
            body_html,
            excerpt,
            payload: serde_json::from_str(&payload)?,
            generation_metadata: serde_json::from_str(&metadata)?,
            source_job_id,
            created_at,
        })
    }
}

fn insert_row(conn: &Connection, record: &ContentRecord) -> Result<(), JobStoreError> {
    conn.execute(
        "INSERT INTO content_records
         (id, kind, title, body_html, excerpt, payload_json, generation_metadata,
          source_job_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            record.id,
            record.kind.as_str(),
            record.title,
            record.body_html,
            record.excerpt,
            serde_json::to_string(&record.payload)?,
            serde_json::to_string(&record.generation_metadata)?,
            record.source_job_id,
            record.created_at,
        ],
    )?;
    Ok(())
}
