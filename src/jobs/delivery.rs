//! Job delivery: push (streamed frames) and pull (full record) modes.
//!
//! Whoever first observes a queued job claims it and spawns the driver.
//! Every other observer only reads. A follower that disconnects stops its
//! own loop; the driver keeps running.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::mpsc;

use super::driver;
use super::store::JobStoreError;
use super::types::{JobInput, JobRecord, JobStatus};
use crate::core_state::CoreState;

/// Re-read interval for push loops when no notification arrives.
pub const PUSH_TICK: Duration = Duration::from_secs(1);

/// One push-mode frame. Absent fields are omitted on the wire.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryFrame {
    pub job_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<JobStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DeliveryFrame {
    fn status(job_id: &str, status: JobStatus) -> Self {
        Self {
            job_id: job_id.to_string(),
            status: Some(status),
            ..Default::default()
        }
    }

    fn chunk(job_id: &str, chunk: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            chunk: Some(chunk.to_string()),
            ..Default::default()
        }
    }

    fn terminal(record: &JobRecord) -> Self {
        Self {
            job_id: record.job_id.clone(),
            status: Some(record.status),
            content_id: record.result_content_id.clone(),
            meta: record.generation_metadata.clone(),
            error: record.error.clone(),
            ..Default::default()
        }
    }

    fn failure(job_id: &str, message: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            error: Some(message.to_string()),
            ..Default::default()
        }
    }
}

/// How a push loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FollowEnd {
    Terminal(JobStatus),
    Disconnected,
    Failed,
}

/// Claim a queued job and spawn its driver. `true` if this caller won.
pub async fn claim_and_spawn(core: &Arc<CoreState>, job_id: &str) -> Result<bool, JobStoreError> {
    let claimer = Arc::clone(core);
    let id = job_id.to_string();
    let won = tokio::task::spawn_blocking(move || claimer.jobs().claim(&id))
        .await
        .map_err(|e| task_failed("claim", e))??;
    if !won {
        return Ok(false);
    }
    let core = Arc::clone(core);
    let job_id = job_id.to_string();
    tokio::task::spawn_blocking(move || driver::run_job(&core, &job_id));
    Ok(true)
}

/// Persist a new queued job. Nothing runs until a client observes it.
pub async fn enqueue(core: &Arc<CoreState>, input: JobInput) -> Result<JobRecord, JobStoreError> {
    let record = JobRecord::queued(&input);
    let stored = record.clone();
    let core = Arc::clone(core);
    tokio::task::spawn_blocking(move || core.jobs().create(&stored))
        .await
        .map_err(|e| task_failed("create", e))??;
    tracing::info!(job_id = %record.job_id, job_type = %record.job_type, "Job queued");
    Ok(record)
}

/// Pull mode: the full current record, claiming it first if still queued.
pub async fn poll(core: &Arc<CoreState>, job_id: &str) -> Result<JobRecord, JobStoreError> {
    let record = read_job(core, job_id).await?;
    if record.status != JobStatus::Queued {
        return Ok(record);
    }
    if claim_and_spawn(core, job_id).await? {
        tracing::debug!(job_id = %job_id, "Job claimed by poll");
    }
    read_job(core, job_id).await
}

/// Push mode: forward status changes and new chunks until the job is
/// terminal or the receiver goes away.
pub async fn follow(core: Arc<CoreState>, job_id: String, tx: mpsc::Sender<DeliveryFrame>) -> FollowEnd {
    // Dropped on every return path; the last follower out removes the entry
    let notify = core.notifier().subscribe(&job_id);
    let mut last_status: Option<JobStatus> = None;
    let mut sent_chunks = 0usize;
    let mut claimed = false;

    loop {
        // Register for wakeups before reading so a change between the
        // read and the wait is not missed.
        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let record = match read_job(&core, &job_id).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Push delivery read failed");
                let message = match e {
                    JobStoreError::NotFound(_) => "job not found",
                    _ => "job store unavailable",
                };
                let _ = tx.send(DeliveryFrame::failure(&job_id, message)).await;
                return FollowEnd::Failed;
            }
        };

        if record.status == JobStatus::Queued && !claimed {
            claimed = true;
            match claim_and_spawn(&core, &job_id).await {
                Ok(true) => {
                    tracing::debug!(job_id = %job_id, "Job claimed by stream");
                    continue;
                }
                Ok(false) => {}
                Err(e) => tracing::warn!(job_id = %job_id, error = %e, "Claim failed"),
            }
        }

        if !record.status.is_terminal() && last_status != Some(record.status) {
            if tx.send(DeliveryFrame::status(&job_id, record.status)).await.is_err() {
                return disconnected(&job_id);
            }
            last_status = Some(record.status);
        }

        for chunk in record.chunks.iter().skip(sent_chunks) {
            if tx.send(DeliveryFrame::chunk(&job_id, chunk)).await.is_err() {
                return disconnected(&job_id);
            }
            sent_chunks += 1;
        }

        if record.status.is_terminal() {
            if tx.send(DeliveryFrame::terminal(&record)).await.is_err() {
                return disconnected(&job_id);
            }
            return FollowEnd::Terminal(record.status);
        }

        tokio::select! {
            _ = &mut notified => {}
            _ = tokio::time::sleep(core.push_tick()) => {}
            _ = tx.closed() => return disconnected(&job_id),
        }
    }
}

fn disconnected(job_id: &str) -> FollowEnd {
    tracing::debug!(job_id = %job_id, "Push client disconnected");
    FollowEnd::Disconnected
}

async fn read_job(core: &Arc<CoreState>, job_id: &str) -> Result<JobRecord, JobStoreError> {
    let core = Arc::clone(core);
    let job_id = job_id.to_string();
    tokio::task::spawn_blocking(move || core.jobs().read(&job_id))
        .await
        .map_err(|e| task_failed("read", e))?
}

fn task_failed(op: &str, e: tokio::task::JoinError) -> JobStoreError {
    JobStoreError::Corrupt(format!("{op} task failed: {e}"))
}
