//! Shared types for the HTTP layer.

use std::sync::Arc;

use serde::Serialize;

use crate::core_state::CoreState;
use crate::jobs::types::{JobRecord, JobStatus};

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        Self { core }
    }
}

/// Body returned when a generation job is queued.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobAccepted {
    pub ok: bool,
    pub job_id: String,
    pub status: JobStatus,
}

impl From<&JobRecord> for JobAccepted {
    fn from(record: &JobRecord) -> Self {
        Self {
            ok: true,
            job_id: record.job_id.clone(),
            status: record.status,
        }
    }
}

/// `{ok:false, errors:[...]}` body for AI endpoints that could not run.
#[derive(Debug, Serialize)]
pub struct AiFailure {
    pub ok: bool,
    pub errors: Vec<String>,
}

impl AiFailure {
    pub fn new(errors: Vec<String>) -> Self {
        Self { ok: false, errors }
    }
}
