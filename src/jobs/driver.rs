//! Job driver: runs generation for a claimed job and records the outcome.
//!
//! Only the caller that won `JobStore::claim` runs a driver for a job.
//! Blocking; spawned on the blocking pool by the delivery channel.

use std::sync::LazyLock;

use regex::Regex;

use crate::core_state::CoreState;
use crate::generation::audit::redact_secret;
use crate::generation::controller::AttemptController;
use crate::generation::error::GenerationError;
use crate::generation::prompt::assemble;
use crate::generation::types::ValidatedPayload;
use crate::jobs::types::JobStatus;

static BLOCK_ELEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(?:p|h[1-6]|li|blockquote|pre)\b[^>]*>.*?</(?:p|h[1-6]|li|blockquote|pre)>")
        .unwrap()
});

/// Drive `job_id` to a terminal state, logging instead of returning errors.
///
/// If the generation path fails on infrastructure, a best-effort attempt is
/// made to mark the job `error` so followers do not wait forever.
pub fn run_job(core: &CoreState, job_id: &str) {
    if let Err(e) = drive_job(core, job_id) {
        tracing::error!(job_id = %job_id, error = %e, "Job driver failed");
        if let Ok(job) = core.jobs().read(job_id) {
            if !job.status.is_terminal() {
                let purpose = job.job_type.purpose();
                if let Err(e2) = core
                    .recorder(None)
                    .record_aborted(job_id, purpose, "internal error while generating")
                {
                    tracing::error!(job_id = %job_id, error = %e2, "Could not mark job as failed");
                }
            }
        }
    }
    core.notifier().notify(job_id);
    core.notifier().forget(job_id);
}

/// Run generation for a job this process has claimed.
pub fn drive_job(core: &CoreState, job_id: &str) -> Result<(), GenerationError> {
    let job = core.jobs().read(job_id)?;
    if job.status != JobStatus::Processing {
        tracing::warn!(job_id = %job_id, status = %job.status, "Driver started on unclaimed job");
        return Ok(());
    }
    let purpose = job.job_type.purpose();

    let input = match job.parsed_input() {
        Ok(input) => input,
        Err(e) => {
            let reason = format!("invalid job input: {e}");
            core.recorder(None).record_aborted(job_id, purpose, &reason)?;
            return Err(GenerationError::InvalidInput(reason));
        }
    };

    let snapshot = match core.config_snapshot() {
        Ok(s) => s,
        Err(e) => {
            core.recorder(None).record_aborted(job_id, purpose, &e.to_string())?;
            return Ok(());
        }
    };
    let secret = Some(snapshot.api_key.expose());

    let request = assemble(purpose, &input.prompt_context()).into_request(purpose);
    tracing::info!(
        job_id = %job_id,
        purpose = %purpose,
        prompt_hash = %request.prompt_hash,
        "Generation started"
    );

    let outcome = match AttemptController::new(core.invoker(), &snapshot).run(&request) {
        Ok(outcome) => outcome,
        Err(e) if e.is_configuration() => {
            core.recorder(secret).record_aborted(job_id, purpose, &e.to_string())?;
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    if let Some(payload) = outcome.payload() {
        for chunk in chunks_for(payload) {
            core.jobs()
                .append_chunk(job_id, &redact_secret(&chunk, secret))?;
            core.notifier().notify(job_id);
        }
    }

    core.recorder(secret).record(job_id, &outcome)?;
    Ok(())
}

/// Partial text units streamed to followers before the job completes.
pub fn chunks_for(payload: &ValidatedPayload) -> Vec<String> {
    match payload {
        ValidatedPayload::Topics { topics } => topics.iter().map(|t| t.title.clone()).collect(),
        ValidatedPayload::Draft(draft) => {
            let mut chunks = vec![draft.title.clone()];
            let blocks: Vec<String> = BLOCK_ELEMENT
                .find_iter(&draft.body_html)
                .map(|m| m.as_str().trim().to_string())
                .collect();
            if blocks.is_empty() {
                chunks.push(draft.body_html.clone());
            } else {
                chunks.extend(blocks);
            }
            chunks
        }
        ValidatedPayload::HealthEcho { ts, .. } => vec![ts.clone()],
    }
}
