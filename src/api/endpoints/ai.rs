//! AI endpoints.
//!
//! - `POST /api/ai/health-check`: run both provider probes
//! - `POST /api/ai/topics`: queue a topic-ideation job
//! - `POST /api/ai/drafts`: queue a drafting job

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use crate::api::error::ApiError;
use crate::api::types::{AiFailure, ApiContext, JobAccepted};
use crate::generation::error::GenerationError;
use crate::generation::health::{record_refused, run_health_check};
use crate::generation::validator::{TOPICS_MAX, TOPICS_MIN};
use crate::jobs::delivery;
use crate::jobs::types::JobInput;

const DEFAULT_TOPIC_COUNT: u32 = 5;
const MAX_KEYWORDS: usize = 20;

#[derive(Debug, Deserialize)]
pub struct TopicsRequest {
    pub count: Option<u32>,
    pub subject: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    pub audience: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct DraftRequest {
    pub title: String,
    pub brief: Option<String>,
    pub tone: Option<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
}

/// `POST /api/ai/health-check`: probe the configured provider.
///
/// Configuration problems come back as `{ok:false, errors}` rather than
/// an HTTP error. No provider call is made in that case, but the refusal
/// is still audited.
pub async fn health_check(State(ctx): State<ApiContext>) -> Result<Response, ApiError> {
    let core = ctx.core.clone();
    let result = tokio::task::spawn_blocking(move || {
        let snapshot = match core.config_snapshot() {
            Ok(snapshot) => snapshot,
            Err(e) => {
                record_refused(core.sink(), "", &e);
                return Err(GenerationError::from(e));
            }
        };
        run_health_check(core.invoker(), &snapshot, core.sink())
    })
    .await?;

    match result {
        Ok(report) => Ok(Json(report).into_response()),
        Err(GenerationError::Configuration(e)) => {
            tracing::warn!(error = %e, "Health check not run");
            Ok(Json(AiFailure::new(vec![format!("Configuration error: {e}")])).into_response())
        }
        Err(e) => Err(e.into()),
    }
}

/// `POST /api/ai/topics`: queue topic ideas for a subject.
pub async fn topics(
    State(ctx): State<ApiContext>,
    Json(req): Json<TopicsRequest>,
) -> Result<Response, ApiError> {
    let count = req.count.unwrap_or(DEFAULT_TOPIC_COUNT);
    if !(TOPICS_MIN as u32..=TOPICS_MAX as u32).contains(&count) {
        return Err(ApiError::BadRequest(format!(
            "count must be between {TOPICS_MIN} and {TOPICS_MAX}"
        )));
    }
    let subject = required(&req.subject, "subject")?;
    let input = JobInput::Topics {
        count,
        subject,
        keywords: clean_keywords(req.keywords)?,
        audience: optional(req.audience),
    };
    accept(&ctx, input).await
}

/// `POST /api/ai/drafts`: queue an article draft.
pub async fn drafts(
    State(ctx): State<ApiContext>,
    Json(req): Json<DraftRequest>,
) -> Result<Response, ApiError> {
    let input = JobInput::Draft {
        title: required(&req.title, "title")?,
        brief: optional(req.brief),
        tone: optional(req.tone),
        keywords: clean_keywords(req.keywords)?,
    };
    accept(&ctx, input).await
}

async fn accept(ctx: &ApiContext, input: JobInput) -> Result<Response, ApiError> {
    let record = delivery::enqueue(&ctx.core, input).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted::from(&record))).into_response())
}

fn required(value: &str, field: &str) -> Result<String, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ApiError::BadRequest(format!("{field} cannot be empty")));
    }
    Ok(trimmed.to_string())
}

fn optional(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn clean_keywords(keywords: Vec<String>) -> Result<Vec<String>, ApiError> {
    if keywords.len() > MAX_KEYWORDS {
        return Err(ApiError::BadRequest(format!(
            "at most {MAX_KEYWORDS} keywords allowed"
        )));
    }
    Ok(keywords
        .into_iter()
        .map(|k| k.trim().to_string())
        .filter(|k| !k.is_empty())
        .collect())
}
