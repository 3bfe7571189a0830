//! Terminal-outcome auditing: content persistence, job completion, and one
//! structured log event per outcome.
//!
//! Nothing written here may contain the provider API key. Every string that
//! reaches the store or the log sink goes through [`redact_secret`].

use std::sync::{LazyLock, Mutex};

use chrono::Utc;
use regex::Regex;
use serde::Serialize;

use super::error::GenerationError;
use super::types::{GenerationOutcome, Purpose, ValidatedPayload};
use crate::jobs::content::{ContentKind, ContentRecord, ContentStore};
use crate::jobs::store::JobStore;
use crate::jobs::types::JobStatus;

/// Excerpt length when the provider did not supply one.
pub const EXCERPT_CHARS: usize = 160;

const REDACTED: &str = "[REDACTED]";

// ═══════════════════════════════════════════
// Metadata
// ═══════════════════════════════════════════

/// Frozen audit metadata stored with the job and its content record.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationMetadata {
    pub purpose: Purpose,
    pub provider: String,
    pub model_used: Option<String>,
    pub http_status: Option<u16>,
    pub request_id: Option<String>,
    pub response_id: Option<String>,
    pub finish_reasons: Vec<String>,
    pub block_reason: Option<String>,
    pub text_length: usize,
    pub attempt_count: usize,
    pub retry_count: u8,
    pub fallback_used: bool,
    pub fallback_model: Option<String>,
    pub prompt_hash: String,
    pub output_hash: Option<String>,
    pub nonce: String,
}

impl GenerationMetadata {
    /// Snapshot of the outcome, taken from its final attempt.
    pub fn from_outcome(outcome: &GenerationOutcome) -> Self {
        let last = outcome.final_attempt();
        Self {
            purpose: outcome.purpose,
            provider: outcome.provider.clone(),
            model_used: last.map(|a| a.model_used.clone()).filter(|m| !m.is_empty()),
            http_status: last.and_then(|a| a.http_status),
            request_id: last.and_then(|a| a.request_id.clone()),
            response_id: last.and_then(|a| a.response_id.clone()),
            finish_reasons: last.map(|a| a.finish_reasons.clone()).unwrap_or_default(),
            block_reason: last.and_then(|a| a.block_reason.clone()),
            text_length: last.map(|a| a.text_length()).unwrap_or(0),
            attempt_count: outcome.attempts.len(),
            retry_count: outcome.retry_count,
            fallback_used: outcome.fallback_used,
            fallback_model: outcome.fallback_model.clone(),
            prompt_hash: outcome.prompt_hash.clone(),
            output_hash: outcome.output_hash.clone(),
            nonce: outcome.nonce.clone(),
        }
    }
}

// ═══════════════════════════════════════════
// Log sink
// ═══════════════════════════════════════════

/// One structured audit event.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum AuditEvent {
    #[serde(rename_all = "camelCase")]
    GenerationOutcome {
        job_id: Option<String>,
        ok: bool,
        content_id: Option<String>,
        metadata: GenerationMetadata,
        errors: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    GenerationAborted {
        job_id: Option<String>,
        purpose: Purpose,
        reason: String,
    },
    #[serde(rename_all = "camelCase")]
    HealthCheck {
        provider: String,
        overall_ok: bool,
        empty_twice: bool,
        recommend_fallback: bool,
        diagnosis: Vec<String>,
    },
}

/// Destination for audit events.
pub trait LogSink: Send + Sync {
    fn emit(&self, event: &AuditEvent);
}

/// Emits each event as a `tracing` event on target `tenderflow::audit`.
pub struct TracingLogSink;

impl LogSink for TracingLogSink {
    fn emit(&self, event: &AuditEvent) {
        match event {
            AuditEvent::GenerationOutcome {
                job_id,
                ok,
                content_id,
                metadata: m,
                errors,
            } => {
                let job_id = job_id.as_deref().unwrap_or("-");
                if *ok {
                    tracing::info!(
                        target: "tenderflow::audit",
                        job_id,
                        purpose = %m.purpose,
                        provider = %m.provider,
                        model = m.model_used.as_deref().unwrap_or("-"),
                        http_status = m.http_status.unwrap_or(0),
                        retry_count = m.retry_count,
                        fallback_used = m.fallback_used,
                        text_length = m.text_length,
                        prompt_hash = %m.prompt_hash,
                        output_hash = m.output_hash.as_deref().unwrap_or("-"),
                        content_id = content_id.as_deref().unwrap_or("-"),
                        "Generation succeeded"
                    );
                } else {
                    tracing::warn!(
                        target: "tenderflow::audit",
                        job_id,
                        purpose = %m.purpose,
                        provider = %m.provider,
                        model = m.model_used.as_deref().unwrap_or("-"),
                        http_status = m.http_status.unwrap_or(0),
                        retry_count = m.retry_count,
                        fallback_used = m.fallback_used,
                        finish_reasons = %m.finish_reasons.join(","),
                        block_reason = m.block_reason.as_deref().unwrap_or("-"),
                        prompt_hash = %m.prompt_hash,
                        errors = %errors.join("; "),
                        "Generation failed"
                    );
                }
            }
            AuditEvent::GenerationAborted {
                job_id,
                purpose,
                reason,
            } => {
                tracing::warn!(
                    target: "tenderflow::audit",
                    job_id = job_id.as_deref().unwrap_or("-"),
                    purpose = %purpose,
                    reason = %reason,
                    "Generation aborted before any attempt"
                );
            }
            AuditEvent::HealthCheck {
                provider,
                overall_ok,
                empty_twice,
                recommend_fallback,
                diagnosis,
            } => {
                tracing::info!(
                    target: "tenderflow::audit",
                    provider = %provider,
                    overall_ok,
                    empty_twice,
                    recommend_fallback,
                    diagnosis = %diagnosis.join(" | "),
                    "AI health check finished"
                );
            }
        }
    }
}

/// Collects events in memory.
#[derive(Default)]
pub struct MemoryLogSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl LogSink for MemoryLogSink {
    fn emit(&self, event: &AuditEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}

// ═══════════════════════════════════════════
// Recorder
// ═══════════════════════════════════════════

/// Persists terminal outcomes for one job.
pub struct AuditRecorder<'a> {
    jobs: &'a dyn JobStore,
    content: &'a dyn ContentStore,
    sink: &'a dyn LogSink,
    secret: Option<&'a str>,
}

impl<'a> AuditRecorder<'a> {
    pub fn new(
        jobs: &'a dyn JobStore,
        content: &'a dyn ContentStore,
        sink: &'a dyn LogSink,
        secret: Option<&'a str>,
    ) -> Self {
        Self {
            jobs,
            content,
            sink,
            secret,
        }
    }

    /// Record a finished outcome. Returns the content id on success.
    pub fn record(
        &self,
        job_id: &str,
        outcome: &GenerationOutcome,
    ) -> Result<Option<String>, GenerationError> {
        let metadata = GenerationMetadata::from_outcome(outcome);
        let metadata_value = self.redact_value(serde_json::to_value(&metadata).map_err(store_err)?);
        let errors: Vec<String> = outcome.errors.iter().map(|e| self.redact(e)).collect();

        let mut job = self.jobs.read(job_id)?;
        let content_id = match outcome.payload() {
            Some(payload) if outcome.ok => {
                let record = self.content_record(job_id, payload, metadata_value.clone());
                let id = record.id.clone();
                job.status = JobStatus::Done;
                job.result_content_id = Some(id.clone());
                job.error = None;
                job.generation_metadata = Some(metadata_value);
                self.content.insert_with_job(&record, &job)?;
                Some(id)
            }
            _ => {
                job.status = JobStatus::Error;
                job.error = Some(if errors.is_empty() {
                    "generation failed".to_string()
                } else {
                    errors.join("; ")
                });
                job.generation_metadata = Some(metadata_value);
                self.jobs.write(&job)?;
                None
            }
        };

        self.sink.emit(&AuditEvent::GenerationOutcome {
            job_id: Some(job_id.to_string()),
            ok: content_id.is_some(),
            content_id: content_id.clone(),
            metadata: GenerationMetadata {
                request_id: metadata.request_id.as_deref().map(|r| self.redact(r)),
                ..metadata
            },
            errors,
        });
        Ok(content_id)
    }

    /// Mark a job failed before any attempt could run.
    pub fn record_aborted(
        &self,
        job_id: &str,
        purpose: Purpose,
        reason: &str,
    ) -> Result<(), GenerationError> {
        let reason = self.redact(reason);
        let mut job = self.jobs.read(job_id)?;
        job.status = JobStatus::Error;
        job.error = Some(reason.clone());
        self.jobs.write(&job)?;
        self.sink.emit(&AuditEvent::GenerationAborted {
            job_id: Some(job_id.to_string()),
            purpose,
            reason,
        });
        Ok(())
    }

    fn content_record(
        &self,
        job_id: &str,
        payload: &ValidatedPayload,
        metadata: serde_json::Value,
    ) -> ContentRecord {
        let (kind, title, body_html, excerpt) = match payload {
            ValidatedPayload::Draft(d) => {
                let body = self.redact(&d.body_html);
                let excerpt = d
                    .excerpt
                    .as_deref()
                    .map(|e| self.redact(e))
                    .unwrap_or_else(|| derive_excerpt(&body, EXCERPT_CHARS));
                (ContentKind::Draft, self.redact(&d.title), Some(body), Some(excerpt))
            }
            ValidatedPayload::Topics { topics } => {
                let items: String = topics
                    .iter()
                    .map(|t| format!("<li>{}</li>", escape_html(&self.redact(&t.title))))
                    .collect();
                (
                    ContentKind::Topics,
                    format!("{} topic ideas", topics.len()),
                    Some(format!("<ul>{items}</ul>")),
                    None,
                )
            }
            // Health probes never reach a job; keep the echo for completeness
            ValidatedPayload::HealthEcho { ts, .. } => {
                (ContentKind::Topics, format!("Health echo {ts}"), None, None)
            }
        };

        let payload_value = serde_json::to_value(payload)
            .map(|v| self.redact_value(v))
            .unwrap_or(serde_json::Value::Null);

        ContentRecord {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            title,
            body_html,
            excerpt,
            payload: payload_value,
            generation_metadata: metadata,
            source_job_id: Some(job_id.to_string()),
            created_at: Utc::now(),
        }
    }

    fn redact(&self, text: &str) -> String {
        redact_secret(text, self.secret)
    }

    fn redact_value(&self, value: serde_json::Value) -> serde_json::Value {
        use serde_json::Value;
        match value {
            Value::String(s) => Value::String(self.redact(&s)),
            Value::Array(items) => Value::Array(items.into_iter().map(|v| self.redact_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.redact_value(v)))
                    .collect(),
            ),
            other => other,
        }
    }
}

fn store_err(e: serde_json::Error) -> GenerationError {
    GenerationError::Store(e.into())
}

// ═══════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    vec![
        Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._~+/=-]{8,}").unwrap(),
        Regex::new(r"\bsk-[A-Za-z0-9_-]{12,}").unwrap(),
        Regex::new(r"\bAIza[0-9A-Za-z_-]{20,}").unwrap(),
        Regex::new(r#"(?i)\b(api[_-]?key|x-goog-api-key)\s*[=:]\s*["']?[^\s"'&,]+"#).unwrap(),
    ]
});

static HTML_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());

/// Mask `secret` and anything shaped like a provider credential.
pub fn redact_secret(text: &str, secret: Option<&str>) -> String {
    let mut out = match secret.map(str::trim).filter(|s| s.len() >= 4) {
        Some(s) => text.replace(s, REDACTED),
        None => text.to_string(),
    };
    for pattern in SECRET_PATTERNS.iter() {
        if pattern.is_match(&out) {
            out = pattern.replace_all(&out, REDACTED).into_owned();
        }
    }
    out
}

/// Plain-text excerpt of an HTML body, cut at a word boundary.
pub fn derive_excerpt(body_html: &str, max_chars: usize) -> String {
    let text = HTML_TAG.replace_all(body_html, " ");
    let collapsed = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.chars().count() <= max_chars {
        return collapsed;
    }
    let cut: String = collapsed.chars().take(max_chars).collect();
    let trimmed = match cut.rfind(' ') {
        Some(idx) if idx > max_chars / 2 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", trimmed.trim_end())
}

fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
