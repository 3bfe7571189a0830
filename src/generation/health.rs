//! AI connectivity health check.
//!
//! Two fixed probes (JSON echo and topic titles), each invoked exactly once
//! with no retry, aggregated into a report with human-readable diagnosis.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::audit::{redact_secret, AuditEvent, LogSink};
use super::controller::evaluate_attempt;
use super::error::GenerationError;
use super::invoker::ProviderInvoker;
use super::prompt::{assemble, PromptContext};
use super::strategy::base_options;
use super::types::{AttemptStage, FailureKind, ProviderAttempt, Purpose};
use crate::ai_config::{ConfigError, ConfigSnapshot};

/// Topic count requested by the topic-titles probe.
pub const PROBE_TOPIC_COUNT: u32 = 5;

/// One probe result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthProbeRow {
    pub name: String,
    pub purpose: Purpose,
    pub ok: bool,
    pub model_used: String,
    pub http_status: Option<u16>,
    pub text_length: usize,
    pub has_candidates: bool,
    pub has_parts: bool,
    pub finish_reasons: Vec<String>,
    pub block_reason: Option<String>,
    pub failure: Option<FailureKind>,
    pub errors: Vec<String>,
    pub latency_ms: Option<u64>,
}

impl HealthProbeRow {
    fn from_attempt(name: &str, purpose: Purpose, attempt: &ProviderAttempt, secret: Option<&str>) -> Self {
        let errors = attempt
            .provider_errors
            .iter()
            .chain(attempt.validation_errors.iter())
            .map(|e| redact_secret(e, secret))
            .collect();
        Self {
            name: name.to_string(),
            purpose,
            ok: attempt.ok,
            model_used: attempt.model_used.clone(),
            http_status: attempt.http_status,
            text_length: attempt.text_length(),
            has_candidates: attempt.diagnostics.has_candidates,
            has_parts: attempt.diagnostics.has_parts,
            finish_reasons: attempt.finish_reasons.clone(),
            block_reason: attempt.block_reason.clone(),
            failure: attempt.failure,
            errors,
            latency_ms: attempt.latency_ms,
        }
    }

    /// No text came back, whatever the failure kind.
    fn is_empty(&self) -> bool {
        self.text_length == 0
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckReport {
    pub provider: String,
    pub rows: Vec<HealthProbeRow>,
    pub overall_ok: bool,
    pub empty_twice: bool,
    pub recommend_fallback: bool,
    pub fallback_model: Option<String>,
    pub diagnosis: Vec<String>,
    pub checked_at: DateTime<Utc>,
}

/// Run both probes against the configured provider.
///
/// Blocking. Configuration is checked for both purposes first, so a bad
/// snapshot makes no provider calls.
pub fn run_health_check(
    invoker: &dyn ProviderInvoker,
    config: &ConfigSnapshot,
    sink: &dyn LogSink,
) -> Result<HealthCheckReport, GenerationError> {
    let models = config
        .require(Purpose::HealthProbe)
        .and_then(|echo| Ok((echo, config.require(Purpose::TopicIdeas)?)));
    let (echo_model, topics_model) = match models {
        Ok(models) => models,
        Err(e) => {
            record_refused(sink, &config.provider, &e);
            return Err(e.into());
        }
    };
    let secret = Some(config.api_key.expose());
    let now = Utc::now();

    let probes = [
        (
            "json_echo",
            Purpose::HealthProbe,
            echo_model,
            PromptContext {
                timestamp: Some(now.to_rfc3339()),
                ..Default::default()
            },
        ),
        (
            "topic_titles",
            Purpose::TopicIdeas,
            topics_model.clone(),
            PromptContext {
                topic_count: Some(PROBE_TOPIC_COUNT),
                subject: Some("public tenders".into()),
                ..Default::default()
            },
        ),
    ];

    let mut rows = Vec::with_capacity(probes.len());
    for (name, purpose, model, ctx) in probes {
        let prompt = assemble(purpose, &ctx);
        let mut options = base_options(purpose);
        options.model_override = Some(model);
        options.expect_json = config.models_for(purpose).use_structured_json;

        let started = std::time::Instant::now();
        let result = invoker.invoke(purpose, &prompt.system_prompt, &prompt.user_prompt, &options);
        let mut attempt = evaluate_attempt(AttemptStage::Primary, purpose, &options, result);
        if attempt.latency_ms.is_none() {
            attempt.latency_ms = Some(started.elapsed().as_millis() as u64);
        }

        tracing::info!(
            probe = name,
            purpose = %purpose,
            model = %attempt.model_used,
            ok = attempt.ok,
            failure = attempt.failure.map(|f| f.as_str()).unwrap_or("none"),
            "Health probe finished"
        );
        rows.push(HealthProbeRow::from_attempt(name, purpose, &attempt, secret));
    }

    let fallback_model = config
        .fallback_model(Purpose::TopicIdeas, &topics_model)
        .or_else(|| {
            config
                .primary_model(Purpose::HealthProbe)
                .and_then(|p| config.fallback_model(Purpose::HealthProbe, &p))
        });

    let report = summarize(&config.provider, rows, fallback_model, now);
    sink.emit(&AuditEvent::HealthCheck {
        provider: report.provider.clone(),
        overall_ok: report.overall_ok,
        empty_twice: report.empty_twice,
        recommend_fallback: report.recommend_fallback,
        diagnosis: report.diagnosis.clone(),
    });
    Ok(report)
}

/// Audit a health check that was refused before any provider call.
pub fn record_refused(sink: &dyn LogSink, provider: &str, error: &ConfigError) {
    sink.emit(&AuditEvent::HealthCheck {
        provider: provider.to_string(),
        overall_ok: false,
        empty_twice: false,
        recommend_fallback: false,
        diagnosis: vec![format!("Configuration error: {error}")],
    });
}

/// Aggregate probe rows into a report. Pure.
pub fn summarize(
    provider: &str,
    rows: Vec<HealthProbeRow>,
    fallback_model: Option<String>,
    checked_at: DateTime<Utc>,
) -> HealthCheckReport {
    let overall_ok = !rows.is_empty() && rows.iter().all(|r| r.ok);
    let empty_twice = rows.len() >= 2 && rows.iter().all(HealthProbeRow::is_empty);
    let all_failed = !rows.is_empty() && rows.iter().all(|r| !r.ok);
    let recommend_fallback = empty_twice || all_failed;

    let mut diagnosis = Vec::new();
    if overall_ok {
        diagnosis.push(format!(
            "Success: {provider} returned valid JSON for all {} probes.",
            rows.len()
        ));
    } else if empty_twice {
        diagnosis.push("Both probes returned empty text.".to_string());
        let empty_content: Vec<&HealthProbeRow> = rows
            .iter()
            .filter(|r| r.failure == Some(FailureKind::EmptyContent))
            .collect();
        if empty_content.iter().any(|r| r.has_candidates && !r.has_parts) {
            diagnosis.push(
                "The provider returned candidates with blank parts; the model is producing no visible output \
                 (often a token budget spent on hidden reasoning or an output filter)."
                    .to_string(),
            );
        } else if !empty_content.is_empty() {
            diagnosis.push(
                "The provider returned no candidates; check the model name and that the key has access to it."
                    .to_string(),
            );
        }
        for row in rows
            .iter()
            .filter(|r| !r.ok && r.failure != Some(FailureKind::EmptyContent))
        {
            diagnosis.push(row_diagnosis(row));
        }
    } else {
        for row in rows.iter().filter(|r| !r.ok) {
            diagnosis.push(row_diagnosis(row));
        }
    }

    if recommend_fallback {
        diagnosis.push(match &fallback_model {
            Some(model) => format!("Switch the affected purposes to the fallback model {model}."),
            None => "Configure a fallback model for the affected purposes and switch to it.".to_string(),
        });
    }

    HealthCheckReport {
        provider: provider.to_string(),
        rows,
        overall_ok,
        empty_twice,
        recommend_fallback,
        fallback_model,
        diagnosis,
        checked_at,
    }
}

fn row_diagnosis(row: &HealthProbeRow) -> String {
    match row.failure {
        Some(FailureKind::Blocked) => format!(
            "{}: prompt blocked by the provider ({}).",
            row.name,
            row.block_reason.as_deref().unwrap_or("unspecified")
        ),
        Some(FailureKind::EmptyContent) => {
            let reasons = if row.finish_reasons.is_empty() {
                "none".to_string()
            } else {
                row.finish_reasons.join(",")
            };
            format!("{}: empty response (finish reasons: {reasons}).", row.name)
        }
        Some(kind) => match row.errors.first() {
            Some(first) => format!("{}: {} failure: {first}", row.name, kind.as_str()),
            None => format!("{}: {} failure.", row.name, kind.as_str()),
        },
        None => format!("{}: ok.", row.name),
    }
}
