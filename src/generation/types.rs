//! Core types for the generation pipeline.
//!
//! These types model one caller invocation end to end:
//! Request → Attempts (primary / retry / fallback) → Outcome.

use serde::{Deserialize, Serialize};

use super::diagnostic::ResponseDiagnostics;

// ═══════════════════════════════════════════
// Purpose
// ═══════════════════════════════════════════

/// Which feature is asking for generated content.
///
/// Selects the response schema, the model defaults and the prompt pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    /// Connectivity probe: the provider echoes `{ok, ts}`.
    HealthProbe,
    /// Topic ideation: 4–5 titled topic suggestions.
    TopicIdeas,
    /// Article drafting: title + HTML body.
    ContentDraft,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HealthProbe => "health_probe",
            Self::TopicIdeas => "topic_ideas",
            Self::ContentDraft => "content_draft",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "health_probe" => Some(Self::HealthProbe),
            "topic_ideas" => Some(Self::TopicIdeas),
            "content_draft" => Some(Self::ContentDraft),
            _ => None,
        }
    }

    pub fn all() -> &'static [Purpose] {
        &[Self::HealthProbe, Self::TopicIdeas, Self::ContentDraft]
    }
}

impl std::fmt::Display for Purpose {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════
// Request
// ═══════════════════════════════════════════

/// Sampling parameters sent with one provider call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SamplingOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub expect_json: bool,
    /// Model to call instead of the configured primary.
    pub model_override: Option<String>,
    /// Ask the invoker for a streamed response (fallback attempts only).
    #[serde(default)]
    pub stream: bool,
}

/// One caller invocation. Built once by the prompt assembler, never mutated.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationRequest {
    pub purpose: Purpose,
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: SamplingOptions,
    pub nonce: String,
    pub prompt_hash: String,
}

// ═══════════════════════════════════════════
// Provider contract
// ═══════════════════════════════════════════

/// What the provider invoker hands back. Any field may be missing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InvokeResult {
    pub ok: Option<bool>,
    pub provider_ok: Option<bool>,
    pub parsed_ok: Option<bool>,
    pub raw_text: Option<String>,
    pub raw_body: Option<serde_json::Value>,
    pub json: Option<serde_json::Value>,
    pub http_status: Option<u16>,
    pub request_id: Option<String>,
    pub response_id: Option<String>,
    pub finish_reasons: Option<Vec<String>>,
    pub prompt_block_reason: Option<String>,
    pub errors: Option<Vec<String>>,
    pub latency_ms: Option<u64>,
    pub model_used: Option<String>,
}

impl InvokeResult {
    /// Provider-level verdict: explicit `false` flags or an HTTP error status fail it.
    pub fn provider_succeeded(&self) -> bool {
        if self.ok == Some(false) || self.provider_ok == Some(false) {
            return false;
        }
        !self.http_status.is_some_and(|s| s >= 400)
    }

    pub fn is_http_error(&self) -> bool {
        self.http_status.is_some_and(|s| s >= 400)
    }
}

// ═══════════════════════════════════════════
// Attempts
// ═══════════════════════════════════════════

/// Position of an attempt within a request's lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptStage {
    Primary,
    Retry,
    Fallback,
}

impl AttemptStage {
    pub fn index(&self) -> u8 {
        match self {
            Self::Primary => 0,
            Self::Retry => 1,
            Self::Fallback => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Retry => "retry",
            Self::Fallback => "fallback",
        }
    }
}

/// Why an attempt was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Network failure or HTTP error status.
    Transport,
    /// Provider flagged the prompt.
    Blocked,
    /// Zero-length text came back.
    EmptyContent,
    /// Provider reported failure without a transport error.
    Provider,
    /// Text parsed but failed the purpose schema.
    Validation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transport => "transport",
            Self::Blocked => "blocked",
            Self::EmptyContent => "empty_content",
            Self::Provider => "provider",
            Self::Validation => "validation",
        }
    }
}

/// A single provider invocation, kept for audit whether it passed or not.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderAttempt {
    pub index: u8,
    pub stage: AttemptStage,
    pub model_used: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub raw_text: String,
    pub raw_body: Option<serde_json::Value>,
    pub http_status: Option<u16>,
    pub request_id: Option<String>,
    pub response_id: Option<String>,
    pub finish_reasons: Vec<String>,
    pub block_reason: Option<String>,
    pub parsed_payload: Option<serde_json::Value>,
    pub normalized: Option<ValidatedPayload>,
    pub ok: bool,
    pub failure: Option<FailureKind>,
    pub validation_errors: Vec<String>,
    pub provider_errors: Vec<String>,
    pub latency_ms: Option<u64>,
    pub diagnostics: ResponseDiagnostics,
}

impl ProviderAttempt {
    /// Length of the extracted text, ignoring surrounding whitespace.
    pub fn text_length(&self) -> usize {
        self.raw_text.trim().chars().count()
    }

    pub fn is_empty_content(&self) -> bool {
        self.failure == Some(FailureKind::EmptyContent)
    }
}

// ═══════════════════════════════════════════
// Validated payloads
// ═══════════════════════════════════════════

/// One topic suggestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicIdea {
    pub title: String,
    pub angle: Option<String>,
    pub keywords: Vec<String>,
}

/// A drafted article.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftContent {
    pub title: String,
    pub body_html: String,
    pub excerpt: Option<String>,
}

/// Normalized fields produced by the response validator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidatedPayload {
    HealthEcho { ok: bool, ts: String },
    Topics { topics: Vec<TopicIdea> },
    Draft(DraftContent),
}

// ═══════════════════════════════════════════
// Outcome
// ═══════════════════════════════════════════

/// Result of running the attempt controller to completion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationOutcome {
    pub purpose: Purpose,
    pub provider: String,
    pub ok: bool,
    pub retry_count: u8,
    pub fallback_used: bool,
    pub fallback_model: Option<String>,
    /// Every attempt in invocation order. The last one is authoritative.
    pub attempts: Vec<ProviderAttempt>,
    pub output_hash: Option<String>,
    pub errors: Vec<String>,
    pub prompt_hash: String,
    pub nonce: String,
}

impl GenerationOutcome {
    pub fn final_attempt(&self) -> Option<&ProviderAttempt> {
        self.attempts.last()
    }

    /// Accepted payload, present only on success.
    pub fn payload(&self) -> Option<&ValidatedPayload> {
        if !self.ok {
            return None;
        }
        self.final_attempt().and_then(|a| a.normalized.as_ref())
    }
}
