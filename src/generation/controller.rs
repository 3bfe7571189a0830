//! Primary / retry / fallback attempt state machine.
//!
//! ```text
//! INIT ─► PRIMARY ─ok─► DONE
//!            │fail
//!            ▼
//!          RETRY ─ok─► DONE
//!            │fail
//!            ├─ fallback configured ─► FALLBACK ─► DONE
//!            └─ otherwise ─────────────────────► DONE
//! ```
//!
//! Expected failure kinds are recorded on the attempt; `run` only returns
//! `Err` for configuration problems, before anything is invoked.

use std::time::Instant;

use super::diagnostic;
use super::error::GenerationError;
use super::hash;
use super::invoker::{ProviderError, ProviderInvoker};
use super::parser::extract_json;
use super::prompt::augment_for_retry;
use super::strategy::{fallback_options, retry_options};
use super::types::{
    AttemptStage, FailureKind, GenerationOutcome, GenerationRequest, InvokeResult,
    ProviderAttempt, Purpose, SamplingOptions,
};
use super::validator::validate;
use crate::ai_config::ConfigSnapshot;

/// Upper bound on provider calls for one request.
pub const MAX_ATTEMPTS: usize = 3;

/// What the controller should do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Attempt(AttemptStage),
    Done,
}

/// The single transition function.
///
/// `last` is the stage and verdict of the previous attempt, `None` before
/// the first one.
pub fn next_stage(last: Option<(AttemptStage, bool)>, has_fallback: bool) -> Transition {
    match last {
        None => Transition::Attempt(AttemptStage::Primary),
        Some((_, true)) => Transition::Done,
        Some((AttemptStage::Primary, false)) => Transition::Attempt(AttemptStage::Retry),
        Some((AttemptStage::Retry, false)) if has_fallback => {
            Transition::Attempt(AttemptStage::Fallback)
        }
        Some((AttemptStage::Retry, false)) => Transition::Done,
        Some((AttemptStage::Fallback, false)) => Transition::Done,
    }
}

/// Drives one `GenerationRequest` to a `GenerationOutcome`.
pub struct AttemptController<'a> {
    invoker: &'a dyn ProviderInvoker,
    config: &'a ConfigSnapshot,
}

impl<'a> AttemptController<'a> {
    pub fn new(invoker: &'a dyn ProviderInvoker, config: &'a ConfigSnapshot) -> Self {
        Self { invoker, config }
    }

    pub fn run(&self, request: &GenerationRequest) -> Result<GenerationOutcome, GenerationError> {
        let purpose = request.purpose;
        let configured_primary = self.config.require(purpose)?;
        let primary_model = request
            .options
            .model_override
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .unwrap_or(configured_primary);
        let routing = self.config.models_for(purpose);
        let fallback_model = self.config.fallback_model(purpose, &primary_model);

        let base = SamplingOptions {
            expect_json: routing.use_structured_json,
            model_override: Some(primary_model.clone()),
            ..request.options.clone()
        };

        let mut attempts: Vec<ProviderAttempt> = Vec::with_capacity(MAX_ATTEMPTS);
        let mut last: Option<(AttemptStage, bool)> = None;

        while let Transition::Attempt(stage) = next_stage(last, fallback_model.is_some()) {
            let (user_prompt, options) = match stage {
                AttemptStage::Primary => (request.user_prompt.clone(), base.clone()),
                AttemptStage::Retry => {
                    let previous = attempts.last().and_then(|a| a.failure);
                    let empty = previous == Some(FailureKind::EmptyContent);
                    let options = retry_options(purpose, &base, empty && routing.retry_once_on_empty);
                    let strict = matches!(
                        previous,
                        Some(FailureKind::EmptyContent) | Some(FailureKind::Validation)
                    );
                    let prompt = if strict {
                        augment_for_retry(purpose, &request.user_prompt)
                    } else {
                        request.user_prompt.clone()
                    };
                    (prompt, options)
                }
                AttemptStage::Fallback => {
                    let model = fallback_model.as_deref().unwrap_or(&primary_model);
                    (
                        augment_for_retry(purpose, &request.user_prompt),
                        fallback_options(purpose, &base, model, routing.use_streaming_fallback),
                    )
                }
            };

            let started = Instant::now();
            let result = self
                .invoker
                .invoke(purpose, &request.system_prompt, &user_prompt, &options);
            let elapsed_ms = started.elapsed().as_millis() as u64;

            let mut attempt = evaluate_attempt(stage, purpose, &options, result);
            if attempt.latency_ms.is_none() {
                attempt.latency_ms = Some(elapsed_ms);
            }

            tracing::info!(
                purpose = %purpose,
                attempt = stage.as_str(),
                model = %attempt.model_used,
                ok = attempt.ok,
                failure = attempt.failure.map(|f| f.as_str()).unwrap_or("none"),
                text_length = attempt.text_length(),
                latency_ms = attempt.latency_ms.unwrap_or(0),
                "Provider attempt finished"
            );

            last = Some((stage, attempt.ok));
            attempts.push(attempt);
        }

        Ok(build_outcome(request, &self.config.provider, fallback_model, attempts))
    }
}

/// Classify one invocation result into a recorded attempt.
///
/// Failure precedence: transport, blocked prompt, HTTP error status, empty
/// text, provider-reported failure, schema violation.
pub(crate) fn evaluate_attempt(
    stage: AttemptStage,
    purpose: Purpose,
    options: &SamplingOptions,
    result: Result<InvokeResult, ProviderError>,
) -> ProviderAttempt {
    let model_requested = options.model_override.clone().unwrap_or_default();
    let mut attempt = ProviderAttempt {
        index: stage.index(),
        stage,
        model_used: model_requested,
        temperature: options.temperature,
        max_tokens: options.max_tokens,
        raw_text: String::new(),
        raw_body: None,
        http_status: None,
        request_id: None,
        response_id: None,
        finish_reasons: Vec::new(),
        block_reason: None,
        parsed_payload: None,
        normalized: None,
        ok: false,
        failure: None,
        validation_errors: Vec::new(),
        provider_errors: Vec::new(),
        latency_ms: None,
        diagnostics: Default::default(),
    };

    let result = match result {
        Ok(r) => r,
        Err(e) => {
            if let ProviderError::Http { status, .. } = &e {
                attempt.http_status = Some(*status);
            }
            attempt.provider_errors.push(e.to_string());
            attempt.failure = Some(FailureKind::Transport);
            return attempt;
        }
    };

    let diagnostics = diagnostic::extract(result.raw_body.as_ref());
    let provider_ok = result.provider_succeeded();
    let http_error = result.is_http_error();

    attempt.raw_text = result
        .raw_text
        .clone()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| diagnostic::body_text(result.raw_body.as_ref()))
        .unwrap_or_default();
    if let Some(model) = result.model_used.filter(|m| !m.trim().is_empty()) {
        attempt.model_used = model;
    }
    attempt.http_status = result.http_status;
    attempt.request_id = result.request_id;
    attempt.response_id = result.response_id.or_else(|| diagnostics.response_id.clone());
    attempt.finish_reasons = result
        .finish_reasons
        .filter(|r| !r.is_empty())
        .unwrap_or_else(|| diagnostics.finish_reasons.clone());
    attempt.block_reason = result
        .prompt_block_reason
        .filter(|r| !r.trim().is_empty())
        .or_else(|| diagnostics.block_reason.clone());
    attempt.provider_errors = result.errors.unwrap_or_default();
    attempt.latency_ms = result.latency_ms;
    attempt.raw_body = result.raw_body;
    attempt.diagnostics = diagnostics;

    attempt.failure = if attempt.block_reason.is_some() {
        Some(FailureKind::Blocked)
    } else if http_error {
        Some(FailureKind::Transport)
    } else if attempt.text_length() == 0 {
        Some(FailureKind::EmptyContent)
    } else if !provider_ok {
        Some(FailureKind::Provider)
    } else {
        None
    };

    if attempt.failure.is_none() {
        let structured = result.json.filter(|_| result.parsed_ok != Some(false));
        attempt.parsed_payload = structured.or_else(|| extract_json(&attempt.raw_text));
        let report = validate(purpose, attempt.parsed_payload.as_ref());
        if report.ok {
            attempt.normalized = report.normalized;
        } else {
            attempt.validation_errors = report.errors;
            attempt.failure = Some(FailureKind::Validation);
        }
    }

    attempt.ok = attempt.failure.is_none();
    attempt
}

fn build_outcome(
    request: &GenerationRequest,
    provider: &str,
    fallback_model: Option<String>,
    attempts: Vec<ProviderAttempt>,
) -> GenerationOutcome {
    let ok = attempts.last().is_some_and(|a| a.ok);
    let retry_count = attempts.iter().any(|a| a.stage == AttemptStage::Retry) as u8;
    let fallback_used = attempts.iter().any(|a| a.stage == AttemptStage::Fallback);

    let output_hash = if ok {
        attempts
            .last()
            .and_then(|a| a.normalized.as_ref())
            .and_then(hash::output_hash)
    } else {
        None
    };

    let errors = if ok {
        Vec::new()
    } else {
        aggregate_errors(&attempts, retry_count, fallback_used)
    };

    GenerationOutcome {
        purpose: request.purpose,
        provider: provider.to_string(),
        ok,
        retry_count,
        fallback_used,
        fallback_model: fallback_model.filter(|_| fallback_used),
        attempts,
        output_hash,
        errors,
        prompt_hash: request.prompt_hash.clone(),
        nonce: request.nonce.clone(),
    }
}

/// Merge every attempt's errors and markers, first-seen order, no duplicates.
fn aggregate_errors(attempts: &[ProviderAttempt], retry_count: u8, fallback_used: bool) -> Vec<String> {
    let mut errors: Vec<String> = Vec::new();
    let mut push = |e: String| {
        if !errors.contains(&e) {
            errors.push(e);
        }
    };

    for attempt in attempts {
        attempt.provider_errors.iter().cloned().for_each(&mut push);
        attempt.validation_errors.iter().cloned().for_each(&mut push);
        if attempt.is_empty_content() {
            push("empty_content".to_string());
        }
        if let Some(reason) = &attempt.block_reason {
            push(format!("blocked: {reason}"));
        }
        if !attempt.finish_reasons.is_empty() {
            push(format!("finish_reasons: {}", attempt.finish_reasons.join(",")));
        }
    }

    push(format!(
        "generation failed after {} attempt(s): {} retry, {} fallback",
        attempts.len(),
        retry_count,
        fallback_used as u8
    ));
    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ai_config::tests::snapshot_with;
    use crate::ai_config::ConfigError;
    use crate::generation::invoker::ScriptedInvoker;
    use crate::generation::prompt::{assemble_with_nonce, PromptContext};
    use crate::generation::strategy::base_options;
    use crate::generation::types::ValidatedPayload;

    const TOPICS_5: &str = r#"{"topics":[{"title":"A"},{"title":"B"},{"title":"C"},{"title":"D"},{"title":"E"}]}"#;
    const TOPICS_3: &str = r#"{"topics":[{"title":"A"},{"title":"B"},{"title":"C"}]}"#;

    fn request(purpose: Purpose) -> GenerationRequest {
        let ctx = PromptContext {
            topic_count: Some(5),
            title: Some("Bid bonds".into()),
            ..Default::default()
        };
        assemble_with_nonce(purpose, &ctx, "nonce-1".into()).into_request(purpose)
    }

    fn run(invoker: &ScriptedInvoker, fallback: Option<&str>, purpose: Purpose) -> GenerationOutcome {
        let config = snapshot_with(fallback);
        AttemptController::new(invoker, &config)
            .run(&request(purpose))
            .unwrap()
    }

    // ── transition table ──

    #[test]
    fn transitions() {
        use AttemptStage::*;
        assert_eq!(next_stage(None, false), Transition::Attempt(Primary));
        assert_eq!(next_stage(Some((Primary, true)), true), Transition::Done);
        assert_eq!(next_stage(Some((Primary, false)), false), Transition::Attempt(Retry));
        assert_eq!(next_stage(Some((Retry, true)), true), Transition::Done);
        assert_eq!(next_stage(Some((Retry, false)), true), Transition::Attempt(Fallback));
        assert_eq!(next_stage(Some((Retry, false)), false), Transition::Done);
        assert_eq!(next_stage(Some((Fallback, false)), true), Transition::Done);
        assert_eq!(next_stage(Some((Fallback, true)), true), Transition::Done);
    }

    // ── attempt counts ──

    #[test]
    fn primary_success_is_single_attempt() {
        let inv = ScriptedInvoker::new(vec![Ok(InvokeResult::candidates_text(TOPICS_5))]);
        let out = run(&inv, Some("model-b"), Purpose::TopicIdeas);
        assert!(out.ok);
        assert_eq!(out.attempts.len(), 1);
        assert_eq!(out.retry_count, 0);
        assert!(!out.fallback_used);
        assert!(out.errors.is_empty());
        assert!(out.output_hash.is_some());
        assert_eq!(inv.call_count(), 1);
    }

    #[test]
    fn two_attempts_without_fallback() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::empty_candidates("MAX_TOKENS")),
            Ok(InvokeResult::empty_candidates("MAX_TOKENS")),
        ]);
        let out = run(&inv, None, Purpose::TopicIdeas);
        assert!(!out.ok);
        assert_eq!(out.attempts.len(), 2);
        assert_eq!(inv.call_count(), 2);
        assert!(out.output_hash.is_none());
        assert!(out.fallback_model.is_none());
    }

    #[test]
    fn three_attempts_with_fallback() {
        let inv = ScriptedInvoker::new(vec![
            Err(ProviderError::Transport("connection reset".into())),
            Err(ProviderError::Transport("connection reset".into())),
            Err(ProviderError::Transport("timeout".into())),
        ]);
        let out = run(&inv, Some("model-b"), Purpose::ContentDraft);
        assert!(!out.ok);
        assert_eq!(out.attempts.len(), 3);
        assert_eq!(out.retry_count, 1);
        assert!(out.fallback_used);
        assert_eq!(out.fallback_model.as_deref(), Some("model-b"));
        assert_eq!(out.final_attempt().unwrap().stage, AttemptStage::Fallback);
    }

    #[test]
    fn fallback_recovers() {
        let draft = r#"{"title":"Bid bonds","bodyHtml":"<p>Explained.</p>"}"#;
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::empty_candidates("STOP")),
            Ok(InvokeResult::candidates_text("not json at all")),
            Ok(InvokeResult::choices_text(draft)),
        ]);
        let out = run(&inv, Some("model-b"), Purpose::ContentDraft);
        assert!(out.ok);
        assert!(out.fallback_used);
        assert!(out.errors.is_empty());
        assert_eq!(out.final_attempt().unwrap().model_used, "model-b");
        assert!(matches!(out.payload(), Some(ValidatedPayload::Draft(_))));

        let calls = inv.calls();
        assert_eq!(calls[2].options.model_override.as_deref(), Some("model-b"));
        assert!(calls[2].user_prompt.contains("non-empty JSON"));
    }

    // ── retry sampling ──

    #[test]
    fn empty_retry_bumps_sampling_and_augments_prompt() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::empty_candidates("MAX_TOKENS")),
            Ok(InvokeResult::candidates_text(TOPICS_5)),
        ]);
        let out = run(&inv, None, Purpose::TopicIdeas);
        assert!(out.ok);
        assert_eq!(out.retry_count, 1);

        let base = base_options(Purpose::TopicIdeas);
        let calls = inv.calls();
        let retry = &calls[1].options;
        assert!((retry.temperature - (base.temperature + 0.1).min(1.0)).abs() < 1e-6);
        assert_eq!(retry.max_tokens, base.max_tokens.max(1536));
        assert!(calls[1].user_prompt.contains("markdown"));
        assert!(!calls[0].user_prompt.contains("markdown"));
    }

    #[test]
    fn retry_disabled_on_empty_keeps_base_sampling() {
        let mut config = snapshot_with(None);
        config
            .purpose_models
            .get_mut(&Purpose::TopicIdeas)
            .unwrap()
            .retry_once_on_empty = false;
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::empty_candidates("STOP")),
            Ok(InvokeResult::candidates_text(TOPICS_5)),
        ]);
        let out = AttemptController::new(&inv, &config)
            .run(&request(Purpose::TopicIdeas))
            .unwrap();
        assert!(out.ok);
        let calls = inv.calls();
        assert_eq!(calls[1].options.temperature, calls[0].options.temperature);
        assert_eq!(calls[1].options.max_tokens, calls[0].options.max_tokens);
    }

    #[test]
    fn transport_retry_reuses_base_options() {
        let inv = ScriptedInvoker::new(vec![
            Err(ProviderError::Http { status: 503, body: "busy".into() }),
            Ok(InvokeResult::candidates_text(TOPICS_5)),
        ]);
        let out = run(&inv, None, Purpose::TopicIdeas);
        assert!(out.ok);
        let calls = inv.calls();
        assert_eq!(calls[0].options, calls[1].options);
        assert_eq!(calls[0].user_prompt, calls[1].user_prompt);
        assert_eq!(out.attempts[0].http_status, Some(503));
    }

    #[test]
    fn fallback_uses_smaller_bump() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::empty_candidates("STOP")),
            Ok(InvokeResult::empty_candidates("STOP")),
            Ok(InvokeResult::empty_candidates("STOP")),
        ]);
        let _ = run(&inv, Some("model-b"), Purpose::TopicIdeas);
        let base = base_options(Purpose::TopicIdeas);
        let fb = &inv.calls()[2].options;
        assert!((fb.temperature - (base.temperature + 0.05).min(1.0)).abs() < 1e-6);
        assert!(!fb.stream);
    }

    #[test]
    fn streaming_fallback_flag_is_forwarded() {
        let mut config = snapshot_with(Some("model-b"));
        config
            .purpose_models
            .get_mut(&Purpose::ContentDraft)
            .unwrap()
            .use_streaming_fallback = true;
        let inv = ScriptedInvoker::new(vec![]);
        let _ = AttemptController::new(&inv, &config).run(&request(Purpose::ContentDraft));
        let calls = inv.calls();
        assert_eq!(calls.len(), 3);
        assert!(!calls[0].options.stream);
        assert!(calls[2].options.stream);
    }

    // ── validation-driven retry ──

    #[test]
    fn three_topics_fail_validation_and_retry() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::candidates_text(TOPICS_3)),
            Ok(InvokeResult::candidates_text(TOPICS_5)),
        ]);
        let out = run(&inv, None, Purpose::TopicIdeas);
        assert!(out.ok);
        assert_eq!(out.attempts.len(), 2);
        assert_eq!(out.attempts[0].failure, Some(FailureKind::Validation));
        assert_eq!(
            out.attempts[0].validation_errors,
            vec!["topics_count_out_of_range:3 (expected 4-5)"]
        );
    }

    #[test]
    fn fenced_json_is_accepted() {
        let text = format!("```json\n{TOPICS_5}\n```");
        let inv = ScriptedInvoker::new(vec![Ok(InvokeResult::candidates_text(&text))]);
        assert!(run(&inv, None, Purpose::TopicIdeas).ok);
    }

    #[test]
    fn structured_json_preferred_over_text() {
        let mut r = InvokeResult::candidates_text("ignored prose");
        r.json = Some(serde_json::json!({"ok": true, "ts": "t"}));
        r.parsed_ok = Some(true);
        let inv = ScriptedInvoker::new(vec![Ok(r)]);
        assert!(run(&inv, None, Purpose::HealthProbe).ok);
    }

    // ── error aggregation ──

    #[test]
    fn total_failure_errors_are_merged_and_deduplicated() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::empty_candidates("MAX_TOKENS")),
            Ok(InvokeResult::empty_candidates("MAX_TOKENS")),
            Ok(InvokeResult::blocked("SAFETY")),
        ]);
        let out = run(&inv, Some("model-b"), Purpose::TopicIdeas);
        assert!(!out.ok);
        assert_eq!(
            out.errors,
            vec![
                "empty_content".to_string(),
                "finish_reasons: MAX_TOKENS".to_string(),
                "blocked: SAFETY".to_string(),
                "generation failed after 3 attempt(s): 1 retry, 1 fallback".to_string(),
            ]
        );
    }

    #[test]
    fn provider_errors_come_first() {
        let mut failing = InvokeResult::candidates_text("{}");
        failing.provider_ok = Some(false);
        failing.errors = Some(vec!["quota exceeded".into()]);
        let inv = ScriptedInvoker::new(vec![Ok(failing.clone()), Ok(failing)]);
        let out = run(&inv, None, Purpose::HealthProbe);
        assert_eq!(out.attempts[0].failure, Some(FailureKind::Provider));
        assert_eq!(out.errors[0], "quota exceeded");
        assert_eq!(out.errors.iter().filter(|e| *e == "quota exceeded").count(), 1);
        assert!(out.errors.last().unwrap().contains("2 attempt(s): 1 retry, 0 fallback"));
    }

    #[test]
    fn blocked_prompt_is_still_retried() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::blocked("SAFETY")),
            Ok(InvokeResult::candidates_text(r#"{"ok":true,"ts":"x"}"#)),
        ]);
        let out = run(&inv, None, Purpose::HealthProbe);
        assert!(out.ok);
        assert_eq!(out.attempts[0].failure, Some(FailureKind::Blocked));
    }

    // ── configuration ──

    #[test]
    fn configuration_error_makes_no_attempts() {
        let mut config = snapshot_with(None);
        config.text_model = None;
        let inv = ScriptedInvoker::new(vec![Ok(InvokeResult::candidates_text(TOPICS_5))]);
        let err = AttemptController::new(&inv, &config)
            .run(&request(Purpose::TopicIdeas))
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Configuration(ConfigError::MissingModel(Purpose::TopicIdeas))
        ));
        assert_eq!(inv.call_count(), 0);
    }

    #[test]
    fn fallback_equal_to_primary_is_not_used() {
        let inv = ScriptedInvoker::new(vec![]);
        let out = run(&inv, Some("model-primary"), Purpose::HealthProbe);
        assert_eq!(out.attempts.len(), 2);
        assert!(!out.fallback_used);
    }

    #[test]
    fn structured_json_toggle_sets_expect_json() {
        let mut config = snapshot_with(None);
        config
            .purpose_models
            .get_mut(&Purpose::HealthProbe)
            .unwrap()
            .use_structured_json = false;
        let inv = ScriptedInvoker::new(vec![Ok(InvokeResult::candidates_text(r#"{"ok":true,"ts":"x"}"#))]);
        let _ = AttemptController::new(&inv, &config).run(&request(Purpose::HealthProbe));
        assert!(!inv.calls()[0].options.expect_json);
        assert_eq!(inv.calls()[0].options.model_override.as_deref(), Some("model-primary"));
    }

    #[test]
    fn outcome_carries_request_audit_fields() {
        let inv = ScriptedInvoker::new(vec![Ok(InvokeResult::candidates_text(r#"{"ok":true,"ts":"x"}"#))]);
        let req = request(Purpose::HealthProbe);
        let config = snapshot_with(None);
        let out = AttemptController::new(&inv, &config).run(&req).unwrap();
        assert_eq!(out.nonce, "nonce-1");
        assert_eq!(out.prompt_hash, req.prompt_hash);
        assert_eq!(out.provider, "gemini");
    }
}
