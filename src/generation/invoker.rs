//! Provider invocation seam.
//!
//! The HTTP mechanics of talking to an AI vendor live behind
//! `ProviderInvoker`. The controller only sees `InvokeResult`.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde_json::json;
use thiserror::Error;

use super::types::{InvokeResult, Purpose, SamplingOptions};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Provider transport failed: {0}")]
    Transport(String),

    #[error("Provider returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
}

/// Synchronous call to an AI provider.
///
/// `options.model_override` always carries the resolved model for the
/// attempt. Blocking: callers run this off the async executor.
pub trait ProviderInvoker: Send + Sync {
    fn invoke(
        &self,
        purpose: Purpose,
        system_prompt: &str,
        user_prompt: &str,
        options: &SamplingOptions,
    ) -> Result<InvokeResult, ProviderError>;
}

/// Invoker used when no provider transport is wired in. Every call fails
/// as a transport error, so jobs end in `error` with a clear message.
pub struct UnwiredInvoker;

impl ProviderInvoker for UnwiredInvoker {
    fn invoke(
        &self,
        purpose: Purpose,
        _system_prompt: &str,
        _user_prompt: &str,
        _options: &SamplingOptions,
    ) -> Result<InvokeResult, ProviderError> {
        tracing::warn!(%purpose, "Provider invoked without a configured transport");
        Err(ProviderError::Transport("no provider transport configured".into()))
    }
}

// ═══════════════════════════════════════════
// Scripted invoker
// ═══════════════════════════════════════════

/// One recorded call to a `ScriptedInvoker`.
#[derive(Debug, Clone)]
pub struct InvokeCall {
    pub purpose: Purpose,
    pub system_prompt: String,
    pub user_prompt: String,
    pub options: SamplingOptions,
}

/// Replays a fixed sequence of results and records every call.
///
/// Once the script runs out every further call is a transport error.
#[derive(Default)]
pub struct ScriptedInvoker {
    script: Mutex<VecDeque<Result<InvokeResult, ProviderError>>>,
    calls: Mutex<Vec<InvokeCall>>,
}

impl ScriptedInvoker {
    pub fn new(script: Vec<Result<InvokeResult, ProviderError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Queue another result at the end of the script.
    pub fn push(&self, result: Result<InvokeResult, ProviderError>) {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(result);
        }
    }

    pub fn calls(&self) -> Vec<InvokeCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }
}

impl ProviderInvoker for ScriptedInvoker {
    fn invoke(
        &self,
        purpose: Purpose,
        system_prompt: &str,
        user_prompt: &str,
        options: &SamplingOptions,
    ) -> Result<InvokeResult, ProviderError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(InvokeCall {
                purpose,
                system_prompt: system_prompt.to_string(),
                user_prompt: user_prompt.to_string(),
                options: options.clone(),
            });
        }
        let next = self
            .script
            .lock()
            .map_err(|_| ProviderError::Transport("script lock poisoned".into()))?
            .pop_front();
        match next {
            Some(Ok(mut result)) => {
                if result.model_used.is_none() {
                    result.model_used = options.model_override.clone();
                }
                Ok(result)
            }
            Some(Err(e)) => Err(e),
            None => Err(ProviderError::Transport("scripted invoker exhausted".into())),
        }
    }
}

// ═══════════════════════════════════════════
// Result builders
// ═══════════════════════════════════════════

impl InvokeResult {
    /// Successful candidates-style response carrying `text`.
    pub fn candidates_text(text: &str) -> Self {
        Self {
            ok: Some(true),
            provider_ok: Some(true),
            raw_text: Some(text.to_string()),
            raw_body: Some(json!({
                "candidates": [{
                    "content": {"parts": [{"text": text}]},
                    "finishReason": "STOP"
                }],
                "responseId": "resp-scripted"
            })),
            http_status: Some(200),
            finish_reasons: Some(vec!["STOP".into()]),
            ..Default::default()
        }
    }

    /// Successful choices-style response carrying `text`.
    pub fn choices_text(text: &str) -> Self {
        Self {
            ok: Some(true),
            raw_text: Some(text.to_string()),
            raw_body: Some(json!({
                "id": "chatcmpl-scripted",
                "choices": [{"message": {"content": text}, "finish_reason": "stop"}]
            })),
            http_status: Some(200),
            ..Default::default()
        }
    }

    /// HTTP 200 with candidates present but no text in any part.
    pub fn empty_candidates(finish_reason: &str) -> Self {
        Self {
            ok: Some(true),
            raw_text: Some(String::new()),
            raw_body: Some(json!({
                "candidates": [{
                    "content": {"parts": [{"text": ""}]},
                    "finishReason": finish_reason
                }]
            })),
            http_status: Some(200),
            finish_reasons: Some(vec![finish_reason.to_string()]),
            ..Default::default()
        }
    }

    /// Prompt rejected by the provider's safety layer.
    pub fn blocked(reason: &str) -> Self {
        Self {
            ok: Some(true),
            raw_text: Some(String::new()),
            raw_body: Some(json!({"promptFeedback": {"blockReason": reason}})),
            http_status: Some(200),
            prompt_block_reason: Some(reason.to_string()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::strategy::base_options;

    fn opts(model: &str) -> SamplingOptions {
        SamplingOptions {
            model_override: Some(model.into()),
            ..base_options(Purpose::HealthProbe)
        }
    }

    #[test]
    fn scripted_replays_in_order() {
        let inv = ScriptedInvoker::new(vec![
            Ok(InvokeResult::candidates_text("one")),
            Err(ProviderError::Http { status: 500, body: "boom".into() }),
        ]);
        let first = inv.invoke(Purpose::HealthProbe, "s", "u", &opts("m")).unwrap();
        assert_eq!(first.raw_text.as_deref(), Some("one"));
        assert_eq!(first.model_used.as_deref(), Some("m"));
        assert!(matches!(
            inv.invoke(Purpose::HealthProbe, "s", "u", &opts("m")),
            Err(ProviderError::Http { status: 500, .. })
        ));
        assert!(matches!(
            inv.invoke(Purpose::HealthProbe, "s", "u", &opts("m")),
            Err(ProviderError::Transport(_))
        ));
        assert_eq!(inv.call_count(), 3);
    }

    #[test]
    fn scripted_records_calls() {
        let inv = ScriptedInvoker::new(vec![]);
        inv.push(Ok(InvokeResult::choices_text("x")));
        let _ = inv.invoke(Purpose::TopicIdeas, "sys", "user", &opts("m2"));
        let calls = inv.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].purpose, Purpose::TopicIdeas);
        assert_eq!(calls[0].user_prompt, "user");
        assert_eq!(calls[0].options.model_override.as_deref(), Some("m2"));
    }

    #[test]
    fn unwired_always_fails() {
        let r = UnwiredInvoker.invoke(Purpose::ContentDraft, "s", "u", &opts("m"));
        assert!(matches!(r, Err(ProviderError::Transport(_))));
    }

    #[test]
    fn invoker_is_object_safe() {
        fn _accepts(_: &dyn ProviderInvoker) {}
        _accepts(&UnwiredInvoker);
    }
}
