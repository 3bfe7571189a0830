//! Provider envelope diagnostics.
//!
//! Two response dialects are recognised: the candidates/parts shape and the
//! choices/message shape. Anything else is reported as `Unknown` with every
//! flag false.

use serde::Serialize;
use serde_json::Value;

/// Envelope shape detected in a raw provider body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponseDialect {
    /// `candidates[].content.parts[].text`
    Candidates,
    /// `choices[].message.content` or `choices[].text`
    Choices,
    #[default]
    Unknown,
}

/// Normalized view of a raw provider body.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseDiagnostics {
    pub dialect: ResponseDialect,
    /// A non-empty candidates or choices collection is present.
    pub has_candidates: bool,
    /// At least one non-blank text part exists.
    pub has_parts: bool,
    pub finish_reasons: Vec<String>,
    pub block_reason: Option<String>,
    pub response_id: Option<String>,
}

/// Inspect a raw body. A missing or non-object body yields the default.
pub fn extract(raw_body: Option<&Value>) -> ResponseDiagnostics {
    let Some(body) = raw_body.filter(|b| b.is_object()) else {
        return ResponseDiagnostics::default();
    };

    let block_reason = body
        .get("promptFeedback")
        .and_then(|f| f.get("blockReason"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let response_id = body
        .get("responseId")
        .or_else(|| body.get("id"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let Some((dialect, items)) = collection(body) else {
        return ResponseDiagnostics {
            block_reason,
            response_id,
            ..Default::default()
        };
    };

    let has_parts = match dialect {
        ResponseDialect::Candidates => items.iter().any(candidate_has_text),
        ResponseDialect::Choices => items.iter().any(choice_has_text),
        ResponseDialect::Unknown => false,
    };

    ResponseDiagnostics {
        dialect,
        has_candidates: !items.is_empty(),
        has_parts,
        finish_reasons: finish_reasons(items),
        block_reason,
        response_id,
    }
}

/// Text of the first item that carries any, parts concatenated.
///
/// Used when the invoker returned a body but no extracted text.
pub fn body_text(raw_body: Option<&Value>) -> Option<String> {
    let body = raw_body?;
    let collect_parts = |parts: &[Value]| -> String {
        parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("")
    };

    let (dialect, items) = collection(body)?;
    match dialect {
        ResponseDialect::Candidates => items
            .iter()
            .filter_map(|c| c.get("content")?.get("parts")?.as_array())
            .map(|parts| collect_parts(parts))
            .find(|t| !t.trim().is_empty()),
        ResponseDialect::Choices => items
            .iter()
            .filter_map(|choice| match choice.get("message").and_then(|m| m.get("content")) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Array(parts)) => Some(collect_parts(parts)),
                _ => choice.get("text").and_then(Value::as_str).map(str::to_string),
            })
            .find(|t| !t.trim().is_empty()),
        ResponseDialect::Unknown => None,
    }
}

/// The first non-empty collection, candidates before choices. When both
/// are empty the first one present still names the dialect.
fn collection(body: &Value) -> Option<(ResponseDialect, &[Value])> {
    let candidates = body.get("candidates").and_then(Value::as_array);
    let choices = body.get("choices").and_then(Value::as_array);
    match (candidates, choices) {
        (Some(c), _) if !c.is_empty() => Some((ResponseDialect::Candidates, c.as_slice())),
        (_, Some(c)) if !c.is_empty() => Some((ResponseDialect::Choices, c.as_slice())),
        (Some(c), _) => Some((ResponseDialect::Candidates, c.as_slice())),
        (None, Some(c)) => Some((ResponseDialect::Choices, c.as_slice())),
        (None, None) => None,
    }
}

fn candidate_has_text(candidate: &Value) -> bool {
    candidate
        .get("content")
        .and_then(|c| c.get("parts"))
        .and_then(Value::as_array)
        .is_some_and(|parts| parts.iter().any(|p| non_blank(p.get("text"))))
}

fn choice_has_text(choice: &Value) -> bool {
    if non_blank(choice.get("text")) {
        return true;
    }
    match choice.get("message").and_then(|m| m.get("content")) {
        Some(Value::String(s)) => !s.trim().is_empty(),
        Some(Value::Array(parts)) => parts.iter().any(|p| non_blank(p.get("text"))),
        _ => false,
    }
}

fn non_blank(value: Option<&Value>) -> bool {
    value
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty())
}

/// Finish reasons across all items, first-seen order, no duplicates.
fn finish_reasons(items: &[Value]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for item in items {
        let reason = item
            .get("finishReason")
            .or_else(|| item.get("finish_reason"))
            .and_then(Value::as_str);
        if let Some(r) = reason {
            if !out.iter().any(|seen| seen == r) {
                out.push(r.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn candidates_with_text() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "hello"}]}, "finishReason": "STOP"}],
            "responseId": "resp-1"
        });
        let d = extract(Some(&body));
        assert_eq!(d.dialect, ResponseDialect::Candidates);
        assert!(d.has_candidates);
        assert!(d.has_parts);
        assert_eq!(d.finish_reasons, vec!["STOP"]);
        assert_eq!(d.response_id.as_deref(), Some("resp-1"));
    }

    #[test]
    fn candidates_with_blank_parts() {
        let body = json!({
            "candidates": [{"content": {"parts": [{"text": "   "}]}, "finishReason": "MAX_TOKENS"}]
        });
        let d = extract(Some(&body));
        assert!(d.has_candidates);
        assert!(!d.has_parts);
        assert_eq!(d.finish_reasons, vec!["MAX_TOKENS"]);
    }

    #[test]
    fn empty_candidates_array() {
        let d = extract(Some(&json!({"candidates": []})));
        assert_eq!(d.dialect, ResponseDialect::Candidates);
        assert!(!d.has_candidates);
        assert!(!d.has_parts);
    }

    #[test]
    fn empty_candidates_defer_to_choices() {
        let body = json!({"candidates": [], "choices": [{"message": {"content": "hello"}}]});
        let d = extract(Some(&body));
        assert_eq!(d.dialect, ResponseDialect::Choices);
        assert!(d.has_candidates);
        assert!(d.has_parts);
        assert_eq!(body_text(Some(&body)).as_deref(), Some("hello"));
    }

    #[test]
    fn choices_string_content() {
        let body = json!({
            "id": "chatcmpl-9",
            "choices": [{"message": {"content": "{\"ok\":true}"}, "finish_reason": "stop"}]
        });
        let d = extract(Some(&body));
        assert_eq!(d.dialect, ResponseDialect::Choices);
        assert!(d.has_candidates);
        assert!(d.has_parts);
        assert_eq!(d.finish_reasons, vec!["stop"]);
        assert_eq!(d.response_id.as_deref(), Some("chatcmpl-9"));
    }

    #[test]
    fn choices_array_content() {
        let body = json!({
            "choices": [{"message": {"content": [{"type": "text", "text": ""}, {"type": "text", "text": "x"}]}}]
        });
        assert!(extract(Some(&body)).has_parts);
    }

    #[test]
    fn choices_legacy_text_field() {
        let body = json!({"choices": [{"text": "completion"}]});
        assert!(extract(Some(&body)).has_parts);
    }

    #[test]
    fn choices_blank_content() {
        let body = json!({"choices": [{"message": {"content": ""}, "finish_reason": "length"}]});
        let d = extract(Some(&body));
        assert!(d.has_candidates);
        assert!(!d.has_parts);
    }

    #[test]
    fn block_reason_without_candidates() {
        let body = json!({"promptFeedback": {"blockReason": "SAFETY"}});
        let d = extract(Some(&body));
        assert_eq!(d.dialect, ResponseDialect::Unknown);
        assert!(!d.has_candidates);
        assert_eq!(d.block_reason.as_deref(), Some("SAFETY"));
    }

    #[test]
    fn duplicate_finish_reasons_collapse() {
        let body = json!({
            "candidates": [{"finishReason": "STOP"}, {"finishReason": "STOP"}, {"finishReason": "SAFETY"}]
        });
        assert_eq!(extract(Some(&body)).finish_reasons, vec!["STOP", "SAFETY"]);
    }

    #[test]
    fn body_text_from_either_dialect() {
        let cands = json!({"candidates": [
            {"content": {"parts": [{"text": ""}]}},
            {"content": {"parts": [{"text": "{\"ok\":"}, {"text": "true}"}]}}
        ]});
        assert_eq!(body_text(Some(&cands)).as_deref(), Some("{\"ok\":true}"));

        let choices = json!({"choices": [{"text": "legacy"}]});
        assert_eq!(body_text(Some(&choices)).as_deref(), Some("legacy"));

        let blank = json!({"choices": [{"message": {"content": "  "}}]});
        assert_eq!(body_text(Some(&blank)), None);
        assert_eq!(body_text(None), None);
    }

    #[test]
    fn missing_or_scalar_body() {
        assert_eq!(extract(None), ResponseDiagnostics::default());
        assert_eq!(extract(Some(&json!("text"))), ResponseDiagnostics::default());
    }
}
