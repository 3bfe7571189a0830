//! Purpose-specific schema checks on parsed provider output.
//!
//! Errors are short machine-readable strings (`missing_field:title`,
//! `topics_count_out_of_range:3 (expected 4-5)`) so they can be merged into
//! outcome error lists and persisted without further formatting.

use serde_json::{Map, Value};

use super::types::{DraftContent, Purpose, TopicIdea, ValidatedPayload};

pub const TOPICS_MIN: usize = 4;
pub const TOPICS_MAX: usize = 5;

/// Result of validating one parsed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationReport {
    pub ok: bool,
    pub normalized: Option<ValidatedPayload>,
    pub errors: Vec<String>,
}

impl ValidationReport {
    fn accept(payload: ValidatedPayload) -> Self {
        Self {
            ok: true,
            normalized: Some(payload),
            errors: Vec::new(),
        }
    }

    fn reject(errors: Vec<String>) -> Self {
        Self {
            ok: false,
            normalized: None,
            errors,
        }
    }
}

/// Validate `payload` against the schema for `purpose`.
pub fn validate(purpose: Purpose, payload: Option<&Value>) -> ValidationReport {
    let Some(value) = payload else {
        return ValidationReport::reject(vec!["invalid_json".into()]);
    };
    let Some(obj) = value.as_object() else {
        return ValidationReport::reject(vec!["not_an_object".into()]);
    };

    match purpose {
        Purpose::HealthProbe => validate_health_echo(obj),
        Purpose::TopicIdeas => validate_topics(obj),
        Purpose::ContentDraft => validate_draft(obj),
    }
}

fn validate_health_echo(obj: &Map<String, Value>) -> ValidationReport {
    let mut errors = Vec::new();

    let ok = match obj.get("ok") {
        Some(Value::Bool(b)) => Some(*b),
        Some(_) => {
            errors.push("wrong_type:ok (expected boolean)".to_string());
            None
        }
        None => {
            errors.push("missing_field:ok".to_string());
            None
        }
    };

    let ts = match obj.get("ts") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push("wrong_type:ts (expected string)".to_string());
            None
        }
        None => {
            errors.push("missing_field:ts".to_string());
            None
        }
    };

    match (ok, ts) {
        (Some(ok), Some(ts)) if errors.is_empty() => {
            ValidationReport::accept(ValidatedPayload::HealthEcho { ok, ts })
        }
        _ => ValidationReport::reject(errors),
    }
}

fn validate_topics(obj: &Map<String, Value>) -> ValidationReport {
    let Some(raw) = obj.get("topics") else {
        return ValidationReport::reject(vec!["missing_field:topics".into()]);
    };
    let Some(items) = raw.as_array() else {
        return ValidationReport::reject(vec!["wrong_type:topics (expected array)".into()]);
    };

    let mut errors = Vec::new();
    if !(TOPICS_MIN..=TOPICS_MAX).contains(&items.len()) {
        errors.push(format!(
            "topics_count_out_of_range:{} (expected {TOPICS_MIN}-{TOPICS_MAX})",
            items.len()
        ));
    }

    let mut topics = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let Some(topic) = item.as_object() else {
            errors.push(format!("wrong_type:topics[{i}] (expected object)"));
            continue;
        };
        match non_blank_str(topic.get("title")) {
            Some(title) => topics.push(TopicIdea {
                title,
                angle: non_blank_str(topic.get("angle")),
                keywords: keywords(topic.get("keywords")),
            }),
            None if topic.contains_key("title") => {
                errors.push(format!("blank_field:topics[{i}].title"));
            }
            None => errors.push(format!("missing_field:topics[{i}].title")),
        }
    }

    if errors.is_empty() {
        ValidationReport::accept(ValidatedPayload::Topics { topics })
    } else {
        ValidationReport::reject(errors)
    }
}

fn validate_draft(obj: &Map<String, Value>) -> ValidationReport {
    let mut errors = Vec::new();

    let title = required_str(obj, "title", &mut errors);
    let body_html = required_str(obj, "bodyHtml", &mut errors);

    match (title, body_html) {
        (Some(title), Some(body_html)) => ValidationReport::accept(ValidatedPayload::Draft(DraftContent {
            title,
            body_html,
            excerpt: non_blank_str(obj.get("excerpt")),
        })),
        _ => ValidationReport::reject(errors),
    }
}

fn required_str(obj: &Map<String, Value>, field: &str, errors: &mut Vec<String>) -> Option<String> {
    match obj.get(field) {
        None | Some(Value::Null) => {
            errors.push(format!("missing_field:{field}"));
            None
        }
        Some(Value::String(s)) if s.trim().is_empty() => {
            errors.push(format!("blank_field:{field}"));
            None
        }
        Some(Value::String(s)) => Some(s.trim().to_string()),
        Some(_) => {
            errors.push(format!("wrong_type:{field} (expected string)"));
            None
        }
    }
}

fn non_blank_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Keywords arrive either as an array of strings or one comma-separated string.
fn keywords(value: Option<&Value>) -> Vec<String> {
    let clean = |s: &str| {
        let t = s.trim();
        (!t.is_empty()).then(|| t.to_string())
    };
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).filter_map(clean).collect(),
        Some(Value::String(s)) => s.split(',').filter_map(clean).collect(),
        _ => Vec::new(),
    }
}
