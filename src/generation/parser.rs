use serde_json::Value;

/// Extract the first JSON object from provider text.
///
/// Accepts bare JSON, JSON inside a ```json fence, and JSON surrounded by
/// prose. Returns `None` when nothing parses.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return None;
    }

    let unfenced = strip_code_fence(trimmed);
    if let Ok(value) = serde_json::from_str::<Value>(unfenced) {
        if value.is_object() {
            return Some(value);
        }
    }

    let start = unfenced.find('{')?;
    let end = unfenced.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&unfenced[start..=end])
        .ok()
        .filter(Value::is_object)
}

/// Return the contents of the first fenced block, or the input unchanged.
fn strip_code_fence(text: &str) -> &str {
    let Some(open) = text.find("```") else {
        return text;
    };
    let after_open = &text[open + 3..];
    // Skip the language tag up to the end of the fence line
    let body_start = after_open.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_open[body_start..];
    match body.find("```") {
        Some(close) => body[..close].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_object() {
        assert_eq!(extract_json(r#"{"ok":true}"#), Some(json!({"ok": true})));
    }

    #[test]
    fn fenced_object() {
        let text = "```json\n{\"ok\": true, \"ts\": \"x\"}\n```";
        assert_eq!(extract_json(text), Some(json!({"ok": true, "ts": "x"})));
    }

    #[test]
    fn fence_without_language_tag() {
        let text = "```\n{\"a\": 1}\n```";
        assert_eq!(extract_json(text), Some(json!({"a": 1})));
    }

    #[test]
    fn object_inside_prose() {
        let text = "Sure! Here you go: {\"topics\": []} Hope that helps.";
        assert_eq!(extract_json(text), Some(json!({"topics": []})));
    }

    #[test]
    fn empty_and_garbage() {
        assert_eq!(extract_json(""), None);
        assert_eq!(extract_json("   \n "), None);
        assert_eq!(extract_json("no json here"), None);
        assert_eq!(extract_json("} backwards {"), None);
    }

    #[test]
    fn top_level_array_is_rejected() {
        assert_eq!(extract_json("[1, 2, 3]"), None);
    }

    #[test]
    fn unclosed_fence_still_parses() {
        let text = "```json\n{\"a\": true}";
        assert_eq!(extract_json(text), Some(json!({"a": true})));
    }
}
