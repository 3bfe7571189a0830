//! Prompt assembly: system/user pair, per-request nonce, audit hash.
//!
//! Pure aside from drawing the nonce. The retry augmentation used by the
//! attempt controller lives here too so every prompt string has one home.

use base64::Engine;
use rand::RngCore;

use super::hash::prompt_hash;
use super::strategy::base_options;
use super::types::{GenerationRequest, Purpose, SamplingOptions};

/// Nonce entropy in bytes.
const NONCE_BYTES: usize = 16;

/// Purpose-specific inputs for prompt assembly.
#[derive(Debug, Clone, Default)]
pub struct PromptContext {
    pub topic_count: Option<u32>,
    pub subject: Option<String>,
    pub keywords: Vec<String>,
    pub audience: Option<String>,
    pub title: Option<String>,
    pub brief: Option<String>,
    pub tone: Option<String>,
    /// Timestamp the health probe asks the provider to echo back.
    pub timestamp: Option<String>,
}

/// Output of [`assemble`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssembledPrompt {
    pub system_prompt: String,
    pub user_prompt: String,
    pub nonce: String,
    pub prompt_hash: String,
}

impl AssembledPrompt {
    /// Turn the prompt into a request with the purpose's base sampling options.
    pub fn into_request(self, purpose: Purpose) -> GenerationRequest {
        self.into_request_with(purpose, base_options(purpose))
    }

    pub fn into_request_with(self, purpose: Purpose, options: SamplingOptions) -> GenerationRequest {
        GenerationRequest {
            purpose,
            system_prompt: self.system_prompt,
            user_prompt: self.user_prompt,
            options,
            nonce: self.nonce,
            prompt_hash: self.prompt_hash,
        }
    }
}

/// Draw a fresh nonce from the OS random source (URL-safe base64).
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(bytes)
}

/// Build the prompt pair for `purpose` with a fresh nonce.
pub fn assemble(purpose: Purpose, ctx: &PromptContext) -> AssembledPrompt {
    assemble_with_nonce(purpose, ctx, generate_nonce())
}

/// Build the prompt pair with a caller-supplied nonce.
pub fn assemble_with_nonce(purpose: Purpose, ctx: &PromptContext, nonce: String) -> AssembledPrompt {
    let system_prompt = system_prompt(purpose).to_string();
    let user_prompt = format!("{}\n\nRequest nonce: {nonce}", user_prompt(purpose, ctx));
    let prompt_hash = prompt_hash(&system_prompt, &user_prompt, &nonce);
    AssembledPrompt {
        system_prompt,
        user_prompt,
        nonce,
        prompt_hash,
    }
}

/// Append the strict-output instruction used by retry and fallback attempts.
pub fn augment_for_retry(purpose: Purpose, user_prompt: &str) -> String {
    format!(
        "{user_prompt}\n\nIMPORTANT: The previous response was empty or invalid. \
         Respond with a single non-empty JSON object and nothing else. \
         Do not use markdown, code fences or commentary. \
         The object must match exactly this schema: {}",
        schema_hint(purpose)
    )
}

/// Compact description of the JSON shape each purpose must return.
pub fn schema_hint(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::HealthProbe => r#"{"ok": true, "ts": "<timestamp string>"}"#,
        Purpose::TopicIdeas => {
            r#"{"topics": [{"title": "<non-empty>", "angle": "<optional>", "keywords": ["<optional>"]}]} with 4 or 5 topics"#
        }
        Purpose::ContentDraft => {
            r#"{"title": "<non-empty>", "bodyHtml": "<non-empty HTML>", "excerpt": "<optional>"}"#
        }
    }
}

fn system_prompt(purpose: Purpose) -> &'static str {
    match purpose {
        Purpose::HealthProbe => {
            "You are a connectivity probe. Reply with JSON only, exactly as instructed."
        }
        Purpose::TopicIdeas => {
            "You are an editorial assistant for a public tender and contractor portal. \
             You propose article topics. Output valid JSON only."
        }
        Purpose::ContentDraft => {
            "You are an editorial writer for a public tender and contractor portal. \
             You write clear, factual articles in simple HTML. Output valid JSON only."
        }
    }
}

fn user_prompt(purpose: Purpose, ctx: &PromptContext) -> String {
    match purpose {
        Purpose::HealthProbe => {
            let ts = ctx.timestamp.as_deref().unwrap_or("now");
            format!(
                "Return exactly this JSON object with no other text: {{\"ok\": true, \"ts\": \"{ts}\"}}"
            )
        }
        Purpose::TopicIdeas => {
            let count = ctx.topic_count.unwrap_or(5);
            let subject = ctx.subject.as_deref().unwrap_or("public procurement");
            let mut prompt = format!(
                "Suggest {count} article topics about: {subject}.\n\
                 Return JSON: {}",
                schema_hint(purpose)
            );
            push_optional(&mut prompt, "Audience", ctx.audience.as_deref());
            push_keywords(&mut prompt, &ctx.keywords);
            prompt
        }
        Purpose::ContentDraft => {
            let title = ctx.title.as_deref().unwrap_or("Untitled");
            let mut prompt = format!(
                "Write an article titled: {title}.\n\
                 Return JSON: {}",
                schema_hint(purpose)
            );
            push_optional(&mut prompt, "Brief", ctx.brief.as_deref());
            push_optional(&mut prompt, "Tone", ctx.tone.as_deref());
            push_optional(&mut prompt, "Audience", ctx.audience.as_deref());
            push_keywords(&mut prompt, &ctx.keywords);
            prompt
        }
    }
}

fn push_optional(prompt: &mut String, label: &str, value: Option<&str>) {
    if let Some(v) = value.map(str::trim).filter(|v| !v.is_empty()) {
        prompt.push_str(&format!("\n{label}: {v}"));
    }
}

fn push_keywords(prompt: &mut String, keywords: &[String]) {
    let cleaned: Vec<&str> = keywords
        .iter()
        .map(|k| k.trim())
        .filter(|k| !k.is_empty())
        .collect();
    if !cleaned.is_empty() {
        prompt.push_str(&format!("\nKeywords: {}", cleaned.join(", ")));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics_ctx() -> PromptContext {
        PromptContext {
            topic_count: Some(5),
            subject: Some("framework agreements".into()),
            keywords: vec!["bidding".into(), "  ".into()],
            ..Default::default()
        }
    }

    #[test]
    fn nonce_is_unique_per_assembly() {
        let a = assemble(Purpose::TopicIdeas, &topics_ctx());
        let b = assemble(Purpose::TopicIdeas, &topics_ctx());
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.prompt_hash, b.prompt_hash);
    }

    #[test]
    fn nonce_has_expected_length() {
        // 16 bytes → 22 chars URL-safe base64 without padding
        assert_eq!(generate_nonce().len(), 22);
    }

    #[test]
    fn fixed_nonce_is_deterministic() {
        let a = assemble_with_nonce(Purpose::TopicIdeas, &topics_ctx(), "abc".into());
        let b = assemble_with_nonce(Purpose::TopicIdeas, &topics_ctx(), "abc".into());
        assert_eq!(a, b);
    }

    #[test]
    fn hash_covers_final_prompts_and_nonce() {
        let a = assemble_with_nonce(Purpose::ContentDraft, &PromptContext::default(), "n".into());
        assert_eq!(a.prompt_hash, prompt_hash(&a.system_prompt, &a.user_prompt, "n"));
    }

    #[test]
    fn user_prompt_embeds_nonce() {
        let a = assemble_with_nonce(Purpose::HealthProbe, &PromptContext::default(), "xyz".into());
        assert!(a.user_prompt.contains("Request nonce: xyz"));
    }

    #[test]
    fn topics_prompt_carries_count_and_keywords() {
        let a = assemble(Purpose::TopicIdeas, &topics_ctx());
        assert!(a.user_prompt.contains("Suggest 5 article topics"));
        assert!(a.user_prompt.contains("Keywords: bidding"));
        assert!(!a.user_prompt.contains("bidding, "));
    }

    #[test]
    fn health_probe_prompt_embeds_timestamp() {
        let ctx = PromptContext {
            timestamp: Some("2026-01-01T00:00:00Z".into()),
            ..Default::default()
        };
        let a = assemble(Purpose::HealthProbe, &ctx);
        assert!(a.user_prompt.contains("\"ts\": \"2026-01-01T00:00:00Z\""));
    }

    #[test]
    fn retry_augmentation_demands_plain_json() {
        let out = augment_for_retry(Purpose::ContentDraft, "Write it.");
        assert!(out.starts_with("Write it."));
        assert!(out.contains("non-empty JSON"));
        assert!(out.contains("bodyHtml"));
        assert!(out.contains("markdown"));
    }

    #[test]
    fn into_request_uses_base_options() {
        let req = assemble(Purpose::HealthProbe, &PromptContext::default())
            .into_request(Purpose::HealthProbe);
        assert_eq!(req.options, base_options(Purpose::HealthProbe));
    }
}
