use sha2::{Digest, Sha256};

use super::types::ValidatedPayload;

/// Lowercase hex SHA-256 over the concatenation of `parts`.
pub fn sha256_hex(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Audit correlation hash for a prompt pair. Not used for any security decision.
pub fn prompt_hash(system_prompt: &str, user_prompt: &str, nonce: &str) -> String {
    sha256_hex(&[system_prompt, user_prompt, nonce])
}

/// Hash of the accepted content, computed over its serialized form.
pub fn output_hash(payload: &ValidatedPayload) -> Option<String> {
    let canonical = serde_json::to_string(payload).ok()?;
    Some(sha256_hex(&[&canonical]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generation::types::DraftContent;

    #[test]
    fn prompt_hash_deterministic() {
        let a = prompt_hash("sys", "user", "n1");
        let b = prompt_hash("sys", "user", "n1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn prompt_hash_changes_with_nonce() {
        assert_ne!(prompt_hash("sys", "user", "n1"), prompt_hash("sys", "user", "n2"));
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            sha256_hex(&["abc"]),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn output_hash_tracks_content() {
        let draft = |body: &str| {
            ValidatedPayload::Draft(DraftContent {
                title: "T".into(),
                body_html: body.into(),
                excerpt: None,
            })
        };
        assert_eq!(output_hash(&draft("<p>a</p>")), output_hash(&draft("<p>a</p>")));
        assert_ne!(output_hash(&draft("<p>a</p>")), output_hash(&draft("<p>b</p>")));
    }
}
