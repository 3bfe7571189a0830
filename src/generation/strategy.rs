//! Per-purpose sampling strategy and the retry/fallback adjustments.
//!
//! The decision table is hardcoded: each purpose has a base temperature,
//! a base token budget and a token floor that empty-content retries are
//! raised to.

use super::types::{Purpose, SamplingOptions};

/// Temperature added on the retry that follows an empty response.
pub const EMPTY_RETRY_TEMPERATURE_BUMP: f32 = 0.1;

/// Temperature added on the fallback attempt.
pub const FALLBACK_TEMPERATURE_BUMP: f32 = 0.05;

/// Upper bound for any adjusted temperature.
pub const MAX_TEMPERATURE: f32 = 1.0;

/// Resolved sampling defaults for one purpose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PurposeStrategy {
    pub temperature: f32,
    pub max_tokens: u32,
    /// Minimum token budget once the provider has returned nothing.
    pub token_floor: u32,
    pub expect_json: bool,
}

/// Pure lookup, no I/O.
pub fn resolve_strategy(purpose: Purpose) -> PurposeStrategy {
    match purpose {
        Purpose::HealthProbe => PurposeStrategy {
            temperature: 0.0,
            max_tokens: 64,
            token_floor: 256,
            expect_json: true,
        },
        Purpose::TopicIdeas => PurposeStrategy {
            temperature: 0.7,
            max_tokens: 800,
            token_floor: 1536,
            expect_json: true,
        },
        Purpose::ContentDraft => PurposeStrategy {
            temperature: 0.6,
            max_tokens: 3000,
            token_floor: 4096,
            expect_json: true,
        },
    }
}

/// Base options for the primary attempt.
pub fn base_options(purpose: Purpose) -> SamplingOptions {
    let s = resolve_strategy(purpose);
    SamplingOptions {
        temperature: s.temperature,
        max_tokens: s.max_tokens,
        expect_json: s.expect_json,
        model_override: None,
        stream: false,
    }
}

/// Options for the retry attempt.
///
/// Only an empty-content failure bumps sampling; any other failure retries
/// with the base options unchanged.
pub fn retry_options(purpose: Purpose, base: &SamplingOptions, empty_content: bool) -> SamplingOptions {
    if !empty_content {
        return base.clone();
    }
    let floor = resolve_strategy(purpose).token_floor;
    SamplingOptions {
        temperature: bump(base.temperature, EMPTY_RETRY_TEMPERATURE_BUMP),
        max_tokens: base.max_tokens.max(floor),
        ..base.clone()
    }
}

/// Options for the fallback attempt against `fallback_model`.
pub fn fallback_options(
    purpose: Purpose,
    base: &SamplingOptions,
    fallback_model: &str,
    stream: bool,
) -> SamplingOptions {
    let floor = resolve_strategy(purpose).token_floor;
    SamplingOptions {
        temperature: bump(base.temperature, FALLBACK_TEMPERATURE_BUMP),
        max_tokens: base.max_tokens.max(floor),
        expect_json: base.expect_json,
        model_override: Some(fallback_model.to_string()),
        stream,
    }
}

fn bump(temperature: f32, by: f32) -> f32 {
    (temperature + by).min(MAX_TEMPERATURE)
}
