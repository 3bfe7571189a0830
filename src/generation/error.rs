use thiserror::Error;

use crate::ai_config::ConfigError;
use crate::jobs::store::JobStoreError;

/// Failures that stop generation before or outside the attempt loop.
///
/// Per-attempt problems (transport, empty text, blocked prompts, schema
/// violations) are recorded on the attempt and never surface here.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] JobStoreError),

    #[error("Invalid job input: {0}")]
    InvalidInput(String),
}

impl GenerationError {
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
