//! AI provider settings.
//!
//! A `ConfigSnapshot` is taken once per request and passed down explicitly.
//! The file-backed provider re-reads `ai_settings.json` on every snapshot so
//! edits apply to the next request without a restart.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroize;

use crate::generation::types::Purpose;

/// Env var that overrides the key stored in the settings file.
pub const API_KEY_ENV: &str = "TENDERFLOW_AI_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot read AI settings at {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid AI settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("No AI provider configured")]
    MissingProvider,

    #[error("No API key configured for provider {0}")]
    MissingApiKey(String),

    #[error("No model configured for {0}")]
    MissingModel(Purpose),
}

// ═══════════════════════════════════════════
// Secrets
// ═══════════════════════════════════════════

/// Provider API key. Zeroed on drop, never serialized, redacted in Debug.
#[derive(Clone, Default, Zeroize)]
#[zeroize(drop)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Raw key for the transport layer and the redaction filter only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_blank() {
            f.write_str("ApiKey(<unset>)")
        } else {
            f.write_str("ApiKey(<redacted>)")
        }
    }
}

// ═══════════════════════════════════════════
// Snapshot
// ═══════════════════════════════════════════

/// Per-purpose model routing and retry toggles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PurposeModels {
    pub primary_model: Option<String>,
    pub fallback_model: Option<String>,
    pub use_streaming_fallback: bool,
    pub retry_once_on_empty: bool,
    pub use_structured_json: bool,
}

impl Default for PurposeModels {
    fn default() -> Self {
        Self {
            primary_model: None,
            fallback_model: None,
            use_streaming_fallback: false,
            retry_once_on_empty: true,
            use_structured_json: true,
        }
    }
}

/// Immutable view of the AI settings for one request.
#[derive(Debug, Clone, Default)]
pub struct ConfigSnapshot {
    pub provider: String,
    pub api_key: ApiKey,
    pub text_model: Option<String>,
    pub image_model: Option<String>,
    pub purpose_models: HashMap<Purpose, PurposeModels>,
}

impl ConfigSnapshot {
    /// Routing for `purpose`, defaults when not configured.
    pub fn models_for(&self, purpose: Purpose) -> PurposeModels {
        self.purpose_models.get(&purpose).cloned().unwrap_or_default()
    }

    /// Primary model: purpose override, then the global text model.
    pub fn primary_model(&self, purpose: Purpose) -> Option<String> {
        self.purpose_models
            .get(&purpose)
            .and_then(|m| non_blank(m.primary_model.as_deref()))
            .or_else(|| non_blank(self.text_model.as_deref()))
    }

    /// Fallback model, only when set and different from `primary`.
    pub fn fallback_model(&self, purpose: Purpose, primary: &str) -> Option<String> {
        self.purpose_models
            .get(&purpose)
            .and_then(|m| non_blank(m.fallback_model.as_deref()))
            .filter(|fb| fb != primary)
    }

    /// Check the snapshot can serve `purpose`, returning the primary model.
    pub fn require(&self, purpose: Purpose) -> Result<String, ConfigError> {
        if self.provider.trim().is_empty() {
            return Err(ConfigError::MissingProvider);
        }
        if self.api_key.is_blank() {
            return Err(ConfigError::MissingApiKey(self.provider.clone()));
        }
        self.primary_model(purpose)
            .ok_or(ConfigError::MissingModel(purpose))
    }
}

fn non_blank(s: Option<&str>) -> Option<String> {
    s.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

// ═══════════════════════════════════════════
// Providers
// ═══════════════════════════════════════════

/// Source of per-request configuration snapshots.
pub trait ConfigProvider: Send + Sync {
    fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError>;
}

/// On-disk shape of `ai_settings.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SettingsFile {
    provider: Option<String>,
    api_key: Option<String>,
    text_model: Option<String>,
    image_model: Option<String>,
    purpose_models: HashMap<String, PurposeModels>,
}

impl SettingsFile {
    fn into_snapshot(mut self, key_override: Option<String>) -> ConfigSnapshot {
        let mut purpose_models = HashMap::new();
        for (name, models) in std::mem::take(&mut self.purpose_models) {
            match Purpose::from_str(&name) {
                Some(purpose) => {
                    purpose_models.insert(purpose, models);
                }
                None => tracing::warn!(purpose = %name, "Ignoring settings for unknown purpose"),
            }
        }
        let key = key_override
            .filter(|k| !k.trim().is_empty())
            .or_else(|| self.api_key.take())
            .unwrap_or_default();
        let snapshot = ConfigSnapshot {
            provider: self.provider.take().unwrap_or_default(),
            api_key: ApiKey::new(key),
            text_model: self.text_model.take(),
            image_model: self.image_model.take(),
            purpose_models,
        };
        if let Some(k) = self.api_key.as_mut() {
            k.zeroize();
        }
        snapshot
    }
}

/// Reads `ai_settings.json` on every snapshot.
///
/// A missing file yields an empty snapshot, which fails `require` with
/// `MissingProvider`.
pub struct FileConfigProvider {
    path: PathBuf,
}

impl FileConfigProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn key_override() -> Option<String> {
        std::env::var(API_KEY_ENV).ok()
    }
}

impl ConfigProvider for FileConfigProvider {
    fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "AI settings file not found");
                return Ok(SettingsFile::default().into_snapshot(Self::key_override()));
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let file: SettingsFile = serde_json::from_str(&raw)?;
        Ok(file.into_snapshot(Self::key_override()))
    }
}

/// Fixed snapshot, for tests and embedding.
pub struct StaticConfigProvider {
    snapshot: ConfigSnapshot,
}

impl StaticConfigProvider {
    pub fn new(snapshot: ConfigSnapshot) -> Self {
        Self { snapshot }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn snapshot(&self) -> Result<ConfigSnapshot, ConfigError> {
        Ok(self.snapshot.clone())
    }
}
