//! Analyzer configuration from an optional `liasse.{toml,json,yaml}` file and `LIASSE_*` variables.

use crate::chunking::MAX_PAGES_HARD_CAP;
use crate::error::{LiasseError, Result};
use crate::merge::ConflictPolicy;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
pub const DEFAULT_API_BASE_URL: &str = "https://api.anthropic.com/v1";

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_api_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_pages_per_chunk() -> u32 {
    1
}

fn default_max_pages() -> u32 {
    MAX_PAGES_HARD_CAP
}

fn default_cache_max_age_days() -> i64 {
    30
}

fn default_wait_for_documents_secs() -> u64 {
    60
}

fn default_max_concurrent_profiles() -> usize {
    4
}

fn default_processing_log_limit() -> usize {
    20
}

fn default_ocr_max_tokens() -> u32 {
    8192
}

fn default_extraction_max_tokens() -> u32 {
    2048
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerConfig {
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,

    #[serde(default = "default_pages_per_chunk")]
    pub pages_per_chunk: u32,

    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    #[serde(default = "default_cache_max_age_days")]
    pub cache_max_age_days: i64,

    /// How long a run waits for uploads to appear before failing.
    #[serde(default = "default_wait_for_documents_secs")]
    pub wait_for_documents_secs: u64,

    #[serde(default = "default_max_concurrent_profiles")]
    pub max_concurrent_profiles: usize,

    #[serde(default = "default_processing_log_limit")]
    pub processing_log_limit: usize,

    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    #[serde(default = "default_ocr_max_tokens")]
    pub ocr_max_tokens: u32,

    #[serde(default = "default_extraction_max_tokens")]
    pub extraction_max_tokens: u32,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            api_base_url: default_api_base_url(),
            pages_per_chunk: default_pages_per_chunk(),
            max_pages: default_max_pages(),
            cache_max_age_days: default_cache_max_age_days(),
            wait_for_documents_secs: default_wait_for_documents_secs(),
            max_concurrent_profiles: default_max_concurrent_profiles(),
            processing_log_limit: default_processing_log_limit(),
            conflict_policy: ConflictPolicy::default(),
            ocr_max_tokens: default_ocr_max_tokens(),
            extraction_max_tokens: default_extraction_max_tokens(),
        }
    }
}

fn env_source() -> Environment {
    Environment::with_prefix("LIASSE")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

impl AnalyzerConfig {
    /// Loads `liasse.*` from the working directory (if any), then `LIASSE_*` variables.
    ///
    /// Without an explicit key, `ANTHROPIC_API_KEY` is used.
    pub fn load() -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name("liasse").required(false))
            .add_source(env_source());
        Self::finish(builder.build(), true)
    }

    /// Like [`load`](Self::load) with an explicit file path.
    pub fn load_from(path: &str) -> Result<Self> {
        let builder = Config::builder()
            .add_source(File::with_name(path).required(true))
            .add_source(env_source());
        Self::finish(builder.build(), true)
    }

    /// Parses TOML text only, ignoring the environment.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let builder = Config::builder().add_source(File::from_str(text, FileFormat::Toml));
        Self::finish(builder.build(), false)
    }

    fn finish(
        built: std::result::Result<Config, config::ConfigError>,
        env_key_fallback: bool,
    ) -> Result<Self> {
        let mut loaded: Self = built
            .map_err(|e| LiasseError::InvalidConfig(format!("Failed to build config: {}", e)))?
            .try_deserialize()
            .map_err(|e| {
                LiasseError::InvalidConfig(format!("Failed to deserialize config: {}", e))
            })?;

        if env_key_fallback && loaded.api_key.is_none() {
            loaded.api_key = std::env::var("ANTHROPIC_API_KEY")
                .ok()
                .filter(|key| !key.trim().is_empty());
        }

        loaded.validate()?;
        Ok(loaded)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pages_per_chunk == 0 || self.pages_per_chunk > MAX_PAGES_HARD_CAP {
            return Err(LiasseError::InvalidConfig(format!(
                "pages_per_chunk must be between 1 and {}",
                MAX_PAGES_HARD_CAP
            )));
        }
        if self.max_pages == 0 || self.max_pages > MAX_PAGES_HARD_CAP {
            return Err(LiasseError::InvalidConfig(format!(
                "max_pages must be between 1 and {}",
                MAX_PAGES_HARD_CAP
            )));
        }
        if self.cache_max_age_days < 0 {
            return Err(LiasseError::InvalidConfig(
                "cache_max_age_days cannot be negative".to_string(),
            ));
        }
        if self.max_concurrent_profiles == 0 {
            return Err(LiasseError::InvalidConfig(
                "max_concurrent_profiles must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn cache_max_age(&self) -> chrono::Duration {
        chrono::Duration::days(self.cache_max_age_days)
    }

    pub fn wait_for_documents(&self) -> Duration {
        Duration::from_secs(self.wait_for_documents_secs)
    }

    /// The key, if one is set and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|key| !key.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::from_toml_str("").unwrap();
        assert_eq!(config, AnalyzerConfig::default());
        assert_eq!(config.model, "claude-sonnet-4-20250514");
        assert_eq!(config.pages_per_chunk, 1);
        assert_eq!(config.max_pages, 25);
        assert_eq!(config.cache_max_age(), chrono::Duration::days(30));
        assert_eq!(config.wait_for_documents(), Duration::from_secs(60));
        assert_eq!(config.processing_log_limit, 20);
        assert_eq!(config.conflict_policy, ConflictPolicy::LastWriteWins);
    }

    #[test]
    fn test_overrides() {
        let config = AnalyzerConfig::from_toml_str(
            r#"
            pages_per_chunk = 3
            max_pages = 10
            conflict_policy = "first_write_wins"
            api_key = "sk-test"
            "#,
        )
        .unwrap();
        assert_eq!(config.pages_per_chunk, 3);
        assert_eq!(config.max_pages, 10);
        assert_eq!(config.conflict_policy, ConflictPolicy::FirstWriteWins);
        assert_eq!(config.api_key(), Some("sk-test"));
    }

    #[test]
    fn test_validation() {
        assert!(AnalyzerConfig::from_toml_str("max_pages = 26").is_err());
        assert!(AnalyzerConfig::from_toml_str("pages_per_chunk = 0").is_err());
        assert!(AnalyzerConfig::from_toml_str("pages_per_chunk = 26").is_err());
        assert!(AnalyzerConfig::from_toml_str("pages_per_chunk = 4294967295").is_err());
        assert!(AnalyzerConfig::from_toml_str("pages_per_chunk = 25").is_ok());
        assert!(AnalyzerConfig::from_toml_str("cache_max_age_days = -1").is_err());
        assert!(AnalyzerConfig::from_toml_str("max_concurrent_profiles = 0").is_err());
        assert!(matches!(
            AnalyzerConfig::from_toml_str("max_pages = 0"),
            Err(LiasseError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_blank_key_is_missing() {
        let config = AnalyzerConfig::default().with_api_key("  ");
        assert_eq!(config.api_key(), None);
    }
}
