use crate::error::{Result, ScribeError};
use crate::media::SegmentBudget;
use crate::retry::RetryPolicy;
use crate::transcribe::{TranscribeOptions, WhisperModel, VENDOR_MAX_PAYLOAD_BYTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

const MB: usize = 1024 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Local,
    Memory,
    Object,
}

impl std::fmt::Display for StorageBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageBackend::Local => write!(f, "local"),
            StorageBackend::Memory => write!(f, "memory"),
            StorageBackend::Object => write!(f, "object"),
        }
    }
}

impl std::str::FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(StorageBackend::Local),
            "memory" => Ok(StorageBackend::Memory),
            "object" => Ok(StorageBackend::Object),
            _ => Err(format!(
                "Unknown storage backend: {}. Use 'local', 'memory' or 'object'",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub openai_api_key: Option<String>,
    pub openai_base_url: Option<String>,
    pub model: WhisperModel,
    pub gemini_api_key: Option<String>,
    pub language: Option<String>,
    pub prompt: Option<String>,
    pub concurrency: usize,
    pub max_segment_minutes: u64,
    pub max_segment_mb: u64,
    pub storage: StorageBackend,
    pub storage_dir: Option<PathBuf>,
    pub object_store_url: Option<String>,
    pub object_store_key: Option<String>,
    pub bucket: String,
    pub idle_timeout_secs: u64,
    pub encode_retry: RetryPolicy,
    pub store_retry: RetryPolicy,
    pub transcribe_retry: RetryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: None,
            model: WhisperModel::default(),
            gemini_api_key: None,
            language: None,
            prompt: None,
            concurrency: 3,
            max_segment_minutes: 10,
            max_segment_mb: 24,
            storage: StorageBackend::default(),
            storage_dir: None,
            object_store_url: None,
            object_store_key: None,
            bucket: "audio-chunks".to_string(),
            idle_timeout_secs: 3600,
            encode_retry: RetryPolicy::new(3, 500),
            store_retry: RetryPolicy::new(3, 500),
            transcribe_retry: RetryPolicy::new(3, 1000),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = match Self::config_file_path() {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Read a TOML config file. Missing keys take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        toml::from_str(&contents).map_err(|e| {
            ScribeError::Config(format!("Invalid config file {}: {e}", path.display()))
        })
    }

    /// Override fields from environment variables looked up through `var`.
    pub fn apply_env<F>(&mut self, var: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = var("OPENAI_API_KEY") {
            self.openai_api_key = Some(key);
        }
        if let Some(url) = var("OPENAI_BASE_URL") {
            self.openai_base_url = Some(url);
        }
        if let Some(key) = var("GEMINI_API_KEY") {
            self.gemini_api_key = Some(key);
        }
        if let Some(storage) = var("CHUNKSCRIBE_STORAGE") {
            if let Ok(s) = storage.parse() {
                self.storage = s;
            }
        }
        if let Some(dir) = var("CHUNKSCRIBE_STORAGE_DIR") {
            self.storage_dir = Some(PathBuf::from(dir));
        }
        if let Some(url) = var("CHUNKSCRIBE_OBJECT_STORE_URL") {
            self.object_store_url = Some(url);
        }
        if let Some(key) = var("CHUNKSCRIBE_OBJECT_STORE_KEY") {
            self.object_store_key = Some(key);
        }
        if let Some(bucket) = var("CHUNKSCRIBE_BUCKET") {
            self.bucket = bucket;
        }
        if let Some(c) = var("CHUNKSCRIBE_CONCURRENCY").and_then(|v| v.parse().ok()) {
            self.concurrency = c;
        }
        if let Some(m) = var("CHUNKSCRIBE_MAX_SEGMENT_MINUTES").and_then(|v| v.parse().ok()) {
            self.max_segment_minutes = m;
        }
        if let Some(mb) = var("CHUNKSCRIBE_MAX_SEGMENT_MB").and_then(|v| v.parse().ok()) {
            self.max_segment_mb = mb;
        }
        if let Some(secs) = var("CHUNKSCRIBE_IDLE_TIMEOUT_SECS").and_then(|v| v.parse().ok()) {
            self.idle_timeout_secs = secs;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.openai_api_key.is_none() {
            return Err(ScribeError::Config(
                "OPENAI_API_KEY not set. Export it with: export OPENAI_API_KEY=sk-...".to_string(),
            ));
        }

        if self.concurrency == 0 {
            return Err(ScribeError::Config(
                "Concurrency must be greater than 0".to_string(),
            ));
        }

        if self.max_segment_minutes == 0 || self.max_segment_mb == 0 {
            return Err(ScribeError::Config(
                "Segment budgets must be greater than 0".to_string(),
            ));
        }

        if self.max_segment_mb >= (VENDOR_MAX_PAYLOAD_BYTES / MB) as u64 {
            return Err(ScribeError::Config(format!(
                "max_segment_mb ({}) must stay below the 25 MB vendor limit",
                self.max_segment_mb
            )));
        }

        for (name, policy) in [
            ("encode_retry", &self.encode_retry),
            ("store_retry", &self.store_retry),
            ("transcribe_retry", &self.transcribe_retry),
        ] {
            if policy.max_attempts == 0 {
                return Err(ScribeError::Config(format!(
                    "{name}.max_attempts must be at least 1"
                )));
            }
        }

        if self.storage == StorageBackend::Object && self.object_store_url.is_none() {
            return Err(ScribeError::Config(
                "Object storage selected but CHUNKSCRIBE_OBJECT_STORE_URL is not set".to_string(),
            ));
        }

        Ok(())
    }

    pub fn segment_budget(&self) -> SegmentBudget {
        SegmentBudget::new(
            self.max_segment_minutes,
            self.max_segment_mb.saturating_mul(MB as u64),
        )
    }

    pub fn transcribe_options(&self) -> TranscribeOptions {
        TranscribeOptions {
            language: self.language.clone(),
            prompt: self.prompt.clone(),
        }
    }

    /// How long a job may sit untouched before the idle sweeper removes it.
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Directory for the local chunk store.
    pub fn storage_dir(&self) -> PathBuf {
        self.storage_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("chunkscribe")
                .join("chunks")
        })
    }

    pub fn config_file_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("chunkscribe").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn valid_config() -> Config {
        Config {
            openai_api_key: Some("sk-test".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_storage_parsing() {
        assert_eq!("local".parse::<StorageBackend>().unwrap(), StorageBackend::Local);
        assert_eq!("MEMORY".parse::<StorageBackend>().unwrap(), StorageBackend::Memory);
        assert_eq!("object".parse::<StorageBackend>().unwrap(), StorageBackend::Object);
        assert!("s3".parse::<StorageBackend>().is_err());
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.storage, StorageBackend::Local);
        assert_eq!(config.idle_timeout(), Duration::from_secs(3600));
        let budget = config.segment_budget();
        assert_eq!(budget.max_duration, Duration::from_secs(600));
        assert_eq!(budget.max_bytes, 24 * 1024 * 1024);
        assert_eq!(config.store_retry.max_attempts, 3);
    }

    #[test]
    fn test_validate_missing_api_key() {
        assert!(Config::default().validate().is_err());
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_budgets() {
        let mut config = valid_config();
        config.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.max_segment_mb = 25;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.store_retry.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_overflowing_budgets() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("CHUNKSCRIBE_MAX_SEGMENT_MB", "18000000000000"),
            ("CHUNKSCRIBE_MAX_SEGMENT_MINUTES", "18446744073709551615"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(config.max_segment_mb, 18_000_000_000_000);

        assert!(matches!(config.validate(), Err(ScribeError::Config(_))));
        let budget = config.segment_budget();
        assert_eq!(budget.max_bytes, u64::MAX);
        assert_eq!(budget.max_duration, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn test_validate_object_storage_needs_url() {
        let mut config = valid_config();
        config.storage = StorageBackend::Object;
        assert!(config.validate().is_err());
        config.object_store_url = Some("http://localhost:54321/storage/v1".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_apply_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("OPENAI_API_KEY", "sk-env"),
            ("CHUNKSCRIBE_STORAGE", "object"),
            ("CHUNKSCRIBE_CONCURRENCY", "8"),
            ("CHUNKSCRIBE_MAX_SEGMENT_MINUTES", "5"),
            ("CHUNKSCRIBE_IDLE_TIMEOUT_SECS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.openai_api_key.as_deref(), Some("sk-env"));
        assert_eq!(config.storage, StorageBackend::Object);
        assert_eq!(config.concurrency, 8);
        assert_eq!(config.max_segment_minutes, 5);
        assert_eq!(config.idle_timeout_secs, 3600);
    }

    #[test]
    fn test_partial_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
concurrency = 2
storage = "memory"
model = "gpt-4o-transcribe"

[store_retry]
max_attempts = 5
initial_delay_ms = 250
max_delay_ms = 4000
backoff_multiplier = 2.0
"#,
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.concurrency, 2);
        assert_eq!(config.storage, StorageBackend::Memory);
        assert_eq!(config.model, WhisperModel::Gpt4oTranscribe);
        assert_eq!(config.store_retry.max_attempts, 5);
        assert_eq!(config.max_segment_mb, 24);
    }
}
