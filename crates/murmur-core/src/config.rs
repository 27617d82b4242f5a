use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MurmurError, Result};

/// Top-level configuration for the Murmur service.
///
/// Loaded from `~/.murmur/config.toml` by default. Each section corresponds
/// to one subsystem. Secrets are usually left out of the file and supplied
/// through the environment (see [`MurmurConfig::apply_env_overrides`]).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MurmurConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub vector: VectorConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

impl MurmurConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MurmurConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MurmurError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Overlay secrets and endpoints from the process environment.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Overlay values from an arbitrary lookup. Empty values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(key) = get("MURMUR_LLM_API_KEY").or_else(|| get("NVIDIA_API_KEY")) {
            if self.embedding.api_key.is_empty() {
                self.embedding.api_key = key.clone();
            }
            self.llm.api_key = key;
        }
        if let Some(key) = get("MURMUR_EMBEDDING_API_KEY") {
            self.embedding.api_key = key;
        }
        if let Some(key) = get("PINECONE_API_KEY") {
            self.vector.api_key = key;
        }
        if let Some(host) = get("PINECONE_HOST") {
            self.vector.host = host;
        }
        if let Some(url) = get("REDIS_URL") {
            self.redis.url = url;
        }
        if let Some(url) = get("MURMUR_WEBHOOK_URL") {
            self.notifier.webhook_url = Some(url);
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Data directory for the SQLite message archive.
    pub data_dir: String,
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: "~/.murmur/data".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Durable key-value store connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// When false the service runs on the in-process store (nothing survives
    /// a restart).
    pub enabled: bool,
    pub url: String,
    /// Bound on establishing a connection.
    pub connect_timeout_ms: u64,
    /// Bound on each command's reply.
    pub response_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://127.0.0.1:6379/0".to_string(),
            connect_timeout_ms: 3_000,
            response_timeout_ms: 2_000,
        }
    }
}

/// Task scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Seconds between one-shot due-set sweeps.
    pub poll_interval_secs: u64,
    /// Text prepended to every recurring notification.
    pub periodic_prefix: String,
    /// Sent when a proactive follow-up cannot be regenerated.
    pub proactive_fallback_message: String,
    /// Upper bound on follow-up regeneration.
    pub follow_up_timeout_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            periodic_prefix: "【周期提醒】".to_string(),
            proactive_fallback_message: "记得你说今天有事，一切还顺利吗？".to_string(),
            follow_up_timeout_secs: 30,
        }
    }
}

/// Memory classification and routing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// TTL of temporary memories in the cache.
    pub temporary_ttl_secs: u64,
    /// Delay between a proactive trigger and its follow-up.
    pub proactive_delay_secs: i64,
    /// Upper bound on a classification call.
    pub classify_timeout_secs: u64,
    /// Upper bound on embedding + vector/cache writes.
    pub storage_timeout_secs: u64,
    /// Messages shorter than this (in characters, after trimming) are not archived.
    pub min_content_chars: usize,
    /// Messages starting with this prefix are bot commands and are not archived.
    pub command_prefix: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            temporary_ttl_secs: 2 * 60 * 60,
            proactive_delay_secs: 4 * 60 * 60,
            classify_timeout_secs: 5,
            storage_timeout_secs: 10,
            min_content_chars: 5,
            command_prefix: "/".to_string(),
        }
    }
}

/// Retrieval composer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Matches taken from each namespace and kept after merging.
    pub top_k: usize,
    pub timeout_secs: u64,
    /// Max score above which recall is reported as high confidence.
    pub high_confidence: f32,
    /// Max score below which (but above zero) recall is reported as vague.
    pub low_confidence: f32,
    /// Personal-namespace score above which the conversation is personal.
    pub personal_scene: f32,
    /// Lowercase substrings that mark hydrated text as technical.
    pub technical_keywords: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: 3,
            timeout_secs: 5,
            high_confidence: 0.85,
            low_confidence: 0.6,
            personal_scene: 0.7,
            technical_keywords: ["err", "code", "api", "func"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Chat-completion service (OpenAI-compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub api_key: String,
    /// Model used for proactive follow-up replies.
    pub model: String,
    /// Lightweight model used by the memory classifier.
    pub classifier_model: String,
    /// Optional HTTP(S) proxy for outbound model calls.
    pub proxy: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://integrate.api.nvidia.com".to_string(),
            api_key: String::new(),
            model: "mistralai/ministral-14b-instruct-2512".to_string(),
            classifier_model: "mistralai/ministral-14b-instruct-2512".to_string(),
            proxy: None,
        }
    }
}

/// Embedding service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "http" for the remote service, "mock" for deterministic local vectors.
    pub backend: String,
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    /// Vectors longer than this are truncated (Matryoshka models).
    pub dimensions: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            backend: "http".to_string(),
            base_url: "https://integrate.api.nvidia.com".to_string(),
            api_key: String::new(),
            model: "nvidia/llama-3.2-nemoretriever-300m-embed-v2".to_string(),
            dimensions: 1024,
        }
    }
}

/// Vector-similarity service.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// "memory" for the in-process index, "pinecone" for the hosted one.
    pub backend: String,
    /// Index host, e.g. `https://gin-bot-abc123.svc.pinecone.io`.
    pub host: String,
    pub api_key: String,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            host: String::new(),
            api_key: String::new(),
        }
    }
}

/// Outbound message transport.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifierConfig {
    /// When set, notifications are POSTed here; otherwise they are logged.
    pub webhook_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = MurmurConfig::default();
        assert_eq!(config.general.data_dir, "~/.murmur/data");
        assert_eq!(config.general.log_level, "info");
        assert_eq!(config.scheduler.poll_interval_secs, 5);
        assert_eq!(config.scheduler.periodic_prefix, "【周期提醒】");
        assert_eq!(config.memory.temporary_ttl_secs, 7200);
        assert_eq!(config.memory.proactive_delay_secs, 14_400);
        assert_eq!(config.memory.classify_timeout_secs, 5);
        assert_eq!(config.memory.storage_timeout_secs, 10);
        assert_eq!(config.retrieval.top_k, 3);
        assert_eq!(config.embedding.dimensions, 1024);
        assert_eq!(config.vector.backend, "memory");
        assert!(config.notifier.webhook_url.is_none());
    }

    #[test]
    fn test_retrieval_thresholds_default() {
        let retrieval = RetrievalConfig::default();
        assert!((retrieval.high_confidence - 0.85).abs() < f32::EPSILON);
        assert!((retrieval.low_confidence - 0.6).abs() < f32::EPSILON);
        assert!((retrieval.personal_scene - 0.7).abs() < f32::EPSILON);
        assert_eq!(retrieval.technical_keywords, vec!["err", "code", "api", "func"]);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[general]
data_dir = "/srv/murmur"
log_level = "debug"

[redis]
enabled = false
url = "redis://cache:6379/2"
response_timeout_ms = 500

[scheduler]
poll_interval_secs = 1
periodic_prefix = "[cron] "

[memory]
temporary_ttl_secs = 60
proactive_delay_secs = 120
min_content_chars = 3

[retrieval]
top_k = 5
technical_keywords = ["panic"]

[vector]
backend = "pinecone"
host = "https://idx.example.io"

[notifier]
webhook_url = "http://127.0.0.1:5700/send"
"#;
        let file = create_temp_config(content);
        let config = MurmurConfig::load(file.path()).unwrap();
        assert_eq!(config.general.data_dir, "/srv/murmur");
        assert!(!config.redis.enabled);
        assert_eq!(config.redis.url, "redis://cache:6379/2");
        assert_eq!(config.redis.response_timeout_ms, 500);
        assert_eq!(config.redis.connect_timeout_ms, 3_000);
        assert_eq!(config.scheduler.poll_interval_secs, 1);
        assert_eq!(config.scheduler.periodic_prefix, "[cron] ");
        // Unspecified fields in a present section keep their defaults.
        assert_eq!(config.scheduler.follow_up_timeout_secs, 30);
        assert_eq!(config.memory.temporary_ttl_secs, 60);
        assert_eq!(config.memory.proactive_delay_secs, 120);
        assert_eq!(config.memory.min_content_chars, 3);
        assert_eq!(config.memory.command_prefix, "/");
        assert_eq!(config.retrieval.top_k, 5);
        assert_eq!(config.retrieval.technical_keywords, vec!["panic"]);
        assert_eq!(config.vector.backend, "pinecone");
        assert_eq!(
            config.notifier.webhook_url.as_deref(),
            Some("http://127.0.0.1:5700/send")
        );
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = MurmurConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.general.data_dir, "~/.murmur/data");
    }

    #[test]
    fn test_load_invalid_toml() {
        let file = create_temp_config("this is {{ not valid TOML");
        assert!(MurmurConfig::load(file.path()).is_err());
    }

    #[test]
    fn test_empty_toml_uses_all_defaults() {
        let file = create_temp_config("");
        let config = MurmurConfig::load(file.path()).unwrap();
        assert_eq!(config.retrieval.top_k, 3);
        assert!(config.redis.enabled);
    }

    #[test]
    fn test_save_creates_parent_dirs_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = MurmurConfig::default();
        config.retrieval.top_k = 7;
        config.save(&path).unwrap();

        assert!(path.exists());
        let reloaded = MurmurConfig::load(&path).unwrap();
        assert_eq!(reloaded.retrieval.top_k, 7);
        assert_eq!(reloaded.scheduler.periodic_prefix, "【周期提醒】");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("NVIDIA_API_KEY", "nv-key"),
            ("PINECONE_API_KEY", "pc-key"),
            ("PINECONE_HOST", "https://idx.example.io"),
            ("REDIS_URL", "redis://other:6379/1"),
            ("MURMUR_WEBHOOK_URL", ""),
        ]
        .into_iter()
        .collect();

        let mut config = MurmurConfig::default();
        config.apply_overrides_from(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.llm.api_key, "nv-key");
        // The embedding service shares the model key unless given its own.
        assert_eq!(config.embedding.api_key, "nv-key");
        assert_eq!(config.vector.api_key, "pc-key");
        assert_eq!(config.vector.host, "https://idx.example.io");
        assert_eq!(config.redis.url, "redis://other:6379/1");
        // Empty values are ignored.
        assert!(config.notifier.webhook_url.is_none());
    }

    #[test]
    fn test_env_override_prefers_murmur_key() {
        let mut config = MurmurConfig::default();
        config.apply_overrides_from(|k| match k {
            "MURMUR_LLM_API_KEY" => Some("murmur".to_string()),
            "NVIDIA_API_KEY" => Some("nvidia".to_string()),
            "MURMUR_EMBEDDING_API_KEY" => Some("embed".to_string()),
            _ => None,
        });
        assert_eq!(config.llm.api_key, "murmur");
        assert_eq!(config.embedding.api_key, "embed");
    }
}
