//! Configuration loading from TOML files and the environment

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global configuration for reindex
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub index: IndexConfig,
    pub redis: RedisConfig,
    pub alippo: AlippoConfig,
    pub queue: QueueConfig,
    pub run: RunConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    #[serde(deserialize_with = "deserialize_env_string")]
    pub url: String,
    #[serde(deserialize_with = "deserialize_env_string")]
    pub name: String,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:9200".to_string(),
            name: "alippo_search".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    #[serde(deserialize_with = "deserialize_env_string")]
    pub host: String,
    pub port: u16,
    #[serde(deserialize_with = "deserialize_env_var")]
    pub auth: Option<String>,
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            auth: None,
            db: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlippoConfig {
    #[serde(deserialize_with = "deserialize_env_string")]
    pub url: String,
}

impl Default for AlippoConfig {
    fn default() -> Self {
        Self {
            url: "https://app-dev.alippo.com/api".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueueBackend {
    #[default]
    Redis,
    /// In-process queue; partitions run as lanes of one process
    Memory,
}

impl std::fmt::Display for QueueBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Redis => write!(f, "redis"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default)]
pub struct QueueConfig {
    pub backend: QueueBackend,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Grace period before exit so the index can commit
    pub time_to_exit_ms: u64,
    pub poll_interval_ms: u64,
    /// How long a worker may hold a queued job before another worker takes it over
    pub claim_lease_ms: u64,
    pub index_meta_path: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            time_to_exit_ms: 30_000,
            poll_interval_ms: 2_000,
            claim_lease_ms: 600_000,
            index_meta_path: PathBuf::from("tmp").join(".lastIndex.json"),
        }
    }
}

impl RunConfig {
    pub fn exit_delay(&self) -> Duration {
        Duration::from_millis(self.time_to_exit_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::from_millis(self.claim_lease_ms)
    }
}

/// Deserialize a string that may contain environment variable reference like ${VAR}
fn deserialize_env_var<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    Ok(opt.and_then(|s| expand_env_var(&s)))
}

/// Like [`deserialize_env_var`] for settings that must have a value
fn deserialize_env_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    expand_env_var(&s)
        .ok_or_else(|| serde::de::Error::custom(format!("environment variable in {s} is not set")))
}

/// Expand ${VAR} to environment variable value
fn expand_env_var(s: &str) -> Option<String> {
    if let Some(var_name) = s.strip_prefix("${").and_then(|s| s.strip_suffix('}')) {
        std::env::var(var_name).ok()
    } else {
        Some(s.to_string())
    }
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Search order:
    /// 1. ./reindex.toml (current directory)
    /// 2. ~/.config/reindex/config.toml
    ///
    /// If no config file found, returns default config.
    pub fn load() -> Result<Self> {
        let local_config = PathBuf::from("reindex.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = directories::ProjectDirs::from("", "", "reindex") {
            let user_config = config_dir.config_dir().join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        log::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Load configuration from a specific file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        log::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Apply the process environment on top of the file settings.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_env_from(|name| std::env::var(name).ok())
    }

    /// Environment overrides read through `lookup`; empty values are ignored.
    pub fn apply_env_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("DATABASE_URL") {
            self.index.url = v;
        }
        if let Some(v) = get("INDEX_NAME") {
            self.index.name = v;
        }
        if let Some(v) = get("REDIS_HOST") {
            self.redis.host = v;
        }
        if let Some(v) = get("REDIS_PORT") {
            self.redis.port = v
                .trim()
                .parse()
                .with_context(|| format!("REDIS_PORT is not a port number: {v}"))?;
        }
        if let Some(v) = get("REDIS_AUTH") {
            // "false" is how an unset password has historically been spelled
            self.redis.auth = (v != "false").then_some(v);
        }
        if let Some(v) = get("REDIS_DB") {
            self.redis.db = v
                .trim()
                .parse()
                .with_context(|| format!("REDIS_DB is not a number: {v}"))?;
        }
        if let Some(v) = get("ALIPPO_URL") {
            self.alippo.url = v;
        }
        if let Some(v) = get("TIME_TO_EXIT") {
            self.run.time_to_exit_ms = v
                .trim()
                .parse()
                .with_context(|| format!("TIME_TO_EXIT is not a number of milliseconds: {v}"))?;
        }
        if let Some(v) = get("INDEX_META_PATH") {
            self.run.index_meta_path = PathBuf::from("tmp").join(v);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn default_config() {
        let config = Config::default();
        assert_eq!(config.index.url, "http://localhost:9200");
        assert_eq!(config.index.name, "alippo_search");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.queue.backend, QueueBackend::Redis);
        assert_eq!(config.run.exit_delay(), Duration::from_secs(30));
        assert_eq!(config.run.claim_lease(), Duration::from_secs(600));
        assert_eq!(
            config.run.index_meta_path,
            PathBuf::from("tmp/.lastIndex.json")
        );
    }

    #[test]
    fn expand_env_var_simple() {
        std::env::set_var("REINDEX_TEST_VAR", "test_value");
        assert_eq!(
            expand_env_var("${REINDEX_TEST_VAR}"),
            Some("test_value".to_string())
        );
        std::env::remove_var("REINDEX_TEST_VAR");
    }

    #[test]
    fn expand_env_var_literal_and_missing() {
        assert_eq!(expand_env_var("literal"), Some("literal".to_string()));
        assert_eq!(expand_env_var("${NONEXISTENT_VAR_12345}"), None);
    }

    #[test]
    fn parse_config_toml() {
        let toml = r#"
[index]
url = "http://es:9200"
name = "search"

[redis]
host = "redis"
db = 2

[queue]
backend = "memory"

[run]
time_to_exit_ms = 0
claim_lease_ms = 120000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.index.url, "http://es:9200");
        assert_eq!(config.redis.host, "redis");
        assert_eq!(config.redis.port, 6379);
        assert_eq!(config.redis.db, 2);
        assert_eq!(config.queue.backend, QueueBackend::Memory);
        assert_eq!(config.run.exit_delay(), Duration::ZERO);
        assert_eq!(config.run.claim_lease(), Duration::from_secs(120));
        assert_eq!(config.alippo.url, "https://app-dev.alippo.com/api");
    }

    #[test]
    fn missing_env_reference_in_required_field_fails() {
        let toml = r#"
[alippo]
url = "${NONEXISTENT_VAR_12345}"
"#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn env_overrides_file() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[
                ("DATABASE_URL", "http://db:9200"),
                ("INDEX_NAME", "prod"),
                ("REDIS_PORT", "6380"),
                ("REDIS_AUTH", "s3cret"),
                ("ALIPPO_URL", "https://api.alippo.test"),
                ("TIME_TO_EXIT", "1000"),
                ("INDEX_META_PATH", "meta.json"),
            ]))
            .unwrap();
        assert_eq!(config.index.url, "http://db:9200");
        assert_eq!(config.index.name, "prod");
        assert_eq!(config.redis.port, 6380);
        assert_eq!(config.redis.auth.as_deref(), Some("s3cret"));
        assert_eq!(config.alippo.url, "https://api.alippo.test");
        assert_eq!(config.run.exit_delay(), Duration::from_secs(1));
        assert_eq!(config.run.index_meta_path, PathBuf::from("tmp/meta.json"));
    }

    #[test]
    fn redis_auth_false_means_none() {
        let mut config = Config::default();
        config
            .apply_env_from(env(&[("REDIS_AUTH", "false")]))
            .unwrap();
        assert_eq!(config.redis.auth, None);
    }

    #[test]
    fn bad_numbers_are_errors() {
        let mut config = Config::default();
        assert!(config
            .apply_env_from(env(&[("REDIS_PORT", "six")]))
            .is_err());
        assert!(config
            .apply_env_from(env(&[("TIME_TO_EXIT", "-1")]))
            .is_err());
    }

    #[test]
    fn load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reindex.toml");
        std::fs::write(&path, "[index]\nname = \"from_file\"\n").unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.index.name, "from_file");
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
