use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub lists: ListsConfig,
    pub reputation: ReputationConfig,
    pub scoring: ScoringConfig,
    pub probe: ProbeConfig,
    pub domain_age: DomainAgeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:8000".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListsConfig {
    /// Holds the domain list files and `spam_keywords.txt`.
    pub directory: PathBuf,
}

impl Default for ListsConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("lists"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    pub database_path: PathBuf,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("reputation.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    /// JSON object of weight overrides, read once at startup.
    pub overrides_path: PathBuf,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            overrides_path: PathBuf::from("score_weights.json"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub smtp_port: u16,
    pub smtp_timeout_seconds: u64,
    pub dns_timeout_seconds: u64,
    pub helo_name: String,
    pub mail_from: String,
    pub mx_cache_ttl_seconds: u64,
    pub cache_capacity: usize,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            smtp_port: 25,
            smtp_timeout_seconds: 10,
            dns_timeout_seconds: 5,
            helo_name: "localhost".to_string(),
            mail_from: "noreply@yourapi.com".to_string(),
            mx_cache_ttl_seconds: 3600,
            cache_capacity: 10_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainAgeConfig {
    pub threshold_days: u32,
    /// Bound on the whole lookup, referrals and fallback servers included.
    pub lookup_timeout_seconds: u64,
    /// Bound on each WHOIS connect and read.
    pub query_timeout_seconds: u64,
    pub cache_ttl_seconds: u64,
    pub cache_capacity: usize,
}

impl Default for DomainAgeConfig {
    fn default() -> Self {
        Self {
            threshold_days: 30,
            lookup_timeout_seconds: 15,
            query_timeout_seconds: 4,
            cache_ttl_seconds: 24 * 60 * 60,
            cache_capacity: 10_000,
        }
    }
}

impl DomainAgeConfig {
    pub fn lookup_timeout(&self) -> Duration {
        Duration::from_secs(self.lookup_timeout_seconds)
    }

    /// Per-query timeout, never longer than the whole lookup.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_seconds.min(self.lookup_timeout_seconds))
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the file does not exist.
    pub fn load_or_default(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            log::info!("Loading configuration from {}", path.display());
            Self::from_file(path)
        } else {
            log::warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
            Ok(Self::default())
        }
    }

    pub fn to_file(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;
        Ok(())
    }

    pub fn spam_keywords_path(&self) -> PathBuf {
        self.lists.directory.join(crate::lists::SPAM_KEYWORDS_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: Config = serde_yaml::from_str(
            "server:\n  listen: 0.0.0.0:9000\nprobe:\n  smtp_timeout_seconds: 3\n",
        )
        .unwrap();

        assert_eq!(config.server.listen, "0.0.0.0:9000");
        assert_eq!(config.probe.smtp_timeout_seconds, 3);
        assert_eq!(config.probe.smtp_port, 25);
        assert_eq!(config.domain_age.threshold_days, 30);
        assert_eq!(config.lists.directory, PathBuf::from("lists"));
    }

    #[test]
    fn test_whois_queries_leave_room_for_fallbacks() {
        let defaults = DomainAgeConfig::default();
        assert!(defaults.query_timeout() * 3 <= defaults.lookup_timeout());

        let config: Config = serde_yaml::from_str(
            "domain_age:\n  lookup_timeout_seconds: 12\n  query_timeout_seconds: 3\n",
        )
        .unwrap();
        assert_eq!(config.domain_age.query_timeout(), Duration::from_secs(3));
        assert_eq!(config.domain_age.lookup_timeout(), Duration::from_secs(12));

        let capped: DomainAgeConfig =
            serde_yaml::from_str("lookup_timeout_seconds: 5\nquery_timeout_seconds: 30\n").unwrap();
        assert_eq!(capped.query_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_generated_config_loads_back() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("mailsift.yaml");

        let mut config = Config::default();
        config.domain_age.threshold_days = 60;
        config.to_file(&path).unwrap();

        assert_eq!(Config::from_file(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file_falls_back_to_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = Config::load_or_default(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_yaml_is_an_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "probe: [not, a, map]").unwrap();
        assert!(Config::from_file(&path).is_err());
    }

    #[test]
    fn test_spam_keywords_live_next_to_lists() {
        let config = Config::default();
        assert_eq!(
            config.spam_keywords_path(),
            PathBuf::from("lists").join("spam_keywords.txt")
        );
    }
}
