//! Configuration for negation-ledger

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::enrichment::RetryPolicy;

/// Default storage directory
pub fn default_storage_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("negation-ledger")
}

/// Configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the ledger database and config file
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,

    /// Explicit database file (defaults to `<storage_dir>/ledger.db`)
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    /// Maximum pooled SQLite connections
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// How long a writer waits for the SQLite write lock
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    #[serde(default)]
    pub auth: AuthConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,
}

/// Session token verification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret; empty means dev mode
    #[serde(default)]
    pub jwt_secret: String,

    /// Expected `iss` claim, if any
    #[serde(default)]
    pub issuer: Option<String>,

    /// Cookie carrying the session token
    #[serde(default = "default_session_cookie")]
    pub session_cookie: String,

    /// Lifetime of tokens minted by `issue_token`
    #[serde(default = "default_token_expiry_secs")]
    pub token_expiry_secs: u64,
}

/// Post-commit enrichment hand-off
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentConfig {
    /// Endpoint receiving `{point_id, content}`; enrichment is off when unset
    #[serde(default)]
    pub endpoint: Option<String>,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_pool_size() -> u32 {
    8
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_session_cookie() -> String {
    "privy-token".to_string()
}

fn default_token_expiry_secs() -> u64 {
    3600
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            database_path: None,
            pool_size: default_pool_size(),
            busy_timeout_ms: default_busy_timeout_ms(),
            auth: AuthConfig::default(),
            enrichment: EnrichmentConfig::default(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            issuer: None,
            session_cookie: default_session_cookie(),
            token_expiry_secs: default_token_expiry_secs(),
        }
    }
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            queue_capacity: default_queue_capacity(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl EnrichmentConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Config {
    /// Load config from file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, std::io::Error> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }

    /// Config for runs without an explicit file.
    ///
    /// Reads `<storage_dir>/config.toml` (as written by `init`) when it exists,
    /// otherwise uses defaults rooted at `storage_dir`.
    pub fn discover(storage_dir: Option<PathBuf>) -> Result<Self, std::io::Error> {
        let storage_dir = storage_dir.unwrap_or_else(default_storage_dir);
        let path = storage_dir.join("config.toml");

        let mut config = if path.exists() {
            Self::load(&path)?
        } else {
            Self::default()
        };
        config.storage_dir = storage_dir;
        Ok(config)
    }

    /// Save config to file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), std::io::Error> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }

    /// Get database file path
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.storage_dir.join("ledger.db"))
    }

    /// Get config file path
    pub fn config_path(&self) -> PathBuf {
        self.storage_dir.join("config.toml")
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            storage_dir = "/tmp/ledger"

            [enrichment]
            endpoint = "http://localhost:9000/embed"
            max_attempts = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/ledger/ledger.db"));
        assert_eq!(config.pool_size, 8);
        assert_eq!(config.auth.session_cookie, "privy-token");
        assert_eq!(config.enrichment.max_attempts, 3);
        assert_eq!(config.enrichment.queue_capacity, 1024);
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.storage_dir = dir.path().to_path_buf();
        config.auth.issuer = Some("negation-game".into());
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.storage_dir, dir.path());
        assert_eq!(loaded.auth.issuer.as_deref(), Some("negation-game"));
    }

    #[test]
    fn test_discover_reads_saved_config() {
        let dir = tempfile::tempdir().unwrap();

        let fresh = Config::discover(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(fresh.database_path(), dir.path().join("ledger.db"));
        assert!(fresh.enrichment.endpoint.is_none());

        let mut saved = Config::default();
        saved.storage_dir = dir.path().to_path_buf();
        saved.pool_size = 3;
        saved.enrichment.endpoint = Some("http://localhost:9000/embed".into());
        saved.save(saved.config_path()).unwrap();

        let discovered = Config::discover(Some(dir.path().to_path_buf())).unwrap();
        assert_eq!(discovered.pool_size, 3);
        assert_eq!(
            discovered.enrichment.endpoint.as_deref(),
            Some("http://localhost:9000/embed")
        );
    }

    #[test]
    fn test_retry_policy_never_zero_attempts() {
        let config = EnrichmentConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(config.retry_policy().max_attempts, 1);
    }
}
