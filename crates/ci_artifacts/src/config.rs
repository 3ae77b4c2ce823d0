use secrecy::SecretString;
use serde::{Deserialize, Deserializer};
use std::time::Duration;

use crate::models::error::ArtifactError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/ci-artifacts/config.yaml";
pub const ENV_PREFIX: &str = "CI_ARTIFACTS";

// Custom deserializer for Duration that accepts integer seconds
fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let secs = u64::deserialize(deserializer)?;
    Ok(Duration::from_secs(secs))
}

fn deserialize_duration_ms<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    let millis = u64::deserialize(deserializer)?;
    Ok(Duration::from_millis(millis))
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub repository: RepositoryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote repository endpoint. Loaded once per build context and not
/// changed while the build runs.
#[derive(Debug, Clone, Deserialize)]
pub struct RepositoryConfig {
    pub server_url: String,
    pub base_repo_name: String,
    #[serde(default)]
    pub prefix: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<SecretString>,
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay", deserialize_with = "deserialize_duration_ms")]
    pub base_delay_ms: Duration,
    #[serde(default = "default_max_delay", deserialize_with = "deserialize_duration_ms")]
    pub max_delay_ms: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_millis(200)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(5)
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl RepositoryConfig {
    pub fn new(server_url: impl Into<String>, base_repo_name: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            base_repo_name: base_repo_name.into(),
            prefix: String::new(),
            username: None,
            password: None,
            timeout: default_timeout(),
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: SecretString) -> Self {
        self.username = Some(username.into());
        self.password = Some(password);
        self
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        let repo = self.base_repo_name.trim();
        if repo.is_empty() {
            return Err(ArtifactError::Configuration(
                "base repository name is required".to_string(),
            ));
        }
        if repo.contains('/') {
            return Err(ArtifactError::Configuration(format!(
                "base repository name {:?} must be a single path segment",
                self.base_repo_name
            )));
        }
        if !(self.server_url.starts_with("http://") || self.server_url.starts_with("https://")) {
            return Err(ArtifactError::Configuration(format!(
                "server url {:?} must start with http:// or https://",
                self.server_url
            )));
        }
        if self.password.is_some() && self.username.is_none() {
            return Err(ArtifactError::Configuration(
                "password configured without a username".to_string(),
            ));
        }
        Ok(())
    }
}

impl Config {
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let config_path = path.unwrap_or(DEFAULT_CONFIG_PATH);
        let settings = config::Config::builder()
            .add_source(config::File::with_name(config_path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        settings.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ArtifactError> {
        self.repository.validate()?;
        if self.retry.max_attempts == 0 {
            return Err(ArtifactError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
