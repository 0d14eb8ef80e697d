//! Configuration management

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::oauth::metadata;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// OAuth provider and sign-in settings
    pub oauth: OAuthConfig,
    /// Target API settings
    pub api: ApiConfig,
    /// Eventual-consistency retry
    pub retry: RetryConfig,
    /// Session persistence
    pub storage: StorageConfig,
}

/// OAuth provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Issuer base URL, e.g. `https://auth.example.com`
    pub host: String,
    /// Public client id registered with the provider
    pub client_id: String,
    /// Scopes requested at sign-in
    pub scopes: Vec<String>,
    /// Fixed loopback port for the redirect URI; OS-assigned when unset
    pub callback_port: Option<u16>,
    /// Deadline for the whole interactive sign-in
    #[serde(with = "humantime_serde")]
    pub flow_timeout: Duration,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            client_id: String::new(),
            scopes: crate::oauth::flow::DEFAULT_SCOPES
                .iter()
                .map(ToString::to_string)
                .collect(),
            callback_port: None,
            flow_timeout: crate::oauth::flow::DEFAULT_FLOW_TIMEOUT,
        }
    }
}

/// Target API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Base URL request paths are joined to
    pub base_url: String,
    /// Per-request timeout
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// Retry configuration for eventually-consistent reads
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum attempts, including the first
    pub max_attempts: u32,
    /// Linear back-off unit
    #[serde(with = "humantime_serde")]
    pub step: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            step: Duration::from_secs(1),
        }
    }
}

/// Session storage configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for persisted sessions; `~/.oauth-session` when unset
    pub dir: Option<PathBuf>,
}

impl StorageConfig {
    /// Effective storage directory (with `~` expanded)
    pub fn resolved_dir(&self) -> Result<PathBuf> {
        match &self.dir {
            Some(dir) => Ok(expand_home(dir)),
            None => crate::session::FileSessionStore::default_dir(),
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // OAUTH_SESSION_OAUTH__CLIENT_ID=... etc.
        figment = figment.merge(Env::prefixed("OAUTH_SESSION_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Check values that cannot be validated by deserialization alone
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidHost`] for a malformed `oauth.host` or
    /// `api.base_url`, and [`Error::Config`] for other invalid values.
    pub fn validate(&self) -> Result<()> {
        if self.oauth.host.is_empty() {
            return Err(Error::Config("oauth.host is required".to_string()));
        }
        metadata::validate_host(&self.oauth.host)?;

        if self.oauth.client_id.trim().is_empty() {
            return Err(Error::Config("oauth.client_id is required".to_string()));
        }
        if !self.api.base_url.is_empty() {
            metadata::validate_host(&self.api.base_url)?;
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::Config(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.oauth.flow_timeout.is_zero() {
            return Err(Error::Config("oauth.flow_timeout must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Render as YAML
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).map_err(|e| Error::Config(e.to_string()))
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir().map_or_else(|| path.to_path_buf(), |home| home.join(rest)),
        Err(_) => path.to_path_buf(),
    }
}

/// Human-readable Duration serde (`"500ms"`, `"30s"`, `"5m"`, bare seconds)
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_millis() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize a human-readable duration string or a bare number of seconds
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        // figment hands integers through as numbers, not strings
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum SecsOrText {
            Secs(u64),
            Text(String),
        }

        match SecsOrText::deserialize(deserializer)? {
            SecsOrText::Secs(secs) => Ok(Duration::from_secs(secs)),
            SecsOrText::Text(text) => parse(&text).map_err(serde::de::Error::custom),
        }
    }

    fn parse(s: &str) -> Result<Duration, String> {
        let s = s.trim();
        let number = |digits: &str| digits.trim().parse::<u64>().map_err(|e| format!("{s}: {e}"));

        // "ms" must be checked before "s"
        if let Some(ms) = s.strip_suffix("ms") {
            number(ms).map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            number(secs).map(Duration::from_secs)
        } else if let Some(mins) = s.strip_suffix('m') {
            number(mins)?
                .checked_mul(60)
                .map(Duration::from_secs)
                .ok_or_else(|| format!("{s}: duration too large"))
        } else {
            number(s).map(Duration::from_secs)
        }
    }
}
