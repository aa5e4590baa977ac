//! Application configuration.
//!
//! Defaults overridden by `KEDAI_*` environment variables, e.g.
//! `KEDAI_HTTP_ADDR=0.0.0.0:8080` or `KEDAI_SESSION_SECRET=...`.

use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

const ENV_PREFIX: &str = "KEDAI";
const MIN_SECRET_LEN: usize = 32;
const DEV_SESSION_SECRET: &str = "kedai-development-session-secret-change-me";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunEnvironment {
    Development,
    Production,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub environment: RunEnvironment,
    pub http_addr: String,
    /// HS256 key for session tokens.
    #[serde(default)]
    pub session_secret: String,
    /// Unset keeps events in memory.
    #[serde(default)]
    pub database_url: Option<String>,
    /// Unset rejects every webhook.
    #[serde(default)]
    pub stripe_webhook_secret: Option<String>,
    pub dashboard_cache_ttl_secs: u64,
    pub session_ttl_minutes: i64,
    pub tac_ttl_secs: i64,
    pub cookie_secure: bool,
}

impl AppConfig {
    /// Reads defaults and `KEDAI_*` variables, then validates.
    pub fn load() -> Result<Self, ConfigError> {
        let source = Config::builder()
            .set_default("environment", "development")?
            .set_default("http_addr", "127.0.0.1:8080")?
            .set_default("dashboard_cache_ttl_secs", 300)?
            .set_default("session_ttl_minutes", 60 * 12)?
            .set_default("tac_ttl_secs", 300)?
            .set_default("cookie_secure", false)?
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let config: AppConfig = source.try_deserialize()?;
        config.with_dev_fallbacks().validate()
    }

    fn with_dev_fallbacks(mut self) -> Self {
        if self.environment == RunEnvironment::Development && self.session_secret.is_empty() {
            warn!("KEDAI_SESSION_SECRET not set, using the development secret");
            self.session_secret = DEV_SESSION_SECRET.to_string();
        }
        self.database_url = self.database_url.filter(|url| !url.trim().is_empty());
        self.stripe_webhook_secret = self.stripe_webhook_secret.filter(|s| !s.trim().is_empty());
        self
    }

    pub fn validate(self) -> Result<Self, ConfigError> {
        if self.http_addr.trim().is_empty() {
            return Err(ConfigError::Invalid("http_addr is required".into()));
        }
        if self.session_secret.len() < MIN_SECRET_LEN {
            return Err(ConfigError::Invalid(format!(
                "session_secret must be at least {MIN_SECRET_LEN} bytes"
            )));
        }
        if self.environment == RunEnvironment::Production && self.session_secret == DEV_SESSION_SECRET {
            return Err(ConfigError::Invalid(
                "the development session secret cannot be used in production".into(),
            ));
        }
        if self.session_ttl_minutes <= 0 || self.tac_ttl_secs <= 0 {
            return Err(ConfigError::Invalid("session and TAC lifetimes must be positive".into()));
        }
        Ok(self)
    }

    pub fn is_production(&self) -> bool {
        self.environment == RunEnvironment::Production
    }

    pub fn dashboard_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.dashboard_cache_ttl_secs)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.session_ttl_minutes)
    }

    pub fn tac_ttl(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.tac_ttl_secs)
    }
}

/// Defaults suitable for tests and local runs.
impl Default for AppConfig {
    fn default() -> Self {
        Self {
            environment: RunEnvironment::Development,
            http_addr: "127.0.0.1:8080".to_string(),
            session_secret: DEV_SESSION_SECRET.to_string(),
            database_url: None,
            stripe_webhook_secret: None,
            dashboard_cache_ttl_secs: 300,
            session_ttl_minutes: 60 * 12,
            tac_ttl_secs: 300,
            cookie_secure: false,
        }
    }
}
