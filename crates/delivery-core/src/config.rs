//! Configuration for the delivery client.
//!
//! Configuration is stored in TOML and can be overridden from the
//! environment. Lookup order:
//!
//! 1. **Config file**: `config.toml` in the platform config directory, or a
//!    path given explicitly
//! 2. **Environment variables**: `DELIVERY_ENVIRONMENT_ID`,
//!    `DELIVERY_API_KEY`, `DELIVERY_BASE_URL`, `DELIVERY_PREVIEW`
//!
//! ## Example configuration file
//!
//! ```toml
//! environment_id = "975bf280-fd91-488c-994c-2f04416e5ee3"
//! depth = 2
//! wait_for_loading_new_content = false
//!
//! [retry]
//! max_attempts = 5
//! base_delay_ms = 250
//! backoff_multiplier = 2.0
//! use_jitter = true
//! retryable_failure_kinds = ["network", "timeout", "rate_limited", "server_error"]
//! ```
//!
//! ```rust
//! use delivery_core::DeliveryConfig;
//!
//! let config: DeliveryConfig = toml::from_str(r#"environment_id = "abc""#)?;
//! assert_eq!(config.base_url, "https://deliver.kontent.ai");
//! assert_eq!(config.retry.max_attempts, 3);
//! config.validate()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::retry::RetryConfig;
use crate::{Error, Result};

/// Environment variable overriding [`DeliveryConfig::environment_id`].
pub const ENV_ENVIRONMENT_ID: &str = "DELIVERY_ENVIRONMENT_ID";
/// Environment variable overriding [`DeliveryConfig::api_key`].
pub const ENV_API_KEY: &str = "DELIVERY_API_KEY";
/// Environment variable overriding [`DeliveryConfig::base_url`].
pub const ENV_BASE_URL: &str = "DELIVERY_BASE_URL";
/// Environment variable overriding [`DeliveryConfig::use_preview`].
pub const ENV_PREVIEW: &str = "DELIVERY_PREVIEW";

fn default_base_url() -> String {
    "https://deliver.kontent.ai".to_string()
}

fn default_preview_base_url() -> String {
    "https://preview-deliver.kontent.ai".to_string()
}

const fn default_timeout_secs() -> u64 {
    30
}

/// Settings of a [`DeliveryClient`](crate::DeliveryClient).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Environment (project) id.
    #[serde(default)]
    pub environment_id: String,

    /// Base URL of the production delivery API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Base URL of the preview delivery API.
    #[serde(default = "default_preview_base_url")]
    pub preview_base_url: String,

    /// Secure access or preview API key, sent as a bearer token.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Query the preview API instead of production.
    #[serde(default)]
    pub use_preview: bool,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Depth of linked items to include in responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,

    /// Ask the API to bypass its cache for freshly published content.
    #[serde(default)]
    pub wait_for_loading_new_content: bool,

    /// Retry behaviour.
    #[serde(default)]
    pub retry: RetryConfig,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            environment_id: String::new(),
            base_url: default_base_url(),
            preview_base_url: default_preview_base_url(),
            api_key: None,
            use_preview: false,
            timeout_secs: default_timeout_secs(),
            depth: None,
            wait_for_loading_new_content: false,
            retry: RetryConfig::default(),
        }
    }
}

impl DeliveryConfig {
    /// Configuration for `environment_id` with defaults elsewhere.
    pub fn new(environment_id: impl Into<String>) -> Self {
        Self {
            environment_id: environment_id.into(),
            ..Self::default()
        }
    }

    /// Load the configuration file from the default location, or defaults if
    /// there is none, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from(&path)?
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Self::default()
        };
        config.apply_env();
        Ok(config)
    }

    /// Load a configuration file. Environment overrides are not applied.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read config: {e}")))?;
        toml::from_str(&content).map_err(|e| Error::Config(format!("Failed to parse config: {e}")))
    }

    /// Write the configuration to `path`, creating parent directories.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| Error::Config(format!("Failed to create config directory: {e}")))?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Config(format!("Failed to serialize config: {e}")))?;

        fs::write(path, content).map_err(|e| Error::Config(format!("Failed to write config: {e}")))
    }

    /// Path of the default configuration file.
    ///
    /// - Linux: `~/.config/delivery/config.toml`
    /// - macOS: `~/Library/Application Support/dev.delivery.delivery/config.toml`
    /// - Windows: `%APPDATA%\delivery\delivery\config\config.toml`
    pub fn config_path() -> Result<PathBuf> {
        let project_dirs = directories::ProjectDirs::from("dev", "delivery", "delivery")
            .ok_or_else(|| Error::Config("Failed to determine project directories".into()))?;
        Ok(project_dirs.config_dir().join("config.toml"))
    }

    /// Apply overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from `lookup`, which maps variable names to values.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(id) = lookup(ENV_ENVIRONMENT_ID).filter(|v| !v.is_empty()) {
            self.environment_id = id;
        }
        if let Some(key) = lookup(ENV_API_KEY).filter(|v| !v.is_empty()) {
            self.api_key = Some(key);
        }
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.is_empty()) {
            self.base_url = url;
        }
        if let Some(preview) = lookup(ENV_PREVIEW) {
            self.use_preview = matches!(
                preview.trim().to_ascii_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            );
        }
    }

    /// Check that the configuration can be used to build a client.
    pub fn validate(&self) -> Result<()> {
        if self.environment_id.trim().is_empty() {
            return Err(Error::Config(format!(
                "environment_id is not set (config file or {ENV_ENVIRONMENT_ID})"
            )));
        }
        for url in [&self.base_url, &self.preview_base_url] {
            let parsed = Url::parse(url)?;
            if parsed.cannot_be_a_base() {
                return Err(Error::InvalidUrl(format!("{url} cannot be used as a base URL")));
            }
        }
        if self.use_preview && self.api_key.is_none() {
            return Err(Error::Config(format!(
                "the preview API requires an API key (config file or {ENV_API_KEY})"
            )));
        }
        self.retry.validate()
    }

    /// Base URL of the API selected by [`use_preview`](Self::use_preview).
    pub fn active_base_url(&self) -> &str {
        if self.use_preview {
            &self.preview_base_url
        } else {
            &self.base_url
        }
    }

    /// Request timeout.
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
