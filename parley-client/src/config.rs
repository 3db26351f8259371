//! Configuration loading for parley-client.
//!
//! Configuration is loaded from a TOML file or string; every field has a
//! default, so an empty document is a valid configuration.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for the client.
#[derive(Debug, Clone, Deserialize)]
pub struct ParleyConfig {
    /// Remote API location.
    #[serde(default)]
    pub network: NetworkConfig,
    /// Keep a cache for offline use (default: false).
    #[serde(default)]
    pub offline_messaging: bool,
    /// Place the welcome text above today's messages (default: true).
    #[serde(default = "default_adaptive_welcome")]
    pub adaptive_welcome: bool,
    /// Poll even when push delivery is enabled (default: false).
    #[serde(default)]
    pub always_polling: bool,
    /// Typing indicator timings.
    #[serde(default)]
    pub typing: TypingConfig,
    /// Polling fallback schedule.
    #[serde(default)]
    pub polling: PollingConfig,
}

/// Remote API location.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfig {
    /// Base URL (default: https://api.parley.chat).
    #[serde(default = "default_url")]
    pub url: String,
    /// API path under the base URL (default: /clientApi/v1.6/).
    #[serde(default = "default_path")]
    pub path: String,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

/// Typing indicator timings.
#[derive(Debug, Clone, Deserialize)]
pub struct TypingConfig {
    /// Minimum seconds between two "start" announcements (default: 20).
    #[serde(default = "default_start_interval_secs")]
    pub start_interval_secs: u64,
    /// Idle seconds before "stop" is announced (default: 15).
    #[serde(default = "default_stop_after_secs")]
    pub stop_after_secs: u64,
    /// Seconds before an agent indicator clears on its own (default: 15).
    #[serde(default = "default_agent_timeout_secs")]
    pub agent_timeout_secs: u64,
}

/// Polling fallback schedule.
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Escalation ladder in seconds (default: [2, 5, 10, 30]).
    #[serde(default = "default_intervals_secs")]
    pub intervals_secs: Vec<u64>,
    /// Empty fetches before escalating (default: 5).
    #[serde(default = "default_repeats_before_escalation")]
    pub repeats_before_escalation: u32,
}

// Default value functions
fn default_adaptive_welcome() -> bool {
    true
}

fn default_url() -> String {
    "https://api.parley.chat".to_string()
}

fn default_path() -> String {
    "/clientApi/v1.6/".to_string()
}

fn default_start_interval_secs() -> u64 {
    20
}

fn default_stop_after_secs() -> u64 {
    15
}

fn default_agent_timeout_secs() -> u64 {
    15
}

fn default_intervals_secs() -> Vec<u64> {
    parley_core::polling::DEFAULT_INTERVALS_SECS.to_vec()
}

fn default_repeats_before_escalation() -> u32 {
    parley_core::polling::DEFAULT_REPEATS_BEFORE_ESCALATION
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            url: default_url(),
            path: default_path(),
            headers: BTreeMap::new(),
        }
    }
}

impl Default for TypingConfig {
    fn default() -> Self {
        Self {
            start_interval_secs: default_start_interval_secs(),
            stop_after_secs: default_stop_after_secs(),
            agent_timeout_secs: default_agent_timeout_secs(),
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            intervals_secs: default_intervals_secs(),
            repeats_before_escalation: default_repeats_before_escalation(),
        }
    }
}

impl Default for ParleyConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            offline_messaging: false,
            adaptive_welcome: default_adaptive_welcome(),
            always_polling: false,
            typing: TypingConfig::default(),
            polling: PollingConfig::default(),
        }
    }
}

impl NetworkConfig {
    /// Base URL joined with the API path, always ending in `/`.
    pub fn base_url(&self) -> String {
        let url = self.url.trim_end_matches('/');
        let path = self.path.trim_matches('/');
        if path.is_empty() {
            format!("{}/", url)
        } else {
            format!("{}/{}/", url, path)
        }
    }
}

impl TypingConfig {
    /// Minimum gap between "start" announcements.
    pub fn start_interval(&self) -> Duration {
        Duration::from_secs(self.start_interval_secs)
    }

    /// Idle time before "stop".
    pub fn stop_after(&self) -> Duration {
        Duration::from_secs(self.stop_after_secs)
    }

    /// Agent indicator timeout.
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }
}

impl PollingConfig {
    /// The escalation ladder.
    pub fn intervals(&self) -> Vec<Duration> {
        self.intervals_secs.iter().map(|s| Duration::from_secs(*s)).collect()
    }
}

impl ParleyConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError {
            path: PathBuf::from("<string>"),
            source: e,
        })
    }

    /// Set the base URL.
    pub fn with_url(mut self, url: &str) -> Self {
        self.network.url = url.to_string();
        self
    }

    /// Set the API path.
    pub fn with_path(mut self, path: &str) -> Self {
        self.network.path = path.to_string();
        self
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.network.headers.insert(name.to_string(), value.to_string());
        self
    }

    /// Enable or disable the offline cache.
    pub fn with_offline_messaging(mut self, enabled: bool) -> Self {
        self.offline_messaging = enabled;
        self
    }

    /// Enable or disable adaptive welcome placement.
    pub fn with_adaptive_welcome(mut self, enabled: bool) -> Self {
        self.adaptive_welcome = enabled;
        self
    }

    /// Force polling regardless of push state.
    pub fn with_always_polling(mut self, enabled: bool) -> Self {
        self.always_polling = enabled;
        self
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML error.
        source: toml::de::Error,
    },
}
