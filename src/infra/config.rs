// src/infra/config.rs - Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::infra::paths;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub remote: RemoteConfig,

    #[serde(default)]
    pub metrics: MetricsConfig,

    #[serde(default)]
    pub signals: SignalsConfig,

    #[serde(default)]
    pub session: SessionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Root of the simulation API; endpoint paths are joined onto it.
    pub base_url: String,
    /// Bearer token sent with every request. `SIMCOACH_TOKEN` overrides it.
    pub token: Option<String>,
    pub request_timeout_secs: u64,
    /// Upper bound for the best-effort "end session" call.
    pub end_timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/".into(),
            token: None,
            request_timeout_secs: 30,
            end_timeout_secs: 5,
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn end_timeout(&self) -> Duration {
        Duration::from_secs(self.end_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub poll_interval_secs: u64,
    pub validity_secs: u64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            validity_secs: 30,
        }
    }
}

impl MetricsConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn validity(&self) -> Duration {
        Duration::from_secs(self.validity_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalsConfig {
    /// Fixed seed for tone drift. Random per session when unset.
    pub seed: Option<u64>,
    /// Messages at least this long (in chars) may raise strategic alignment.
    pub min_strategic_length: usize,
    /// Messages shorter than this (in chars) lower strategic alignment.
    pub short_message_length: usize,
    pub strategy_terms: Vec<String>,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            seed: None,
            min_strategic_length: 50,
            short_message_length: 20,
            strategy_terms: default_strategy_terms(),
        }
    }
}

pub fn default_strategy_terms() -> Vec<String> {
    [
        "strategy",
        "proposal",
        "data",
        "analysis",
        "investment",
        "risk",
        "roi",
        "stakeholder",
        "plan",
        "estrategia",
        "propuesta",
        "datos",
        "análisis",
        "inversión",
        "riesgo",
        "stakeholders",
        "plan de acción",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Namespaces the resumption pointers, one file per profile.
    pub profile: String,
    pub welcome_message: String,
    pub fallback_message: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            profile: "default".into(),
            welcome_message: "Welcome. I'm ready when you are. How would you like to open the conversation?".into(),
            fallback_message: "Sorry, I couldn't process that. Could you say it again?".into(),
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        let config = if path.exists() {
            Self::load_from(&path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `SIMCOACH_BASE_URL` / `SIMCOACH_TOKEN` when set.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("SIMCOACH_BASE_URL") {
            if !url.trim().is_empty() {
                self.remote.base_url = url;
            }
        }
        if let Ok(token) = std::env::var("SIMCOACH_TOKEN") {
            if !token.trim().is_empty() {
                self.remote.token = Some(token);
            }
        }
        self
    }
}
