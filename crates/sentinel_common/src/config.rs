//! Daemon configuration.
//!
//! Config file: /etc/sentineld/config.toml, overridable via the
//! SENTINELD_CONFIG environment variable. Every knob has a default so the
//! daemon runs with no file at all.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// System config path
pub const CONFIG_PATH: &str = "/etc/sentineld/config.toml";

/// Environment variable overriding the config path
pub const CONFIG_ENV: &str = "SENTINELD_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SentinelConfig {
    pub database: DatabaseConfig,
    pub scanner: ScannerConfig,
    pub alerts: AlertsConfig,
    pub rules: RulesConfig,
    pub listing: ListingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/sentineld/sentinel.db"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Seconds between auto-close passes
    pub interval_secs: u64,
    /// Budget for a single alert inside a pass; a slow alert is recorded
    /// as an error and the pass moves on
    pub per_alert_timeout_secs: u64,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            per_alert_timeout_secs: 30,
        }
    }
}

impl ScannerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn per_alert_timeout(&self) -> Duration {
        Duration::from_secs(self.per_alert_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    /// Days until a new alert becomes eligible for time-based auto-close
    pub expiration_days: i64,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self { expiration_days: 7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// TTL of the active-rule snapshot cache
    pub cache_ttl_secs: u64,
    /// Count window applied when an escalation rule sets none
    pub default_window_mins: u32,
    /// Bundled default-rule document loaded at startup
    pub defaults_path: PathBuf,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 300,
            default_window_mins: 60,
            defaults_path: PathBuf::from("config/default_rules.json"),
        }
    }
}

impl RulesConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            default_page_size: 50,
            max_page_size: 100,
        }
    }
}

impl SentinelConfig {
    /// Load from a specific path
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config: {}", path.display()))?;
        let config: SentinelConfig = toml::from_str(&contents)
            .with_context(|| format!("failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Load from `SENTINELD_CONFIG`, then the system path, then defaults
    pub fn load_or_default() -> Self {
        let path = std::env::var(CONFIG_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(CONFIG_PATH));
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => return config,
                Err(err) => {
                    tracing::warn!("ignoring unreadable config {}: {err:#}", path.display());
                }
            }
        }
        Self::default()
    }
}
