//! Cadence configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Root configuration, loaded from `~/.cadence/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CadenceConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

impl CadenceConfig {
    /// Load config from the default path, falling back to defaults when the
    /// file does not exist yet.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::error::CadenceError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| crate::error::CadenceError::Config(format!("Failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| crate::error::CadenceError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Cadence home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".cadence")
    }
}

/// SQLite database location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String {
    CadenceConfig::home_dir()
        .join("cadence.db")
        .to_string_lossy()
        .into_owned()
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Background engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Seconds between due-execution scans.
    #[serde(default = "default_tick_interval")]
    pub tick_interval_secs: u64,
    /// Upper bound on a single outbound send, including delivery
    /// confirmation. Expiry is treated as a send failure.
    #[serde(default = "default_send_timeout")]
    pub send_timeout_secs: u64,
    /// Max executions handled per tick.
    #[serde(default = "default_tick_batch")]
    pub tick_batch: usize,
}

fn default_tick_interval() -> u64 { 15 }
fn default_send_timeout() -> u64 { 30 }
fn default_tick_batch() -> usize { 50 }

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval(),
            send_timeout_secs: default_send_timeout(),
            tick_batch: default_tick_batch(),
        }
    }
}

/// HTTP gateway binding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String { "127.0.0.1".into() }
fn default_port() -> u16 { 7300 }

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { host: default_host(), port: default_port() }
    }
}

/// WhatsApp Business Cloud API credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct WhatsAppConfig {
    /// Facebook Graph API access token.
    #[serde(default)]
    pub access_token: String,
    /// WhatsApp Phone Number ID.
    #[serde(default)]
    pub phone_number_id: String,
    /// Webhook verify token (for incoming messages).
    #[serde(default)]
    pub webhook_verify_token: String,
}
