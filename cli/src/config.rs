// Configuration management for the cloudbus CLI
//
// Cross-platform config stored in:
// - macOS: ~/Library/Application Support/cloudbus/config.json
// - Linux: ~/.config/cloudbus/config.json
// - Windows: %APPDATA%\cloudbus\config.json

use anyhow::{Context, Result};
use cloudbus_core::config::DispatchMode;
use cloudbus_core::CloudConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Cloud joined by `run` and `send` unless overridden
    pub cloud_uuid: Uuid,

    /// Name of the local agent
    pub agent_name: String,

    /// Gateway, signing and dispatch settings
    pub cloud: CloudConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cloud_uuid: Uuid::new_v4(),
            agent_name: "cloudbus-cli".to_string(),
            cloud: CloudConfig::default(),
        }
    }
}

impl Config {
    /// Get the config directory path (cross-platform)
    pub fn config_dir() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to determine config directory")?
            .join("cloudbus");

        std::fs::create_dir_all(&config_dir).context("Failed to create config directory")?;

        Ok(config_dir)
    }

    /// Get the config file path
    pub fn config_file() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Read `path` as stored, creating it with defaults when missing.
    ///
    /// A file without a `cloud_uuid` gets the generated one written back, so
    /// every later run joins the same cloud.
    pub fn read(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Config::default();
            config.save_to(path)?;
            return Ok(config);
        }
        let contents = std::fs::read_to_string(path).context("Failed to read config file")?;
        let raw: serde_json::Value =
            serde_json::from_str(&contents).context("Failed to parse config file")?;
        let has_cloud = raw.get("cloud_uuid").is_some();
        let config: Config = serde_json::from_value(raw).context("Failed to parse config file")?;
        if !has_cloud {
            config.save_to(path)?;
        }
        Ok(config)
    }

    /// [`Config::read`] with the `CLOUDBUS_*` environment overrides applied
    pub fn load_from(path: &Path) -> Result<Self> {
        let config = Self::read(path)?;
        Ok(Self {
            cloud: config.cloud.resolve().context("Invalid configuration")?,
            ..config
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Set a config value
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "cloud_uuid" => {
                self.cloud_uuid = value.parse().context("Invalid uuid")?;
            }
            "agent_name" => self.agent_name = value.to_string(),
            "udp.enabled" => {
                self.cloud.udp.enabled = value.parse().context("Invalid boolean value")?;
            }
            "udp.port" => {
                self.cloud.udp.port = value.parse().context("Invalid port number")?;
            }
            "http.enabled" => {
                self.cloud.http.enabled = value.parse().context("Invalid boolean value")?;
            }
            "www.enabled" => {
                self.cloud.www.enabled = value.parse().context("Invalid boolean value")?;
            }
            "www.address" => {
                self.cloud.www.address = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "www.sync_period_millis" => {
                self.cloud.www.sync_period_millis = value.parse().context("Invalid number")?;
            }
            "www.max_consecutive_errors" => {
                self.cloud.www.max_consecutive_errors = value.parse().context("Invalid number")?;
            }
            "signing_key" => {
                self.cloud.signing_key = if value.is_empty() {
                    None
                } else {
                    Some(value.to_string())
                };
            }
            "dispatch" => {
                self.cloud.dispatch = match value {
                    "threaded" => DispatchMode::Threaded,
                    "inline" => DispatchMode::Inline,
                    other => anyhow::bail!("Invalid dispatch mode: {}", other),
                };
            }
            _ => anyhow::bail!("Unknown config key: {}", key),
        }
        self.cloud.validate().context("Invalid configuration")?;
        Ok(())
    }

    /// List all config values
    pub fn list(&self) -> Vec<(String, String)> {
        let www = &self.cloud.www;
        vec![
            ("cloud_uuid".to_string(), self.cloud_uuid.to_string()),
            ("agent_name".to_string(), self.agent_name.clone()),
            ("udp.enabled".to_string(), self.cloud.udp.enabled.to_string()),
            (
                "udp.group".to_string(),
                format!("{}:{}", self.cloud.udp.group, self.cloud.udp.port),
            ),
            ("http.enabled".to_string(), self.cloud.http.enabled.to_string()),
            ("www.enabled".to_string(), www.enabled.to_string()),
            (
                "www.address".to_string(),
                www.address.clone().unwrap_or_else(|| "(unset)".to_string()),
            ),
            ("www.sync_period_millis".to_string(), www.sync_period_millis.to_string()),
            (
                "www.max_consecutive_errors".to_string(),
                www.max_consecutive_errors.to_string(),
            ),
            (
                "signing_key".to_string(),
                if self.cloud.signing_key.is_some() { "(set)" } else { "(unset)" }.to_string(),
            ),
            ("dispatch".to_string(), format!("{:?}", self.cloud.dispatch).to_lowercase()),
        ]
    }
}
