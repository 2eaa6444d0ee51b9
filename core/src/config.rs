//! Cloud configuration
//!
//! Layers, lowest priority first:
//! - built-in defaults
//! - whatever file the embedding program reads the config from (serde)
//! - `CLOUDBUS_*` environment variables, applied by [`CloudConfig::resolve`]

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use thiserror::Error;

// ============================================================================
// ERROR TYPES
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid relay sync period: must be > 0")]
    InvalidSyncPeriod,

    #[error("Invalid relay error threshold: must be > 0")]
    InvalidErrorThreshold,

    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },
}

// ============================================================================
// GATEWAY SECTIONS
// ============================================================================

/// Local multicast gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UdpConfig {
    pub enabled: bool,
    /// Multicast group joined by every cloud member
    pub group: Ipv4Addr,
    pub port: u16,
    /// Interface used to join the group
    pub interface: Ipv4Addr,
    /// Multicast TTL; 1 keeps traffic on the local segment
    pub ttl: u32,
}

impl Default for UdpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            group: Ipv4Addr::new(230, 31, 32, 33),
            port: 2728,
            interface: Ipv4Addr::UNSPECIFIED,
            ttl: 1,
        }
    }
}

/// Direct point-to-point gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub enabled: bool,
    pub timeout_millis: u64,
    /// Address other agents should post to; nothing is advertised when unset
    pub advertise_address: Option<IpAddr>,
    pub advertise_port: u16,
    pub advertise_path: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout_millis: 2_000,
            advertise_address: None,
            advertise_port: 9_999,
            advertise_path: "/cloudbus".to_string(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

/// Relay polling gateway
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WwwConfig {
    pub enabled: bool,
    /// Relay root url; the gateway is not started without one
    pub address: Option<String>,
    pub sync_period_millis: u64,
    /// Consecutive RX failures after which every watermark is reset
    pub max_consecutive_errors: u32,
    pub timeout_millis: u64,
}

impl Default for WwwConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            address: None,
            sync_period_millis: 5_000,
            max_consecutive_errors: 3,
            timeout_millis: 10_000,
        }
    }
}

impl WwwConfig {
    pub fn sync_period(&self) -> Duration {
        Duration::from_millis(self.sync_period_millis)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

/// How accepted messages reach local listeners
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// On a dedicated worker thread, in order
    #[default]
    Threaded,
    /// On the thread that received the message
    Inline,
}

// ============================================================================
// CLOUD CONFIG
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub udp: UdpConfig,
    pub http: HttpConfig,
    pub www: WwwConfig,
    /// Shared secret for message signatures; messages are unsigned when unset
    pub signing_key: Option<String>,
    pub dispatch: DispatchMode,
}

impl CloudConfig {
    /// Apply the process environment on top of `self` and validate the result
    pub fn resolve(self) -> Result<Self, ConfigError> {
        self.resolve_with(|var| std::env::var(var).ok())
    }

    /// [`CloudConfig::resolve`] with an explicit variable lookup
    pub fn resolve_with<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.apply_overrides(lookup)?;
        self.validate()?;
        Ok(self)
    }

    /// Apply `CLOUDBUS_*` overrides looked up through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("CLOUDBUS_UDP_DISABLE") {
            self.udp.enabled = !parse_flag("CLOUDBUS_UDP_DISABLE", &v)?;
        }
        if let Some(v) = lookup("CLOUDBUS_HTTP_DISABLE") {
            self.http.enabled = !parse_flag("CLOUDBUS_HTTP_DISABLE", &v)?;
        }
        if let Some(v) = lookup("CLOUDBUS_WWW_DISABLE") {
            self.www.enabled = !parse_flag("CLOUDBUS_WWW_DISABLE", &v)?;
        }
        if let Some(v) = lookup("CLOUDBUS_WWW_ADDRESS") {
            self.www.address = Some(v).filter(|a| !a.is_empty());
        }
        if let Some(v) = lookup("CLOUDBUS_WWW_SYNC_PERIOD_MILLIS") {
            self.www.sync_period_millis = parse_number("CLOUDBUS_WWW_SYNC_PERIOD_MILLIS", &v)?;
        }
        if let Some(v) = lookup("CLOUDBUS_WWW_MAX_CONSECUTIVE_ERRORS") {
            self.www.max_consecutive_errors =
                parse_number("CLOUDBUS_WWW_MAX_CONSECUTIVE_ERRORS", &v)?;
        }
        if let Some(v) = lookup("CLOUDBUS_SIGNING_KEY") {
            self.signing_key = Some(v).filter(|k| !k.is_empty());
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.www.sync_period_millis == 0 {
            return Err(ConfigError::InvalidSyncPeriod);
        }
        if self.www.max_consecutive_errors == 0 {
            return Err(ConfigError::InvalidErrorThreshold);
        }
        Ok(())
    }
}

fn parse_flag(var: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            var,
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: value.to_string(),
    })
}

// ============================================================================
// TESTS
// ============================================================================
