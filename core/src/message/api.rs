// RestApi — descriptor of an API an agent announces through QNE messages

use super::codec::compact_bool;
use serde::{Deserialize, Serialize};

/// Visibility/purpose of an announced API
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApiType {
    Public,
    Internal,
    Healthcheck,
    /// The HTTP gateway endpoint of the agent itself
    GatewayHttp,
}

/// An API offered by an agent.
///
/// The core only carries these around; catalogs and routing built on top of
/// them live outside the bus.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RestApi {
    #[serde(rename = "ty")]
    pub api_type: ApiType,
    #[serde(rename = "na", default)]
    pub name: String,
    #[serde(rename = "pa")]
    pub path: String,
    #[serde(rename = "ho", default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(rename = "po")]
    pub port: u16,
    #[serde(rename = "st", with = "compact_bool", default)]
    pub sticky: bool,
    #[serde(rename = "xp", default)]
    pub priority: i32,
}

impl RestApi {
    pub fn new(name: &str, path: &str, port: u16) -> Self {
        Self {
            api_type: ApiType::Public,
            name: name.to_string(),
            path: path.to_string(),
            host: None,
            port,
            sticky: false,
            priority: 0,
        }
    }

    pub fn on_host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    pub fn as_internal(mut self) -> Self {
        self.api_type = ApiType::Internal;
        self
    }

    pub fn as_healthcheck(mut self) -> Self {
        self.api_type = ApiType::Healthcheck;
        self
    }

    pub fn with_affinity(mut self) -> Self {
        self.sticky = true;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}
