//! Network endpoints advertised by gateways and carried in presence payloads.
//!
//! Both types travel as compact strings:
//! - `Network`: address bytes as signed decimals, dot-joined, then the prefix
//!   length (`-64.-88.1.10.24` is 192.168.1.10/24)
//! - `Endpoint`: `TYPE,port,network[,url]`

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EndpointError {
    #[error("Malformed network: {0}")]
    MalformedNetwork(String),
    #[error("Malformed endpoint: {0}")]
    MalformedEndpoint(String),
    #[error("Unknown endpoint type: {0}")]
    UnknownType(String),
}

/// An address plus prefix length
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Network {
    address: Vec<u8>,
    prefix: u16,
}

impl Network {
    pub fn new(address: Vec<u8>, prefix: u16) -> Self {
        Self { address, prefix }
    }

    pub fn from_ip(ip: IpAddr, prefix: u16) -> Self {
        let address = match ip {
            IpAddr::V4(v4) => v4.octets().to_vec(),
            IpAddr::V6(v6) => v6.octets().to_vec(),
        };
        Self { address, prefix }
    }

    pub fn address(&self) -> &[u8] {
        &self.address
    }

    pub fn prefix(&self) -> u16 {
        self.prefix
    }

    pub fn ip(&self) -> Option<IpAddr> {
        match self.address.len() {
            4 => {
                let octets: [u8; 4] = self.address.as_slice().try_into().ok()?;
                Some(IpAddr::from(octets))
            }
            16 => {
                let octets: [u8; 16] = self.address.as_slice().try_into().ok()?;
                Some(IpAddr::from(octets))
            }
            _ => None,
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.address {
            write!(f, "{}.", *byte as i8)?;
        }
        write!(f, "{}", self.prefix)
    }
}

impl FromStr for Network {
    type Err = EndpointError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let malformed = || EndpointError::MalformedNetwork(text.to_string());
        let tokens: Vec<&str> = text.split('.').collect();
        let (prefix, bytes) = tokens.split_last().ok_or_else(malformed)?;
        let address = bytes
            .iter()
            .map(|b| b.parse::<i8>().map(|v| v as u8))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| malformed())?;
        let prefix = prefix.parse().map_err(|_| malformed())?;
        Ok(Network { address, prefix })
    }
}

/// Transport reachable at an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EndpointType {
    Udp,
    Http,
    Ssh,
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointType::Udp => write!(f, "UDP"),
            EndpointType::Http => write!(f, "HTTP"),
            EndpointType::Ssh => write!(f, "SSH"),
        }
    }
}

impl FromStr for EndpointType {
    type Err = EndpointError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "UDP" => Ok(EndpointType::Udp),
            "HTTP" => Ok(EndpointType::Http),
            "SSH" => Ok(EndpointType::Ssh),
            other => Err(EndpointError::UnknownType(other.to_string())),
        }
    }
}

/// A network endpoint; HTTP endpoints also carry the url to post to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Endpoint {
    endpoint_type: EndpointType,
    network: Network,
    port: u16,
    url: Option<String>,
}

impl Endpoint {
    pub fn new(endpoint_type: EndpointType, network: Network, port: u16) -> Self {
        Self {
            endpoint_type,
            network,
            port,
            url: None,
        }
    }

    pub fn http(network: Network, port: u16, url: &str) -> Self {
        Self {
            endpoint_type: EndpointType::Http,
            network,
            port,
            url: Some(url.to_string()),
        }
    }

    pub fn endpoint_type(&self) -> EndpointType {
        self.endpoint_type
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{},{}", self.endpoint_type, self.port, self.network)?;
        if let Some(url) = &self.url {
            write!(f, ",{}", url)?;
        }
        Ok(())
    }
}

impl FromStr for Endpoint {
    type Err = EndpointError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let malformed = || EndpointError::MalformedEndpoint(text.to_string());
        let tokens: Vec<&str> = text.splitn(4, ',').collect();
        if tokens.len() < 3 {
            return Err(malformed());
        }

        let endpoint_type: EndpointType = tokens[0].parse()?;
        let port = tokens[1].parse().map_err(|_| malformed())?;
        let network: Network = tokens[2].parse()?;

        match endpoint_type {
            EndpointType::Http => {
                let url = tokens.get(3).ok_or_else(malformed)?;
                Ok(Endpoint::http(network, port, url))
            }
            _ => Ok(Endpoint::new(endpoint_type, network, port)),
        }
    }
}

macro_rules! string_serde {
    ($name:ident) => {
        impl Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: Serializer,
            {
                serializer.serialize_str(&self.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: Deserializer<'de>,
            {
                let text = String::deserialize(deserializer)?;
                text.parse().map_err(de::Error::custom)
            }
        }
    };
}

string_serde!(Network);
string_serde!(Endpoint);
