// Identity — addressable entities on the bus
//
// An Iden names either an agent or a whole cloud. Clouds also carry an
// instance id that changes every time the same logical cloud restarts.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Kind of an addressable entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdenKind {
    /// A single agent (process, service)
    #[serde(rename = "AGT")]
    Agent,
    /// A whole cloud: "everyone in this group"
    #[serde(rename = "CLD")]
    Cloud,
}

impl IdenKind {
    /// Wire tag of this kind
    pub fn tag(&self) -> &'static str {
        match self {
            IdenKind::Agent => "AGT",
            IdenKind::Cloud => "CLD",
        }
    }
}

impl fmt::Display for IdenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for IdenKind {
    type Err = IdenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AGT" => Ok(IdenKind::Agent),
            "CLD" => Ok(IdenKind::Cloud),
            other => Err(IdenError::UnknownKind(other.to_string())),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdenError {
    #[error("Unknown identity kind: {0}")]
    UnknownKind(String),
    #[error("Malformed identity: {0}")]
    Malformed(String),
    #[error("Malformed uuid: {0}")]
    MalformedUuid(String),
    #[error("Malformed instance id: {0}")]
    MalformedInstance(String),
}

/// Identity of an agent or a cloud.
///
/// `==` and `Hash` include the instance id, so two incarnations of the same
/// cloud are distinct remote entities. Use [`Iden::same_entity`] to ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Iden {
    kind: IdenKind,
    uuid: Uuid,
    instance: Option<i64>,
}

impl Iden {
    pub fn new(kind: IdenKind, uuid: Uuid) -> Self {
        Self {
            kind,
            uuid,
            instance: None,
        }
    }

    /// A fresh random agent identity
    pub fn agent() -> Self {
        Self::new(IdenKind::Agent, Uuid::new_v4())
    }

    /// A cloud identity for one specific incarnation of the cloud
    pub fn cloud(uuid: Uuid, instance: i64) -> Self {
        Self {
            kind: IdenKind::Cloud,
            uuid,
            instance: Some(instance),
        }
    }

    pub fn kind(&self) -> IdenKind {
        self.kind
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn instance(&self) -> Option<i64> {
        self.instance
    }

    pub fn is_cloud(&self) -> bool {
        self.kind == IdenKind::Cloud
    }

    pub fn is_agent(&self) -> bool {
        self.kind == IdenKind::Agent
    }

    /// Same kind and uuid, whatever the instance
    pub fn same_entity(&self, other: &Iden) -> bool {
        self.kind == other.kind && self.uuid == other.uuid
    }

    /// The identity without its instance id
    pub fn as_entity(&self) -> Iden {
        Iden::new(self.kind, self.uuid)
    }

    /// Wire form `KIND:shortUUID[:instanceBase32]`.
    ///
    /// The instance id is only written when `extended` is set and this is a
    /// cloud identity that has one.
    pub fn to_wire(&self, extended: bool) -> String {
        let mut text = format!("{}:{}", self.kind, short_uuid(&self.uuid));
        if extended && self.kind == IdenKind::Cloud {
            if let Some(instance) = self.instance {
                text.push(':');
                text.push_str(&to_base32(instance));
            }
        }
        text
    }
}

impl fmt::Display for Iden {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire(true))
    }
}

impl FromStr for Iden {
    type Err = IdenError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let mut parts = text.splitn(3, ':');
        let kind: IdenKind = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| IdenError::Malformed(text.to_string()))?
            .parse()?;
        let uuid = parts
            .next()
            .ok_or_else(|| IdenError::Malformed(text.to_string()))
            .and_then(parse_short_uuid)?;
        let instance = match parts.next() {
            Some(suid) if kind == IdenKind::Cloud => Some(
                i64::from_str_radix(suid, 32)
                    .map_err(|_| IdenError::MalformedInstance(suid.to_string()))?,
            ),
            _ => None,
        };

        Ok(Iden {
            kind,
            uuid,
            instance,
        })
    }
}

impl Serialize for Iden {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_wire(true))
    }
}

impl<'de> Deserialize<'de> for Iden {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(de::Error::custom)
    }
}

/// UUID without separators (32 lowercase hex chars)
pub fn short_uuid(uuid: &Uuid) -> String {
    uuid.simple().to_string()
}

/// Inverse of [`short_uuid`]; only the 32-char form is accepted
pub fn parse_short_uuid(text: &str) -> Result<Uuid, IdenError> {
    if text.len() != 32 {
        return Err(IdenError::MalformedUuid(text.to_string()));
    }
    Uuid::try_parse(text).map_err(|_| IdenError::MalformedUuid(text.to_string()))
}

const BASE32_DIGITS: &[u8; 32] = b"0123456789abcdefghijklmnopqrstuv";

/// Signed radix-32 rendering (digits `0-9a-v`, leading `-` when negative)
fn to_base32(value: i64) -> String {
    if value == 0 {
        return "0".to_string();
    }
    let mut magnitude = value.unsigned_abs();
    let mut digits = Vec::with_capacity(14);
    while magnitude > 0 {
        digits.push(BASE32_DIGITS[(magnitude % 32) as usize]);
        magnitude /= 32;
    }
    if value < 0 {
        digits.push(b'-');
    }
    digits.reverse();
    String::from_utf8(digits).unwrap_or_default()
}
