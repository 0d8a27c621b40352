use std::{collections::BTreeMap, fmt};

use serde::Deserialize as _;

/// Stable configuration identifier of a world (the key in the world document).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct WorldKey(pub String);

impl fmt::Display for WorldKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single property override value as it appears in the world document.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Bool(true) => f.write_str("true"),
            PropertyValue::Bool(false) => f.write_str("false"),
            PropertyValue::Int(v) => write!(f, "{v}"),
            PropertyValue::Float(v) => write!(f, "{v}"),
            PropertyValue::Text(v) => f.write_str(v),
        }
    }
}

/// Declarative description of one auxiliary world.
///
/// NOTE: ports are read leniently. A value that is neither an integer nor a
/// numeric string deserializes to `None`, which callers treat as "use the
/// fallback port".
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct WorldSpec {
    #[serde(default)]
    pub enabled: bool,
    /// Empty when the record leaves it out; see [`WorldSpec::level_name_or`].
    #[serde(rename = "level-name", default, skip_serializing_if = "String::is_empty")]
    pub level_name: String,
    #[serde(
        rename = "server-port",
        default,
        deserialize_with = "lenient_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub primary_port: Option<u16>,
    #[serde(
        rename = "server-portv6",
        default,
        deserialize_with = "lenient_port",
        skip_serializing_if = "Option::is_none"
    )]
    pub secondary_port: Option<u16>,
    #[serde(flatten)]
    pub overrides: BTreeMap<String, PropertyValue>,
}

impl WorldSpec {
    pub fn new(level_name: impl Into<String>, primary_port: u16, secondary_port: u16) -> Self {
        Self {
            enabled: true,
            level_name: level_name.into(),
            primary_port: Some(primary_port),
            secondary_port: Some(secondary_port),
            overrides: BTreeMap::new(),
        }
    }

    /// The level name to run under, falling back to the world key when the
    /// record has none.
    pub fn level_name_or<'a>(&'a self, world_key: &'a str) -> &'a str {
        if self.level_name.trim().is_empty() {
            world_key
        } else {
            &self.level_name
        }
    }
}

fn lenient_port<'de, D>(deserializer: D) -> Result<Option<u16>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(serde::Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(i64),
        Text(String),
        Other(serde::de::IgnoredAny),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Raw::Int(v)) => u16::try_from(v).ok(),
        Some(Raw::Text(s)) => s.trim().parse::<u16>().ok(),
        Some(Raw::Other(_)) | None => None,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WorldState {
    Running,
    Stopping,
    Exited,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WorldStatus {
    pub world_key: WorldKey,
    pub resolved_name: String,
    pub port: u16,
    pub state: WorldState,
    pub pid: Option<u32>,
}
