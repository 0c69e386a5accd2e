//! Profile data model.
//!
//! A profile is a named group of local MySQL connections (`local.yml`) and SSH
//! reachable remote hosts (`remote.yml`). Both sections are plain YAML mappings
//! keyed by connection/remote name.

pub mod resolver;
pub mod store;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{AppError, Result};

/// Every profile known to the store, keyed by profile name.
pub type Profiles = BTreeMap<String, Profile>;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Profile {
    pub local: BTreeMap<String, LocalConnection>,
    pub remote: BTreeMap<String, RemoteHost>,
}

/// The two independently persisted halves of a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Local,
    Remote,
}

impl Section {
    pub fn as_str(self) -> &'static str {
        match self {
            Section::Local => "local",
            Section::Remote => "remote",
        }
    }

    pub fn file_name(self) -> &'static str {
        match self {
            Section::Local => "local.yml",
            Section::Remote => "remote.yml",
        }
    }

    /// What the keys of this section name, for error messages.
    pub fn entry_kind(self) -> &'static str {
        match self {
            Section::Local => "Connection",
            Section::Remote => "Remote",
        }
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalConnection {
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub charset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collation: Option<String>,
    #[serde(default)]
    pub working: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteHost {
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "deserialize_port")]
    pub port: Option<u16>,
    #[serde(default)]
    pub username: String,
    /// Authentication method tag: none, agent, password or publickey.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    /// Methods the server advertised at the last probe.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub methods: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
    #[serde(default)]
    pub working: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PortValue {
    Number(u64),
    Text(String),
}

// Older profile files store ports as quoted strings.
fn deserialize_port<'de, D>(deserializer: D) -> std::result::Result<Option<u16>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<PortValue>::deserialize(deserializer)? {
        None => Ok(None),
        Some(PortValue::Number(n)) => u16::try_from(n)
            .map(Some)
            .map_err(|_| D::Error::custom(format!("port {} is out of range", n))),
        Some(PortValue::Text(text)) if text.trim().is_empty() => Ok(None),
        Some(PortValue::Text(text)) => text
            .trim()
            .parse::<u16>()
            .map(Some)
            .map_err(|_| D::Error::custom(format!("port {:?} is not a number", text))),
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-'
}

/// Lower-cases `input` and drops every character outside `[a-z0-9_-]`.
pub fn sanitize_name(input: &str) -> String {
    input.to_lowercase().chars().filter(|c| is_name_char(*c)).collect()
}

/// Lower-cases `input` and drops every character outside `[a-z0-9_]`.
pub fn sanitize_database_name(input: &str) -> String {
    input
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || *c == '_')
        .collect()
}

pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_name_char)
}

pub fn validate_name(kind: &str, name: &str) -> Result<()> {
    if is_valid_name(name) {
        Ok(())
    } else {
        Err(AppError::invalid(format!(
            "{} name {:?} must be non-empty and contain only [a-z0-9_-]",
            kind, name
        )))
    }
}

/// Database names handed to external tools: alphanumerics, `_` and `-` only.
pub fn is_safe_database_name(name: &str) -> bool {
    !name.trim().is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Looks up a profile, normalising the supplied name to lower case.
pub fn find_profile<'a>(profiles: &'a Profiles, name: &str) -> Result<&'a Profile> {
    profiles
        .get(&name.to_lowercase())
        .ok_or_else(|| AppError::not_found("Profile", name))
}
