//! Registry of broker connection strings keyed by the caller-visible `connection_key`.
//!
//! Loaded once from the `CONNECTION_LIST` JSON at startup and never mutated afterwards.
use serde::Deserialize;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

/// One configured broker connection. Fields other than `conn_str` are tolerated and ignored.
#[derive(Clone, Debug, Deserialize)]
pub struct ConnectionEntry {
    pub conn_str: String,
}

#[derive(Clone, Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<String, ConnectionEntry>,
}

#[derive(Debug)]
pub enum RegistryError {
    Missing,
    Malformed(serde_json::Error),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RegistryError::Missing => write!(f, "CONNECTION_LIST is not set"),
            RegistryError::Malformed(err) => write!(f, "CONNECTION_LIST is not valid: {err}"),
        }
    }
}

impl StdError for RegistryError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            RegistryError::Missing => None,
            RegistryError::Malformed(err) => Some(err),
        }
    }
}

impl ConnectionRegistry {
    /// Parses the raw `CONNECTION_LIST` value. `None` means the variable was never set.
    pub fn from_json(raw: Option<&str>) -> Result<Self, RegistryError> {
        let raw = raw.ok_or(RegistryError::Missing)?;
        let entries: HashMap<String, ConnectionEntry> =
            serde_json::from_str(raw).map_err(RegistryError::Malformed)?;
        Ok(Self { entries })
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|entry| entry.conn_str.as_str())
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
