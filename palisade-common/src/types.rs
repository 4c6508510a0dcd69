mod secret;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use secret::Secret;

/// The key under which rate limits, bans and request logs are tracked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentifierKind {
    #[serde(rename = "address")]
    Address,
    #[serde(rename = "api_key")]
    ApiKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identifier {
    pub kind: IdentifierKind,
    pub value: String,
}

impl Identifier {
    pub fn address<V: Into<String>>(value: V) -> Self {
        Self {
            kind: IdentifierKind::Address,
            value: value.into(),
        }
    }

    pub fn api_key<V: Into<String>>(value: V) -> Self {
        Self {
            kind: IdentifierKind::ApiKey,
            value: value.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.value
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}
