use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An implicit account or contract address, kept in its encoded form.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(encoded: impl Into<String>) -> Self {
        Self(encoded.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

/// Right of a delegate to produce the block at `level` in `round`.
///
/// `endpoint` is filled in from the registry after the rights are fetched
/// and stays `None` for bakers that don't take bundles.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub level: u64,
    pub delegate: Address,
    pub round: u32,
    #[serde(default)]
    pub estimated_time: Option<DateTime<Utc>>,
    #[serde(default, skip_deserializing)]
    pub endpoint: Option<String>,
}

impl Assignment {
    pub fn new(level: u64, delegate: Address, round: u32) -> Self {
        Self {
            level,
            delegate,
            round,
            estimated_time: None,
            endpoint: None,
        }
    }

    pub fn with_estimated_time(mut self, time: DateTime<Utc>) -> Self {
        self.estimated_time = Some(time);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }
}
