//! Connection policy controlling which credential sources are eligible.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Which credential sources may be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionPolicy {
    /// Connected API key, connected Apple ID, then manual inputs.
    #[default]
    Automatic,
    /// Connected API key only.
    ApiKeyOnly,
    /// Connected Apple ID session only.
    LegacyOnly,
    /// Manual inputs only; the remote connection is never queried.
    Disabled,
}

impl ConnectionPolicy {
    /// The input value for this policy.
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectionPolicy::Automatic => "automatic",
            ConnectionPolicy::ApiKeyOnly => "api_key",
            ConnectionPolicy::LegacyOnly => "apple_id",
            ConnectionPolicy::Disabled => "off",
        }
    }
}

impl fmt::Display for ConnectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned for an unknown connection input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid connection input: {0}, available: [automatic, api_key, apple_id, off]")]
pub struct ParsePolicyError(pub String);

impl FromStr for ConnectionPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "automatic" => Ok(ConnectionPolicy::Automatic),
            "api_key" => Ok(ConnectionPolicy::ApiKeyOnly),
            "apple_id" => Ok(ConnectionPolicy::LegacyOnly),
            "off" => Ok(ConnectionPolicy::Disabled),
            other => Err(ParsePolicyError(other.to_string())),
        }
    }
}
