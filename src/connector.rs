//! Supported OAuth connectors.
//!
//! The set of connectors is closed and known at compile time. Each variant has
//! exactly one provider adapter (see [`crate::oauth`]) and at most one connected
//! identity at a time.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A third-party OAuth provider this service can connect to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConnectorKind {
    /// Google Drive (OAuth2 authorization code + refresh token grant)
    #[serde(rename = "googleDrive")]
    GoogleDrive,
}

impl ConnectorKind {
    /// Every connector kind, in reporting order.
    pub const ALL: &'static [ConnectorKind] = &[ConnectorKind::GoogleDrive];

    /// Wire/storage name of the connector.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectorKind::GoogleDrive => "googleDrive",
        }
    }
}

impl fmt::Display for ConnectorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a string does not name a known connector.
#[derive(Debug, thiserror::Error)]
#[error("unknown connector '{0}'")]
pub struct UnknownConnector(pub String);

impl FromStr for ConnectorKind {
    type Err = UnknownConnector;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ConnectorKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| UnknownConnector(s.to_string()))
    }
}
