//! Logical connection identifier type

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of one logical connection carried over the tunnel.
///
/// Chosen by the side that originates the connection and stable for its
/// whole lifetime. The empty id is reserved for control frames.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Create a new connection ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Id used by frames that are not bound to a connection
    pub fn control() -> Self {
        Self(String::new())
    }

    /// Whether this is the control id
    pub fn is_control(&self) -> bool {
        self.0.is_empty()
    }

    /// Get the raw ID value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_control() {
            f.write_str("<control>")
        } else {
            f.write_str(&self.0)
        }
    }
}

impl From<&str> for ConnectionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ConnectionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
