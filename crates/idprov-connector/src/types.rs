//! Connector operation kinds.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Write operation executed against a target system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    /// Create a new object in the target system
    Create,
    /// Update an existing object in the target system
    Update,
    /// Delete an object from the target system
    Delete,
}

impl OperationType {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Create => "CREATE",
            OperationType::Update => "UPDATE",
            OperationType::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ParseOperationTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "create" => Ok(OperationType::Create),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(ParseOperationTypeError(s.to_string())),
        }
    }
}

/// Error parsing operation type from string.
#[derive(Debug, Clone)]
pub struct ParseOperationTypeError(String);

impl fmt::Display for ParseOperationTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "invalid operation type '{}', expected one of: create, update, delete",
            self.0
        )
    }
}

impl std::error::Error for ParseOperationTypeError {}
