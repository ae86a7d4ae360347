//! Error Types
//!
//! Errors raised by the data model and the domain registry.

use crate::domain::DomainId;
use serde::Serialize;
use thiserror::Error;

/// Error type for model validation and domain lookup.
#[derive(Debug, Clone, Error, Serialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CoreError {
    /// Requested configuration element was not found.
    #[error("{resource} not found{}", id.as_ref().map(|i| format!(": {i}")).unwrap_or_default())]
    NotFound {
        /// Kind of element (e.g. "Realm", "ExternalResource")
        resource: String,
        /// Optional identifier of the element
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// A configuration element violates a model invariant.
    #[error("Invalid {element}: {message}")]
    InvalidConfiguration {
        /// The element being validated (e.g. "provision USER on ldap")
        element: String,
        /// Description of the violation
        message: String,
    },

    /// No domain is registered under the given identifier.
    #[error("Domain not registered: {domain}")]
    DomainNotRegistered { domain: DomainId },

    /// A domain is already registered under the given identifier.
    #[error("Domain already registered: {domain}")]
    DomainAlreadyRegistered { domain: DomainId },
}

impl CoreError {
    /// Create a not-found error.
    pub fn not_found(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create an invalid-configuration error.
    pub fn invalid(element: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            element: element.into(),
            message: message.into(),
        }
    }

    /// Stable error code.
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NOT_FOUND",
            Self::InvalidConfiguration { .. } => "INVALID_CONFIGURATION",
            Self::DomainNotRegistered { .. } => "DOMAIN_NOT_REGISTERED",
            Self::DomainAlreadyRegistered { .. } => "DOMAIN_ALREADY_REGISTERED",
        }
    }
}

/// Result alias for `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;
