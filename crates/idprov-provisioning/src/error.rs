//! Provisioning error types.
//!
//! Validation problems are aggregated in [`ValidationErrors`] so that every
//! violation surfaces at once; policy violations abort the operation before
//! anything is propagated. Propagation failures are never errors: they are
//! reported as statuses.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use idprov_connector::error::ConnectorError;
use idprov_core::{AnyKey, CoreError};
use idprov_expression::ExpressionError;

/// Kind of entity validation failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationKind {
    RequiredValuesMissing,
    InvalidValues,
    InvalidUsername,
    InvalidPassword,
}

impl ValidationKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RequiredValuesMissing => "RequiredValuesMissing",
            Self::InvalidValues => "InvalidValues",
            Self::InvalidUsername => "InvalidUsername",
            Self::InvalidPassword => "InvalidPassword",
        }
    }
}

impl fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation failures grouped by kind, in insertion order per kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrors {
    errors: BTreeMap<ValidationKind, Vec<String>>,
}

impl ValidationErrors {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an element; duplicates within a kind are ignored.
    pub fn add(&mut self, kind: ValidationKind, element: impl Into<String>) {
        let element = element.into();
        let elements = self.errors.entry(kind).or_default();
        if !elements.contains(&element) {
            elements.push(element);
        }
    }

    pub fn merge(&mut self, other: ValidationErrors) {
        for (kind, elements) in other.errors {
            for element in elements {
                self.add(kind, element);
            }
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Elements recorded for a kind.
    #[must_use]
    pub fn get(&self, kind: ValidationKind) -> &[String] {
        self.errors.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    #[must_use]
    pub fn contains(&self, kind: ValidationKind, element: &str) -> bool {
        self.get(kind).iter().any(|e| e == element)
    }

    pub fn kinds(&self) -> impl Iterator<Item = ValidationKind> + '_ {
        self.errors.keys().copied()
    }

    /// `Ok(value)` when nothing was recorded.
    pub fn into_result<T>(self, value: T) -> Result<T> {
        if self.is_empty() {
            Ok(value)
        } else {
            Err(ProvisioningError::Validation(self))
        }
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (kind, elements)) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{kind} [{}]", elements.join(", "))?;
        }
        Ok(())
    }
}

/// Rejection by a password or account policy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyViolation {
    #[error("password policy violation: {0}")]
    Password(String),

    #[error("account policy violation: {0}")]
    Account(String),
}

#[derive(Debug, Error)]
pub enum ProvisioningError {
    /// Invalid or missing schema, mapping, rule or policy reference.
    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// A failure while checking an entity that is not itself a policy rejection.
    #[error("invalid entity ({kind}): {message}")]
    InvalidEntity {
        kind: ValidationKind,
        message: String,
    },

    #[error("caller not entitled to {entitlement} on realm {realm}")]
    DelegatedAdministration {
        entitlement: String,
        realm: String,
        key: Option<AnyKey>,
    },

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    #[error("workflow error: {message}")]
    Workflow { message: String },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),
}

impl ProvisioningError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn not_found(resource: impl Into<String>, id: impl fmt::Display) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: id.to_string(),
        }
    }

    pub fn workflow(message: impl Into<String>) -> Self {
        Self::Workflow {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn invalid_password(message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            kind: ValidationKind::InvalidPassword,
            message: message.into(),
        }
    }

    pub fn invalid_username(message: impl Into<String>) -> Self {
        Self::InvalidEntity {
            kind: ValidationKind::InvalidUsername,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::InvalidEntity { .. })
    }

    #[must_use]
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::Policy(_))
    }

    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Core(CoreError::NotFound { .. }) => true,
            Self::Connector(e) => e.is_not_found(),
            _ => false,
        }
    }

    /// Whether retrying the same call could succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Connector(e) => e.is_transient(),
            Self::Persistence { .. } => true,
            _ => false,
        }
    }

    /// Validation errors carried by this error, if any.
    #[must_use]
    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            Self::Validation(errors) => Some(errors),
            _ => None,
        }
    }

    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "CONFIGURATION_ERROR",
            Self::Validation(_) => "VALIDATION_FAILED",
            Self::Policy(PolicyViolation::Password(_)) => "PASSWORD_POLICY_VIOLATION",
            Self::Policy(PolicyViolation::Account(_)) => "ACCOUNT_POLICY_VIOLATION",
            Self::InvalidEntity {
                kind: ValidationKind::InvalidPassword,
                ..
            } => "INVALID_PASSWORD",
            Self::InvalidEntity {
                kind: ValidationKind::InvalidUsername,
                ..
            } => "INVALID_USERNAME",
            Self::InvalidEntity { .. } => "INVALID_ENTITY",
            Self::DelegatedAdministration { .. } => "DELEGATED_ADMINISTRATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Workflow { .. } => "WORKFLOW_ERROR",
            Self::Persistence { .. } => "PERSISTENCE_ERROR",
            Self::Connector(e) => e.error_code(),
            Self::Core(e) => e.error_code(),
            Self::Expression(e) => e.error_code(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ProvisioningError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_errors_aggregate() {
        let mut errors = ValidationErrors::new();
        errors.add(ValidationKind::RequiredValuesMissing, "email");
        errors.add(ValidationKind::RequiredValuesMissing, "email");
        errors.add(ValidationKind::InvalidValues, "ctype");
        errors.add(ValidationKind::RequiredValuesMissing, "surname");

        assert_eq!(errors.get(ValidationKind::RequiredValuesMissing), ["email", "surname"]);
        assert!(errors.contains(ValidationKind::InvalidValues, "ctype"));
        assert!(errors.get(ValidationKind::InvalidPassword).is_empty());
        assert_eq!(
            errors.to_string(),
            "RequiredValuesMissing [email, surname]; InvalidValues [ctype]"
        );
    }

    #[test]
    fn test_into_result() {
        assert_eq!(ValidationErrors::new().into_result(7).unwrap(), 7);

        let mut errors = ValidationErrors::new();
        errors.add(ValidationKind::InvalidValues, "x");
        let err = errors.into_result(()).unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
    }

    #[test]
    fn test_policy_codes() {
        let err: ProvisioningError = PolicyViolation::Password("used in the past".into()).into();
        assert!(err.is_policy_violation());
        assert_eq!(err.error_code(), "PASSWORD_POLICY_VIOLATION");
        assert_eq!(err.to_string(), "password policy violation: used in the past");

        let err = ProvisioningError::invalid_username("boom");
        assert_eq!(err.error_code(), "INVALID_USERNAME");
        assert!(!err.is_policy_violation());
    }

    #[test]
    fn test_not_found_and_transient() {
        assert!(ProvisioningError::not_found("user", "42").is_not_found());
        assert!(ProvisioningError::Connector(ConnectorError::not_found("uid=x")).is_not_found());
        assert!(ProvisioningError::Connector(ConnectorError::ConnectionTimeout { timeout_ms: 1_000 })
            .is_transient());
        assert!(!ProvisioningError::workflow("x").is_transient());
    }
}
