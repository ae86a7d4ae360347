//! Policy configuration.
//!
//! A [`Policy`] is a tagged union over the four policy kinds. Each variant
//! carries only the parameters relevant to it plus an ordered chain of
//! pluggable rule references ([`RuleConf`]) resolved by name at load time.

use crate::ids::PolicyKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Reference to a pluggable rule implementation and its configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConf {
    /// Registered implementation name, e.g. `DefaultPasswordRule`.
    pub implementation: String,

    #[serde(default)]
    pub conf: serde_json::Value,
}

impl RuleConf {
    #[must_use]
    pub fn new(implementation: impl Into<String>, conf: serde_json::Value) -> Self {
        Self {
            implementation: implementation.into(),
            conf,
        }
    }
}

/// What to do when correlation finds more than one internal match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConflictResolutionAction {
    /// Skip the inbound object.
    #[default]
    Ignore,
    /// Act on the first match only.
    FirstMatch,
    /// Act on the last match only.
    LastMatch,
    /// Act on every match.
    All,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PasswordPolicy {
    pub key: PolicyKey,
    pub name: String,
    #[serde(default)]
    pub allow_null_password: bool,
    #[serde(default)]
    pub history_length: usize,
    #[serde(default)]
    pub rules: Vec<RuleConf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPolicy {
    pub key: PolicyKey,
    pub name: String,
    /// Zero disables failed-login suspension.
    #[serde(default)]
    pub max_authentication_attempts: u32,
    #[serde(default)]
    pub propagate_suspension: bool,
    #[serde(default)]
    pub rules: Vec<RuleConf>,
    #[serde(default)]
    pub passthrough_resources: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullPolicy {
    pub key: PolicyKey,
    pub name: String,
    #[serde(default)]
    pub conflict_resolution_action: ConflictResolutionAction,
    /// Correlation rule per any type key.
    #[serde(default)]
    pub correlation_rules: BTreeMap<String, RuleConf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPolicy {
    pub key: PolicyKey,
    pub name: String,
    #[serde(default)]
    pub conflict_resolution_action: ConflictResolutionAction,
    #[serde(default)]
    pub correlation_rules: BTreeMap<String, RuleConf>,
}

/// Discriminant of [`Policy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyKind {
    Password,
    Account,
    Pull,
    Push,
}

impl PolicyKind {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Password => "password",
            Self::Account => "account",
            Self::Pull => "pull",
            Self::Push => "push",
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Policy {
    Password(PasswordPolicy),
    Account(AccountPolicy),
    Pull(PullPolicy),
    Push(PushPolicy),
}

impl Policy {
    #[must_use]
    pub fn key(&self) -> PolicyKey {
        match self {
            Self::Password(p) => p.key,
            Self::Account(p) => p.key,
            Self::Pull(p) => p.key,
            Self::Push(p) => p.key,
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Password(p) => &p.name,
            Self::Account(p) => &p.name,
            Self::Pull(p) => &p.name,
            Self::Push(p) => &p.name,
        }
    }

    #[must_use]
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::Password(_) => PolicyKind::Password,
            Self::Account(_) => PolicyKind::Account,
            Self::Pull(_) => PolicyKind::Pull,
            Self::Push(_) => PolicyKind::Push,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tagged_deserialization() {
        let policy: Policy = serde_json::from_value(json!({
            "type": "password",
            "key": "550e8400-e29b-41d4-a716-446655440000",
            "name": "strict",
            "history_length": 2,
            "rules": [{"implementation": "DefaultPasswordRule", "conf": {"min_length": 8}}]
        }))
        .unwrap();

        assert_eq!(policy.kind(), PolicyKind::Password);
        assert_eq!(policy.name(), "strict");
        match policy {
            Policy::Password(p) => {
                assert_eq!(p.history_length, 2);
                assert!(!p.allow_null_password);
                assert_eq!(p.rules[0].implementation, "DefaultPasswordRule");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_conflict_action_names() {
        let action: ConflictResolutionAction = serde_json::from_value(json!("FIRSTMATCH")).unwrap();
        assert_eq!(action, ConflictResolutionAction::FirstMatch);
        assert_eq!(ConflictResolutionAction::default(), ConflictResolutionAction::Ignore);
    }

    #[test]
    fn test_pull_policy_correlation_rules() {
        let policy: Policy = serde_json::from_value(json!({
            "type": "pull",
            "key": PolicyKey::new(),
            "name": "ldap pull",
            "conflict_resolution_action": "ALL",
            "correlation_rules": {"USER": {"implementation": "AttributeCorrelationRule", "conf": {"schemas": ["email"]}}}
        }))
        .unwrap();

        let Policy::Pull(pull) = policy else {
            panic!("expected pull policy");
        };
        assert_eq!(pull.conflict_resolution_action, ConflictResolutionAction::All);
        assert!(pull.correlation_rules.contains_key("USER"));
    }
}
