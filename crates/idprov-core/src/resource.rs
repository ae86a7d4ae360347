//! External resources and their per-any-type provisions.
//!
//! A [`Provision`] maps internal schema names to external connector
//! attribute names for one any type on one resource.

use crate::error::{CoreError, Result};
use crate::ids::PolicyKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Direction(s) in which a mapping item is used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MappingPurpose {
    Propagation,
    Pull,
    #[default]
    Both,
    None,
}

impl MappingPurpose {
    #[must_use]
    pub fn allows_propagation(self) -> bool {
        matches!(self, Self::Propagation | Self::Both)
    }

    #[must_use]
    pub fn allows_pull(self) -> bool {
        matches!(self, Self::Pull | Self::Both)
    }
}

/// Value transformer attached to a mapping item.
///
/// Transformers run on outbound values before propagation and on inbound
/// values before pull.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ItemTransformer {
    Lowercase,
    Uppercase,
    Trim,
    /// Adds the prefix on propagation, strips it on pull.
    Prefix { value: String },
    Replace { pattern: String, replacement: String },
    /// Regex replacement, `$1`-style group references allowed.
    Regex { pattern: String, replacement: String },
    /// Used when no value is available.
    Default { value: String },
    /// Rhai script; `value` and `direction` are in scope.
    Script { source: String },
}

/// Mapping between one internal attribute and one external attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MappingItem {
    /// Internal attribute name: `username`, `name`, `key`, `realm`,
    /// `status`, a plain schema, `der:<schema>` or `virt:<schema>`.
    pub int_attr_name: String,

    pub ext_attr_name: String,

    #[serde(default)]
    pub purpose: MappingPurpose,

    /// Boolean condition expression; `"true"` makes the item mandatory.
    #[serde(default = "default_condition")]
    pub mandatory_condition: String,

    #[serde(default)]
    pub conn_object_key: bool,

    #[serde(default)]
    pub password: bool,

    #[serde(default)]
    pub transformers: Vec<ItemTransformer>,
}

fn default_condition() -> String {
    "false".to_string()
}

impl MappingItem {
    #[must_use]
    pub fn new(int_attr_name: impl Into<String>, ext_attr_name: impl Into<String>) -> Self {
        Self {
            int_attr_name: int_attr_name.into(),
            ext_attr_name: ext_attr_name.into(),
            purpose: MappingPurpose::Both,
            mandatory_condition: default_condition(),
            conn_object_key: false,
            password: false,
            transformers: Vec::new(),
        }
    }

    /// The connector-key item of a provision.
    #[must_use]
    pub fn conn_object_key(int_attr_name: impl Into<String>, ext_attr_name: impl Into<String>) -> Self {
        Self {
            conn_object_key: true,
            ..Self::new(int_attr_name, ext_attr_name)
        }
    }

    /// The password item of a provision.
    #[must_use]
    pub fn password(ext_attr_name: impl Into<String>) -> Self {
        Self {
            password: true,
            purpose: MappingPurpose::Propagation,
            ..Self::new("password", ext_attr_name)
        }
    }

    #[must_use]
    pub fn with_purpose(mut self, purpose: MappingPurpose) -> Self {
        self.purpose = purpose;
        self
    }

    #[must_use]
    pub fn with_mandatory_condition(mut self, condition: impl Into<String>) -> Self {
        self.mandatory_condition = condition.into();
        self
    }

    #[must_use]
    pub fn with_transformer(mut self, transformer: ItemTransformer) -> Self {
        self.transformers.push(transformer);
        self
    }
}

/// Per-any-type mapping of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provision {
    pub any_type: String,

    /// Connector object class, e.g. `__ACCOUNT__`.
    pub object_class: String,

    #[serde(default)]
    pub aux_classes: BTreeSet<String>,

    #[serde(default)]
    pub items: Vec<MappingItem>,
}

impl Provision {
    #[must_use]
    pub fn new(any_type: impl Into<String>, object_class: impl Into<String>) -> Self {
        Self {
            any_type: any_type.into(),
            object_class: object_class.into(),
            aux_classes: BTreeSet::new(),
            items: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_item(mut self, item: MappingItem) -> Self {
        self.items.push(item);
        self
    }

    #[must_use]
    pub fn conn_object_key_item(&self) -> Option<&MappingItem> {
        self.items.iter().find(|item| item.conn_object_key)
    }

    #[must_use]
    pub fn password_item(&self) -> Option<&MappingItem> {
        self.items.iter().find(|item| item.password)
    }

    /// Items used when propagating, password item excluded.
    pub fn propagation_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items
            .iter()
            .filter(|item| !item.password && item.purpose.allows_propagation())
    }

    /// Items used when pulling, password item excluded.
    pub fn pull_items(&self) -> impl Iterator<Item = &MappingItem> {
        self.items
            .iter()
            .filter(|item| !item.password && item.purpose.allows_pull())
    }

    /// Checks that at most one item is flagged as connector key.
    pub fn validate(&self, resource: &str) -> Result<()> {
        let keys = self.items.iter().filter(|item| item.conn_object_key).count();
        if keys > 1 {
            return Err(CoreError::invalid(
                format!("provision {} on {resource}", self.any_type),
                format!("{keys} mapping items flagged as connector key"),
            ));
        }
        Ok(())
    }
}

/// An external target system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalResource {
    pub key: String,

    /// Key of the connector instance serving this resource.
    pub connector: String,

    #[serde(default)]
    pub provisions: Vec<Provision>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<PolicyKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_policy: Option<PolicyKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pull_policy: Option<PolicyKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_policy: Option<PolicyKey>,

    /// `Some` marks a priority resource; lower values propagate first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub propagation_priority: Option<u32>,

    #[serde(default)]
    pub enforce_mandatory_condition: bool,

    /// Per-call connector timeout; falls back to the engine default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl ExternalResource {
    #[must_use]
    pub fn new(key: impl Into<String>, connector: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            connector: connector.into(),
            provisions: Vec::new(),
            password_policy: None,
            account_policy: None,
            pull_policy: None,
            push_policy: None,
            propagation_priority: None,
            enforce_mandatory_condition: false,
            timeout_secs: None,
        }
    }

    #[must_use]
    pub fn with_provision(mut self, provision: Provision) -> Self {
        self.provisions.push(provision);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u32) -> Self {
        self.propagation_priority = Some(priority);
        self
    }

    #[must_use]
    pub fn with_enforce_mandatory_condition(mut self, enforce: bool) -> Self {
        self.enforce_mandatory_condition = enforce;
        self
    }

    #[must_use]
    pub fn with_password_policy(mut self, policy: PolicyKey) -> Self {
        self.password_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_account_policy(mut self, policy: PolicyKey) -> Self {
        self.account_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_pull_policy(mut self, policy: PolicyKey) -> Self {
        self.pull_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_push_policy(mut self, policy: PolicyKey) -> Self {
        self.push_policy = Some(policy);
        self
    }

    #[must_use]
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Provision for the given any type, if any.
    #[must_use]
    pub fn provision(&self, any_type: &str) -> Option<&Provision> {
        self.provisions.iter().find(|p| p.any_type == any_type)
    }

    #[must_use]
    pub fn is_priority(&self) -> bool {
        self.propagation_priority.is_some()
    }

    /// Validates every provision.
    pub fn validate(&self) -> Result<()> {
        self.provisions
            .iter()
            .try_for_each(|provision| provision.validate(&self.key))
    }
}
