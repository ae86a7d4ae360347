//! Change requests applied to an existing [`Any`](crate::any::Any).

use crate::ids::AnyKey;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Operation carried by a single patch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PatchOp {
    AddReplace,
    Delete,
}

/// Change to one attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrPatch {
    pub op: PatchOp,
    pub schema: String,
    #[serde(default)]
    pub values: Vec<String>,
}

/// Add or remove a single string element (resource, auxiliary class).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StringPatch {
    pub op: PatchOp,
    pub value: String,
}

/// Add or remove a static group membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipPatch {
    pub op: PatchOp,
    pub group: AnyKey,
}

/// Password change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordPatch {
    pub value: String,

    /// Whether the password is changed on the authoritative store.
    #[serde(default = "default_true")]
    pub on_system: bool,

    /// Resources the new password is propagated to; empty means all.
    #[serde(default)]
    pub resources: BTreeSet<String>,
}

fn default_true() -> bool {
    true
}

/// Update request for an existing identity object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnyPatch {
    pub key: AnyKey,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,

    /// New username (users) or name (groups, any objects).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordPatch>,

    #[serde(default)]
    pub plain_attrs: Vec<AttrPatch>,

    #[serde(default)]
    pub virtual_attrs: Vec<AttrPatch>,

    #[serde(default)]
    pub aux_classes: Vec<StringPatch>,

    #[serde(default)]
    pub resources: Vec<StringPatch>,

    #[serde(default)]
    pub memberships: Vec<MembershipPatch>,
}

impl AnyPatch {
    #[must_use]
    pub fn new(key: AnyKey) -> Self {
        Self {
            key,
            realm: None,
            name: None,
            password: None,
            plain_attrs: Vec::new(),
            virtual_attrs: Vec::new(),
            aux_classes: Vec::new(),
            resources: Vec::new(),
            memberships: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = Some(realm.into());
        self
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_password(mut self, value: impl Into<String>) -> Self {
        self.password = Some(PasswordPatch {
            value: value.into(),
            on_system: true,
            resources: BTreeSet::new(),
        });
        self
    }

    /// New password propagated to the given resources only.
    #[must_use]
    pub fn with_password_on<I, S>(mut self, value: impl Into<String>, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.password = Some(PasswordPatch {
            value: value.into(),
            on_system: true,
            resources: resources.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn replace_attr<I, S>(mut self, schema: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.plain_attrs.push(AttrPatch {
            op: PatchOp::AddReplace,
            schema: schema.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    #[must_use]
    pub fn delete_attr(mut self, schema: impl Into<String>) -> Self {
        self.plain_attrs.push(AttrPatch {
            op: PatchOp::Delete,
            schema: schema.into(),
            values: Vec::new(),
        });
        self
    }

    #[must_use]
    pub fn add_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(StringPatch {
            op: PatchOp::AddReplace,
            value: resource.into(),
        });
        self
    }

    #[must_use]
    pub fn remove_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.push(StringPatch {
            op: PatchOp::Delete,
            value: resource.into(),
        });
        self
    }

    #[must_use]
    pub fn add_membership(mut self, group: AnyKey) -> Self {
        self.memberships.push(MembershipPatch {
            op: PatchOp::AddReplace,
            group,
        });
        self
    }

    /// True when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.realm.is_none()
            && self.name.is_none()
            && self.password.is_none()
            && self.plain_attrs.is_empty()
            && self.virtual_attrs.is_empty()
            && self.aux_classes.is_empty()
            && self.resources.is_empty()
            && self.memberships.is_empty()
    }
}
