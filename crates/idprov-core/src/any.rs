//! Provisionable identity objects.
//!
//! An [`Any`] is a user, a group or an object of some other any type
//! (printer, device). All three share the same shape; user-only state lives
//! in [`Credentials`].

use crate::ids::AnyKey;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Kind of an any type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnyTypeKind {
    User,
    Group,
    AnyObject,
}

impl AnyTypeKind {
    /// Returns the canonical string representation.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "USER",
            Self::Group => "GROUP",
            Self::AnyObject => "ANY_OBJECT",
        }
    }
}

impl fmt::Display for AnyTypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AnyTypeKind {
    type Err = ParseAnyTypeKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "USER" => Ok(Self::User),
            "GROUP" => Ok(Self::Group),
            "ANY_OBJECT" | "ANYOBJECT" => Ok(Self::AnyObject),
            _ => Err(ParseAnyTypeKindError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown any type kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseAnyTypeKindError(pub String);

impl fmt::Display for ParseAnyTypeKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown any type kind: {}", self.0)
    }
}

impl std::error::Error for ParseAnyTypeKindError {}

/// User credential state.
///
/// The clear-text password is transient: it is never serialized and is
/// stripped by the policy enforcer before the entity is persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(skip)]
    clear_password: Option<String>,

    /// Hash (PHC string) of the current password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_hash: Option<String>,

    /// Hashes of previously set passwords, oldest first.
    #[serde(default)]
    pub password_history: Vec<String>,

    #[serde(default)]
    pub failed_logins: u32,

    #[serde(default)]
    pub suspended: bool,

    #[serde(default)]
    pub must_change_password: bool,
}

impl Credentials {
    /// Credentials carrying a clear-text password to be enforced and hashed.
    #[must_use]
    pub fn with_clear_password(password: impl Into<String>) -> Self {
        Self {
            clear_password: Some(password.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn clear_password(&self) -> Option<&str> {
        self.clear_password.as_deref()
    }

    pub fn set_clear_password(&mut self, password: Option<String>) {
        self.clear_password = password;
    }

    /// Removes and returns the clear-text password.
    pub fn take_clear_password(&mut self) -> Option<String> {
        self.clear_password.take()
    }
}

/// A provisionable identity object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Any {
    pub key: AnyKey,

    /// Any type key, e.g. `USER`, `GROUP` or `PRINTER`.
    pub any_type: String,

    pub kind: AnyTypeKind,

    /// Full path of the owning realm, e.g. `/even/two`.
    pub realm: String,

    /// Username for users, name for groups and any objects.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub plain_attrs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub der_attrs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub virtual_attrs: BTreeMap<String, Vec<String>>,

    #[serde(default)]
    pub aux_classes: BTreeSet<String>,

    /// Directly assigned external resources.
    #[serde(default)]
    pub resources: BTreeSet<String>,

    /// Static group memberships (users and any objects only).
    #[serde(default)]
    pub memberships: BTreeSet<AnyKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

impl Any {
    fn new(kind: AnyTypeKind, any_type: impl Into<String>, name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self {
            key: AnyKey::new(),
            any_type: any_type.into(),
            kind,
            realm: realm.into(),
            name: Some(name.into()),
            plain_attrs: BTreeMap::new(),
            der_attrs: BTreeMap::new(),
            virtual_attrs: BTreeMap::new(),
            aux_classes: BTreeSet::new(),
            resources: BTreeSet::new(),
            memberships: BTreeSet::new(),
            status: None,
            credentials: None,
        }
    }

    /// New user in the given realm.
    #[must_use]
    pub fn user(username: impl Into<String>, realm: impl Into<String>) -> Self {
        let mut user = Self::new(AnyTypeKind::User, "USER", username, realm);
        user.credentials = Some(Credentials::default());
        user
    }

    /// New group in the given realm.
    #[must_use]
    pub fn group(name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self::new(AnyTypeKind::Group, "GROUP", name, realm)
    }

    /// New any object of the given type.
    #[must_use]
    pub fn any_object(any_type: impl Into<String>, name: impl Into<String>, realm: impl Into<String>) -> Self {
        Self::new(AnyTypeKind::AnyObject, any_type, name, realm)
    }

    #[must_use]
    pub fn with_key(mut self, key: AnyKey) -> Self {
        self.key = key;
        self
    }

    #[must_use]
    pub fn with_attr<I, S>(mut self, schema: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.set_attr(schema, values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resources.insert(resource.into());
        self
    }

    #[must_use]
    pub fn with_aux_class(mut self, class: impl Into<String>) -> Self {
        self.aux_classes.insert(class.into());
        self
    }

    #[must_use]
    pub fn with_membership(mut self, group: AnyKey) -> Self {
        self.memberships.insert(group);
        self
    }

    /// Sets the clear-text password; creates credentials if missing.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.credentials
            .get_or_insert_with(Credentials::default)
            .set_clear_password(Some(password.into()));
        self
    }

    #[must_use]
    pub fn is_user(&self) -> bool {
        self.kind == AnyTypeKind::User
    }

    /// Values of a plain attribute.
    #[must_use]
    pub fn attr(&self, schema: &str) -> Option<&[String]> {
        self.plain_attrs.get(schema).map(Vec::as_slice)
    }

    /// Sets a plain attribute; an empty value list removes it.
    pub fn set_attr(&mut self, schema: impl Into<String>, values: Vec<String>) {
        let schema = schema.into();
        if values.is_empty() {
            self.plain_attrs.remove(&schema);
        } else {
            self.plain_attrs.insert(schema, values);
        }
    }

    pub fn remove_attr(&mut self, schema: &str) -> Option<Vec<String>> {
        self.plain_attrs.remove(schema)
    }

    #[must_use]
    pub fn clear_password(&self) -> Option<&str> {
        self.credentials.as_ref().and_then(Credentials::clear_password)
    }

    /// Removes the clear-text password from the entity.
    pub fn take_clear_password(&mut self) -> Option<String> {
        self.credentials
            .as_mut()
            .and_then(Credentials::take_clear_password)
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.credentials.as_ref().is_some_and(|c| c.suspended)
    }
}
