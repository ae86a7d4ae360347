//! Realms: the hierarchical containers identity objects live in.

use crate::ids::PolicyKey;
use serde::{Deserialize, Serialize};

/// Root realm path.
pub const ROOT_REALM: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Realm {
    /// Full path, e.g. `/even/two`.
    pub full_path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_policy: Option<PolicyKey>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_policy: Option<PolicyKey>,
}

impl Realm {
    #[must_use]
    pub fn new(full_path: impl Into<String>) -> Self {
        Self {
            full_path: full_path.into(),
            password_policy: None,
            account_policy: None,
        }
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
}

/// Paths of a realm and all its ancestors, root first.
///
/// `"/even/two"` yields `["/", "/even", "/even/two"]`.
#[must_use]
pub fn ancestor_paths(path: &str) -> Vec<String> {
    let mut paths = vec![ROOT_REALM.to_string()];
    let mut current = String::new();
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        current.push('/');
        current.push_str(segment);
        paths.push(current.clone());
    }
    paths
}

/// True if `path` equals `ancestor` or lies below it.
#[must_use]
pub fn is_within(path: &str, ancestor: &str) -> bool {
    if ancestor == ROOT_REALM || path == ancestor {
        return true;
    }
    path.strip_prefix(ancestor)
        .is_some_and(|rest| rest.starts_with('/'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ancestor_paths() {
        assert_eq!(ancestor_paths("/"), vec!["/"]);
        assert_eq!(ancestor_paths("/even/two"), vec!["/", "/even", "/even/two"]);
    }

    #[test]
    fn test_is_within() {
        assert!(is_within("/even/two", "/"));
        assert!(is_within("/even/two", "/even"));
        assert!(is_within("/even", "/even"));
        assert!(!is_within("/evenmore", "/even"));
        assert!(!is_within("/odd", "/even"));
    }
}
