//! Per-resource propagation decisions and tasks.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use idprov_connector::operation::{AttributeSet, Uid};
use idprov_connector::types::OperationType;
use idprov_core::AnyKey;

/// Which operation each resource receives.
///
/// A resource holds at most one operation; adding another one replaces it.
/// Connector keys that change during an update are remembered so that the
/// remote object can be found under its old key. A password change may be
/// limited to some of the resources.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationByResource {
    operations: BTreeMap<String, OperationType>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    old_conn_object_keys: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password_resources: Option<BTreeSet<String>>,
}

impl PropagationByResource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, operation: OperationType, resource: impl Into<String>) {
        self.operations.insert(resource.into(), operation);
    }

    pub fn add_all<I, S>(&mut self, operation: OperationType, resources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for resource in resources {
            self.add(operation, resource);
        }
    }

    #[must_use]
    pub fn with(mut self, operation: OperationType, resource: impl Into<String>) -> Self {
        self.add(operation, resource);
        self
    }

    pub fn remove(&mut self, resource: &str) -> Option<OperationType> {
        self.old_conn_object_keys.remove(resource);
        self.operations.remove(resource)
    }

    #[must_use]
    pub fn get(&self, resource: &str) -> Option<OperationType> {
        self.operations.get(resource).copied()
    }

    #[must_use]
    pub fn contains(&self, resource: &str) -> bool {
        self.operations.contains_key(resource)
    }

    /// Resources receiving the given operation, in key order.
    pub fn resources(&self, operation: OperationType) -> impl Iterator<Item = &str> {
        self.operations
            .iter()
            .filter(move |(_, op)| **op == operation)
            .map(|(resource, _)| resource.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, OperationType)> {
        self.operations.iter().map(|(r, op)| (r.as_str(), *op))
    }

    pub fn set_old_conn_object_key(&mut self, resource: impl Into<String>, key: impl Into<String>) {
        self.old_conn_object_keys.insert(resource.into(), key.into());
    }

    #[must_use]
    pub fn old_conn_object_key(&self, resource: &str) -> Option<&str> {
        self.old_conn_object_keys.get(resource).map(String::as_str)
    }

    /// Sends a clear-text password only to the given resources.
    pub fn restrict_password<I, S>(&mut self, resources: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.password_resources = Some(resources.into_iter().map(Into::into).collect());
    }

    /// Whether a clear-text password may go to the resource; unrestricted
    /// sets allow every resource.
    #[must_use]
    pub fn carries_password(&self, resource: &str) -> bool {
        self.password_resources
            .as_ref()
            .map_or(true, |allowed| allowed.contains(resource))
    }

    /// Folds another set in; its operations win on overlap.
    pub fn merge(&mut self, other: PropagationByResource) {
        self.operations.extend(other.operations);
        self.old_conn_object_keys.extend(other.old_conn_object_keys);
        if let Some(other_password) = other.password_resources {
            self.password_resources
                .get_or_insert_with(BTreeSet::new)
                .extend(other_password);
        }
    }

    /// Drops the given resources.
    pub fn purge(&mut self, excluded: &BTreeSet<String>) {
        for resource in excluded {
            self.remove(resource);
        }
    }

    /// Keeps only the given resources.
    pub fn retain(&mut self, resources: &BTreeSet<String>) {
        self.operations.retain(|r, _| resources.contains(r));
        self.old_conn_object_keys.retain(|r, _| resources.contains(r));
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }
}

/// One operation to run against one resource for one entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropagationTask {
    pub resource: String,
    pub operation: OperationType,
    pub any_key: AnyKey,
    pub any_type: String,
    pub object_class: String,
    /// External attribute holding the connector key.
    pub conn_object_key_attr: Option<String>,
    pub conn_object_key: Option<String>,
    /// Connector key before a key-changing update.
    pub old_conn_object_key: Option<String>,
    pub attributes: AttributeSet,
    pub priority: Option<u32>,
}

impl PropagationTask {
    #[must_use]
    pub fn is_priority(&self) -> bool {
        self.priority.is_some()
    }

    /// Key the remote object currently has; the old key wins after a rename.
    #[must_use]
    pub fn target_uid(&self) -> Option<Uid> {
        let value = self
            .old_conn_object_key
            .as_deref()
            .or(self.conn_object_key.as_deref())?;
        Some(match &self.conn_object_key_attr {
            Some(attr) => Uid::new(attr.clone(), value),
            None => Uid::from_value(value),
        })
    }
}

/// Orders tasks: priority resources first by ascending priority, then the
/// rest; ties broken by resource key.
pub fn sort_tasks(tasks: &mut [PropagationTask]) {
    tasks.sort_by(|a, b| {
        let rank = |t: &PropagationTask| (t.priority.is_none(), t.priority.unwrap_or(0));
        rank(a).cmp(&rank(b)).then_with(|| a.resource.cmp(&b.resource))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(resource: &str, priority: Option<u32>) -> PropagationTask {
        PropagationTask {
            resource: resource.to_string(),
            operation: OperationType::Create,
            any_key: AnyKey::new(),
            any_type: "USER".to_string(),
            object_class: "__ACCOUNT__".to_string(),
            conn_object_key_attr: Some("uid".to_string()),
            conn_object_key: Some("rossini".to_string()),
            old_conn_object_key: None,
            attributes: AttributeSet::new(),
            priority,
        }
    }

    #[test]
    fn test_last_operation_wins() {
        let mut prop = PropagationByResource::new();
        prop.add(OperationType::Create, "ldap");
        prop.add(OperationType::Update, "ldap");
        prop.add(OperationType::Delete, "db");

        assert_eq!(prop.len(), 2);
        assert_eq!(prop.get("ldap"), Some(OperationType::Update));
        assert_eq!(prop.resources(OperationType::Delete).collect::<Vec<_>>(), vec!["db"]);
    }

    #[test]
    fn test_purge_drops_old_keys() {
        let mut prop = PropagationByResource::new().with(OperationType::Update, "ldap");
        prop.set_old_conn_object_key("ldap", "verdi");
        prop.purge(&BTreeSet::from(["ldap".to_string()]));
        assert!(prop.is_empty());
        assert_eq!(prop.old_conn_object_key("ldap"), None);
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut prop = PropagationByResource::new()
            .with(OperationType::Create, "ldap")
            .with(OperationType::Update, "db");
        prop.merge(PropagationByResource::new().with(OperationType::Delete, "ldap"));
        assert_eq!(prop.get("ldap"), Some(OperationType::Delete));
        assert_eq!(prop.get("db"), Some(OperationType::Update));
    }

    #[test]
    fn test_sort_priority_first() {
        let mut tasks = vec![
            task("zeta", None),
            task("beta", Some(2)),
            task("alpha", None),
            task("gamma", Some(1)),
        ];
        sort_tasks(&mut tasks);
        let order: Vec<_> = tasks.iter().map(|t| t.resource.as_str()).collect();
        assert_eq!(order, vec!["gamma", "beta", "alpha", "zeta"]);
    }

    #[test]
    fn test_target_uid_prefers_old_key() {
        let mut t = task("ldap", None);
        assert_eq!(t.target_uid().unwrap().value(), "rossini");
        t.old_conn_object_key = Some("verdi".to_string());
        let uid = t.target_uid().unwrap();
        assert_eq!(uid.attribute_name(), "uid");
        assert_eq!(uid.value(), "verdi");
        t.conn_object_key = None;
        t.old_conn_object_key = None;
        assert!(t.target_uid().is_none());
    }
}
