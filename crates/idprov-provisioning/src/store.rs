//! Authoritative store contract and an in-memory implementation.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::debug;

use idprov_core::{Any, AnyKey};

use crate::error::{ProvisioningError, Result};

/// The authoritative store of identity objects.
#[async_trait]
pub trait AnyStore: Send + Sync {
    async fn find(&self, key: AnyKey) -> Result<Option<Any>>;

    async fn find_by_name(&self, any_type: &str, name: &str) -> Result<Option<Any>>;

    /// All entities of a type, in key order.
    async fn find_all(&self, any_type: &str) -> Result<Vec<Any>>;

    /// Entities holding a static membership of the group.
    async fn find_members(&self, group: AnyKey) -> Result<Vec<Any>>;

    /// Inserts or replaces an entity and returns the stored version.
    async fn save(&self, any: Any) -> Result<Any>;

    async fn delete(&self, key: AnyKey) -> Result<()>;

    /// Loads an entity or fails with `NotFound`.
    async fn get(&self, key: AnyKey) -> Result<Any> {
        self.find(key)
            .await?
            .ok_or_else(|| ProvisioningError::not_found("any", key))
    }
}

/// Resources an entity reaches: its own plus those of the groups it belongs
/// to.
pub async fn effective_resources(store: &dyn AnyStore, any: &Any) -> Result<BTreeSet<String>> {
    let mut resources = any.resources.clone();
    resources.extend(group_resources(store, &any.memberships).await?);
    Ok(resources)
}

/// Union of the resources assigned to the given groups. Missing groups are
/// skipped.
pub async fn group_resources(
    store: &dyn AnyStore,
    groups: &BTreeSet<AnyKey>,
) -> Result<BTreeSet<String>> {
    let mut resources = BTreeSet::new();
    for group in groups {
        match store.find(*group).await? {
            Some(group) => resources.extend(group.resources),
            None => debug!(group = %group, "Membership of unknown group ignored"),
        }
    }
    Ok(resources)
}

#[derive(Debug, Default)]
pub struct InMemoryAnyStore {
    entities: RwLock<BTreeMap<AnyKey, Any>>,
}

impl InMemoryAnyStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.entities.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entities.read().await.is_empty()
    }
}

#[async_trait]
impl AnyStore for InMemoryAnyStore {
    async fn find(&self, key: AnyKey) -> Result<Option<Any>> {
        Ok(self.entities.read().await.get(&key).cloned())
    }

    async fn find_by_name(&self, any_type: &str, name: &str) -> Result<Option<Any>> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .find(|a| a.any_type == any_type && a.name.as_deref() == Some(name))
            .cloned())
    }

    async fn find_all(&self, any_type: &str) -> Result<Vec<Any>> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .filter(|a| a.any_type == any_type)
            .cloned()
            .collect())
    }

    async fn find_members(&self, group: AnyKey) -> Result<Vec<Any>> {
        Ok(self
            .entities
            .read()
            .await
            .values()
            .filter(|a| a.memberships.contains(&group))
            .cloned()
            .collect())
    }

    async fn save(&self, mut any: Any) -> Result<Any> {
        // Clear-text passwords never reach the store.
        any.take_clear_password();
        self.entities.write().await.insert(any.key, any.clone());
        Ok(any)
    }

    async fn delete(&self, key: AnyKey) -> Result<()> {
        let mut entities = self.entities.write().await;
        if entities.remove(&key).is_none() {
            return Err(ProvisioningError::not_found("any", key));
        }
        for other in entities.values_mut() {
            other.memberships.remove(&key);
        }
        Ok(())
    }
}
