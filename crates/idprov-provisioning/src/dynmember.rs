//! Dynamic realm and group memberships.
//!
//! A dynamic membership is a stored condition owned by a realm or a group for
//! one any type. Materialized members are derived data: they are recomputed
//! after every committed create or update of an entity of that type and are
//! never edited by hand.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument};

use idprov_core::{Any, AnyKey};
use idprov_expression::Expression;

use crate::catalog::ConfigurationCatalog;
use crate::error::Result;
use crate::events::{EventPublisher, ProvisioningEvent};
use crate::search::SearchMatcher;

/// Owner of a dynamic membership.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "key", rename_all = "snake_case")]
pub enum MembershipOwner {
    /// A dynamic realm, by key.
    Realm(String),
    Group(AnyKey),
}

impl fmt::Display for MembershipOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Realm(key) => write!(f, "realm:{key}"),
            Self::Group(key) => write!(f, "group:{key}"),
        }
    }
}

/// A stored membership condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DynMembership {
    pub owner: MembershipOwner,
    pub any_type: String,
    pub condition: Expression,
}

/// Persistence of materialized dynamic memberships.
#[async_trait]
pub trait DynMembershipStore: Send + Sync {
    async fn is_member(&self, owner: &MembershipOwner, key: AnyKey) -> Result<bool>;

    async fn insert(&self, owner: &MembershipOwner, key: AnyKey) -> Result<()>;

    async fn delete(&self, owner: &MembershipOwner, key: AnyKey) -> Result<()>;

    async fn members(&self, owner: &MembershipOwner) -> Result<BTreeSet<AnyKey>>;

    /// Owners the entity is currently a member of.
    async fn owners_of(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>>;

    async fn insert_all(&self, owner: &MembershipOwner, keys: &[AnyKey]) -> Result<()>;

    /// Removes every member of the owner; returns how many were removed.
    async fn clear(&self, owner: &MembershipOwner) -> Result<usize>;

    /// Removes the entity from every owner; returns the owners it left.
    async fn remove_all_for(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>>;
}

#[derive(Debug, Default)]
pub struct InMemoryDynMembershipStore {
    members: RwLock<BTreeMap<MembershipOwner, BTreeSet<AnyKey>>>,
}

impl InMemoryDynMembershipStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DynMembershipStore for InMemoryDynMembershipStore {
    async fn is_member(&self, owner: &MembershipOwner, key: AnyKey) -> Result<bool> {
        Ok(self
            .members
            .read()
            .await
            .get(owner)
            .is_some_and(|m| m.contains(&key)))
    }

    async fn insert(&self, owner: &MembershipOwner, key: AnyKey) -> Result<()> {
        self.members
            .write()
            .await
            .entry(owner.clone())
            .or_default()
            .insert(key);
        Ok(())
    }

    async fn delete(&self, owner: &MembershipOwner, key: AnyKey) -> Result<()> {
        if let Some(members) = self.members.write().await.get_mut(owner) {
            members.remove(&key);
        }
        Ok(())
    }

    async fn members(&self, owner: &MembershipOwner) -> Result<BTreeSet<AnyKey>> {
        Ok(self
            .members
            .read()
            .await
            .get(owner)
            .cloned()
            .unwrap_or_default())
    }

    async fn owners_of(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>> {
        Ok(self
            .members
            .read()
            .await
            .iter()
            .filter(|(_, members)| members.contains(&key))
            .map(|(owner, _)| owner.clone())
            .collect())
    }

    async fn insert_all(&self, owner: &MembershipOwner, keys: &[AnyKey]) -> Result<()> {
        self.members
            .write()
            .await
            .entry(owner.clone())
            .or_default()
            .extend(keys.iter().copied());
        Ok(())
    }

    async fn clear(&self, owner: &MembershipOwner) -> Result<usize> {
        Ok(self
            .members
            .write()
            .await
            .remove(owner)
            .map_or(0, |members| members.len()))
    }

    async fn remove_all_for(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>> {
        let mut left = BTreeSet::new();
        for (owner, members) in self.members.write().await.iter_mut() {
            if members.remove(&key) {
                left.insert(owner.clone());
            }
        }
        Ok(left)
    }
}

/// Membership changes caused by one refresh.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipChanges {
    pub added: Vec<MembershipOwner>,
    pub removed: Vec<MembershipOwner>,
}

impl MembershipChanges {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Keeps materialized dynamic memberships in line with their conditions.
pub struct DynamicMembershipRecalculator {
    catalog: Arc<ConfigurationCatalog>,
    matcher: Arc<dyn SearchMatcher>,
    store: Arc<dyn DynMembershipStore>,
    events: Arc<dyn EventPublisher>,
}

impl DynamicMembershipRecalculator {
    pub fn new(
        catalog: Arc<ConfigurationCatalog>,
        matcher: Arc<dyn SearchMatcher>,
        store: Arc<dyn DynMembershipStore>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            catalog,
            matcher,
            store,
            events,
        }
    }

    /// Re-evaluates every membership of the entity's type against it.
    ///
    /// Each owner is checked on its own, so an entity that is already a
    /// member of an owner and still matches causes no write.
    #[instrument(skip(self, any), fields(any_key = %any.key, any_type = %any.any_type))]
    pub async fn refresh(&self, any: &Any) -> Result<MembershipChanges> {
        let mut changes = MembershipChanges::default();

        for membership in self.catalog.dyn_memberships_for(&any.any_type) {
            let matches = self.matcher.matches(any, &membership.condition).await?;
            let is_member = self.store.is_member(&membership.owner, any.key).await?;

            if matches && !is_member {
                self.store.insert(&membership.owner, any.key).await?;
                self.events
                    .publish(ProvisioningEvent::MembershipAdded {
                        owner: membership.owner.clone(),
                        key: any.key,
                    })
                    .await;
                changes.added.push(membership.owner.clone());
            } else if !matches && is_member {
                self.store.delete(&membership.owner, any.key).await?;
                self.events
                    .publish(ProvisioningEvent::MembershipRemoved {
                        owner: membership.owner.clone(),
                        key: any.key,
                    })
                    .await;
                changes.removed.push(membership.owner.clone());
            }
        }

        if !changes.is_empty() {
            debug!(
                added = changes.added.len(),
                removed = changes.removed.len(),
                "Dynamic memberships refreshed"
            );
        }
        Ok(changes)
    }

    /// Clears the owner's members and re-populates them from a search.
    #[instrument(skip(self))]
    pub async fn rebuild(&self, owner: &MembershipOwner) -> Result<BTreeSet<AnyKey>> {
        let Some(membership) = self.catalog.dyn_membership(owner) else {
            debug!(owner = %owner, "No dynamic membership defined for owner");
            return Ok(BTreeSet::new());
        };

        self.store.clear(owner).await?;
        let found = self
            .matcher
            .search(&membership.condition, &membership.any_type)
            .await?;
        let keys: Vec<AnyKey> = found.iter().map(|any| any.key).collect();
        self.store.insert_all(owner, &keys).await?;

        for key in &keys {
            self.events
                .publish(ProvisioningEvent::MembershipAdded {
                    owner: owner.clone(),
                    key: *key,
                })
                .await;
        }

        info!(owner = %owner, members = keys.len(), "Dynamic membership rebuilt");
        Ok(keys.into_iter().collect())
    }

    /// Bulk removal of a deleted entity from every owner, without evaluation.
    pub async fn remove_memberships(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>> {
        self.store.remove_all_for(key).await
    }

    /// Bulk removal of every member of a deleted owner.
    pub async fn clear_owner(&self, owner: &MembershipOwner) -> Result<usize> {
        self.store.clear(owner).await
    }

    /// Owners the entity is currently a member of.
    pub async fn owners_of(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>> {
        self.store.owners_of(key).await
    }
}
