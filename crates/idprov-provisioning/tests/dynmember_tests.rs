//! Dynamic group and realm memberships kept in line with their conditions.

mod common;

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use idprov_core::{Any, AnyKey, AnyPatch, PlainSchema, SchemaType};
use idprov_provisioning::{
    AnyStore, Caller, DomainContext, DynMembershipStore, InMemoryAnyStore, InMemoryDynMembershipStore,
    InMemoryEventPublisher, MembershipOwner, PasswordHasher, PropagationOptions, ProvisioningManager, Result,
    StatusChange, StatusRequest,
};

use common::{admin, base_catalog};

/// Counts writes going to the wrapped store.
#[derive(Default)]
struct CountingMembershipStore {
    inner: InMemoryDynMembershipStore,
    writes: AtomicUsize,
}

impl CountingMembershipStore {
    fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DynMembershipStore for CountingMembershipStore {
    async fn is_member(&self, owner: &MembershipOwner, key: AnyKey) -> Result<bool> {
        self.inner.is_member(owner, key).await
    }

    async fn insert(&self, owner: &MembershipOwner, key: AnyKey) -> Result<()> {
        self.write();
        self.inner.insert(owner, key).await
    }

    async fn delete(&self, owner: &MembershipOwner, key: AnyKey) -> Result<()> {
        self.write();
        self.inner.delete(owner, key).await
    }

    async fn members(&self, owner: &MembershipOwner) -> Result<BTreeSet<AnyKey>> {
        self.inner.members(owner).await
    }

    async fn owners_of(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>> {
        self.inner.owners_of(key).await
    }

    async fn insert_all(&self, owner: &MembershipOwner, keys: &[AnyKey]) -> Result<()> {
        self.write();
        self.inner.insert_all(owner, keys).await
    }

    async fn clear(&self, owner: &MembershipOwner) -> Result<usize> {
        self.write();
        self.inner.clear(owner).await
    }

    async fn remove_all_for(&self, key: AnyKey) -> Result<BTreeSet<MembershipOwner>> {
        self.write();
        self.inner.remove_all_for(key).await
    }
}

struct Fixture {
    ctx: DomainContext,
    store: Arc<InMemoryAnyStore>,
    memberships: Arc<CountingMembershipStore>,
    events: Arc<InMemoryEventPublisher>,
    children: MembershipOwner,
    managed: MembershipOwner,
    suspended: MembershipOwner,
    linked: MembershipOwner,
    grouped: MembershipOwner,
}

fn fixture() -> Fixture {
    let children = MembershipOwner::Group(AnyKey::new());
    let managed = MembershipOwner::Realm("managed".to_string());
    let suspended = MembershipOwner::Realm("suspended".to_string());
    let linked = MembershipOwner::Realm("linked".to_string());
    let grouped = MembershipOwner::Realm("grouped".to_string());
    let catalog = base_catalog()
        .with_schema(PlainSchema::new("ctype", SchemaType::String))
        .with_dyn_membership(children.clone(), "USER", "ctype = 'child'")
        .with_dyn_membership(managed.clone(), "USER", "email LIKE '%@example.org'")
        .with_dyn_membership(suspended.clone(), "USER", "status = 'suspended'")
        .with_dyn_membership(linked.clone(), "USER", "$resources = 'resource-ldap'")
        .with_dyn_membership(grouped.clone(), "USER", "$groups IS NOT NULL")
        .build_default()
        .unwrap();

    let store = Arc::new(InMemoryAnyStore::new());
    let memberships = Arc::new(CountingMembershipStore::default());
    let events = Arc::new(InMemoryEventPublisher::new());
    let ctx = DomainContext::builder("Master", catalog)
        .with_store(store.clone())
        .with_dyn_membership_store(memberships.clone())
        .with_events(events.clone())
        .with_hasher(PasswordHasher::with_params(8, 1, 1).unwrap())
        .build()
        .unwrap();

    Fixture {
        ctx,
        store,
        memberships,
        events,
        children,
        managed,
        suspended,
        linked,
        grouped,
    }
}

#[tokio::test]
async fn test_create_adds_matching_memberships() {
    let f = fixture();
    let created = ProvisioningManager::new()
        .create(
            &f.ctx,
            &admin(),
            Any::user("rossini", "/").with_attr("ctype", ["child"]),
            &PropagationOptions::new(),
        )
        .await
        .unwrap();

    let owners = f.ctx.recalculator().owners_of(created.value.key).await.unwrap();
    assert_eq!(owners, BTreeSet::from([f.children.clone()]));
    assert_eq!(f.events.count("membership_added").await, 1);
}

#[tokio::test]
async fn test_second_refresh_writes_nothing() {
    let f = fixture();
    let user = f
        .store
        .save(Any::user("rossini", "/").with_attr("ctype", ["child"]))
        .await
        .unwrap();

    let first = f.ctx.recalculator().refresh(&user).await.unwrap();
    assert_eq!(first.added, vec![f.children.clone()]);
    let writes = f.memberships.writes();

    let second = f.ctx.recalculator().refresh(&user).await.unwrap();
    assert!(second.is_empty());
    assert_eq!(f.memberships.writes(), writes);
}

#[tokio::test]
async fn test_update_moves_entity_between_owners() {
    let f = fixture();
    let manager = ProvisioningManager::new();
    let created = manager
        .create(
            &f.ctx,
            &admin(),
            Any::user("rossini", "/").with_attr("ctype", ["child"]),
            &PropagationOptions::new(),
        )
        .await
        .unwrap();
    let key = created.value.key;

    let patch = AnyPatch::new(key)
        .replace_attr("ctype", ["parent"])
        .replace_attr("email", ["rossini@example.org"]);
    manager
        .update(&f.ctx, &admin(), patch, &PropagationOptions::new())
        .await
        .unwrap();

    let owners = f.ctx.recalculator().owners_of(key).await.unwrap();
    assert_eq!(owners, BTreeSet::from([f.managed.clone()]));
    assert_eq!(f.events.count("membership_removed").await, 1);
}

#[tokio::test]
async fn test_rebuild_populates_from_search() {
    let f = fixture();
    for (name, ctype) in [("rossini", "child"), ("verdi", "parent"), ("puccini", "child")] {
        f.store
            .save(Any::user(name, "/").with_attr("ctype", [ctype]))
            .await
            .unwrap();
    }

    let members = f.ctx.recalculator().rebuild(&f.children).await.unwrap();
    assert_eq!(members.len(), 2);
    assert_eq!(f.memberships.members(&f.children).await.unwrap(), members);
}

#[tokio::test]
async fn test_delete_drops_memberships() {
    let f = fixture();
    let manager = ProvisioningManager::new();
    let created = manager
        .create(
            &f.ctx,
            &admin(),
            Any::user("rossini", "/")
                .with_attr("ctype", ["child"])
                .with_attr("email", ["rossini@example.org"]),
            &PropagationOptions::new(),
        )
        .await
        .unwrap();
    let key = created.value.key;
    assert_eq!(f.ctx.recalculator().owners_of(key).await.unwrap().len(), 2);

    manager
        .delete(&f.ctx, &admin(), key, &PropagationOptions::new())
        .await
        .unwrap();
    assert!(f.ctx.recalculator().owners_of(key).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_dynamic_realm_grants_administration() {
    let f = fixture();
    let manager = ProvisioningManager::new();
    let member = manager
        .create(
            &f.ctx,
            &admin(),
            Any::user("rossini", "/").with_attr("email", ["rossini@example.org"]),
            &PropagationOptions::new(),
        )
        .await
        .unwrap()
        .value;
    let outsider = manager
        .create(&f.ctx, &admin(), Any::user("verdi", "/"), &PropagationOptions::new())
        .await
        .unwrap()
        .value;

    let delegated = Caller::new("helpdesk").with_entitlement("USER_UPDATE", "managed");
    manager
        .update(
            &f.ctx,
            &delegated,
            AnyPatch::new(member.key).replace_attr("ctype", ["parent"]),
            &PropagationOptions::new(),
        )
        .await
        .unwrap();

    let err = manager
        .update(
            &f.ctx,
            &delegated,
            AnyPatch::new(outsider.key).replace_attr("ctype", ["parent"]),
            &PropagationOptions::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DELEGATED_ADMINISTRATION");
}

#[tokio::test]
async fn test_status_change_refreshes_memberships() {
    let f = fixture();
    let manager = ProvisioningManager::new();
    let key = manager
        .create(&f.ctx, &admin(), Any::user("rossini", "/"), &PropagationOptions::new())
        .await
        .unwrap()
        .value
        .key;
    assert!(!f.ctx.recalculator().owners_of(key).await.unwrap().contains(&f.suspended));

    manager
        .suspend(
            &f.ctx,
            &admin(),
            StatusRequest::new(key, StatusChange::Suspend),
            &PropagationOptions::new(),
        )
        .await
        .unwrap();
    assert!(f.ctx.recalculator().owners_of(key).await.unwrap().contains(&f.suspended));

    manager
        .reactivate(
            &f.ctx,
            &admin(),
            StatusRequest::new(key, StatusChange::Reactivate),
            &PropagationOptions::new(),
        )
        .await
        .unwrap();
    assert!(!f.ctx.recalculator().owners_of(key).await.unwrap().contains(&f.suspended));
}

#[tokio::test]
async fn test_link_and_unlink_refresh_memberships() {
    let f = fixture();
    let manager = ProvisioningManager::new();
    let key = manager
        .create(&f.ctx, &admin(), Any::user("rossini", "/"), &PropagationOptions::new())
        .await
        .unwrap()
        .value
        .key;
    let resources = BTreeSet::from(["resource-ldap".to_string()]);

    manager.link(&f.ctx, &admin(), key, &resources).await.unwrap();
    assert!(f.ctx.recalculator().owners_of(key).await.unwrap().contains(&f.linked));

    manager.unlink(&f.ctx, &admin(), key, &resources).await.unwrap();
    assert!(!f.ctx.recalculator().owners_of(key).await.unwrap().contains(&f.linked));
}

#[tokio::test]
async fn test_group_delete_refreshes_former_members() {
    let f = fixture();
    let group = f.store.save(Any::group("singers", "/")).await.unwrap();
    let member = f
        .store
        .save(Any::user("rossini", "/").with_membership(group.key))
        .await
        .unwrap();
    f.ctx.recalculator().refresh(&member).await.unwrap();
    assert!(f.ctx.recalculator().owners_of(member.key).await.unwrap().contains(&f.grouped));

    ProvisioningManager::new()
        .delete(&f.ctx, &admin(), group.key, &PropagationOptions::new())
        .await
        .unwrap();
    assert!(!f.ctx.recalculator().owners_of(member.key).await.unwrap().contains(&f.grouped));
}
