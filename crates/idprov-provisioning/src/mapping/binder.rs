//! Binding of create and update requests onto entities.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::debug;

use idprov_connector::types::OperationType;
use idprov_core::{realm, Any, AnyPatch, PasswordPatch, PatchOp};

use super::AttributeMapper;
use crate::error::{ProvisioningError, Result};
use crate::propagation::PropagationByResource;
use crate::store::{effective_resources, AnyStore};

/// Result of binding an update request.
#[derive(Debug, Clone)]
pub struct BoundUpdate {
    pub updated: Any,
    pub prop_by_res: PropagationByResource,
}

/// Validates requests and derives what each resource must receive.
#[derive(Clone)]
pub struct AnyBinder {
    mapper: AttributeMapper,
    store: Arc<dyn AnyStore>,
}

impl AnyBinder {
    pub fn new(mapper: AttributeMapper, store: Arc<dyn AnyStore>) -> Self {
        Self { mapper, store }
    }

    fn check_realm(&self, path: &str) -> Result<()> {
        if path == realm::ROOT_REALM || self.mapper.catalog().realm(path).is_some() {
            Ok(())
        } else {
            Err(ProvisioningError::not_found("Realm", path))
        }
    }

    fn drop_unknown(&self, any: &mut Any) {
        let catalog = self.mapper.catalog();
        any.aux_classes.retain(|class| {
            let known = catalog.has_aux_class(class);
            if !known {
                debug!(aux_class = %class, "Unknown auxiliary class dropped");
            }
            known
        });
        any.resources.retain(|resource| {
            let known = catalog.resource(resource).is_some();
            if !known {
                debug!(resource = %resource, "Unknown resource dropped");
            }
            known
        });
    }

    /// Prepares a new entity for the workflow.
    ///
    /// Unknown auxiliary classes and resources are dropped; every mandatory
    /// or invalid value is reported at once.
    pub async fn bind_create(&self, mut any: Any) -> Result<Any> {
        self.check_realm(&any.realm)?;
        self.drop_unknown(&mut any);

        let resources = effective_resources(self.store.as_ref(), &any).await?;
        self.mapper.check_mandatory(&any, &resources).into_result(any)
    }

    /// Applies a patch to a copy of the entity.
    #[must_use]
    pub fn apply_patch(&self, current: &Any, patch: &AnyPatch) -> Any {
        let mut updated = current.clone();

        if let Some(realm) = &patch.realm {
            updated.realm = realm.clone();
        }
        if let Some(name) = &patch.name {
            updated.name = Some(name.clone());
        }
        if let Some(password) = &patch.password {
            if updated.is_user() && password.on_system {
                updated
                    .credentials
                    .get_or_insert_with(Default::default)
                    .set_clear_password(Some(password.value.clone()));
            }
        }

        for attr in &patch.plain_attrs {
            match attr.op {
                PatchOp::AddReplace => updated.set_attr(attr.schema.clone(), attr.values.clone()),
                PatchOp::Delete => {
                    updated.remove_attr(&attr.schema);
                }
            }
        }
        for attr in &patch.virtual_attrs {
            match attr.op {
                PatchOp::AddReplace if !attr.values.is_empty() => {
                    updated
                        .virtual_attrs
                        .insert(attr.schema.clone(), attr.values.clone());
                }
                _ => {
                    updated.virtual_attrs.remove(&attr.schema);
                }
            }
        }
        for class in &patch.aux_classes {
            match class.op {
                PatchOp::AddReplace => updated.aux_classes.insert(class.value.clone()),
                PatchOp::Delete => updated.aux_classes.remove(&class.value),
            };
        }
        for resource in &patch.resources {
            match resource.op {
                PatchOp::AddReplace => updated.resources.insert(resource.value.clone()),
                PatchOp::Delete => updated.resources.remove(&resource.value),
            };
        }
        for membership in &patch.memberships {
            match membership.op {
                PatchOp::AddReplace => updated.memberships.insert(membership.group),
                PatchOp::Delete => updated.memberships.remove(&membership.group),
            };
        }

        self.drop_unknown(&mut updated);
        updated
    }

    /// Per-resource operations turning `before` into `after`.
    ///
    /// Added resources get CREATE, removed ones DELETE. A kept resource gets
    /// UPDATE when any mapped value changes; when its connector key changes
    /// the old key is recorded too. A password change adds UPDATE on the
    /// requested resources, or on every resource mapping a password.
    #[must_use]
    pub fn diff(
        &self,
        before: &Any,
        after: &Any,
        before_resources: &BTreeSet<String>,
        after_resources: &BTreeSet<String>,
        password: Option<&PasswordPatch>,
    ) -> PropagationByResource {
        let catalog = self.mapper.catalog();
        let mut prop_by_res = PropagationByResource::new();

        prop_by_res.add_all(
            OperationType::Create,
            after_resources.difference(before_resources).cloned(),
        );
        prop_by_res.add_all(
            OperationType::Delete,
            before_resources.difference(after_resources).cloned(),
        );

        for key in before_resources.intersection(after_resources) {
            let Some(provision) = catalog
                .resource(key)
                .and_then(|r| r.provision(&after.any_type))
            else {
                continue;
            };

            let (old_key, old_attrs) = self.mapper.prepare_attributes(provision, before, None, None);
            let (new_key, new_attrs) = self.mapper.prepare_attributes(provision, after, None, None);
            if old_attrs != new_attrs || old_key != new_key {
                prop_by_res.add(OperationType::Update, key.clone());
            }
            if let Some(old_key) = old_key.filter(|old| Some(old) != new_key.as_ref()) {
                prop_by_res.set_old_conn_object_key(key.clone(), old_key);
            }
        }

        if let Some(password) = password {
            let targets: Vec<&String> = if password.resources.is_empty() {
                after_resources
                    .iter()
                    .filter(|key| {
                        catalog
                            .resource(key)
                            .and_then(|r| r.provision(&after.any_type))
                            .is_some_and(|p| p.password_item().is_some())
                    })
                    .collect()
            } else {
                password
                    .resources
                    .iter()
                    .filter(|key| after_resources.contains(*key))
                    .collect()
            };
            for key in &targets {
                if prop_by_res.get(key) != Some(OperationType::Create) {
                    prop_by_res.add(OperationType::Update, (*key).clone());
                }
            }
            prop_by_res.restrict_password(targets.into_iter().cloned());
        }

        prop_by_res
    }

    /// Applies the patch, validates the result and computes its propagation.
    pub async fn bind_update(&self, current: &Any, patch: &AnyPatch) -> Result<BoundUpdate> {
        let updated = self.apply_patch(current, patch);
        if patch.realm.is_some() {
            self.check_realm(&updated.realm)?;
        }

        let before_resources = effective_resources(self.store.as_ref(), current).await?;
        let after_resources = effective_resources(self.store.as_ref(), &updated).await?;

        let updated = self
            .mapper
            .check_mandatory(&updated, &after_resources)
            .into_result(updated)?;

        let prop_by_res = self.diff(
            current,
            &updated,
            &before_resources,
            &after_resources,
            patch.password.as_ref(),
        );
        Ok(BoundUpdate {
            updated,
            prop_by_res,
        })
    }

    /// Connector key of the entity on every resource it reaches.
    pub async fn get_conn_object_keys(&self, any: &Any) -> Result<BTreeMap<String, String>> {
        let catalog = self.mapper.catalog();
        let mut keys = BTreeMap::new();
        for resource in effective_resources(self.store.as_ref(), any).await? {
            let key = catalog
                .resource(&resource)
                .and_then(|r| r.provision(&any.any_type))
                .and_then(|p| self.mapper.get_conn_object_key_value(any, p));
            if let Some(key) = key {
                keys.insert(resource, key);
            }
        }
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::error::ValidationKind;
    use crate::store::InMemoryAnyStore;
    use idprov_core::{ExternalResource, MappingItem, PlainSchema, Provision, SchemaType};

    fn binder() -> (AnyBinder, Arc<InMemoryAnyStore>) {
        let ldap = ExternalResource::new("resource-ldap", "connector-ldap").with_provision(
            Provision::new("USER", "__ACCOUNT__")
                .with_item(MappingItem::conn_object_key("username", "uid"))
                .with_item(MappingItem::new("email", "mail"))
                .with_item(MappingItem::password("userPassword")),
        );
        let db = ExternalResource::new("resource-db", "connector-db").with_provision(
            Provision::new("USER", "__ACCOUNT__")
                .with_item(MappingItem::conn_object_key("key", "id"))
                .with_item(MappingItem::new("email", "email")),
        );
        let catalog = CatalogBuilder::new()
            .with_schema(PlainSchema::new("email", SchemaType::String))
            .with_schema(PlainSchema::new("fullname", SchemaType::String).with_mandatory_condition("true"))
            .with_resource(ldap)
            .with_resource(db)
            .with_aux_class("csv")
            .build_default()
            .unwrap();
        let store = Arc::new(InMemoryAnyStore::new());
        let mapper = AttributeMapper::new(Arc::new(catalog));
        (AnyBinder::new(mapper, store.clone()), store)
    }

    #[tokio::test]
    async fn test_bind_create_drops_unknown_and_reports_missing() {
        let (binder, _) = binder();
        let user = Any::user("rossini", "/")
            .with_resource("resource-ldap")
            .with_resource("resource-unknown")
            .with_aux_class("nope");

        let err = binder.bind_create(user.clone()).await.unwrap_err();
        let errors = err.validation_errors().unwrap();
        assert!(errors.contains(ValidationKind::RequiredValuesMissing, "fullname"));

        let bound = binder
            .bind_create(user.with_attr("fullname", ["Gioacchino Rossini"]))
            .await
            .unwrap();
        assert_eq!(bound.resources, BTreeSet::from(["resource-ldap".to_string()]));
        assert!(bound.aux_classes.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_realm_is_rejected() {
        let (binder, _) = binder();
        let user = Any::user("rossini", "/nowhere").with_attr("fullname", ["x"]);
        assert!(binder.bind_create(user).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_bind_update_derives_operations() {
        let (binder, _) = binder();
        let current = Any::user("rossini", "/")
            .with_attr("fullname", ["Gioacchino Rossini"])
            .with_attr("email", ["old@example.org"])
            .with_resource("resource-ldap");

        let patch = AnyPatch::new(current.key)
            .replace_attr("email", ["new@example.org"])
            .add_resource("resource-db");
        let bound = binder.bind_update(&current, &patch).await.unwrap();

        assert_eq!(bound.prop_by_res.get("resource-ldap"), Some(OperationType::Update));
        assert_eq!(bound.prop_by_res.get("resource-db"), Some(OperationType::Create));

        let patch = AnyPatch::new(current.key).remove_resource("resource-ldap");
        let bound = binder.bind_update(&current, &patch).await.unwrap();
        assert_eq!(bound.prop_by_res.get("resource-ldap"), Some(OperationType::Delete));
        assert_eq!(bound.prop_by_res.len(), 1);
    }

    #[tokio::test]
    async fn test_rename_records_old_key() {
        let (binder, _) = binder();
        let current = Any::user("rossini", "/")
            .with_attr("fullname", ["x"])
            .with_resource("resource-ldap")
            .with_resource("resource-db");

        let patch = AnyPatch::new(current.key).with_name("rossini2");
        let bound = binder.bind_update(&current, &patch).await.unwrap();

        assert_eq!(bound.prop_by_res.get("resource-ldap"), Some(OperationType::Update));
        assert_eq!(bound.prop_by_res.old_conn_object_key("resource-ldap"), Some("rossini"));
        // Keyed by entity key, which never changes.
        assert!(!bound.prop_by_res.contains("resource-db"));
    }

    #[tokio::test]
    async fn test_password_change_targets_password_resources() {
        let (binder, _) = binder();
        let current = Any::user("rossini", "/")
            .with_attr("fullname", ["x"])
            .with_resource("resource-ldap")
            .with_resource("resource-db");

        let patch = AnyPatch::new(current.key).with_password("Password321");
        let bound = binder.bind_update(&current, &patch).await.unwrap();

        assert_eq!(bound.prop_by_res.get("resource-ldap"), Some(OperationType::Update));
        assert!(!bound.prop_by_res.contains("resource-db"));
        assert!(bound.prop_by_res.carries_password("resource-ldap"));
        assert!(!bound.prop_by_res.carries_password("resource-db"));
        assert_eq!(bound.updated.clear_password(), Some("Password321"));
    }

    #[tokio::test]
    async fn test_get_conn_object_keys() {
        let (binder, _) = binder();
        let user = Any::user("rossini", "/")
            .with_resource("resource-ldap")
            .with_resource("resource-db");
        let keys = binder.get_conn_object_keys(&user).await.unwrap();
        assert_eq!(keys.get("resource-ldap").map(String::as_str), Some("rossini"));
        assert_eq!(keys.get("resource-db"), Some(&user.key.to_string()));
    }
}
