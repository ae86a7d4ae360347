//! Derivation of propagation tasks from per-resource decisions.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, instrument};

use idprov_connector::operation::AttributeSet;
use idprov_connector::types::OperationType;
use idprov_core::{Any, AnyKey, AnyTypeKind};

use super::task::{sort_tasks, PropagationByResource, PropagationTask};
use crate::catalog::ConfigurationCatalog;
use crate::error::{ProvisioningError, Result};
use crate::mapping::AttributeMapper;
use crate::store::{effective_resources, AnyStore};

pub struct PropagationManager {
    catalog: Arc<ConfigurationCatalog>,
    mapper: AttributeMapper,
    store: Arc<dyn AnyStore>,
}

impl PropagationManager {
    pub fn new(
        catalog: Arc<ConfigurationCatalog>,
        mapper: AttributeMapper,
        store: Arc<dyn AnyStore>,
    ) -> Self {
        Self {
            catalog,
            mapper,
            store,
        }
    }

    async fn load(
        &self,
        kind: AnyTypeKind,
        key: AnyKey,
        virtual_attrs: &BTreeMap<String, Vec<String>>,
    ) -> Result<Any> {
        let mut any = self.store.get(key).await?;
        if any.kind != kind {
            return Err(ProvisioningError::not_found(kind.as_str(), key));
        }
        for (schema, values) in virtual_attrs {
            any.virtual_attrs.insert(schema.clone(), values.clone());
        }
        Ok(any)
    }

    /// Tasks for a freshly created entity.
    #[instrument(skip(self, password, prop_by_res, virtual_attrs, excluded))]
    pub async fn get_create_tasks(
        &self,
        kind: AnyTypeKind,
        key: AnyKey,
        password: Option<&str>,
        prop_by_res: &PropagationByResource,
        virtual_attrs: &BTreeMap<String, Vec<String>>,
        excluded: &BTreeSet<String>,
    ) -> Result<Vec<PropagationTask>> {
        let any = self.load(kind, key, virtual_attrs).await?;
        Ok(self.tasks_for(&any, password, None, prop_by_res, excluded))
    }

    /// Tasks for an updated entity; `enable` propagates a status change.
    #[allow(clippy::too_many_arguments)]
    #[instrument(skip(self, password, prop_by_res, virtual_attrs, excluded))]
    pub async fn get_update_tasks(
        &self,
        kind: AnyTypeKind,
        key: AnyKey,
        password: Option<&str>,
        enable: Option<bool>,
        prop_by_res: &PropagationByResource,
        virtual_attrs: &BTreeMap<String, Vec<String>>,
        excluded: &BTreeSet<String>,
    ) -> Result<Vec<PropagationTask>> {
        let any = self.load(kind, key, virtual_attrs).await?;
        Ok(self.tasks_for(&any, password, enable, prop_by_res, excluded))
    }

    /// DELETE tasks for every resource the entity reaches, or only for
    /// `resources` when given. Operations in `prop_by_res` are folded in
    /// and take precedence.
    #[instrument(skip(self, prop_by_res, resources, excluded))]
    pub async fn get_delete_tasks(
        &self,
        kind: AnyTypeKind,
        key: AnyKey,
        prop_by_res: Option<&PropagationByResource>,
        resources: Option<&BTreeSet<String>>,
        excluded: &BTreeSet<String>,
    ) -> Result<Vec<PropagationTask>> {
        let any = self.load(kind, key, &BTreeMap::new()).await?;
        let resources = match resources {
            Some(resources) => resources.clone(),
            None => effective_resources(self.store.as_ref(), &any).await?,
        };

        let mut local = PropagationByResource::new();
        local.add_all(OperationType::Delete, resources);
        if let Some(prop_by_res) = prop_by_res {
            local.merge(prop_by_res.clone());
        }
        Ok(self.tasks_for(&any, None, None, &local, excluded))
    }

    /// Builds the ordered tasks for an entity already in hand.
    ///
    /// Unknown resources and resources without a provision for the
    /// entity's type produce no task.
    #[must_use]
    pub fn tasks_for(
        &self,
        any: &Any,
        password: Option<&str>,
        enable: Option<bool>,
        prop_by_res: &PropagationByResource,
        excluded: &BTreeSet<String>,
    ) -> Vec<PropagationTask> {
        let mut tasks = Vec::with_capacity(prop_by_res.len());
        for (resource_key, operation) in prop_by_res.iter() {
            if excluded.contains(resource_key) {
                continue;
            }
            let Some(resource) = self.catalog.resource(resource_key) else {
                debug!(resource = %resource_key, "Unknown resource, no task");
                continue;
            };
            let Some(provision) = resource.provision(&any.any_type) else {
                debug!(resource = %resource_key, any_type = %any.any_type, "No provision for any type, no task");
                continue;
            };

            let password = password.filter(|_| prop_by_res.carries_password(resource_key));
            let (conn_object_key, attributes) = match operation {
                OperationType::Delete => (
                    self.mapper.get_conn_object_key_value(any, provision),
                    AttributeSet::new(),
                ),
                _ => self
                    .mapper
                    .prepare_attributes(provision, any, password, enable),
            };

            tasks.push(PropagationTask {
                resource: resource_key.to_string(),
                operation,
                any_key: any.key,
                any_type: any.any_type.clone(),
                object_class: provision.object_class.clone(),
                conn_object_key_attr: provision
                    .conn_object_key_item()
                    .map(|item| item.ext_attr_name.clone()),
                conn_object_key,
                old_conn_object_key: prop_by_res
                    .old_conn_object_key(resource_key)
                    .map(ToString::to_string),
                attributes,
                priority: resource.propagation_priority,
            });
        }
        sort_tasks(&mut tasks);
        tasks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::store::InMemoryAnyStore;
    use idprov_connector::operation::PASSWORD_ATTRIBUTE;
    use idprov_core::{ExternalResource, MappingItem, PlainSchema, Provision, SchemaType};

    fn resource(key: &str, priority: Option<u32>) -> ExternalResource {
        let resource = ExternalResource::new(key, format!("connector-{key}")).with_provision(
            Provision::new("USER", "__ACCOUNT__")
                .with_item(MappingItem::conn_object_key("username", "uid"))
                .with_item(MappingItem::new("email", "mail"))
                .with_item(MappingItem::password("userPassword")),
        );
        match priority {
            Some(p) => resource.with_priority(p),
            None => resource,
        }
    }

    async fn manager() -> (PropagationManager, Arc<InMemoryAnyStore>) {
        let catalog = Arc::new(
            CatalogBuilder::new()
                .with_schema(PlainSchema::new("email", SchemaType::String))
                .with_resource(resource("resource-b", None))
                .with_resource(resource("resource-a", None))
                .with_resource(resource("resource-p2", Some(2)))
                .with_resource(resource("resource-p1", Some(1)))
                .with_resource(ExternalResource::new("resource-groups", "connector-groups"))
                .build_default()
                .unwrap(),
        );
        let store = Arc::new(InMemoryAnyStore::new());
        let mapper = AttributeMapper::new(catalog.clone());
        (PropagationManager::new(catalog, mapper, store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_tasks_are_ordered_by_priority_then_key() {
        let (manager, store) = manager().await;
        let user = store
            .save(Any::user("rossini", "/").with_attr("email", ["r@example.org"]))
            .await
            .unwrap();

        let mut prop_by_res = PropagationByResource::new();
        prop_by_res.add_all(
            OperationType::Create,
            ["resource-b", "resource-p2", "resource-a", "resource-p1", "resource-groups"],
        );

        let tasks = manager
            .get_create_tasks(
                AnyTypeKind::User,
                user.key,
                Some("Password123"),
                &prop_by_res,
                &BTreeMap::new(),
                &BTreeSet::new(),
            )
            .await
            .unwrap();

        let order: Vec<&str> = tasks.iter().map(|t| t.resource.as_str()).collect();
        assert_eq!(order, vec!["resource-p1", "resource-p2", "resource-a", "resource-b"]);
        assert_eq!(tasks[0].conn_object_key.as_deref(), Some("rossini"));
        assert_eq!(tasks[0].attributes.get_string(PASSWORD_ATTRIBUTE), Some("Password123"));
        assert_eq!(tasks[0].conn_object_key_attr.as_deref(), Some("uid"));
    }

    #[tokio::test]
    async fn test_excluded_resources_get_no_task() {
        let (manager, store) = manager().await;
        let user = store.save(Any::user("verdi", "/")).await.unwrap();
        let prop_by_res = PropagationByResource::new()
            .with(OperationType::Update, "resource-a")
            .with(OperationType::Update, "resource-b");

        let tasks = manager
            .get_update_tasks(
                AnyTypeKind::User,
                user.key,
                None,
                Some(false),
                &prop_by_res,
                &BTreeMap::new(),
                &BTreeSet::from(["resource-a".to_string()]),
            )
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].resource, "resource-b");
        assert!(!tasks[0].attributes.has(PASSWORD_ATTRIBUTE));
    }

    #[tokio::test]
    async fn test_password_goes_only_where_allowed() {
        let (manager, store) = manager().await;
        let user = store.save(Any::user("rossini", "/")).await.unwrap();
        let mut prop_by_res = PropagationByResource::new()
            .with(OperationType::Update, "resource-a")
            .with(OperationType::Update, "resource-b");
        prop_by_res.restrict_password(["resource-a"]);

        let tasks = manager
            .get_update_tasks(
                AnyTypeKind::User,
                user.key,
                Some("Password123"),
                None,
                &prop_by_res,
                &BTreeMap::new(),
                &BTreeSet::new(),
            )
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].resource, "resource-a");
        assert_eq!(tasks[0].attributes.get_string(PASSWORD_ATTRIBUTE), Some("Password123"));
        assert!(!tasks[1].attributes.has(PASSWORD_ATTRIBUTE));
    }

    #[tokio::test]
    async fn test_delete_tasks_default_to_all_resources() {
        let (manager, store) = manager().await;
        let user = store
            .save(
                Any::user("bellini", "/")
                    .with_resource("resource-a")
                    .with_resource("resource-p1"),
            )
            .await
            .unwrap();

        let tasks = manager
            .get_delete_tasks(AnyTypeKind::User, user.key, None, None, &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert!(tasks.iter().all(|t| t.operation == OperationType::Delete));
        assert!(tasks.iter().all(|t| t.attributes.is_empty()));

        let subset = BTreeSet::from(["resource-a".to_string()]);
        let tasks = manager
            .get_delete_tasks(AnyTypeKind::User, user.key, None, Some(&subset), &BTreeSet::new())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 1);
    }

    #[tokio::test]
    async fn test_wrong_kind_is_not_found() {
        let (manager, store) = manager().await;
        let group = store.save(Any::group("root", "/")).await.unwrap();
        let err = manager
            .get_delete_tasks(AnyTypeKind::User, group.key, None, None, &BTreeSet::new())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }
}
