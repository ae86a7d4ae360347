//! Workflow collaborator contract.
//!
//! The workflow owns the authoritative write. It receives the propagation
//! decisions computed by the binder and may amend them before handing them
//! back; the façade only propagates what the workflow returns.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use idprov_connector::types::OperationType;
use idprov_core::{Any, AnyKey};

use crate::error::Result;
use crate::propagation::PropagationByResource;
use crate::store::AnyStore;

/// Status values written by the default workflow.
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_SUSPENDED: &str = "suspended";

/// Outcome of a workflow step.
#[derive(Debug, Clone)]
pub struct WorkflowResult<T> {
    pub value: T,
    pub prop_by_res: PropagationByResource,
    /// Names of the workflow tasks that ran.
    pub performed_tasks: BTreeSet<String>,
}

impl<T> WorkflowResult<T> {
    pub fn new(value: T, prop_by_res: PropagationByResource, performed_task: &str) -> Self {
        Self {
            value,
            prop_by_res,
            performed_tasks: BTreeSet::from([performed_task.to_string()]),
        }
    }

    /// Maps the value, keeping the propagation and tasks.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> WorkflowResult<U> {
        WorkflowResult {
            value: f(self.value),
            prop_by_res: self.prop_by_res,
            performed_tasks: self.performed_tasks,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusChange {
    Activate,
    Reactivate,
    Suspend,
}

impl StatusChange {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Activate => "activate",
            Self::Reactivate => "reactivate",
            Self::Suspend => "suspend",
        }
    }

    /// Value of the `__ENABLE__` attribute propagated for this change.
    #[must_use]
    pub fn enables(&self) -> bool {
        !matches!(self, Self::Suspend)
    }
}

impl fmt::Display for StatusChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait]
pub trait WorkflowAdapter: Send + Sync {
    async fn create(&self, any: Any, prop_by_res: PropagationByResource) -> Result<WorkflowResult<Any>>;

    async fn update(&self, updated: Any, prop_by_res: PropagationByResource) -> Result<WorkflowResult<Any>>;

    async fn delete(&self, key: AnyKey) -> Result<WorkflowResult<AnyKey>>;

    async fn status(&self, key: AnyKey, change: StatusChange) -> Result<WorkflowResult<Any>>;

    /// Assigns resources without provisioning them.
    async fn link(&self, key: AnyKey, resources: &BTreeSet<String>) -> Result<WorkflowResult<Any>>;

    /// Removes resources without deprovisioning them.
    async fn unlink(&self, key: AnyKey, resources: &BTreeSet<String>) -> Result<WorkflowResult<Any>>;
}

/// Workflow writing straight to the store with no approval steps.
pub struct DirectWorkflowAdapter {
    store: Arc<dyn AnyStore>,
}

impl DirectWorkflowAdapter {
    pub fn new(store: Arc<dyn AnyStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl WorkflowAdapter for DirectWorkflowAdapter {
    #[instrument(skip(self, any, prop_by_res), fields(any_key = %any.key))]
    async fn create(&self, mut any: Any, prop_by_res: PropagationByResource) -> Result<WorkflowResult<Any>> {
        if any.is_user() && any.status.is_none() {
            any.status = Some(STATUS_ACTIVE.to_string());
        }
        let saved = self.store.save(any).await?;
        Ok(WorkflowResult::new(saved, prop_by_res, "create"))
    }

    #[instrument(skip(self, updated, prop_by_res), fields(any_key = %updated.key))]
    async fn update(&self, updated: Any, prop_by_res: PropagationByResource) -> Result<WorkflowResult<Any>> {
        let saved = self.store.save(updated).await?;
        Ok(WorkflowResult::new(saved, prop_by_res, "update"))
    }

    #[instrument(skip(self))]
    async fn delete(&self, key: AnyKey) -> Result<WorkflowResult<AnyKey>> {
        self.store.delete(key).await?;
        Ok(WorkflowResult::new(key, PropagationByResource::new(), "delete"))
    }

    #[instrument(skip(self))]
    async fn status(&self, key: AnyKey, change: StatusChange) -> Result<WorkflowResult<Any>> {
        let mut any = self.store.get(key).await?;
        let suspended = change == StatusChange::Suspend;
        any.status = Some(if suspended { STATUS_SUSPENDED } else { STATUS_ACTIVE }.to_string());
        if let Some(credentials) = any.credentials.as_mut() {
            credentials.suspended = suspended;
            if change == StatusChange::Reactivate {
                credentials.failed_logins = 0;
            }
        }

        let mut prop_by_res = PropagationByResource::new();
        prop_by_res.add_all(OperationType::Update, any.resources.iter().cloned());
        let saved = self.store.save(any).await?;
        debug!(status = ?saved.status, "Status changed");
        Ok(WorkflowResult::new(saved, prop_by_res, change.as_str()))
    }

    #[instrument(skip(self, resources))]
    async fn link(&self, key: AnyKey, resources: &BTreeSet<String>) -> Result<WorkflowResult<Any>> {
        let mut any = self.store.get(key).await?;
        any.resources.extend(resources.iter().cloned());
        let saved = self.store.save(any).await?;
        Ok(WorkflowResult::new(saved, PropagationByResource::new(), "link"))
    }

    #[instrument(skip(self, resources))]
    async fn unlink(&self, key: AnyKey, resources: &BTreeSet<String>) -> Result<WorkflowResult<Any>> {
        let mut any = self.store.get(key).await?;
        any.resources.retain(|r| !resources.contains(r));
        let saved = self.store.save(any).await?;
        Ok(WorkflowResult::new(saved, PropagationByResource::new(), "unlink"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryAnyStore;

    fn workflow() -> (DirectWorkflowAdapter, Arc<InMemoryAnyStore>) {
        let store = Arc::new(InMemoryAnyStore::new());
        (DirectWorkflowAdapter::new(store.clone()), store)
    }

    #[tokio::test]
    async fn test_create_activates_users() {
        let (workflow, _) = workflow();
        let result = workflow
            .create(Any::user("rossini", "/"), PropagationByResource::new())
            .await
            .unwrap();
        assert_eq!(result.value.status.as_deref(), Some(STATUS_ACTIVE));
        assert!(result.performed_tasks.contains("create"));

        let group = workflow
            .create(Any::group("root", "/"), PropagationByResource::new())
            .await
            .unwrap();
        assert!(group.value.status.is_none());
    }

    #[tokio::test]
    async fn test_suspend_then_reactivate() {
        let (workflow, store) = workflow();
        let mut user = Any::user("rossini", "/").with_resource("resource-ldap");
        if let Some(credentials) = user.credentials.as_mut() {
            credentials.failed_logins = 5;
        }
        let user = store.save(user).await.unwrap();

        let suspended = workflow.status(user.key, StatusChange::Suspend).await.unwrap();
        assert!(suspended.value.is_suspended());
        assert_eq!(
            suspended.prop_by_res.get("resource-ldap"),
            Some(OperationType::Update)
        );

        let reactivated = workflow.status(user.key, StatusChange::Reactivate).await.unwrap();
        let credentials = reactivated.value.credentials.unwrap();
        assert!(!credentials.suspended);
        assert_eq!(credentials.failed_logins, 0);
        assert_eq!(reactivated.value.status.as_deref(), Some(STATUS_ACTIVE));
    }

    #[tokio::test]
    async fn test_link_and_unlink_touch_only_assignments() {
        let (workflow, _) = workflow();
        let user = workflow
            .create(Any::user("rossini", "/"), PropagationByResource::new())
            .await
            .unwrap()
            .value;
        let resources = BTreeSet::from(["resource-ldap".to_string()]);

        let linked = workflow.link(user.key, &resources).await.unwrap();
        assert!(linked.value.resources.contains("resource-ldap"));
        assert!(linked.prop_by_res.is_empty());

        let unlinked = workflow.unlink(user.key, &resources).await.unwrap();
        assert!(unlinked.value.resources.is_empty());
    }

    #[tokio::test]
    async fn test_delete_unknown_fails() {
        let (workflow, _) = workflow();
        assert!(workflow.delete(AnyKey::new()).await.unwrap_err().is_not_found());
    }
}
