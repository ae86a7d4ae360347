//! Provisioning façade.
//!
//! Every operation runs the same pipeline: security check, binding and
//! policy enforcement, the workflow inside its own unit of work, then
//! propagation of the committed change and a refresh of dynamic memberships.
//! Propagation failures are reported in the result and never undo the
//! authoritative change.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument};

use idprov_connector::types::OperationType;
use idprov_core::{realm, Any, AnyKey, AnyPatch, AnyTypeKind};

use crate::domain::{transactional, DomainContext};
use crate::dynmember::MembershipOwner;
use crate::error::{ProvisioningError, Result};
use crate::events::ProvisioningEvent;
use crate::propagation::{PropagationByResource, PropagationStatus, PropagationTask};
use crate::store::{effective_resources, group_resources};
use crate::workflow::{StatusChange, WorkflowResult, STATUS_SUSPENDED};

/// Entitlement name for an action on an any type, e.g. `USER_CREATE`.
#[must_use]
pub fn entitlement(any_type: &str, action: &str) -> String {
    format!("{}_{}", any_type.to_uppercase(), action.to_uppercase())
}

/// The authenticated principal and the realms each entitlement covers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub username: String,
    /// Entitlement name to realm paths or dynamic realm keys.
    #[serde(default)]
    pub entitlements: BTreeMap<String, BTreeSet<String>>,
}

impl Caller {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            entitlements: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_entitlement(mut self, entitlement: impl Into<String>, realm: impl Into<String>) -> Self {
        self.entitlements
            .entry(entitlement.into())
            .or_default()
            .insert(realm.into());
        self
    }

    /// Caller acting for the engine itself, entitled to every write on the
    /// any type across all realms.
    #[must_use]
    pub fn system(username: impl Into<String>, any_type: &str) -> Self {
        ["CREATE", "UPDATE", "DELETE"]
            .into_iter()
            .fold(Self::new(username), |caller, action| {
                caller.with_entitlement(entitlement(any_type, action), realm::ROOT_REALM)
            })
    }

    /// Realms the entitlement is granted on; empty when not granted.
    pub fn realms(&self, entitlement: &str) -> impl Iterator<Item = &str> {
        self.entitlements
            .get(entitlement)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }
}

/// How the propagation stage runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropagationOptions {
    /// Resources that receive nothing, e.g. the source of a pull.
    pub excluded_resources: BTreeSet<String>,
    /// Run non-priority tasks in the background.
    pub async_non_priority: bool,
}

impl PropagationOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn excluding(mut self, resource: impl Into<String>) -> Self {
        self.excluded_resources.insert(resource.into());
        self
    }

    #[must_use]
    pub fn asynchronous(mut self) -> Self {
        self.async_non_priority = true;
        self
    }
}

/// A status change request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRequest {
    pub key: AnyKey,
    pub change: StatusChange,
    /// Change the status on the authoritative store too; otherwise only the
    /// listed resources are enabled or disabled.
    #[serde(default = "default_true")]
    pub on_system: bool,
    /// Resources to propagate to; empty means every resource the user reaches.
    #[serde(default)]
    pub resources: BTreeSet<String>,
}

fn default_true() -> bool {
    true
}

impl StatusRequest {
    #[must_use]
    pub fn new(key: AnyKey, change: StatusChange) -> Self {
        Self {
            key,
            change,
            on_system: true,
            resources: BTreeSet::new(),
        }
    }

    /// Only enables or disables the user on the given resources.
    #[must_use]
    pub fn on_resources<I, S>(mut self, resources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.on_system = false;
        self.resources = resources.into_iter().map(Into::into).collect();
        self
    }
}

/// Result of a façade operation.
#[derive(Debug, Clone)]
pub struct ProvisioningResult<T> {
    pub value: T,
    /// One status per propagation task, in execution order.
    pub statuses: Vec<PropagationStatus>,
}

impl<T> ProvisioningResult<T> {
    fn new(value: T, statuses: Vec<PropagationStatus>) -> Self {
        Self { value, statuses }
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.statuses
            .iter()
            .all(|s| s.status == crate::propagation::ExecutionStatus::Success)
    }
}

/// Orchestrates the lifecycle of users, groups and any objects.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProvisioningManager;

impl ProvisioningManager {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Fails with `DelegatedAdministration` unless the caller holds the
    /// entitlement on the realm, on one of its ancestors or on a dynamic
    /// realm the entity belongs to.
    pub async fn security_check(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        entitlement: &str,
        realm_path: &str,
        key: Option<AnyKey>,
    ) -> Result<()> {
        if caller
            .realms(entitlement)
            .any(|granted| realm::is_within(realm_path, granted))
        {
            return Ok(());
        }

        if let Some(key) = key {
            let owners = ctx.recalculator().owners_of(key).await?;
            let granted_dynamic = caller.realms(entitlement).any(|granted| {
                owners.contains(&MembershipOwner::Realm(granted.to_string()))
            });
            if granted_dynamic {
                return Ok(());
            }
        }

        Err(ProvisioningError::DelegatedAdministration {
            entitlement: entitlement.to_string(),
            realm: realm_path.to_string(),
            key,
        })
    }

    #[instrument(skip_all, fields(any_type = %any.any_type, realm = %any.realm))]
    pub async fn create(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        any: Any,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        self.security_check(ctx, caller, &entitlement(&any.any_type, "CREATE"), &any.realm, None)
            .await?;
        self.do_create(ctx, any, options).await
    }

    /// Self-registration; no security check.
    pub async fn self_create(
        &self,
        ctx: &DomainContext,
        any: Any,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        self.do_create(ctx, any, options).await
    }

    async fn do_create(
        &self,
        ctx: &DomainContext,
        any: Any,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let password = any.clear_password().map(str::to_owned);
        let mut any = ctx.binder().bind_create(any).await?;
        ctx.enforcer().enforce_policies(&mut any).await?;

        let mut prop_by_res = PropagationByResource::new();
        prop_by_res.add_all(
            OperationType::Create,
            effective_resources(ctx.store(), &any).await?,
        );

        let result = transactional(ctx.pool(), ctx.workflow().create(any, prop_by_res)).await?;
        let created = result.value;
        info!(any_key = %created.key, any_type = %created.any_type, "Entity created");

        let tasks = ctx
            .propagation()
            .get_create_tasks(
                created.kind,
                created.key,
                password.as_deref(),
                &result.prop_by_res,
                &BTreeMap::new(),
                &options.excluded_resources,
            )
            .await?;
        let statuses = self.propagate(ctx, tasks, options).await;

        ctx.events()
            .publish(ProvisioningEvent::AnyCreated {
                key: created.key,
                any_type: created.any_type.clone(),
            })
            .await;
        self.refresh_memberships(ctx, &created).await;

        Ok(ProvisioningResult::new(created, statuses))
    }

    #[instrument(skip_all, fields(any_key = %patch.key))]
    pub async fn update(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        patch: AnyPatch,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let current = ctx.store().get(patch.key).await?;
        let required = entitlement(&current.any_type, "UPDATE");
        self.security_check(ctx, caller, &required, &current.realm, Some(current.key))
            .await?;
        if let Some(target) = &patch.realm {
            self.security_check(ctx, caller, &required, target, None).await?;
        }
        self.do_update(ctx, current, patch, options).await
    }

    /// Update of the caller's own user.
    pub async fn self_update(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        patch: AnyPatch,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let current = self.load_self(ctx, caller, patch.key).await?;
        self.do_update(ctx, current, patch, options).await
    }

    async fn do_update(
        &self,
        ctx: &DomainContext,
        current: Any,
        patch: AnyPatch,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let bound = ctx.binder().bind_update(&current, &patch).await?;
        let mut updated = bound.updated;
        let mut prop_by_res = bound.prop_by_res;

        let outcome = ctx.enforcer().enforce_policies(&mut updated).await?;
        let mut enable = None;
        if outcome.suspend {
            suspend_in_place(&mut updated);
            if outcome.propagate_suspension {
                enable = Some(false);
                for resource in effective_resources(ctx.store(), &updated).await? {
                    if !prop_by_res.contains(&resource) {
                        prop_by_res.add(OperationType::Update, resource);
                    }
                }
            }
        }

        let result = transactional(ctx.pool(), ctx.workflow().update(updated, prop_by_res)).await?;
        let saved = result.value;
        info!(any_key = %saved.key, resources = result.prop_by_res.len(), "Entity updated");

        let password = patch.password.as_ref().map(|p| p.value.as_str());
        let tasks = ctx
            .propagation()
            .get_update_tasks(
                saved.kind,
                saved.key,
                password,
                enable,
                &result.prop_by_res,
                &BTreeMap::new(),
                &options.excluded_resources,
            )
            .await?;
        let statuses = self.propagate(ctx, tasks, options).await;

        ctx.events()
            .publish(ProvisioningEvent::AnyUpdated {
                key: saved.key,
                any_type: saved.any_type.clone(),
            })
            .await;
        self.refresh_memberships(ctx, &saved).await;

        Ok(ProvisioningResult::new(saved, statuses))
    }

    #[instrument(skip(self, ctx, caller, options))]
    pub async fn delete(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        key: AnyKey,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<AnyKey>> {
        let any = ctx.store().get(key).await?;
        self.security_check(ctx, caller, &entitlement(&any.any_type, "DELETE"), &any.realm, Some(key))
            .await?;
        self.do_delete(ctx, any, options).await
    }

    /// Deletion of the caller's own user.
    pub async fn self_delete(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        key: AnyKey,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<AnyKey>> {
        let any = self.load_self(ctx, caller, key).await?;
        self.do_delete(ctx, any, options).await
    }

    async fn do_delete(
        &self,
        ctx: &DomainContext,
        any: Any,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<AnyKey>> {
        let mut statuses = Vec::new();
        if any.kind == AnyTypeKind::Group {
            statuses.extend(self.deprovision_members(ctx, &any, options).await?);
        }

        // Tasks are derived before the entity disappears from the store.
        let tasks = ctx
            .propagation()
            .get_delete_tasks(any.kind, any.key, None, None, &options.excluded_resources)
            .await?;

        let result = transactional(ctx.pool(), async {
            ctx.recalculator().remove_memberships(any.key).await?;
            if any.kind == AnyTypeKind::Group {
                ctx.recalculator()
                    .clear_owner(&MembershipOwner::Group(any.key))
                    .await?;
            }
            ctx.workflow().delete(any.key).await
        })
        .await?;
        info!(any_key = %any.key, any_type = %any.any_type, "Entity deleted");

        statuses.extend(self.propagate(ctx, tasks, options).await);
        ctx.events()
            .publish(ProvisioningEvent::AnyDeleted {
                key: any.key,
                any_type: any.any_type.clone(),
            })
            .await;

        Ok(ProvisioningResult::new(result.value, statuses))
    }

    /// Removes every member from the group, each in its own unit of work,
    /// and deletes it from the resources it only reached through this group.
    async fn deprovision_members(
        &self,
        ctx: &DomainContext,
        group: &Any,
        options: &PropagationOptions,
    ) -> Result<Vec<PropagationStatus>> {
        let mut statuses = Vec::new();
        for member in ctx.store().find_members(group.key).await? {
            let mut remaining = member.clone();
            remaining.memberships.remove(&group.key);

            let mut kept = remaining.resources.clone();
            kept.extend(group_resources(ctx.store(), &remaining.memberships).await?);
            let group_only: BTreeSet<String> = group.resources.difference(&kept).cloned().collect();

            let tasks = if group_only.is_empty() {
                Vec::new()
            } else {
                ctx.propagation()
                    .get_delete_tasks(
                        member.kind,
                        member.key,
                        None,
                        Some(&group_only),
                        &options.excluded_resources,
                    )
                    .await?
            };

            let unit = transactional(
                ctx.pool(),
                ctx.workflow().update(remaining, PropagationByResource::new()),
            )
            .await;
            match unit {
                Ok(result) => {
                    statuses.extend(self.propagate(ctx, tasks, options).await);
                    self.refresh_memberships(ctx, &result.value).await;
                }
                Err(e) => {
                    error!(any_key = %member.key, group = %group.key, error = %e, "Member removal failed");
                    return Err(e);
                }
            }
        }
        Ok(statuses)
    }

    /// Propagates the entity to the resources, creating it where missing.
    /// The resources are not assigned.
    #[instrument(skip(self, ctx, caller, resources, password, options))]
    pub async fn provision(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        key: AnyKey,
        resources: &BTreeSet<String>,
        password: Option<&str>,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let any = ctx.store().get(key).await?;
        self.security_check(ctx, caller, &entitlement(&any.any_type, "UPDATE"), &any.realm, Some(key))
            .await?;

        let mut prop_by_res = PropagationByResource::new();
        prop_by_res.add_all(OperationType::Update, resources.iter().cloned());
        let tasks = ctx
            .propagation()
            .get_update_tasks(
                any.kind,
                key,
                password,
                None,
                &prop_by_res,
                &BTreeMap::new(),
                &options.excluded_resources,
            )
            .await?;
        let statuses = self.propagate(ctx, tasks, options).await;
        Ok(ProvisioningResult::new(any, statuses))
    }

    /// Deletes the entity from the resources, leaving its assignments alone.
    #[instrument(skip(self, ctx, caller, resources, options))]
    pub async fn deprovision(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        key: AnyKey,
        resources: &BTreeSet<String>,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let any = ctx.store().get(key).await?;
        self.security_check(ctx, caller, &entitlement(&any.any_type, "UPDATE"), &any.realm, Some(key))
            .await?;

        let tasks = ctx
            .propagation()
            .get_delete_tasks(any.kind, key, None, Some(resources), &options.excluded_resources)
            .await?;
        let statuses = self.propagate(ctx, tasks, options).await;
        Ok(ProvisioningResult::new(any, statuses))
    }

    pub async fn activate(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        request: StatusRequest,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        self.status(ctx, caller, StatusRequest { change: StatusChange::Activate, ..request }, options)
            .await
    }

    pub async fn reactivate(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        request: StatusRequest,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        self.status(ctx, caller, StatusRequest { change: StatusChange::Reactivate, ..request }, options)
            .await
    }

    pub async fn suspend(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        request: StatusRequest,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        self.status(ctx, caller, StatusRequest { change: StatusChange::Suspend, ..request }, options)
            .await
    }

    /// Applies a status change to a user.
    #[instrument(skip(self, ctx, caller, options), fields(key = %request.key, change = %request.change))]
    pub async fn status(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        request: StatusRequest,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let user = self.load_user(ctx, request.key).await?;
        self.security_check(ctx, caller, &entitlement(&user.any_type, "UPDATE"), &user.realm, Some(user.key))
            .await?;
        self.do_status(ctx, user, request, options).await
    }

    /// Status change of the caller's own user.
    pub async fn self_status(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        request: StatusRequest,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let user = self.load_self(ctx, caller, request.key).await?;
        self.do_status(ctx, user, request, options).await
    }

    async fn do_status(
        &self,
        ctx: &DomainContext,
        user: Any,
        request: StatusRequest,
        options: &PropagationOptions,
    ) -> Result<ProvisioningResult<Any>> {
        let (value, mut prop_by_res) = if request.on_system {
            let result = transactional(ctx.pool(), ctx.workflow().status(user.key, request.change)).await?;
            let mut prop_by_res = result.prop_by_res;
            prop_by_res.add_all(
                OperationType::Update,
                effective_resources(ctx.store(), &result.value).await?,
            );
            (result.value, prop_by_res)
        } else {
            (user, PropagationByResource::new())
        };

        if !request.on_system {
            prop_by_res.add_all(OperationType::Update, request.resources.iter().cloned());
        } else if !request.resources.is_empty() {
            prop_by_res.retain(&request.resources);
        }

        let tasks = ctx
            .propagation()
            .get_update_tasks(
                value.kind,
                value.key,
                None,
                Some(request.change.enables()),
                &prop_by_res,
                &BTreeMap::new(),
                &options.excluded_resources,
            )
            .await?;
        let statuses = self.propagate(ctx, tasks, options).await;
        info!(any_key = %value.key, change = %request.change, "Status changed");
        if request.on_system {
            self.refresh_memberships(ctx, &value).await;
        }
        Ok(ProvisioningResult::new(value, statuses))
    }

    /// Suspends a user whose failed logins exceed an account policy
    /// threshold. Returns `None` when no policy asks for suspension.
    #[instrument(skip(self, ctx, options))]
    pub async fn internal_suspend(
        &self,
        ctx: &DomainContext,
        key: AnyKey,
        options: &PropagationOptions,
    ) -> Result<Option<ProvisioningResult<Any>>> {
        let user = self.load_user(ctx, key).await?;
        let outcome = ctx.enforcer().suspension_outcome(&user).await?;
        if !outcome.suspend {
            return Ok(None);
        }

        let result: WorkflowResult<Any> =
            transactional(ctx.pool(), ctx.workflow().status(key, StatusChange::Suspend)).await?;
        info!(any_key = %key, "User suspended after failed logins");

        let statuses = if outcome.propagate_suspension {
            let mut prop_by_res = PropagationByResource::new();
            prop_by_res.add_all(
                OperationType::Update,
                effective_resources(ctx.store(), &result.value).await?,
            );
            let tasks = ctx
                .propagation()
                .get_update_tasks(
                    result.value.kind,
                    key,
                    None,
                    Some(false),
                    &prop_by_res,
                    &BTreeMap::new(),
                    &options.excluded_resources,
                )
                .await?;
            self.propagate(ctx, tasks, options).await
        } else {
            Vec::new()
        };
        self.refresh_memberships(ctx, &result.value).await;
        Ok(Some(ProvisioningResult::new(result.value, statuses)))
    }

    /// Assigns resources without provisioning.
    pub async fn link(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        key: AnyKey,
        resources: &BTreeSet<String>,
    ) -> Result<ProvisioningResult<Any>> {
        let any = ctx.store().get(key).await?;
        self.security_check(ctx, caller, &entitlement(&any.any_type, "UPDATE"), &any.realm, Some(key))
            .await?;
        let result = transactional(ctx.pool(), ctx.workflow().link(key, resources)).await?;
        self.refresh_memberships(ctx, &result.value).await;
        Ok(ProvisioningResult::new(result.value, Vec::new()))
    }

    /// Removes resource assignments without deprovisioning.
    pub async fn unlink(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        key: AnyKey,
        resources: &BTreeSet<String>,
    ) -> Result<ProvisioningResult<Any>> {
        let any = ctx.store().get(key).await?;
        self.security_check(ctx, caller, &entitlement(&any.any_type, "UPDATE"), &any.realm, Some(key))
            .await?;
        let result = transactional(ctx.pool(), ctx.workflow().unlink(key, resources)).await?;
        self.refresh_memberships(ctx, &result.value).await;
        Ok(ProvisioningResult::new(result.value, Vec::new()))
    }

    async fn load_user(&self, ctx: &DomainContext, key: AnyKey) -> Result<Any> {
        let any = ctx.store().get(key).await?;
        if !any.is_user() {
            return Err(ProvisioningError::not_found("User", key));
        }
        Ok(any)
    }

    async fn load_self(&self, ctx: &DomainContext, caller: &Caller, key: AnyKey) -> Result<Any> {
        let user = self.load_user(ctx, key).await?;
        if user.name.as_deref() != Some(caller.username.as_str()) {
            return Err(ProvisioningError::DelegatedAdministration {
                entitlement: "SELF".to_string(),
                realm: user.realm,
                key: Some(key),
            });
        }
        Ok(user)
    }

    async fn propagate(
        &self,
        ctx: &DomainContext,
        tasks: Vec<PropagationTask>,
        options: &PropagationOptions,
    ) -> Vec<PropagationStatus> {
        if tasks.is_empty() {
            return Vec::new();
        }
        ctx.executor()
            .execute(tasks, options.async_non_priority)
            .await
            .into_statuses()
    }

    async fn refresh_memberships(&self, ctx: &DomainContext, any: &Any) {
        if let Err(e) = ctx.recalculator().refresh(any).await {
            error!(any_key = %any.key, error = %e, "Dynamic membership refresh failed");
        }
    }
}

fn suspend_in_place(any: &mut Any) {
    any.status = Some(STATUS_SUSPENDED.to_string());
    if let Some(credentials) = any.credentials.as_mut() {
        credentials.suspended = true;
    }
}
