//! Inbound synchronization from a resource.
//!
//! Changes are read in batches from the connector's sync capability, mapped
//! onto internal entities, correlated and applied through the façade. The
//! pulled resource is excluded from the resulting propagation so that a
//! change never bounces back to where it came from.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use idprov_connector::operation::AttributeValue;
use idprov_connector::traits::{SyncChange, SyncChangeType};
use idprov_core::{realm, Any, AnyKey, AnyPatch, ConflictResolutionAction, Provision};

use crate::catalog::CompiledCorrelationPolicy;
use crate::correlation::CorrelationOutcome;
use crate::domain::DomainContext;
use crate::error::{ProvisioningError, Result};
use crate::manager::{Caller, PropagationOptions, ProvisioningManager};
use crate::mapping::AttributeMapper;
use crate::propagation::executor::bounded;

/// Outcome of one pull run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullReport {
    pub created: Vec<AnyKey>,
    pub updated: Vec<AnyKey>,
    pub deleted: Vec<AnyKey>,
    /// Changes that required no action.
    pub ignored: usize,
    /// Changes matching more than one entity.
    pub conflicts: usize,
    /// Per-change failures as `uid: message`.
    pub failures: Vec<String>,
    /// Token to resume the next run from.
    pub latest_token: Option<String>,
}

impl PullReport {
    /// Number of changes processed, failed ones included.
    #[must_use]
    pub fn processed(&self) -> usize {
        self.created.len() + self.updated.len() + self.deleted.len() + self.ignored + self.failures.len()
    }
}

/// Pulls one any type from one resource.
#[derive(Debug, Clone)]
pub struct PullExecutor {
    manager: ProvisioningManager,
    destination_realm: String,
}

impl Default for PullExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl PullExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            manager: ProvisioningManager::new(),
            destination_realm: realm::ROOT_REALM.to_string(),
        }
    }

    /// Realm new entities are created in.
    #[must_use]
    pub fn with_destination_realm(mut self, realm: impl Into<String>) -> Self {
        self.destination_realm = realm.into();
        self
    }

    /// Reads every change after `token` and applies it.
    ///
    /// A failing change is recorded in the report and does not stop the
    /// run; a failing connector call does.
    #[instrument(skip(self, ctx, token))]
    pub async fn pull(
        &self,
        ctx: &DomainContext,
        resource: &str,
        any_type: &str,
        token: Option<String>,
    ) -> Result<PullReport> {
        let catalog = ctx.catalog();
        let external = catalog
            .resource(resource)
            .ok_or_else(|| ProvisioningError::not_found("Resource", resource))?;
        let provision = external.provision(any_type).ok_or_else(|| {
            ProvisioningError::configuration(format!("resource {resource} has no provision for {any_type}"))
        })?;
        let policy = external.pull_policy.and_then(|key| catalog.pull_policy(key));
        let connector = ctx
            .connectors()
            .get_connector(resource)
            .await
            .ok_or_else(|| ProvisioningError::not_found("Connector", resource))?;

        let caller = Caller::system(ctx.config().admin_user.clone(), any_type);
        let options = PropagationOptions::new().excluding(resource);
        let timeout = ctx.executor().timeout_for(resource);
        let batch_size = ctx.config().pull_batch_size;

        let mut report = PullReport {
            latest_token: token,
            ..PullReport::default()
        };
        loop {
            let batch = bounded(
                timeout,
                connector.sync(&provision.object_class, report.latest_token.as_deref(), batch_size),
            )
            .await?;
            debug!(changes = batch.changes.len(), has_more = batch.has_more, "Sync batch read");

            for change in &batch.changes {
                let applied = self
                    .apply(ctx, &caller, &options, provision, policy, change, &mut report)
                    .await;
                if let Err(e) = applied {
                    warn!(uid = %change.uid, error = %e, "Pulled change failed");
                    report.failures.push(format!("{}: {e}", change.uid.value()));
                }
                if let Some(token) = &change.token {
                    report.latest_token = Some(token.clone());
                }
            }

            if let Some(token) = batch.new_token {
                report.latest_token = Some(token);
            }
            if !batch.has_more {
                break;
            }
        }

        info!(
            resource = %resource,
            created = report.created.len(),
            updated = report.updated.len(),
            deleted = report.deleted.len(),
            ignored = report.ignored,
            conflicts = report.conflicts,
            failures = report.failures.len(),
            "Pull completed"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn apply(
        &self,
        ctx: &DomainContext,
        caller: &Caller,
        options: &PropagationOptions,
        provision: &Provision,
        policy: Option<&CompiledCorrelationPolicy>,
        change: &SyncChange,
        report: &mut PullReport,
    ) -> Result<()> {
        let action = policy.map(|p| p.conflict_resolution_action).unwrap_or_default();
        let outcome = ctx.resolver().classify(change, provision, policy).await?;
        if matches!(outcome, CorrelationOutcome::Conflict(_)) {
            report.conflicts += 1;
            if action == ConflictResolutionAction::Ignore {
                debug!(uid = %change.uid, "Ambiguous correlation ignored");
                report.ignored += 1;
                return Ok(());
            }
        }

        match change.change_type {
            SyncChangeType::Delete => {
                let targets = outcome.targets(action);
                if targets.is_empty() {
                    report.ignored += 1;
                }
                for target in targets {
                    let deleted = self.manager.delete(ctx, caller, target.key, options).await?;
                    report.deleted.push(deleted.value);
                }
            }
            SyncChangeType::CreateOrUpdate => match outcome {
                CorrelationOutcome::NoMatch => {
                    let any = self.new_entity(ctx.mapper(), provision, change)?;
                    let created = self.manager.create(ctx, caller, any, options).await?;
                    report.created.push(created.value.key);
                }
                outcome => {
                    for target in outcome.targets(action) {
                        let patch = pulled_patch(ctx.mapper(), provision, change, &target);
                        if patch.is_empty() {
                            report.ignored += 1;
                            continue;
                        }
                        let updated = self.manager.update(ctx, caller, patch, options).await?;
                        report.updated.push(updated.value.key);
                    }
                }
            },
        }
        Ok(())
    }

    fn new_entity(&self, mapper: &AttributeMapper, provision: &Provision, change: &SyncChange) -> Result<Any> {
        let realm = self.destination_realm.clone();
        let mut any = match provision.any_type.as_str() {
            "USER" => Any::user("", realm),
            "GROUP" => Any::group("", realm),
            other => Any::any_object(other, "", realm),
        };
        apply_delta(mapper, provision, change, &mut any);

        if any.name.as_deref().map_or(true, str::is_empty) {
            return Err(ProvisioningError::invalid_username(format!(
                "no name mapped for {}",
                change.uid
            )));
        }
        Ok(any)
    }
}

/// Writes every pulled attribute of the change onto the entity.
fn apply_delta(mapper: &AttributeMapper, provision: &Provision, change: &SyncChange, target: &mut Any) {
    let key_item = provision.conn_object_key_item();
    let items = provision
        .pull_items()
        .chain(key_item.filter(|item| !item.purpose.allows_pull()));

    for item in items {
        let value = change
            .attributes
            .as_ref()
            .and_then(|attrs| attrs.get(&item.ext_attr_name))
            .cloned()
            .or_else(|| {
                item.conn_object_key
                    .then(|| AttributeValue::from(change.uid.value()))
            });
        if let Some(value) = value {
            mapper.set_int_values(item, &value, target);
        }
    }
}

/// Patch turning `current` into what the change says it should be.
fn pulled_patch(mapper: &AttributeMapper, provision: &Provision, change: &SyncChange, current: &Any) -> AnyPatch {
    let mut pulled = current.clone();
    apply_delta(mapper, provision, change, &mut pulled);

    let mut patch = AnyPatch::new(current.key);
    if pulled.name != current.name {
        if let Some(name) = pulled.name.clone() {
            patch = patch.with_name(name);
        }
    }
    if pulled.realm != current.realm {
        patch = patch.with_realm(pulled.realm.clone());
    }
    if let Some(password) = pulled.clear_password() {
        patch = patch.with_password(password);
    }
    for (schema, values) in &pulled.plain_attrs {
        if current.attr(schema) != Some(values.as_slice()) {
            patch = patch.replace_attr(schema.clone(), values.clone());
        }
    }
    for schema in current.plain_attrs.keys() {
        if !pulled.plain_attrs.contains_key(schema) {
            patch = patch.delete_attr(schema.clone());
        }
    }
    patch
}

/// Pulls several any types from one resource, resuming each from its token
/// in `tokens` and storing the new ones back.
pub async fn pull_all(
    ctx: &DomainContext,
    resource: &str,
    any_types: &[&str],
    tokens: &mut BTreeMap<String, String>,
) -> Result<Vec<PullReport>> {
    let executor = PullExecutor::new();
    let mut reports = Vec::with_capacity(any_types.len());
    for any_type in any_types {
        let report = executor
            .pull(ctx, resource, any_type, tokens.get(*any_type).cloned())
            .await?;
        if let Some(token) = &report.latest_token {
            tokens.insert((*any_type).to_string(), token.clone());
        }
        reports.push(report);
    }
    Ok(reports)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::catalog::CatalogBuilder;
    use idprov_connector::operation::{AttributeSet, Uid};
    use idprov_core::{MappingItem, PlainSchema, SchemaType};

    fn mapper() -> (AttributeMapper, Provision) {
        let catalog = CatalogBuilder::new()
            .with_schema(PlainSchema::new("email", SchemaType::String))
            .with_schema(PlainSchema::new("surname", SchemaType::String))
            .build_default()
            .unwrap();
        let provision = Provision::new("USER", "__ACCOUNT__")
            .with_item(MappingItem::conn_object_key("username", "uid"))
            .with_item(MappingItem::new("email", "mail"))
            .with_item(MappingItem::new("surname", "sn"));
        (AttributeMapper::new(Arc::new(catalog)), provision)
    }

    #[test]
    fn test_new_entity_takes_name_from_uid() {
        let (mapper, provision) = mapper();
        let change = SyncChange::upsert(
            Uid::from_value("rossini"),
            "__ACCOUNT__",
            AttributeSet::new().with("mail", "rossini@example.org"),
        );
        let any = PullExecutor::new()
            .with_destination_realm("/even")
            .new_entity(&mapper, &provision, &change)
            .unwrap();
        assert_eq!(any.name.as_deref(), Some("rossini"));
        assert_eq!(any.realm, "/even");
        assert_eq!(any.attr("email"), Some(&["rossini@example.org".to_string()][..]));
    }

    #[test]
    fn test_pulled_patch_only_carries_changes() {
        let (mapper, provision) = mapper();
        let current = Any::user("rossini", "/")
            .with_attr("email", ["rossini@example.org"])
            .with_attr("surname", ["Rossini"]);
        let change = SyncChange::upsert(
            Uid::from_value("rossini"),
            "__ACCOUNT__",
            AttributeSet::new()
                .with("uid", "rossini")
                .with("mail", "gioacchino@example.org")
                .with("sn", "Rossini"),
        );

        let patch = pulled_patch(&mapper, &provision, &change, &current);
        assert!(patch.name.is_none());
        assert_eq!(patch.plain_attrs.len(), 1);
        assert_eq!(patch.plain_attrs[0].schema, "email");

        let unchanged = SyncChange::upsert(
            Uid::from_value("rossini"),
            "__ACCOUNT__",
            AttributeSet::new()
                .with("mail", "rossini@example.org")
                .with("sn", "Rossini"),
        );
        assert!(pulled_patch(&mapper, &provision, &unchanged, &current).is_empty());
    }
}
