//! Outbound synchronization to a resource.
//!
//! Each entity is looked up on the resource by its connector key. What
//! happens next depends on whether the remote object exists: the matching
//! rule applies when it does, the unmatching rule when it does not.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use idprov_connector::operation::Uid;
use idprov_connector::traits::FullConnector;
use idprov_core::AnyKey;

use crate::domain::DomainContext;
use crate::error::{ProvisioningError, Result};
use crate::manager::{Caller, PropagationOptions, ProvisioningManager};
use crate::propagation::executor::bounded;
use crate::propagation::PropagationStatus;

/// Action for an entity whose remote object exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchingRule {
    #[default]
    Update,
    Ignore,
    /// Delete the remote object, keep the assignment.
    Deprovision,
    /// Delete the remote object and drop the assignment.
    Unassign,
    /// Drop the assignment only.
    Unlink,
    /// Assign the resource without touching the remote object.
    Link,
}

/// Action for an entity with no remote object.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnmatchingRule {
    /// Create the remote object without assigning the resource.
    #[default]
    Provision,
    /// Assign the resource and create the remote object.
    Assign,
    Ignore,
    /// Drop a stale assignment.
    Unlink,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushRules {
    pub matching: MatchingRule,
    pub unmatching: UnmatchingRule,
}

impl PushRules {
    #[must_use]
    pub fn new(matching: MatchingRule, unmatching: UnmatchingRule) -> Self {
        Self {
            matching,
            unmatching,
        }
    }
}

/// Outcome of one push run.
#[derive(Debug, Clone, Default)]
pub struct PushReport {
    /// Entities whose remote object existed.
    pub matched: Vec<AnyKey>,
    /// Entities without a remote object.
    pub unmatched: Vec<AnyKey>,
    /// Entities left alone by the rules or with no provision on the resource.
    pub ignored: Vec<AnyKey>,
    /// Per-entity failures as `key: message`.
    pub failures: Vec<String>,
    /// Statuses of the propagation tasks the rules produced.
    pub statuses: Vec<PropagationStatus>,
}

/// Pushes entities to one resource.
#[derive(Debug, Clone, Default)]
pub struct PushExecutor {
    manager: ProvisioningManager,
}

impl PushExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[instrument(skip(self, ctx, keys), fields(entities = keys.len()))]
    pub async fn push(
        &self,
        ctx: &DomainContext,
        resource: &str,
        keys: &[AnyKey],
        rules: PushRules,
    ) -> Result<PushReport> {
        if ctx.catalog().resource(resource).is_none() {
            return Err(ProvisioningError::not_found("Resource", resource));
        }
        let connector = ctx
            .connectors()
            .get_connector(resource)
            .await
            .ok_or_else(|| ProvisioningError::not_found("Connector", resource))?;
        let timeout = ctx.executor().timeout_for(resource);
        let resources = BTreeSet::from([resource.to_string()]);
        let options = PropagationOptions::new();

        let mut report = PushReport::default();
        for key in keys {
            let outcome = self
                .push_one(
                    ctx,
                    connector.as_ref(),
                    timeout,
                    resource,
                    &resources,
                    *key,
                    rules,
                    &options,
                    &mut report,
                )
                .await;
            if let Err(e) = outcome {
                warn!(any_key = %key, error = %e, "Push failed");
                report.failures.push(format!("{key}: {e}"));
            }
        }

        info!(
            resource = %resource,
            matched = report.matched.len(),
            unmatched = report.unmatched.len(),
            ignored = report.ignored.len(),
            failures = report.failures.len(),
            "Push completed"
        );
        Ok(report)
    }

    #[allow(clippy::too_many_arguments)]
    async fn push_one(
        &self,
        ctx: &DomainContext,
        connector: &dyn FullConnector,
        timeout: Duration,
        resource: &str,
        resources: &BTreeSet<String>,
        key: AnyKey,
        rules: PushRules,
        options: &PropagationOptions,
        report: &mut PushReport,
    ) -> Result<()> {
        let any = ctx.store().get(key).await?;
        let Some(provision) = ctx
            .catalog()
            .resource(resource)
            .and_then(|r| r.provision(&any.any_type))
        else {
            debug!(any_key = %key, any_type = %any.any_type, "No provision for entity, skipped");
            report.ignored.push(key);
            return Ok(());
        };
        let caller = Caller::system(ctx.config().admin_user.clone(), &any.any_type);

        let conn_object_key = ctx.mapper().get_conn_object_key_value(&any, provision);
        let remote = match (&conn_object_key, provision.conn_object_key_item()) {
            (Some(value), Some(item)) => {
                let uid = Uid::new(item.ext_attr_name.clone(), value.clone());
                bounded(timeout, connector.get(&provision.object_class, &uid)).await?
            }
            _ => None,
        };

        let manager = &self.manager;
        if remote.is_some() {
            report.matched.push(key);
            match rules.matching {
                MatchingRule::Ignore => report.ignored.push(key),
                MatchingRule::Update => {
                    let result = manager.provision(ctx, &caller, key, resources, None, options).await?;
                    report.statuses.extend(result.statuses);
                }
                MatchingRule::Deprovision => {
                    let result = manager.deprovision(ctx, &caller, key, resources, options).await?;
                    report.statuses.extend(result.statuses);
                }
                MatchingRule::Unassign => {
                    let result = manager.deprovision(ctx, &caller, key, resources, options).await?;
                    report.statuses.extend(result.statuses);
                    manager.unlink(ctx, &caller, key, resources).await?;
                }
                MatchingRule::Unlink => {
                    manager.unlink(ctx, &caller, key, resources).await?;
                }
                MatchingRule::Link => {
                    manager.link(ctx, &caller, key, resources).await?;
                }
            }
        } else {
            report.unmatched.push(key);
            match rules.unmatching {
                UnmatchingRule::Ignore => report.ignored.push(key),
                UnmatchingRule::Provision => {
                    let result = manager.provision(ctx, &caller, key, resources, None, options).await?;
                    report.statuses.extend(result.statuses);
                }
                UnmatchingRule::Assign => {
                    manager.link(ctx, &caller, key, resources).await?;
                    let result = manager.provision(ctx, &caller, key, resources, None, options).await?;
                    report.statuses.extend(result.statuses);
                }
                UnmatchingRule::Unlink => {
                    manager.unlink(ctx, &caller, key, resources).await?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_rules() {
        let rules = PushRules::default();
        assert_eq!(rules.matching, MatchingRule::Update);
        assert_eq!(rules.unmatching, UnmatchingRule::Provision);
    }

    #[test]
    fn test_rules_deserialize() {
        let rules: PushRules =
            serde_json::from_str(r#"{"matching":"UNASSIGN","unmatching":"IGNORE"}"#).unwrap();
        assert_eq!(rules, PushRules::new(MatchingRule::Unassign, UnmatchingRule::Ignore));
    }
}
