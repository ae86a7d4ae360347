//! Immutable configuration of a domain.
//!
//! The catalog is built once: resources are validated, rule implementations
//! are resolved by name and dynamic membership conditions are parsed. It is
//! then shared read-only by every component.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use idprov_core::{
    AccountPolicy, ConflictResolutionAction, CoreError, ExternalResource, PasswordPolicy,
    PlainSchema, Policy, PolicyKey, Realm, RuleConf,
};
use idprov_expression::parse_expression;

use crate::correlation::{CorrelationRule, CorrelationRuleRegistry};
use crate::dynmember::{DynMembership, MembershipOwner};
use crate::error::{ProvisioningError, Result};
use crate::policy::rules::{AccountRule, PasswordRule, RuleError, RuleRegistry};

/// Password policy with its rules resolved.
#[derive(Debug, Clone)]
pub struct CompiledPasswordPolicy {
    pub policy: PasswordPolicy,
    pub rules: Vec<Arc<dyn PasswordRule>>,
}

/// Account policy with its rules resolved.
#[derive(Debug, Clone)]
pub struct CompiledAccountPolicy {
    pub policy: AccountPolicy,
    pub rules: Vec<Arc<dyn AccountRule>>,
}

/// Pull or push policy with its correlation rules resolved per any type.
#[derive(Debug, Clone)]
pub struct CompiledCorrelationPolicy {
    pub key: PolicyKey,
    pub name: String,
    pub conflict_resolution_action: ConflictResolutionAction,
    pub rules: BTreeMap<String, Arc<dyn CorrelationRule>>,
}

impl CompiledCorrelationPolicy {
    #[must_use]
    pub fn rule(&self, any_type: &str) -> Option<&Arc<dyn CorrelationRule>> {
        self.rules.get(any_type)
    }
}

#[derive(Debug, Default)]
pub struct ConfigurationCatalog {
    resources: BTreeMap<String, ExternalResource>,
    realms: BTreeMap<String, Realm>,
    schemas: BTreeMap<String, PlainSchema>,
    aux_classes: BTreeSet<String>,
    password_policies: HashMap<PolicyKey, CompiledPasswordPolicy>,
    account_policies: HashMap<PolicyKey, CompiledAccountPolicy>,
    pull_policies: HashMap<PolicyKey, CompiledCorrelationPolicy>,
    push_policies: HashMap<PolicyKey, CompiledCorrelationPolicy>,
    dyn_memberships: Vec<DynMembership>,
}

impl ConfigurationCatalog {
    #[must_use]
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::new()
    }

    #[must_use]
    pub fn resource(&self, key: &str) -> Option<&ExternalResource> {
        self.resources.get(key)
    }

    pub fn resources(&self) -> impl Iterator<Item = &ExternalResource> {
        self.resources.values()
    }

    #[must_use]
    pub fn realm(&self, full_path: &str) -> Option<&Realm> {
        self.realms.get(full_path)
    }

    #[must_use]
    pub fn schema(&self, key: &str) -> Option<&PlainSchema> {
        self.schemas.get(key)
    }

    pub fn schemas(&self) -> impl Iterator<Item = &PlainSchema> {
        self.schemas.values()
    }

    #[must_use]
    pub fn has_aux_class(&self, class: &str) -> bool {
        self.aux_classes.contains(class)
    }

    #[must_use]
    pub fn password_policy(&self, key: PolicyKey) -> Option<&CompiledPasswordPolicy> {
        self.password_policies.get(&key)
    }

    #[must_use]
    pub fn account_policy(&self, key: PolicyKey) -> Option<&CompiledAccountPolicy> {
        self.account_policies.get(&key)
    }

    #[must_use]
    pub fn pull_policy(&self, key: PolicyKey) -> Option<&CompiledCorrelationPolicy> {
        self.pull_policies.get(&key)
    }

    #[must_use]
    pub fn push_policy(&self, key: PolicyKey) -> Option<&CompiledCorrelationPolicy> {
        self.push_policies.get(&key)
    }

    /// Dynamic memberships defined for the any type.
    pub fn dyn_memberships_for<'a>(&'a self, any_type: &'a str) -> impl Iterator<Item = &'a DynMembership> {
        self.dyn_memberships
            .iter()
            .filter(move |m| m.any_type == any_type)
    }

    #[must_use]
    pub fn dyn_membership(&self, owner: &MembershipOwner) -> Option<&DynMembership> {
        self.dyn_memberships.iter().find(|m| &m.owner == owner)
    }
}

/// Collects configuration and resolves it into a [`ConfigurationCatalog`].
#[derive(Debug, Default)]
#[must_use]
pub struct CatalogBuilder {
    resources: Vec<ExternalResource>,
    realms: Vec<Realm>,
    schemas: Vec<PlainSchema>,
    aux_classes: BTreeSet<String>,
    policies: Vec<Policy>,
    dyn_memberships: Vec<(MembershipOwner, String, String)>,
}

impl CatalogBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, resource: ExternalResource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn with_realm(mut self, realm: Realm) -> Self {
        self.realms.push(realm);
        self
    }

    pub fn with_schema(mut self, schema: PlainSchema) -> Self {
        self.schemas.push(schema);
        self
    }

    pub fn with_aux_class(mut self, class: impl Into<String>) -> Self {
        self.aux_classes.insert(class.into());
        self
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policies.push(policy);
        self
    }

    /// Stored search condition making entities of `any_type` members of
    /// `owner`.
    pub fn with_dyn_membership(
        mut self,
        owner: MembershipOwner,
        any_type: impl Into<String>,
        condition: impl Into<String>,
    ) -> Self {
        self.dyn_memberships
            .push((owner, any_type.into(), condition.into()));
        self
    }

    /// Builds with the built-in rule implementations only.
    pub fn build_default(self) -> Result<ConfigurationCatalog> {
        self.build(
            &RuleRegistry::with_defaults(),
            &CorrelationRuleRegistry::with_defaults(),
        )
    }

    /// Validates the configuration and resolves every rule reference.
    ///
    /// Unknown password or account rules are ignored; an unknown correlation
    /// rule fails the build.
    pub fn build(
        self,
        rules: &RuleRegistry,
        correlation_rules: &CorrelationRuleRegistry,
    ) -> Result<ConfigurationCatalog> {
        let mut catalog = ConfigurationCatalog {
            aux_classes: self.aux_classes,
            ..ConfigurationCatalog::default()
        };

        for resource in self.resources {
            resource.validate()?;
            catalog.resources.insert(resource.key.clone(), resource);
        }
        for realm in self.realms {
            catalog.realms.insert(realm.full_path.clone(), realm);
        }
        for schema in self.schemas {
            catalog.schemas.insert(schema.key.clone(), schema);
        }

        for policy in self.policies {
            match policy {
                Policy::Password(policy) => {
                    let compiled = CompiledPasswordPolicy {
                        rules: resolve_rules(&policy.rules, |r| {
                            rules.build_password(&r.implementation, &r.conf)
                        }),
                        policy,
                    };
                    catalog.password_policies.insert(compiled.policy.key, compiled);
                }
                Policy::Account(policy) => {
                    let compiled = CompiledAccountPolicy {
                        rules: resolve_rules(&policy.rules, |r| {
                            rules.build_account(&r.implementation, &r.conf)
                        }),
                        policy,
                    };
                    catalog.account_policies.insert(compiled.policy.key, compiled);
                }
                Policy::Pull(policy) => {
                    let compiled = compile_correlation(
                        policy.key,
                        policy.name,
                        policy.conflict_resolution_action,
                        &policy.correlation_rules,
                        correlation_rules,
                    )?;
                    catalog.pull_policies.insert(compiled.key, compiled);
                }
                Policy::Push(policy) => {
                    let compiled = compile_correlation(
                        policy.key,
                        policy.name,
                        policy.conflict_resolution_action,
                        &policy.correlation_rules,
                        correlation_rules,
                    )?;
                    catalog.push_policies.insert(compiled.key, compiled);
                }
            }
        }

        for (owner, any_type, condition) in self.dyn_memberships {
            let condition = parse_expression(&condition)?;
            catalog.dyn_memberships.push(DynMembership {
                owner,
                any_type,
                condition,
            });
        }

        info!(
            resources = catalog.resources.len(),
            realms = catalog.realms.len(),
            schemas = catalog.schemas.len(),
            dyn_memberships = catalog.dyn_memberships.len(),
            "Configuration catalog built"
        );
        Ok(catalog)
    }
}

fn resolve_rules<R: ?Sized>(
    confs: &[RuleConf],
    build: impl Fn(&RuleConf) -> Option<std::result::Result<Arc<R>, RuleError>>,
) -> Vec<Arc<R>> {
    confs
        .iter()
        .filter_map(|conf| match build(conf) {
            Some(Ok(rule)) => Some(rule),
            Some(Err(e)) => {
                debug!(rule = %conf.implementation, error = %e, "Invalid rule configuration, ignoring");
                None
            }
            None => {
                debug!(rule = %conf.implementation, "Unknown rule implementation, ignoring");
                None
            }
        })
        .collect()
}

fn compile_correlation(
    key: PolicyKey,
    name: String,
    conflict_resolution_action: ConflictResolutionAction,
    confs: &BTreeMap<String, RuleConf>,
    registry: &CorrelationRuleRegistry,
) -> Result<CompiledCorrelationPolicy> {
    let mut rules = BTreeMap::new();
    for (any_type, conf) in confs {
        let rule = registry
            .build(&conf.implementation, &conf.conf)
            .ok_or_else(|| {
                ProvisioningError::from(CoreError::not_found(
                    "CorrelationRule",
                    conf.implementation.clone(),
                ))
            })??;
        rules.insert(any_type.clone(), rule);
    }
    Ok(CompiledCorrelationPolicy {
        key,
        name,
        conflict_resolution_action,
        rules,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use idprov_core::{MappingItem, Provision, PullPolicy};
    use serde_json::json;

    #[test]
    fn test_duplicate_connector_key_fails_build() {
        let resource = ExternalResource::new("resource-ldap", "connector-ldap").with_provision(
            Provision::new("USER", "__ACCOUNT__")
                .with_item(MappingItem::conn_object_key("username", "uid"))
                .with_item(MappingItem::conn_object_key("key", "id")),
        );
        let err = CatalogBuilder::new()
            .with_resource(resource)
            .build_default()
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIGURATION");
    }

    #[test]
    fn test_unknown_password_rule_is_ignored() {
        let policy = PasswordPolicy {
            key: PolicyKey::new(),
            name: "lenient".to_string(),
            allow_null_password: true,
            history_length: 0,
            rules: vec![
                RuleConf::new("NoSuchRule", json!({})),
                RuleConf::new("DefaultPasswordRule", json!({"minLength": 8})),
            ],
        };
        let key = policy.key;
        let catalog = CatalogBuilder::new()
            .with_policy(Policy::Password(policy))
            .build_default()
            .unwrap();
        assert_eq!(catalog.password_policy(key).unwrap().rules.len(), 1);
    }

    #[test]
    fn test_unknown_correlation_rule_fails_build() {
        let policy = PullPolicy {
            key: PolicyKey::new(),
            name: "pull".to_string(),
            conflict_resolution_action: ConflictResolutionAction::Ignore,
            correlation_rules: BTreeMap::from([(
                "USER".to_string(),
                RuleConf::new("NoSuchCorrelation", json!({})),
            )]),
        };
        let err = CatalogBuilder::new()
            .with_policy(Policy::Pull(policy))
            .build_default()
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_dyn_membership_condition_is_parsed() {
        let owner = MembershipOwner::Realm("/even".to_string());
        let catalog = CatalogBuilder::new()
            .with_dyn_membership(owner.clone(), "USER", "ctype = 'employee'")
            .build_default()
            .unwrap();
        assert_eq!(catalog.dyn_memberships_for("USER").count(), 1);
        assert_eq!(catalog.dyn_memberships_for("GROUP").count(), 0);
        assert!(catalog.dyn_membership(&owner).is_some());

        assert!(CatalogBuilder::new()
            .with_dyn_membership(owner, "USER", "ctype = ")
            .build_default()
            .is_err());
    }
}
