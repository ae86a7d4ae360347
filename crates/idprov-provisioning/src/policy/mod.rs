//! Password and account policy enforcement.
//!
//! Policies apply additively: every resource the user is assigned to
//! (directly or through groups) contributes its policy, followed by the
//! policies of the user's realm and of all its ancestors, root first.

pub mod history;
pub mod rules;

use std::collections::BTreeSet;
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tracing::{debug, instrument, warn};

use idprov_core::{realm, Any, ExternalResource, PolicyKey, Realm};

use crate::catalog::{CompiledAccountPolicy, CompiledPasswordPolicy, ConfigurationCatalog};
use crate::error::{PolicyViolation, ProvisioningError, Result};
use crate::store::{effective_resources, AnyStore};

pub use history::PasswordHasher;
pub use rules::{
    AccountRule, DefaultAccountRule, DefaultAccountRuleConf, DefaultPasswordRule,
    DefaultPasswordRuleConf, PasswordRule, RuleError, RuleRegistry,
};

/// Characters allowed in usernames.
static USERNAME_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[\w\-@.+ ]+$").expect("USERNAME_PATTERN is a valid regex pattern")
});

/// Errors surfaced unchanged by the enforcer; anything else is reported as
/// an invalid password or username.
fn passes_through(e: &ProvisioningError) -> bool {
    matches!(
        e,
        ProvisioningError::Policy(_)
            | ProvisioningError::Persistence { .. }
            | ProvisioningError::Validation(_)
            | ProvisioningError::InvalidEntity { .. }
    )
}

/// Result of a successful enforcement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PolicyOutcome {
    /// The user exceeded the failed-login threshold of some account policy.
    pub suspend: bool,
    /// Some applicable account policy asks for suspension to be propagated.
    pub propagate_suspension: bool,
}

/// Applies password and account policies to users before they are stored.
#[derive(Clone)]
pub struct PolicyEnforcer {
    catalog: Arc<ConfigurationCatalog>,
    store: Arc<dyn AnyStore>,
    hasher: PasswordHasher,
    admin_user: String,
    anonymous_user: String,
}

impl PolicyEnforcer {
    pub fn new(
        catalog: Arc<ConfigurationCatalog>,
        store: Arc<dyn AnyStore>,
        hasher: PasswordHasher,
        admin_user: impl Into<String>,
        anonymous_user: impl Into<String>,
    ) -> Self {
        Self {
            catalog,
            store,
            hasher,
            admin_user: admin_user.into(),
            anonymous_user: anonymous_user.into(),
        }
    }

    /// Checks the user against its policy chains.
    ///
    /// On success a new clear-text password is hashed into the credentials
    /// and recorded in the history. The clear-text password is removed from
    /// the entity whatever the outcome. Groups and any objects pass through
    /// untouched.
    #[instrument(skip(self, any), fields(any_key = %any.key))]
    pub async fn enforce_policies(&self, any: &mut Any) -> Result<PolicyOutcome> {
        let clear_password = any.take_clear_password();
        if !any.is_user() {
            return Ok(PolicyOutcome::default());
        }

        let resources = effective_resources(self.store.as_ref(), any).await?;

        self.enforce_password(any, clear_password, &resources)
            .map_err(|e| {
                if passes_through(&e) {
                    e
                } else {
                    ProvisioningError::invalid_password(e.to_string())
                }
            })?;

        self.enforce_account(any, &resources).map_err(|e| {
            if passes_through(&e) {
                e
            } else {
                ProvisioningError::invalid_username(e.to_string())
            }
        })
    }

    /// Whether the user's failed logins call for suspension, without running
    /// any rule.
    pub async fn suspension_outcome(&self, any: &Any) -> Result<PolicyOutcome> {
        let mut outcome = PolicyOutcome::default();
        let Some(credentials) = any.credentials.as_ref().filter(|_| any.is_user()) else {
            return Ok(outcome);
        };

        let resources = effective_resources(self.store.as_ref(), any).await?;
        for compiled in self.account_policies(any, &resources) {
            let policy = &compiled.policy;
            outcome.suspend |= policy.max_authentication_attempts > 0
                && credentials.failed_logins > policy.max_authentication_attempts
                && !credentials.suspended;
            outcome.propagate_suspension |= policy.propagate_suspension;
        }
        Ok(outcome)
    }

    /// Effective password policies, resources first then realms root first.
    #[must_use]
    pub fn password_policies(&self, any: &Any, resources: &BTreeSet<String>) -> Vec<&CompiledPasswordPolicy> {
        let keys = self.policy_chain(
            any,
            resources,
            |r| r.password_policy,
            |r| r.password_policy,
        );
        keys.into_iter()
            .filter_map(|key| {
                let policy = self.catalog.password_policy(key);
                if policy.is_none() {
                    debug!(policy = %key, "Password policy not found, ignoring");
                }
                policy
            })
            .collect()
    }

    #[must_use]
    pub fn account_policies(&self, any: &Any, resources: &BTreeSet<String>) -> Vec<&CompiledAccountPolicy> {
        let keys = self.policy_chain(any, resources, |r| r.account_policy, |r| r.account_policy);
        keys.into_iter()
            .filter_map(|key| {
                let policy = self.catalog.account_policy(key);
                if policy.is_none() {
                    debug!(policy = %key, "Account policy not found, ignoring");
                }
                policy
            })
            .collect()
    }

    fn policy_chain(
        &self,
        any: &Any,
        resources: &BTreeSet<String>,
        from_resource: impl Fn(&ExternalResource) -> Option<PolicyKey>,
        from_realm: impl Fn(&Realm) -> Option<PolicyKey>,
    ) -> Vec<PolicyKey> {
        let mut keys = Vec::new();
        let mut push = |key: PolicyKey| {
            if !keys.contains(&key) {
                keys.push(key);
            }
        };

        for resource in resources {
            match self.catalog.resource(resource) {
                Some(r) => {
                    if let Some(key) = from_resource(r) {
                        push(key);
                    }
                }
                None => debug!(resource = %resource, "Unknown resource in policy chain"),
            }
        }
        for path in realm::ancestor_paths(&any.realm) {
            if let Some(key) = self.catalog.realm(&path).and_then(&from_realm) {
                push(key);
            }
        }
        keys
    }

    fn enforce_password(
        &self,
        any: &mut Any,
        clear_password: Option<String>,
        resources: &BTreeSet<String>,
    ) -> Result<()> {
        let policies = self.password_policies(any, resources);
        let has_hash = any
            .credentials
            .as_ref()
            .is_some_and(|c| c.password_hash.is_some());
        let history = any
            .credentials
            .as_ref()
            .map(|c| c.password_history.clone())
            .unwrap_or_default();

        let mut max_history = 0;
        for compiled in &policies {
            let policy = &compiled.policy;
            if clear_password.is_none() && !has_hash && !policy.allow_null_password {
                return Err(PolicyViolation::Password("Password mandatory".to_string()).into());
            }

            for rule in &compiled.rules {
                rule.enforce(any, clear_password.as_deref())
                    .map_err(|e| match e {
                        RuleError::Violation(message) => PolicyViolation::Password(message).into(),
                        RuleError::Internal(message) => ProvisioningError::invalid_password(message),
                    })?;
            }

            if let Some(password) = clear_password.as_deref() {
                let recent = &history[history.len().saturating_sub(policy.history_length)..];
                for hash in recent {
                    if self.hasher.verify(password, hash)? {
                        return Err(PolicyViolation::Password(
                            "Password value was used in the past: not allowed".to_string(),
                        )
                        .into());
                    }
                }
            }
            max_history = max_history.max(policy.history_length);
        }

        let credentials = any.credentials.get_or_insert_with(Default::default);
        if let Some(password) = clear_password {
            let hash = self.hasher.hash(&password)?;
            if max_history > 0 && !credentials.password_history.contains(&hash) {
                credentials.password_history.push(hash.clone());
            }
            credentials.password_hash = Some(hash);
        }

        let len = credentials.password_history.len();
        if len > max_history {
            credentials.password_history.drain(..len - max_history);
        }
        Ok(())
    }

    fn enforce_account(&self, any: &Any, resources: &BTreeSet<String>) -> Result<PolicyOutcome> {
        let Some(username) = any.name.as_deref() else {
            return Err(ProvisioningError::invalid_username("Null username"));
        };
        if username == self.admin_user || username == self.anonymous_user {
            return Err(PolicyViolation::Account(format!("Not allowed: {username}")).into());
        }
        if !USERNAME_PATTERN.is_match(username) {
            return Err(PolicyViolation::Account("Character(s) not allowed".to_string()).into());
        }

        let (failed_logins, suspended) = any
            .credentials
            .as_ref()
            .map_or((0, false), |c| (c.failed_logins, c.suspended));

        let mut outcome = PolicyOutcome::default();
        for compiled in self.account_policies(any, resources) {
            for rule in &compiled.rules {
                rule.enforce(any, username).map_err(|e| match e {
                    RuleError::Violation(message) => PolicyViolation::Account(message).into(),
                    RuleError::Internal(message) => ProvisioningError::invalid_username(message),
                })?;
            }

            let policy = &compiled.policy;
            outcome.suspend |= policy.max_authentication_attempts > 0
                && failed_logins > policy.max_authentication_attempts
                && !suspended;
            outcome.propagate_suspension |= policy.propagate_suspension;
        }

        if outcome.suspend {
            warn!(username = %username, failed_logins, "Failed login threshold exceeded");
        }
        Ok(outcome)
    }
}
