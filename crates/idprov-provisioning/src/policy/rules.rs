//! Pluggable password and account rules.
//!
//! Rules are resolved by implementation name through a [`RuleRegistry`] once,
//! when the configuration catalog is built.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use idprov_core::Any;

/// Outcome of a failing rule.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// The entity breaks the rule.
    #[error("{0}")]
    Violation(String),

    /// The rule could not run.
    #[error("rule failure: {0}")]
    Internal(String),
}

impl RuleError {
    pub fn violation(message: impl Into<String>) -> Self {
        Self::Violation(message.into())
    }
}

pub type RuleResult = Result<(), RuleError>;

/// A check on the clear-text password of a user.
pub trait PasswordRule: Send + Sync + fmt::Debug {
    /// `password` is the new clear-text password, if one is being set.
    fn enforce(&self, any: &Any, password: Option<&str>) -> RuleResult;
}

/// A check on the username of a user.
pub trait AccountRule: Send + Sync + fmt::Debug {
    fn enforce(&self, any: &Any, username: &str) -> RuleResult;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefaultPasswordRuleConf {
    pub min_length: usize,
    /// Zero means unbounded.
    pub max_length: usize,
    pub digit_required: bool,
    pub uppercase_required: bool,
    pub lowercase_required: bool,
    pub non_alphanumeric_required: bool,
    pub words_not_permitted: Vec<String>,
    /// When false the password may not contain the username.
    pub username_allowed: bool,
}

#[derive(Debug, Clone)]
pub struct DefaultPasswordRule {
    conf: DefaultPasswordRuleConf,
}

impl DefaultPasswordRule {
    #[must_use]
    pub fn new(conf: DefaultPasswordRuleConf) -> Self {
        Self { conf }
    }
}

impl PasswordRule for DefaultPasswordRule {
    fn enforce(&self, any: &Any, password: Option<&str>) -> RuleResult {
        // Nothing to check when the password is not being changed.
        let Some(password) = password else {
            return Ok(());
        };
        let conf = &self.conf;
        let length = password.chars().count();

        if length < conf.min_length {
            return Err(RuleError::violation("Password too short"));
        }
        if conf.max_length > 0 && length > conf.max_length {
            return Err(RuleError::violation("Password too long"));
        }
        if conf.digit_required && !password.chars().any(|c| c.is_ascii_digit()) {
            return Err(RuleError::violation("Password must contain a digit"));
        }
        if conf.uppercase_required && !password.chars().any(char::is_uppercase) {
            return Err(RuleError::violation("Password must contain an uppercase character"));
        }
        if conf.lowercase_required && !password.chars().any(char::is_lowercase) {
            return Err(RuleError::violation("Password must contain a lowercase character"));
        }
        if conf.non_alphanumeric_required && password.chars().all(char::is_alphanumeric) {
            return Err(RuleError::violation(
                "Password must contain a non-alphanumeric character",
            ));
        }

        let lowered = password.to_lowercase();
        if conf
            .words_not_permitted
            .iter()
            .any(|word| lowered.contains(&word.to_lowercase()))
        {
            return Err(RuleError::violation("Password contains a word not permitted"));
        }
        if !conf.username_allowed {
            if let Some(username) = any.name.as_deref().filter(|u| !u.is_empty()) {
                if lowered.contains(&username.to_lowercase()) {
                    return Err(RuleError::violation("Password contains the username"));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DefaultAccountRuleConf {
    pub min_length: usize,
    /// Zero means unbounded.
    pub max_length: usize,
    pub all_upper_case: bool,
    pub all_lower_case: bool,
    pub pattern: Option<String>,
    pub words_not_permitted: Vec<String>,
    pub prefixes_not_permitted: Vec<String>,
    pub suffixes_not_permitted: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct DefaultAccountRule {
    conf: DefaultAccountRuleConf,
    pattern: Option<Regex>,
}

impl DefaultAccountRule {
    /// Builds the rule, compiling its pattern.
    pub fn new(conf: DefaultAccountRuleConf) -> Result<Self, RuleError> {
        let pattern = match &conf.pattern {
            Some(p) => Some(
                Regex::new(&format!("^(?:{p})$"))
                    .map_err(|e| RuleError::Internal(format!("invalid pattern '{p}': {e}")))?,
            ),
            None => None,
        };
        Ok(Self { conf, pattern })
    }
}

impl AccountRule for DefaultAccountRule {
    fn enforce(&self, _any: &Any, username: &str) -> RuleResult {
        let conf = &self.conf;
        let length = username.chars().count();

        if length < conf.min_length {
            return Err(RuleError::violation("Username too short"));
        }
        if conf.max_length > 0 && length > conf.max_length {
            return Err(RuleError::violation("Username too long"));
        }
        if conf.all_upper_case && username != username.to_uppercase() {
            return Err(RuleError::violation("Username must be all upper case"));
        }
        if conf.all_lower_case && username != username.to_lowercase() {
            return Err(RuleError::violation("Username must be all lower case"));
        }
        if let Some(pattern) = &self.pattern {
            if !pattern.is_match(username) {
                return Err(RuleError::violation("Username does not match pattern"));
            }
        }
        if conf.words_not_permitted.iter().any(|w| username.contains(w.as_str())) {
            return Err(RuleError::violation("Username contains a word not permitted"));
        }
        if conf
            .prefixes_not_permitted
            .iter()
            .any(|p| username.starts_with(p.as_str()))
        {
            return Err(RuleError::violation("Username starts with a prefix not permitted"));
        }
        if conf
            .suffixes_not_permitted
            .iter()
            .any(|s| username.ends_with(s.as_str()))
        {
            return Err(RuleError::violation("Username ends with a suffix not permitted"));
        }
        Ok(())
    }
}

pub type PasswordRuleFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn PasswordRule>, RuleError> + Send + Sync>;

pub type AccountRuleFactory =
    Arc<dyn Fn(&serde_json::Value) -> Result<Arc<dyn AccountRule>, RuleError> + Send + Sync>;

/// Name-to-factory registry of rule implementations.
#[derive(Clone, Default)]
pub struct RuleRegistry {
    password: HashMap<String, PasswordRuleFactory>,
    account: HashMap<String, AccountRuleFactory>,
}

impl fmt::Debug for RuleRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut password: Vec<_> = self.password.keys().collect();
        let mut account: Vec<_> = self.account.keys().collect();
        password.sort();
        account.sort();
        f.debug_struct("RuleRegistry")
            .field("password", &password)
            .field("account", &account)
            .finish()
    }
}

pub const DEFAULT_PASSWORD_RULE: &str = "DefaultPasswordRule";
pub const DEFAULT_ACCOUNT_RULE: &str = "DefaultAccountRule";

impl RuleRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in rules.
    #[must_use]
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register_password(DEFAULT_PASSWORD_RULE, |conf| {
            let conf: DefaultPasswordRuleConf = serde_json::from_value(conf.clone())
                .map_err(|e| RuleError::Internal(e.to_string()))?;
            Ok(Arc::new(DefaultPasswordRule::new(conf)) as Arc<dyn PasswordRule>)
        });
        registry.register_account(DEFAULT_ACCOUNT_RULE, |conf| {
            let conf: DefaultAccountRuleConf = serde_json::from_value(conf.clone())
                .map_err(|e| RuleError::Internal(e.to_string()))?;
            Ok(Arc::new(DefaultAccountRule::new(conf)?) as Arc<dyn AccountRule>)
        });
        registry
    }

    pub fn register_password<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn PasswordRule>, RuleError> + Send + Sync + 'static,
    {
        self.password.insert(name.into(), Arc::new(factory));
    }

    pub fn register_account<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(&serde_json::Value) -> Result<Arc<dyn AccountRule>, RuleError> + Send + Sync + 'static,
    {
        self.account.insert(name.into(), Arc::new(factory));
    }

    /// `None` when no implementation is registered under the name.
    #[must_use]
    pub fn build_password(
        &self,
        name: &str,
        conf: &serde_json::Value,
    ) -> Option<Result<Arc<dyn PasswordRule>, RuleError>> {
        self.password.get(name).map(|factory| factory(conf))
    }

    #[must_use]
    pub fn build_account(
        &self,
        name: &str,
        conf: &serde_json::Value,
    ) -> Option<Result<Arc<dyn AccountRule>, RuleError>> {
        self.account.get(name).map(|factory| factory(conf))
    }
}
