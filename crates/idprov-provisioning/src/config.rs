//! Engine configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors while loading configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Tunables of a provisioning domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningConfig {
    /// Reserved administrator username; never accepted for an entity.
    pub admin_user: String,
    /// Reserved anonymous username; never accepted for an entity.
    pub anonymous_user: String,
    /// Default bound on a single connector call.
    pub propagation_timeout_secs: u64,
    /// Size of the fire-and-forget propagation pool.
    pub async_workers: usize,
    /// Changes requested per sync call during pull.
    pub pull_batch_size: u32,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            admin_user: "admin".to_string(),
            anonymous_user: "anonymous".to_string(),
            propagation_timeout_secs: 30,
            async_workers: 4,
            pull_batch_size: 100,
        }
    }
}

impl ProvisioningConfig {
    /// Loads configuration from environment variables.
    ///
    /// All variables are optional and fall back to the defaults:
    /// - `IDPROV_ADMIN_USER` (default: "admin")
    /// - `IDPROV_ANONYMOUS_USER` (default: "anonymous")
    /// - `IDPROV_PROPAGATION_TIMEOUT_SECS` (default: 30)
    /// - `IDPROV_ASYNC_WORKERS` (default: 4)
    /// - `IDPROV_PULL_BATCH_SIZE` (default: 100)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            admin_user: env::var("IDPROV_ADMIN_USER").unwrap_or(defaults.admin_user),
            anonymous_user: env::var("IDPROV_ANONYMOUS_USER").unwrap_or(defaults.anonymous_user),
            propagation_timeout_secs: parse_var(
                "IDPROV_PROPAGATION_TIMEOUT_SECS",
                defaults.propagation_timeout_secs,
            )?,
            async_workers: parse_var("IDPROV_ASYNC_WORKERS", defaults.async_workers)?,
            pull_batch_size: parse_var("IDPROV_PULL_BATCH_SIZE", defaults.pull_batch_size)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Rejects zero-sized pools, batches and timeouts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("IDPROV_PROPAGATION_TIMEOUT_SECS", self.propagation_timeout_secs == 0),
            ("IDPROV_ASYNC_WORKERS", self.async_workers == 0),
            ("IDPROV_PULL_BATCH_SIZE", self.pull_batch_size == 0),
        ];
        for (var, is_zero) in positive {
            if is_zero {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn propagation_timeout(&self) -> Duration {
        Duration::from_secs(self.propagation_timeout_secs)
    }

    #[must_use]
    pub fn with_admin_user(mut self, username: impl Into<String>) -> Self {
        self.admin_user = username.into();
        self
    }

    #[must_use]
    pub fn with_anonymous_user(mut self, username: impl Into<String>) -> Self {
        self.anonymous_user = username.into();
        self
    }

    #[must_use]
    pub fn with_propagation_timeout_secs(mut self, secs: u64) -> Self {
        self.propagation_timeout_secs = secs;
        self
    }

    #[must_use]
    pub fn with_async_workers(mut self, workers: usize) -> Self {
        self.async_workers = workers;
        self
    }

    #[must_use]
    pub fn with_pull_batch_size(mut self, size: u32) -> Self {
        self.pull_batch_size = size;
        self
    }
}

fn parse_var<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(var) {
        Ok(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
            var: var.to_string(),
            reason: format!("'{raw}': {e}"),
        }),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProvisioningConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.propagation_timeout(), Duration::from_secs(30));
        assert_eq!(config.admin_user, "admin");
    }

    #[test]
    fn test_builder() {
        let config = ProvisioningConfig::default()
            .with_admin_user("root")
            .with_async_workers(8)
            .with_pull_batch_size(10);
        assert_eq!(config.admin_user, "root");
        assert_eq!(config.async_workers, 8);
        assert_eq!(config.pull_batch_size, 10);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let err = ProvisioningConfig::default()
            .with_async_workers(0)
            .validate()
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::Invalid {
                var: "IDPROV_ASYNC_WORKERS".to_string(),
                reason: "must be greater than zero".to_string(),
            }
        );
    }

    // Environment variables are process-wide, so everything env-related
    // lives in this single test.
    #[test]
    fn test_from_env() {
        env::set_var("IDPROV_ADMIN_USER", "superuser");
        env::set_var("IDPROV_ASYNC_WORKERS", "2");
        let config = ProvisioningConfig::from_env().unwrap();
        assert_eq!(config.admin_user, "superuser");
        assert_eq!(config.async_workers, 2);
        assert_eq!(config.pull_batch_size, 100);

        env::set_var("IDPROV_PULL_BATCH_SIZE", "many");
        let err = ProvisioningConfig::from_env().unwrap_err();
        assert!(err.to_string().contains("IDPROV_PULL_BATCH_SIZE"));

        env::remove_var("IDPROV_ADMIN_USER");
        env::remove_var("IDPROV_ASYNC_WORKERS");
        env::remove_var("IDPROV_PULL_BATCH_SIZE");
    }
}
