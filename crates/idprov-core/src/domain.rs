//! Multi-tenant domain registry.
//!
//! Each domain (tenant partition) owns its own connection pool, store and
//! configuration. The registry is an explicit map from [`DomainId`] to a
//! shared context: contexts are added with [`DomainRegistry::register`] and
//! torn down with [`DomainRegistry::unregister`]. Callers look a context up
//! once and pass it explicitly to every operation.
//!
//! # Example
//!
//! ```rust,ignore
//! use idprov_core::{DomainId, DomainRegistry};
//!
//! let registry = DomainRegistry::new();
//! registry.register(Arc::new(context)).await?;
//!
//! let master = registry.get(&DomainId::master()).await?;
//! manager.create(&master, &caller, request).await?;
//! ```

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

/// Name of the default domain.
pub const MASTER_DOMAIN: &str = "Master";

/// Identifier of a tenant domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainId(String);

impl DomainId {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The default domain.
    #[must_use]
    pub fn master() -> Self {
        Self(MASTER_DOMAIN.to_string())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for DomainId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DomainId {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

/// Implemented by per-domain contexts so the registry can key them.
pub trait DomainAware {
    fn domain(&self) -> &DomainId;
}

/// Process-wide map from domain identifier to domain context.
pub struct DomainRegistry<C> {
    domains: RwLock<HashMap<DomainId, Arc<C>>>,
}

impl<C> Default for DomainRegistry<C> {
    fn default() -> Self {
        Self {
            domains: RwLock::new(HashMap::new()),
        }
    }
}

impl<C: DomainAware + Send + Sync> DomainRegistry<C> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a domain context. Fails if the domain is already present.
    pub async fn register(&self, context: Arc<C>) -> Result<()> {
        let domain = context.domain().clone();
        let mut domains = self.domains.write().await;
        if domains.contains_key(&domain) {
            return Err(CoreError::DomainAlreadyRegistered { domain });
        }
        info!(domain = %domain, "Domain registered");
        domains.insert(domain, context);
        Ok(())
    }

    /// Removes a domain and hands its context back for teardown.
    pub async fn unregister(&self, domain: &DomainId) -> Result<Arc<C>> {
        let removed = self.domains.write().await.remove(domain);
        match removed {
            Some(context) => {
                info!(domain = %domain, "Domain unregistered");
                Ok(context)
            }
            None => Err(CoreError::DomainNotRegistered {
                domain: domain.clone(),
            }),
        }
    }

    /// Looks up a registered domain context.
    pub async fn get(&self, domain: &DomainId) -> Result<Arc<C>> {
        self.domains
            .read()
            .await
            .get(domain)
            .cloned()
            .ok_or_else(|| CoreError::DomainNotRegistered {
                domain: domain.clone(),
            })
    }

    pub async fn contains(&self, domain: &DomainId) -> bool {
        self.domains.read().await.contains_key(domain)
    }

    /// Registered domains, sorted.
    pub async fn domains(&self) -> Vec<DomainId> {
        let mut domains: Vec<_> = self.domains.read().await.keys().cloned().collect();
        domains.sort();
        domains
    }
}
