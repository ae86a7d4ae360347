//! Per-domain wiring.
//!
//! A [`DomainContext`] bundles everything one tenant needs: its compiled
//! configuration, its connection pool and every collaborator. Contexts are
//! registered in an [`idprov_core::DomainRegistry`] and passed explicitly to
//! each façade call.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info};

use idprov_core::{DomainAware, DomainId, DomainRegistry};

use crate::catalog::ConfigurationCatalog;
use crate::config::ProvisioningConfig;
use crate::correlation::CorrelationResolver;
use crate::dynmember::{DynMembershipStore, DynamicMembershipRecalculator, InMemoryDynMembershipStore};
use crate::error::{ProvisioningError, Result};
use crate::events::{EventPublisher, TracingEventPublisher};
use crate::mapping::{AnyBinder, AttributeMapper, TransformEngine};
use crate::policy::{PasswordHasher, PolicyEnforcer};
use crate::propagation::{
    ConnectorProvider, ExecutionLog, InMemoryExecutionLog, PropagationManager,
    PropagationTaskExecutor, StaticConnectorProvider,
};
use crate::search::{ExpressionSearchMatcher, SearchMatcher};
use crate::store::{AnyStore, InMemoryAnyStore};
use crate::workflow::{DirectWorkflowAdapter, WorkflowAdapter};

/// Registry of the live domains of a process.
pub type ProvisioningDomains = DomainRegistry<DomainContext>;

/// One independent unit of work on the authoritative store.
#[async_trait]
pub trait UnitOfWork: Send {
    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}

/// Source of units of work for a domain.
#[async_trait]
pub trait ConnectionPool: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>>;

    /// Releases the pool when the domain is unregistered.
    async fn close(&self) {}
}

/// Pool for stores without transactions.
#[derive(Debug, Default, Clone)]
pub struct NoopConnectionPool;

struct NoopUnitOfWork;

#[async_trait]
impl UnitOfWork for NoopUnitOfWork {
    async fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        Ok(())
    }
}

#[async_trait]
impl ConnectionPool for NoopConnectionPool {
    async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
        Ok(Box::new(NoopUnitOfWork))
    }
}

/// Runs `work` inside a fresh unit of work: commit on success, rollback on
/// failure. A failed rollback is logged and the original error returned.
pub async fn transactional<T, F>(pool: &dyn ConnectionPool, work: F) -> Result<T>
where
    F: std::future::Future<Output = Result<T>> + Send,
    T: Send,
{
    let mut unit = pool.begin().await?;
    match work.await {
        Ok(value) => {
            unit.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback) = unit.rollback().await {
                tracing::error!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Everything one domain runs on.
pub struct DomainContext {
    domain: DomainId,
    config: ProvisioningConfig,
    catalog: Arc<ConfigurationCatalog>,
    pool: Arc<dyn ConnectionPool>,
    store: Arc<dyn AnyStore>,
    matcher: Arc<dyn SearchMatcher>,
    workflow: Arc<dyn WorkflowAdapter>,
    connectors: Arc<dyn ConnectorProvider>,
    events: Arc<dyn EventPublisher>,
    mapper: AttributeMapper,
    binder: AnyBinder,
    enforcer: PolicyEnforcer,
    propagation: PropagationManager,
    executor: PropagationTaskExecutor,
    resolver: CorrelationResolver,
    recalculator: DynamicMembershipRecalculator,
}

impl DomainAware for DomainContext {
    fn domain(&self) -> &DomainId {
        &self.domain
    }
}

impl DomainContext {
    pub fn builder(domain: impl Into<DomainId>, catalog: ConfigurationCatalog) -> DomainContextBuilder {
        DomainContextBuilder::new(domain.into(), catalog)
    }

    #[must_use]
    pub fn config(&self) -> &ProvisioningConfig {
        &self.config
    }

    #[must_use]
    pub fn catalog(&self) -> &ConfigurationCatalog {
        &self.catalog
    }

    #[must_use]
    pub fn pool(&self) -> &dyn ConnectionPool {
        self.pool.as_ref()
    }

    #[must_use]
    pub fn store(&self) -> &dyn AnyStore {
        self.store.as_ref()
    }

    #[must_use]
    pub fn matcher(&self) -> &dyn SearchMatcher {
        self.matcher.as_ref()
    }

    #[must_use]
    pub fn workflow(&self) -> &dyn WorkflowAdapter {
        self.workflow.as_ref()
    }

    #[must_use]
    pub fn connectors(&self) -> &dyn ConnectorProvider {
        self.connectors.as_ref()
    }

    #[must_use]
    pub fn events(&self) -> &dyn EventPublisher {
        self.events.as_ref()
    }

    #[must_use]
    pub fn mapper(&self) -> &AttributeMapper {
        &self.mapper
    }

    #[must_use]
    pub fn binder(&self) -> &AnyBinder {
        &self.binder
    }

    #[must_use]
    pub fn enforcer(&self) -> &PolicyEnforcer {
        &self.enforcer
    }

    #[must_use]
    pub fn propagation(&self) -> &PropagationManager {
        &self.propagation
    }

    #[must_use]
    pub fn executor(&self) -> &PropagationTaskExecutor {
        &self.executor
    }

    #[must_use]
    pub fn resolver(&self) -> &CorrelationResolver {
        &self.resolver
    }

    #[must_use]
    pub fn recalculator(&self) -> &DynamicMembershipRecalculator {
        &self.recalculator
    }

    /// Releases the domain's resources.
    pub async fn close(&self) {
        self.pool.close().await;
        info!(domain = %self.domain, "Domain closed");
    }
}

/// Builder for [`DomainContext`]; every collaborator defaults to its
/// in-memory or pass-through version.
#[must_use]
pub struct DomainContextBuilder {
    domain: DomainId,
    catalog: ConfigurationCatalog,
    config: ProvisioningConfig,
    pool: Option<Arc<dyn ConnectionPool>>,
    store: Option<Arc<dyn AnyStore>>,
    matcher: Option<Arc<dyn SearchMatcher>>,
    dyn_memberships: Option<Arc<dyn DynMembershipStore>>,
    workflow: Option<Arc<dyn WorkflowAdapter>>,
    connectors: Option<Arc<dyn ConnectorProvider>>,
    execution_log: Option<Arc<dyn ExecutionLog>>,
    events: Option<Arc<dyn EventPublisher>>,
    hasher: PasswordHasher,
    engine: TransformEngine,
}

impl DomainContextBuilder {
    fn new(domain: DomainId, catalog: ConfigurationCatalog) -> Self {
        Self {
            domain,
            catalog,
            config: ProvisioningConfig::default(),
            pool: None,
            store: None,
            matcher: None,
            dyn_memberships: None,
            workflow: None,
            connectors: None,
            execution_log: None,
            events: None,
            hasher: PasswordHasher::new(),
            engine: TransformEngine::new(),
        }
    }

    pub fn with_config(mut self, config: ProvisioningConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_pool(mut self, pool: Arc<dyn ConnectionPool>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_store(mut self, store: Arc<dyn AnyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_matcher(mut self, matcher: Arc<dyn SearchMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_dyn_membership_store(mut self, store: Arc<dyn DynMembershipStore>) -> Self {
        self.dyn_memberships = Some(store);
        self
    }

    pub fn with_workflow(mut self, workflow: Arc<dyn WorkflowAdapter>) -> Self {
        self.workflow = Some(workflow);
        self
    }

    pub fn with_connectors(mut self, connectors: Arc<dyn ConnectorProvider>) -> Self {
        self.connectors = Some(connectors);
        self
    }

    pub fn with_execution_log(mut self, log: Arc<dyn ExecutionLog>) -> Self {
        self.execution_log = Some(log);
        self
    }

    pub fn with_events(mut self, events: Arc<dyn EventPublisher>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn with_hasher(mut self, hasher: PasswordHasher) -> Self {
        self.hasher = hasher;
        self
    }

    pub fn with_transform_engine(mut self, engine: TransformEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Validates the configuration and wires the components.
    pub fn build(self) -> Result<DomainContext> {
        self.config
            .validate()
            .map_err(|e| ProvisioningError::configuration(e.to_string()))?;

        let catalog = Arc::new(self.catalog);
        let store: Arc<dyn AnyStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryAnyStore::new()));
        let matcher: Arc<dyn SearchMatcher> = self
            .matcher
            .unwrap_or_else(|| Arc::new(ExpressionSearchMatcher::new(store.clone())));
        let workflow: Arc<dyn WorkflowAdapter> = self
            .workflow
            .unwrap_or_else(|| Arc::new(DirectWorkflowAdapter::new(store.clone())));
        let events: Arc<dyn EventPublisher> =
            self.events.unwrap_or_else(|| Arc::new(TracingEventPublisher));
        let connectors: Arc<dyn ConnectorProvider> = self
            .connectors
            .unwrap_or_else(|| Arc::new(StaticConnectorProvider::new()));
        let execution_log: Arc<dyn ExecutionLog> = self
            .execution_log
            .unwrap_or_else(|| Arc::new(InMemoryExecutionLog::new()));
        let dyn_memberships: Arc<dyn DynMembershipStore> = self
            .dyn_memberships
            .unwrap_or_else(|| Arc::new(InMemoryDynMembershipStore::new()));

        let mapper = AttributeMapper::new(catalog.clone()).with_engine(self.engine);
        let binder = AnyBinder::new(mapper.clone(), store.clone());
        let enforcer = PolicyEnforcer::new(
            catalog.clone(),
            store.clone(),
            self.hasher,
            self.config.admin_user.clone(),
            self.config.anonymous_user.clone(),
        );
        let propagation = PropagationManager::new(catalog.clone(), mapper.clone(), store.clone());
        let executor = PropagationTaskExecutor::new(
            connectors.clone(),
            execution_log,
            events.clone(),
            catalog.clone(),
            self.config.propagation_timeout(),
            self.config.async_workers,
        );
        let resolver = CorrelationResolver::new(mapper.clone(), matcher.clone());
        let recalculator = DynamicMembershipRecalculator::new(
            catalog.clone(),
            matcher.clone(),
            dyn_memberships,
            events.clone(),
        );

        debug!(domain = %self.domain, "Domain context built");
        Ok(DomainContext {
            domain: self.domain,
            config: self.config,
            catalog,
            pool: self
                .pool
                .unwrap_or_else(|| Arc::new(NoopConnectionPool)),
            store,
            matcher,
            workflow,
            connectors,
            events,
            mapper,
            binder,
            enforcer,
            propagation,
            executor,
            resolver,
            recalculator,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingPool {
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    struct CountingUnit {
        commits: Arc<AtomicUsize>,
        rollbacks: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl UnitOfWork for CountingUnit {
        async fn commit(&mut self) -> Result<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&mut self) -> Result<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl ConnectionPool for CountingPool {
        async fn begin(&self) -> Result<Box<dyn UnitOfWork>> {
            Ok(Box::new(CountingUnit {
                commits: self.commits.clone(),
                rollbacks: self.rollbacks.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn test_transactional_commits_or_rolls_back() {
        let pool = CountingPool::default();

        let value = transactional(&pool, async { Ok(42) }).await.unwrap();
        assert_eq!(value, 42);

        let failed: Result<()> =
            transactional(&pool, async { Err(ProvisioningError::workflow("rejected")) }).await;
        assert!(failed.is_err());

        assert_eq!(pool.commits.load(Ordering::SeqCst), 1);
        assert_eq!(pool.rollbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_registry_round_trip() {
        let registry = ProvisioningDomains::new();
        let context = DomainContext::builder("Two", ConfigurationCatalog::default())
            .build()
            .unwrap();
        registry.register(Arc::new(context)).await.unwrap();

        let domain = DomainId::new("Two");
        assert!(registry.contains(&domain).await);
        let context = registry.unregister(&domain).await.unwrap();
        context.close().await;
        assert!(registry.get(&domain).await.is_err());
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let result = DomainContext::builder("Master", ConfigurationCatalog::default())
            .with_config(ProvisioningConfig::default().with_async_workers(0))
            .build();
        assert!(matches!(result, Err(ProvisioningError::Configuration { .. })));
    }
}
