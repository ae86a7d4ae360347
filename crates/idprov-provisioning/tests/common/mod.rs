//! Shared fixtures for the provisioning integration tests.
//!
//! Connectors, pools and contexts are hand-written in-memory versions whose
//! behaviour is switched per test.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Once;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use idprov_connector::error::{ConnectorError, ConnectorResult};
use idprov_connector::operation::{AttributeSet, Uid};
use idprov_connector::traits::{Connector, CreateOp, DeleteOp, GetOp, SyncOp, SyncResult, UpdateOp};
use idprov_core::{ExternalResource, MappingItem, PlainSchema, Provision, SchemaType};
use idprov_provisioning::{
    CatalogBuilder, Caller, ConfigurationCatalog, ConnectionPool, DomainContext, InMemoryAnyStore,
    InMemoryEventPublisher, InMemoryExecutionLog, PasswordHasher, ProvisioningConfig, Result,
    StaticConnectorProvider, UnitOfWork,
};

// =============================================================================
// Mock Connector
// =============================================================================

/// Configured outcome of a connector operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockBehavior {
    Success,
    ConnectionError,
    ObjectNotFound,
    AlreadyExists,
}

impl MockBehavior {
    fn code(self) -> usize {
        match self {
            Self::Success => 0,
            Self::ConnectionError => 1,
            Self::ObjectNotFound => 2,
            Self::AlreadyExists => 3,
        }
    }

    fn from_code(code: usize) -> Self {
        match code {
            1 => Self::ConnectionError,
            2 => Self::ObjectNotFound,
            3 => Self::AlreadyExists,
            _ => Self::Success,
        }
    }

    fn check(self, identifier: &str) -> ConnectorResult<()> {
        match self {
            Self::Success => Ok(()),
            Self::ConnectionError => Err(ConnectorError::connection_failed("connection refused")),
            Self::ObjectNotFound => Err(ConnectorError::not_found(identifier)),
            Self::AlreadyExists => Err(ConnectorError::already_exists(identifier)),
        }
    }
}

/// In-memory target system keyed by the value of `key_attr`.
pub struct TestConnector {
    name: String,
    key_attr: String,
    create_behavior: AtomicUsize,
    update_behavior: AtomicUsize,
    delete_behavior: AtomicUsize,
    delay_ms: AtomicU64,
    create_call_count: AtomicUsize,
    update_call_count: AtomicUsize,
    delete_call_count: AtomicUsize,
    completed_call_count: AtomicUsize,
    objects: Mutex<BTreeMap<String, AttributeSet>>,
    received: Mutex<Vec<(String, AttributeSet)>>,
    sync_batches: Mutex<VecDeque<SyncResult>>,
    sync_tokens: Mutex<Vec<Option<String>>>,
}

impl TestConnector {
    #[must_use]
    pub fn new(name: &str, key_attr: &str) -> Self {
        Self {
            name: name.to_string(),
            key_attr: key_attr.to_string(),
            create_behavior: AtomicUsize::new(0),
            update_behavior: AtomicUsize::new(0),
            delete_behavior: AtomicUsize::new(0),
            delay_ms: AtomicU64::new(0),
            create_call_count: AtomicUsize::new(0),
            update_call_count: AtomicUsize::new(0),
            delete_call_count: AtomicUsize::new(0),
            completed_call_count: AtomicUsize::new(0),
            objects: Mutex::new(BTreeMap::new()),
            received: Mutex::new(Vec::new()),
            sync_batches: Mutex::new(VecDeque::new()),
            sync_tokens: Mutex::new(Vec::new()),
        }
    }

    pub fn with_create(self, behavior: MockBehavior) -> Self {
        self.create_behavior.store(behavior.code(), Ordering::SeqCst);
        self
    }

    pub fn with_update(self, behavior: MockBehavior) -> Self {
        self.update_behavior.store(behavior.code(), Ordering::SeqCst);
        self
    }

    pub fn with_delete(self, behavior: MockBehavior) -> Self {
        self.delete_behavior.store(behavior.code(), Ordering::SeqCst);
        self
    }

    /// Every write waits this long before answering.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub async fn with_object(self, key: &str, attributes: AttributeSet) -> Self {
        self.objects.lock().await.insert(key.to_string(), attributes);
        self
    }

    pub async fn push_sync_batch(&self, batch: SyncResult) {
        self.sync_batches.lock().await.push_back(batch);
    }

    pub fn create_calls(&self) -> usize {
        self.create_call_count.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.update_call_count.load(Ordering::SeqCst)
    }

    pub fn delete_calls(&self) -> usize {
        self.delete_call_count.load(Ordering::SeqCst)
    }

    /// Writes that ran to completion, failed ones included.
    pub fn completed_calls(&self) -> usize {
        self.completed_call_count.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.create_calls() + self.update_calls() + self.delete_calls()
    }

    pub async fn object(&self, key: &str) -> Option<AttributeSet> {
        self.objects.lock().await.get(key).cloned()
    }

    pub async fn object_count(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Attributes of every create and update, in call order.
    pub async fn received(&self) -> Vec<(String, AttributeSet)> {
        self.received.lock().await.clone()
    }

    pub async fn sync_tokens(&self) -> Vec<Option<String>> {
        self.sync_tokens.lock().await.clone()
    }

    async fn pause(&self) {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
    }

    fn done(&self) {
        self.completed_call_count.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for TestConnector {
    fn display_name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> ConnectorResult<()> {
        Ok(())
    }
}

#[async_trait]
impl CreateOp for TestConnector {
    async fn create(&self, _object_class: &str, attributes: AttributeSet) -> ConnectorResult<Uid> {
        self.create_call_count.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let key = attributes
            .get_string(&self.key_attr)
            .unwrap_or("created-uid")
            .to_string();
        let outcome = MockBehavior::from_code(self.create_behavior.load(Ordering::SeqCst)).check(&key);
        self.done();
        outcome?;

        self.received.lock().await.push(("CREATE".to_string(), attributes.clone()));
        self.objects.lock().await.insert(key.clone(), attributes);
        Ok(Uid::new(self.key_attr.clone(), key))
    }
}

#[async_trait]
impl UpdateOp for TestConnector {
    async fn update(&self, _object_class: &str, uid: &Uid, attributes: AttributeSet) -> ConnectorResult<Uid> {
        self.update_call_count.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let outcome =
            MockBehavior::from_code(self.update_behavior.load(Ordering::SeqCst)).check(uid.value());
        self.done();
        outcome?;

        let mut objects = self.objects.lock().await;
        let Some(mut current) = objects.remove(uid.value()) else {
            return Err(ConnectorError::not_found(uid.value()));
        };
        for (name, value) in attributes.iter() {
            current.set(name.clone(), value.clone());
        }
        let key = current
            .get_string(&self.key_attr)
            .unwrap_or(uid.value())
            .to_string();
        objects.insert(key.clone(), current);
        self.received.lock().await.push(("UPDATE".to_string(), attributes));
        Ok(Uid::new(self.key_attr.clone(), key))
    }
}

#[async_trait]
impl DeleteOp for TestConnector {
    async fn delete(&self, _object_class: &str, uid: &Uid) -> ConnectorResult<()> {
        self.delete_call_count.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        let outcome =
            MockBehavior::from_code(self.delete_behavior.load(Ordering::SeqCst)).check(uid.value());
        self.done();
        outcome?;

        match self.objects.lock().await.remove(uid.value()) {
            Some(_) => Ok(()),
            None => Err(ConnectorError::not_found(uid.value())),
        }
    }
}

#[async_trait]
impl GetOp for TestConnector {
    async fn get(&self, _object_class: &str, uid: &Uid) -> ConnectorResult<Option<AttributeSet>> {
        Ok(self.objects.lock().await.get(uid.value()).cloned())
    }
}

#[async_trait]
impl SyncOp for TestConnector {
    async fn sync(
        &self,
        _object_class: &str,
        token: Option<&str>,
        _batch_size: u32,
    ) -> ConnectorResult<SyncResult> {
        self.sync_tokens.lock().await.push(token.map(str::to_string));
        Ok(self
            .sync_batches
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(SyncResult::empty))
    }
}

// =============================================================================
// Counting Pool
// =============================================================================

#[derive(Default)]
pub struct CountingPool {
    pub begins: Arc<AtomicUsize>,
    pub commits: Arc<AtomicUsize>,
    pub rollbacks: Arc<AtomicUsize>,
}

impl CountingPool {
    pub fn begins(&self) -> usize {
        self.begins.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.rollbacks.load(Ordering::SeqCst)
    }
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
        self.begins.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(CountingUnit {
            commits: self.commits.clone(),
            rollbacks: self.rollbacks.clone(),
        }))
    }
}

// =============================================================================
// Context Helpers
// =============================================================================

pub const LDAP: &str = "resource-ldap";
pub const DB: &str = "resource-db";

/// LDAP-like resource keyed by `uid`, mapping email and password.
pub fn ldap_resource() -> ExternalResource {
    ExternalResource::new(LDAP, "connector-ldap")
        .with_provision(
            Provision::new("USER", "__ACCOUNT__")
                .with_item(MappingItem::conn_object_key("username", "uid"))
                .with_item(MappingItem::new("email", "mail"))
                .with_item(MappingItem::new("surname", "sn"))
                .with_item(MappingItem::password("userPassword")),
        )
        .with_provision(
            Provision::new("GROUP", "__GROUP__").with_item(MappingItem::conn_object_key("name", "cn")),
        )
}

/// Database-like resource keyed by `username`.
pub fn db_resource() -> ExternalResource {
    ExternalResource::new(DB, "connector-db").with_provision(
        Provision::new("USER", "__ACCOUNT__")
            .with_item(MappingItem::conn_object_key("username", "username"))
            .with_item(MappingItem::new("email", "email")),
    )
}

/// Catalog builder with the plain schemas the resources map.
pub fn base_catalog() -> CatalogBuilder {
    CatalogBuilder::new()
        .with_schema(PlainSchema::new("email", SchemaType::String))
        .with_schema(PlainSchema::new("surname", SchemaType::String))
}

/// Caller entitled to everything everywhere.
pub fn admin() -> Caller {
    Caller::system("admin", "USER")
        .with_entitlement("GROUP_CREATE", "/")
        .with_entitlement("GROUP_UPDATE", "/")
        .with_entitlement("GROUP_DELETE", "/")
}

/// A wired domain plus handles on its in-memory collaborators.
pub struct TestContext {
    pub ctx: DomainContext,
    pub store: Arc<InMemoryAnyStore>,
    pub log: Arc<InMemoryExecutionLog>,
    pub events: Arc<InMemoryEventPublisher>,
    pub pool: Arc<CountingPool>,
}

pub fn test_context(catalog: ConfigurationCatalog, connectors: &[(&str, Arc<TestConnector>)]) -> TestContext {
    test_context_with(catalog, connectors, ProvisioningConfig::default())
}

static TRACING: Once = Once::new();

/// Routes engine logs to the test output; filter with `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
        idprov_provisioning::init();
    });
}

pub fn test_context_with(
    catalog: ConfigurationCatalog,
    connectors: &[(&str, Arc<TestConnector>)],
    config: ProvisioningConfig,
) -> TestContext {
    init_tracing();
    let store = Arc::new(InMemoryAnyStore::new());
    let log = Arc::new(InMemoryExecutionLog::new());
    let events = Arc::new(InMemoryEventPublisher::new());
    let pool = Arc::new(CountingPool::default());
    let provider = connectors
        .iter()
        .fold(StaticConnectorProvider::new(), |provider, (resource, connector)| {
            provider.with_connector(*resource, connector.clone())
        });

    let ctx = DomainContext::builder("Master", catalog)
        .with_config(config)
        .with_store(store.clone())
        .with_execution_log(log.clone())
        .with_events(events.clone())
        .with_pool(pool.clone())
        .with_connectors(Arc::new(provider))
        .with_hasher(PasswordHasher::with_params(8, 1, 1).expect("valid argon2 parameters"))
        .build()
        .expect("context builds");

    TestContext {
        ctx,
        store,
        log,
        events,
        pool,
    }
}
