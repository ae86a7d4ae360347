//! # Provisioning Engine
//!
//! Orchestrates changes to users, groups and any objects across the
//! authoritative store and any number of external resources.
//!
//! This crate provides:
//! - Attribute mapping between internal schemas and connector attributes
//! - Password and account policy enforcement before commit
//! - Correlation of inbound changes with internal entities
//! - Dynamic realm and group membership maintenance
//! - Per-resource propagation with failure isolation
//! - Pull and push synchronization
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌────────────┐   ┌──────────────────┐
//! │ Security     │──►│ Binder +      │──►│ Workflow   │──►│ Propagation      │
//! │ check        │   │ PolicyEnforcer│   │ (unit of   │   │ Manager/Executor │
//! └──────────────┘   └───────────────┘   │  work)     │   └────────┬─────────┘
//!                                        └────────────┘            │
//!                                                                  ▼
//!                     ┌───────────────────────────┐        ┌───────────────┐
//!                     │ Dynamic membership refresh│◄───────│  Connectors   │
//!                     └───────────────────────────┘        └───────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use idprov_core::Any;
//! use idprov_provisioning::{Caller, DomainContext, PropagationOptions, ProvisioningManager};
//!
//! let ctx = DomainContext::builder("Master", catalog)
//!     .with_connectors(connectors)
//!     .build()?;
//! let caller = Caller::new("admin").with_entitlement("USER_CREATE", "/");
//!
//! let result = ProvisioningManager::new()
//!     .create(&ctx, &caller, Any::user("rossini", "/"), &PropagationOptions::new())
//!     .await?;
//! for status in &result.statuses {
//!     println!("{} {} {}", status.resource, status.operation, status.status);
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod correlation;
pub mod domain;
pub mod dynmember;
pub mod error;
pub mod events;
pub mod manager;
pub mod mapping;
pub mod policy;
pub mod propagation;
pub mod pull;
pub mod push;
pub mod search;
pub mod store;
pub mod workflow;

// Re-exports for convenience
pub use catalog::{CatalogBuilder, ConfigurationCatalog};
pub use config::{ConfigError, ProvisioningConfig};
pub use correlation::{
    AttributeCorrelationRule, CorrelationOutcome, CorrelationResolver, CorrelationRule,
    CorrelationRuleRegistry, DefaultCorrelationRule,
};
pub use domain::{
    transactional, ConnectionPool, DomainContext, DomainContextBuilder, NoopConnectionPool,
    ProvisioningDomains, UnitOfWork,
};
pub use dynmember::{
    DynMembership, DynMembershipStore, DynamicMembershipRecalculator, InMemoryDynMembershipStore,
    MembershipChanges, MembershipOwner,
};
pub use error::{PolicyViolation, ProvisioningError, Result, ValidationErrors, ValidationKind};
pub use events::{EventPublisher, InMemoryEventPublisher, ProvisioningEvent, TracingEventPublisher};
pub use manager::{
    entitlement, Caller, PropagationOptions, ProvisioningManager, ProvisioningResult, StatusRequest,
};
pub use mapping::{AnyBinder, AttributeMapper, BoundUpdate, Direction, ScriptLimits, TransformEngine};
pub use policy::{PasswordHasher, PolicyEnforcer, PolicyOutcome, RuleRegistry};
pub use propagation::{
    ConnectorProvider, ExecutionLog, ExecutionLogEntry, ExecutionStatus, InMemoryExecutionLog,
    PropagationByResource, PropagationManager, PropagationReporter, PropagationStatus,
    PropagationTask, PropagationTaskExecutor, StaticConnectorProvider,
};
pub use pull::{PullExecutor, PullReport};
pub use push::{MatchingRule, PushExecutor, PushReport, PushRules, UnmatchingRule};
pub use search::{ExpressionSearchMatcher, SearchMatcher};
pub use store::{AnyStore, InMemoryAnyStore};
pub use workflow::{DirectWorkflowAdapter, StatusChange, WorkflowAdapter, WorkflowResult};

/// Initialize the provisioning engine.
pub fn init() {
    tracing::info!("Provisioning engine initialized");
}
