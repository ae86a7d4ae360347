//! Propagation of entity changes to external resources.
//!
//! [`PropagationManager`] turns per-resource decisions into ordered tasks;
//! [`PropagationTaskExecutor`] runs them against connectors and reports one
//! status per task.

pub mod executor;
pub mod log;
pub mod manager;
pub mod task;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use idprov_connector::traits::FullConnector;

pub use executor::{ExecutionStatus, PropagationReporter, PropagationStatus, PropagationTaskExecutor};
pub use log::{ExecutionLog, ExecutionLogEntry, InMemoryExecutionLog};
pub use manager::PropagationManager;
pub use task::{sort_tasks, PropagationByResource, PropagationTask};

/// Resolves the connector instance serving a resource.
#[async_trait]
pub trait ConnectorProvider: Send + Sync {
    async fn get_connector(&self, resource: &str) -> Option<Arc<dyn FullConnector>>;
}

/// Fixed resource-to-connector table.
#[derive(Default, Clone)]
pub struct StaticConnectorProvider {
    connectors: HashMap<String, Arc<dyn FullConnector>>,
}

impl StaticConnectorProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_connector(mut self, resource: impl Into<String>, connector: Arc<dyn FullConnector>) -> Self {
        self.connectors.insert(resource.into(), connector);
        self
    }
}

#[async_trait]
impl ConnectorProvider for StaticConnectorProvider {
    async fn get_connector(&self, resource: &str) -> Option<Arc<dyn FullConnector>> {
        self.connectors.get(resource).cloned()
    }
}
