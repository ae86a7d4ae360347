//! Execution log of propagation tasks.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use idprov_connector::types::OperationType;
use idprov_core::{AnyKey, ExecutionKey};

use super::executor::ExecutionStatus;

/// Record of one executed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub key: ExecutionKey,
    pub resource: String,
    pub operation: OperationType,
    pub any_key: AnyKey,
    pub any_type: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait ExecutionLog: Send + Sync {
    async fn record(&self, entry: ExecutionLogEntry);
}

#[derive(Debug, Default)]
pub struct InMemoryExecutionLog {
    entries: RwLock<Vec<ExecutionLogEntry>>,
}

impl InMemoryExecutionLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<ExecutionLogEntry> {
        self.entries.read().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Entries recorded for a resource, oldest first.
    pub async fn for_resource(&self, resource: &str) -> Vec<ExecutionLogEntry> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|e| e.resource == resource)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl ExecutionLog for InMemoryExecutionLog {
    async fn record(&self, entry: ExecutionLogEntry) {
        self.entries.write().await.push(entry);
    }
}
