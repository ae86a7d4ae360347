//! Execution of propagation tasks against connectors.
//!
//! Priority tasks always run in order and are awaited. Other tasks are
//! awaited too unless the caller asks for them to run in the background, in
//! which case they are handed to a bounded pool and reported as
//! `NOT_ATTEMPTED`; their outcome lands in the execution log.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

use idprov_connector::error::{ConnectorError, ConnectorResult};
use idprov_connector::traits::FullConnector;
use idprov_connector::types::OperationType;
use idprov_core::ExecutionKey;

use super::log::{ExecutionLog, ExecutionLogEntry};
use super::task::PropagationTask;
use super::ConnectorProvider;
use crate::catalog::ConfigurationCatalog;
use crate::events::{EventPublisher, ProvisioningEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Failure,
    /// Dispatched to the background; not awaited.
    NotAttempted,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
            Self::NotAttempted => "NOT_ATTEMPTED",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one task, as returned to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationStatus {
    pub resource: String,
    pub operation: OperationType,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Connector key of the remote object after the operation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conn_object_key: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl PropagationStatus {
    fn new(task: &PropagationTask, status: ExecutionStatus) -> Self {
        Self {
            resource: task.resource.clone(),
            operation: task.operation,
            status,
            message: None,
            conn_object_key: task.conn_object_key.clone(),
            timestamp: Utc::now(),
        }
    }

    fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Statuses of one execution, in task order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropagationReporter {
    statuses: Vec<PropagationStatus>,
}

impl PropagationReporter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, status: PropagationStatus) {
        self.statuses.push(status);
    }

    #[must_use]
    pub fn statuses(&self) -> &[PropagationStatus] {
        &self.statuses
    }

    #[must_use]
    pub fn into_statuses(self) -> Vec<PropagationStatus> {
        self.statuses
    }

    #[must_use]
    pub fn all_succeeded(&self) -> bool {
        self.statuses
            .iter()
            .all(|s| s.status == ExecutionStatus::Success)
    }

    pub fn failures(&self) -> impl Iterator<Item = &PropagationStatus> {
        self.statuses
            .iter()
            .filter(|s| s.status == ExecutionStatus::Failure)
    }

    #[must_use]
    pub fn status_for(&self, resource: &str) -> Option<&PropagationStatus> {
        self.statuses.iter().find(|s| s.resource == resource)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }
}

struct ExecutorInner {
    connectors: Arc<dyn ConnectorProvider>,
    log: Arc<dyn ExecutionLog>,
    events: Arc<dyn EventPublisher>,
    catalog: Arc<ConfigurationCatalog>,
    default_timeout: Duration,
    workers: Arc<Semaphore>,
}

/// Runs propagation tasks; cheap to clone.
#[derive(Clone)]
pub struct PropagationTaskExecutor {
    inner: Arc<ExecutorInner>,
}

impl PropagationTaskExecutor {
    /// `workers` bounds how many background tasks run at once.
    pub fn new(
        connectors: Arc<dyn ConnectorProvider>,
        log: Arc<dyn ExecutionLog>,
        events: Arc<dyn EventPublisher>,
        catalog: Arc<ConfigurationCatalog>,
        default_timeout: Duration,
        workers: usize,
    ) -> Self {
        Self::with_semaphore(
            connectors,
            log,
            events,
            catalog,
            default_timeout,
            Arc::new(Semaphore::new(workers)),
        )
    }

    /// Executor sharing an existing background pool.
    pub fn with_semaphore(
        connectors: Arc<dyn ConnectorProvider>,
        log: Arc<dyn ExecutionLog>,
        events: Arc<dyn EventPublisher>,
        catalog: Arc<ConfigurationCatalog>,
        default_timeout: Duration,
        workers: Arc<Semaphore>,
    ) -> Self {
        Self {
            inner: Arc::new(ExecutorInner {
                connectors,
                log,
                events,
                catalog,
                default_timeout,
                workers,
            }),
        }
    }

    /// Executes the tasks and returns one status per task, in input order.
    ///
    /// A failing task never stops the following ones.
    #[instrument(skip(self, tasks), fields(tasks = tasks.len()))]
    pub async fn execute(&self, tasks: Vec<PropagationTask>, async_non_priority: bool) -> PropagationReporter {
        let mut reporter = PropagationReporter::new();

        for task in tasks {
            if task.is_priority() || !async_non_priority {
                reporter.push(self.run(task).await);
                continue;
            }

            reporter.push(PropagationStatus::new(&task, ExecutionStatus::NotAttempted));
            let executor = self.clone();
            let workers = Arc::clone(&self.inner.workers);
            tokio::spawn(async move {
                let Ok(_permit) = workers.acquire_owned().await else {
                    error!(resource = %task.resource, "Propagation pool closed, task dropped");
                    return;
                };
                executor.run(task).await;
            });
        }

        reporter
    }

    /// Bound on one connector call against the resource.
    #[must_use]
    pub fn timeout_for(&self, resource: &str) -> Duration {
        self.inner
            .catalog
            .resource(resource)
            .and_then(|r| r.timeout_secs)
            .map_or(self.inner.default_timeout, Duration::from_secs)
    }

    /// Runs one task, then records and publishes its outcome.
    async fn run(&self, task: PropagationTask) -> PropagationStatus {
        let status = match self.inner.connectors.get_connector(&task.resource).await {
            Some(connector) => {
                let timeout = self.timeout_for(&task.resource);
                match self.invoke(connector.as_ref(), &task, timeout).await {
                    Ok(key) => {
                        let mut status = PropagationStatus::new(&task, ExecutionStatus::Success);
                        if key.is_some() {
                            status.conn_object_key = key;
                        }
                        status
                    }
                    Err(e) => PropagationStatus::new(&task, ExecutionStatus::Failure)
                        .with_message(format!("{}: {e}", e.classify().as_str())),
                }
            }
            None => PropagationStatus::new(&task, ExecutionStatus::Failure)
                .with_message(format!("no connector for resource {}", task.resource)),
        };

        match status.status {
            ExecutionStatus::Failure => warn!(
                resource = %task.resource,
                operation = %task.operation,
                any_key = %task.any_key,
                message = status.message.as_deref().unwrap_or_default(),
                "Propagation failed"
            ),
            _ => debug!(
                resource = %task.resource,
                operation = %task.operation,
                any_key = %task.any_key,
                "Propagation succeeded"
            ),
        }

        self.inner
            .log
            .record(ExecutionLogEntry {
                key: ExecutionKey::new(),
                resource: task.resource.clone(),
                operation: task.operation,
                any_key: task.any_key,
                any_type: task.any_type.clone(),
                status: status.status,
                message: status.message.clone(),
                timestamp: status.timestamp,
            })
            .await;
        self.inner
            .events
            .publish(ProvisioningEvent::PropagationCompleted {
                resource: task.resource.clone(),
                operation: task.operation,
                key: task.any_key,
                status: status.status,
            })
            .await;

        status
    }

    /// Calls the connector; returns the remote key when the call yields one.
    async fn invoke(
        &self,
        connector: &dyn FullConnector,
        task: &PropagationTask,
        timeout: Duration,
    ) -> ConnectorResult<Option<String>> {
        let object_class = task.object_class.as_str();
        match task.operation {
            OperationType::Create => {
                let uid = bounded(timeout, connector.create(object_class, task.attributes.clone())).await?;
                Ok(Some(uid.value().to_string()))
            }
            OperationType::Update => {
                let uid = task.target_uid().ok_or_else(|| missing_key(task))?;
                match bounded(
                    timeout,
                    connector.update(object_class, &uid, task.attributes.clone()),
                )
                .await
                {
                    Ok(uid) => Ok(Some(uid.value().to_string())),
                    Err(e) if e.is_not_found() => {
                        info!(resource = %task.resource, uid = %uid, "Object missing on update, creating it");
                        let uid =
                            bounded(timeout, connector.create(object_class, task.attributes.clone())).await?;
                        Ok(Some(uid.value().to_string()))
                    }
                    Err(e) => Err(e),
                }
            }
            OperationType::Delete => {
                let uid = task.target_uid().ok_or_else(|| missing_key(task))?;
                match bounded(timeout, connector.delete(object_class, &uid)).await {
                    Ok(()) => Ok(None),
                    Err(e) if e.is_not_found() => {
                        debug!(resource = %task.resource, uid = %uid, "Object already gone");
                        Ok(None)
                    }
                    Err(e) => Err(e),
                }
            }
        }
    }
}

fn missing_key(task: &PropagationTask) -> ConnectorError {
    ConnectorError::InvalidData {
        message: format!(
            "no connector object key for {} on {}",
            task.any_key, task.resource
        ),
    }
}

/// Bounds a connector call; an elapsed deadline becomes a timeout error.
pub(crate) async fn bounded<T>(
    timeout: Duration,
    call: impl Future<Output = ConnectorResult<T>>,
) -> ConnectorResult<T> {
    tokio::time::timeout(timeout, call)
        .await
        .unwrap_or_else(|_| {
            Err(ConnectorError::ConnectionTimeout {
                timeout_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            })
        })
}
