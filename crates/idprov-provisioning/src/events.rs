//! Provisioning events.
//!
//! Events are published after the change they describe is durable. Publishing
//! never fails the operation: publishers log and swallow their own errors.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::info;

use idprov_connector::types::OperationType;
use idprov_core::AnyKey;

use crate::dynmember::MembershipOwner;
use crate::propagation::ExecutionStatus;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProvisioningEvent {
    AnyCreated {
        key: AnyKey,
        any_type: String,
    },
    AnyUpdated {
        key: AnyKey,
        any_type: String,
    },
    AnyDeleted {
        key: AnyKey,
        any_type: String,
    },
    MembershipAdded {
        owner: MembershipOwner,
        key: AnyKey,
    },
    MembershipRemoved {
        owner: MembershipOwner,
        key: AnyKey,
    },
    PropagationCompleted {
        resource: String,
        operation: OperationType,
        key: AnyKey,
        status: ExecutionStatus,
    },
}

impl ProvisioningEvent {
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AnyCreated { .. } => "any_created",
            Self::AnyUpdated { .. } => "any_updated",
            Self::AnyDeleted { .. } => "any_deleted",
            Self::MembershipAdded { .. } => "membership_added",
            Self::MembershipRemoved { .. } => "membership_removed",
            Self::PropagationCompleted { .. } => "propagation_completed",
        }
    }
}

/// Sink for provisioning events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: ProvisioningEvent);
}

/// Writes every event to the log.
#[derive(Debug, Default, Clone)]
pub struct TracingEventPublisher;

#[async_trait]
impl EventPublisher for TracingEventPublisher {
    async fn publish(&self, event: ProvisioningEvent) {
        info!(event_type = event.event_type(), event = ?event, "Provisioning event");
    }
}

/// Keeps events in memory, in publication order.
#[derive(Debug, Default)]
pub struct InMemoryEventPublisher {
    events: RwLock<Vec<(DateTime<Utc>, ProvisioningEvent)>>,
}

impl InMemoryEventPublisher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<ProvisioningEvent> {
        self.events
            .read()
            .await
            .iter()
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub async fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .await
            .iter()
            .filter(|(_, event)| event.event_type() == event_type)
            .count()
    }

    pub async fn clear(&self) {
        self.events.write().await.clear();
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventPublisher {
    async fn publish(&self, event: ProvisioningEvent) {
        self.events.write().await.push((Utc::now(), event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_publisher_counts_by_type() {
        let publisher = InMemoryEventPublisher::new();
        let key = AnyKey::new();
        publisher
            .publish(ProvisioningEvent::AnyCreated {
                key,
                any_type: "USER".into(),
            })
            .await;
        publisher
            .publish(ProvisioningEvent::MembershipAdded {
                owner: MembershipOwner::Realm("even".into()),
                key,
            })
            .await;

        assert_eq!(publisher.count("any_created").await, 1);
        assert_eq!(publisher.count("membership_removed").await, 0);
        assert_eq!(publisher.events().await.len(), 2);

        publisher.clear().await;
        assert!(publisher.events().await.is_empty());
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ProvisioningEvent::AnyDeleted {
            key: AnyKey::new(),
            any_type: "GROUP".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "any_deleted");
        assert_eq!(json["any_type"], "GROUP");
    }
}
