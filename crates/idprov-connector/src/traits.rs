//! Connector traits
//!
//! Capability-based trait definitions for connectors. The provisioning
//! engine consumes connectors as black boxes exposing create, update,
//! delete, get and sync on a keyed external object.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ConnectorResult;
use crate::operation::{AttributeSet, Uid};

/// Base trait for all connectors.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Get the display name for this connector instance.
    fn display_name(&self) -> &str;

    /// Test the connection to the target system.
    async fn test_connection(&self) -> ConnectorResult<()>;

    /// Dispose of connector resources.
    async fn dispose(&self) -> ConnectorResult<()> {
        Ok(())
    }

    /// Lightweight health check.
    fn is_healthy(&self) -> bool {
        true
    }
}

/// Capability for creating objects in the target system.
#[async_trait]
pub trait CreateOp: Connector {
    /// Create a new object and return its key in the target system.
    async fn create(&self, object_class: &str, attributes: AttributeSet) -> ConnectorResult<Uid>;
}

/// Capability for updating objects in the target system.
#[async_trait]
pub trait UpdateOp: Connector {
    /// Replace the given attributes on an existing object.
    ///
    /// Returns the key of the object after the update, which differs from
    /// `uid` when the naming attribute was changed.
    async fn update(
        &self,
        object_class: &str,
        uid: &Uid,
        attributes: AttributeSet,
    ) -> ConnectorResult<Uid>;
}

/// Capability for deleting objects from the target system.
#[async_trait]
pub trait DeleteOp: Connector {
    async fn delete(&self, object_class: &str, uid: &Uid) -> ConnectorResult<()>;
}

/// Capability for reading a single object by key.
#[async_trait]
pub trait GetOp: Connector {
    async fn get(&self, object_class: &str, uid: &Uid) -> ConnectorResult<Option<AttributeSet>>;
}

/// A detected change from a target system during synchronization.
#[derive(Debug, Clone)]
pub struct SyncChange {
    /// The unique identifier of the changed object.
    pub uid: Uid,
    /// Key of the object before the change, when the change renamed it.
    pub previous_uid: Option<Uid>,
    pub change_type: SyncChangeType,
    pub object_class: String,
    /// The current attributes of the object (for create/update).
    pub attributes: Option<AttributeSet>,
    /// Token positioned right after this change.
    pub token: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

impl SyncChange {
    /// Create a new sync change for a created or updated object.
    pub fn upsert(uid: Uid, object_class: impl Into<String>, attributes: AttributeSet) -> Self {
        Self {
            uid,
            previous_uid: None,
            change_type: SyncChangeType::CreateOrUpdate,
            object_class: object_class.into(),
            attributes: Some(attributes),
            token: None,
            timestamp: None,
        }
    }

    /// Create a new sync change for a deleted object.
    pub fn deleted(uid: Uid, object_class: impl Into<String>) -> Self {
        Self {
            uid,
            previous_uid: None,
            change_type: SyncChangeType::Delete,
            object_class: object_class.into(),
            attributes: None,
            token: None,
            timestamp: None,
        }
    }

    #[must_use]
    pub fn with_previous_uid(mut self, previous: Uid) -> Self {
        self.previous_uid = Some(previous);
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Type of change detected during synchronization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyncChangeType {
    /// The object was created or updated; the engine decides which by
    /// correlation.
    CreateOrUpdate,
    Delete,
}

impl std::fmt::Display for SyncChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncChangeType::CreateOrUpdate => write!(f, "create_or_update"),
            SyncChangeType::Delete => write!(f, "delete"),
        }
    }
}

/// One batch of changes.
#[derive(Debug, Clone)]
pub struct SyncResult {
    pub changes: Vec<SyncChange>,
    /// Token to resume from; `None` leaves the previous token unchanged.
    pub new_token: Option<String>,
    /// Whether there are more changes to fetch.
    pub has_more: bool,
}

impl SyncResult {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            changes: Vec::new(),
            new_token: None,
            has_more: false,
        }
    }

    #[must_use]
    pub fn with_changes(changes: Vec<SyncChange>) -> Self {
        Self {
            changes,
            new_token: None,
            has_more: false,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.new_token = Some(token.into());
        self
    }

    #[must_use]
    pub fn with_more(mut self) -> Self {
        self.has_more = true;
        self
    }
}

/// Capability for inbound synchronization.
///
/// The sync token is opaque: an LDAP cookie, a change-log sequence number
/// or a timestamp. `None` asks for a full initial sync.
#[async_trait]
pub trait SyncOp: Connector {
    async fn sync(
        &self,
        object_class: &str,
        token: Option<&str>,
        batch_size: u32,
    ) -> ConnectorResult<SyncResult>;
}

/// Connectors supporting every operation the engine drives.
pub trait FullConnector: CreateOp + UpdateOp + DeleteOp + GetOp + SyncOp {}

impl<T> FullConnector for T where T: CreateOp + UpdateOp + DeleteOp + GetOp + SyncOp {}
