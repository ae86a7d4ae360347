//! # Connector Contract
//!
//! Abstractions for the external target systems the provisioning engine
//! propagates to and pulls from.
//!
//! ## Architecture
//!
//! Connectors implement only the capabilities they support:
//!
//! - [`Connector`](traits::Connector) - Base trait all connectors implement
//! - [`CreateOp`](traits::CreateOp), [`UpdateOp`](traits::UpdateOp),
//!   [`DeleteOp`](traits::DeleteOp) - Write operations
//! - [`GetOp`](traits::GetOp) - Read a single object by key
//! - [`SyncOp`](traits::SyncOp) - Token-based change feed for pull
//!
//! ## Example
//!
//! ```ignore
//! use idprov_connector::prelude::*;
//!
//! let attrs = AttributeSet::new()
//!     .with("uid", "rossini")
//!     .with(PASSWORD_ATTRIBUTE, "Password123");
//! let uid = connector.create(ACCOUNT_OBJECT_CLASS, attrs).await?;
//! ```
//!
//! ## Crate Organization
//!
//! - [`error`] - Error types with transient/permanent classification
//! - [`operation`] - Uid, `AttributeSet`, special attribute names
//! - [`traits`] - Connector capability traits and sync types
//! - [`types`] - Operation kinds

pub mod error;
pub mod operation;
pub mod traits;
pub mod types;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{ConnectorError, ConnectorResult, FailureClass};
    pub use crate::operation::{
        AttributeSet, AttributeValue, Uid, ACCOUNT_OBJECT_CLASS, ENABLE_ATTRIBUTE,
        GROUP_OBJECT_CLASS, NAME_ATTRIBUTE, PASSWORD_ATTRIBUTE,
    };
    pub use crate::traits::{
        Connector, CreateOp, DeleteOp, FullConnector, GetOp, SyncChange, SyncChangeType, SyncOp,
        SyncResult, UpdateOp,
    };
    pub use crate::types::OperationType;
}

// Re-export async_trait for connector implementors
pub use async_trait::async_trait;

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_prelude_imports() {
        let _uid = Uid::from_value("rossini");
        let _attrs = AttributeSet::new().with(NAME_ATTRIBUTE, "rossini");
        let _op = OperationType::Create;
        assert_eq!(ConnectorError::not_found("x").classify(), FailureClass::NotFound);
    }
}
