//! idprov Core Library
//!
//! Shared identifiers, the identity data model and the multi-tenant domain
//! registry used by the provisioning engine.
//!
//! # Modules
//!
//! - [`ids`] - Strongly typed identifiers (`AnyKey`, `PolicyKey`)
//! - [`any`] - Users, groups and any objects
//! - [`patch`] - Update requests
//! - [`resource`] - External resources, provisions and mapping items
//! - [`policy`] - Password, account, pull and push policies
//! - [`realm`] - Realm hierarchy helpers
//! - [`schema`] - Plain schema definitions
//! - [`domain`] - Domain identifiers and the domain registry
//! - [`error`] - Model and registry errors
//!
//! # Example
//!
//! ```
//! use idprov_core::{Any, ExternalResource, MappingItem, Provision};
//!
//! let resource = ExternalResource::new("resource-ldap", "connector-ldap").with_provision(
//!     Provision::new("USER", "__ACCOUNT__")
//!         .with_item(MappingItem::conn_object_key("username", "uid")),
//! );
//! let user = Any::user("rossini", "/").with_resource("resource-ldap");
//!
//! assert!(resource.provision(&user.any_type).is_some());
//! ```

pub mod any;
pub mod domain;
pub mod error;
pub mod ids;
pub mod patch;
pub mod policy;
pub mod realm;
pub mod resource;
pub mod schema;

pub use any::{Any, AnyTypeKind, Credentials};
pub use domain::{DomainAware, DomainId, DomainRegistry};
pub use error::{CoreError, Result};
pub use ids::{AnyKey, ExecutionKey, ParseIdError, PolicyKey};
pub use patch::{AnyPatch, AttrPatch, MembershipPatch, PasswordPatch, PatchOp, StringPatch};
pub use policy::{
    AccountPolicy, ConflictResolutionAction, PasswordPolicy, Policy, PolicyKind, PullPolicy,
    PushPolicy, RuleConf,
};
pub use realm::Realm;
pub use resource::{ExternalResource, ItemTransformer, MappingItem, MappingPurpose, Provision};
pub use schema::{PlainSchema, SchemaType};
