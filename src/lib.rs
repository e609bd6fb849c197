//! Warden - role-based access control engine
//!
//! Permissions form a hierarchy of operations, tasks and roles. Users are
//! assigned items, and an access check walks upward from the requested item
//! looking for a default role or a live assignment, evaluating each item's
//! condition on the way. Policies live in a relational database (sea-orm) or
//! in a JSON snapshot file.

pub mod condition;
pub mod engine;
pub mod entities;
pub mod errors;
pub mod rules;
pub mod settings;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod web;

pub use condition::Condition;
pub use engine::PolicyEngine;
pub use errors::RbacError;
pub use rules::RuleRegistry;
pub use snapshot::Snapshot;
pub use store::{AuthStore, DatabaseStore, FileStore};
pub use types::{Assignment, AuthItem, ItemType, Params};
