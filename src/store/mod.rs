//! Storage contract shared by the relational and snapshot-file backends.
//!
//! Stores persist records and run cascades; every graph invariant (type
//! ordering, loop detection, duplicate checks) is enforced once, in
//! [`crate::engine::PolicyEngine`], against these traits.

pub mod database;
pub mod file;

use std::sync::Arc;

use async_trait::async_trait;

use crate::errors::RbacError;
use crate::settings::{Backend, Settings};
use crate::snapshot::Snapshot;
use crate::types::{Assignment, AuthItem, ItemType};

pub use database::DatabaseStore;
pub use file::FileStore;

#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn get_item(&self, name: &str) -> Result<Option<AuthItem>, RbacError>;

    /// All items, optionally restricted to one type, ordered by name.
    async fn list_items(&self, item_type: Option<ItemType>) -> Result<Vec<AuthItem>, RbacError>;

    /// Items whose names are in `names`; unknown names are skipped.
    async fn find_items(&self, names: &[String]) -> Result<Vec<AuthItem>, RbacError>;

    async fn insert_item(&self, item: &AuthItem) -> Result<(), RbacError>;

    /// Overwrite the item stored as `old_name`. When `item.name` differs this
    /// is a rename and every edge and assignment follows the new name.
    async fn update_item(&self, old_name: &str, item: &AuthItem) -> Result<(), RbacError>;

    /// Delete the item with its edges and assignments. Returns whether it existed.
    async fn remove_item(&self, name: &str) -> Result<bool, RbacError>;
}

#[async_trait]
pub trait EdgeStore: Send + Sync {
    async fn insert_edge(&self, parent: &str, child: &str) -> Result<(), RbacError>;

    async fn remove_edge(&self, parent: &str, child: &str) -> Result<bool, RbacError>;

    async fn has_edge(&self, parent: &str, child: &str) -> Result<bool, RbacError>;

    /// Union of the direct children of every name in `parents`, deduplicated.
    async fn child_names(&self, parents: &[String]) -> Result<Vec<String>, RbacError>;

    /// Direct parents of `child`.
    async fn parent_names(&self, child: &str) -> Result<Vec<String>, RbacError>;

    /// Every `(parent, child)` edge.
    async fn all_edges(&self) -> Result<Vec<(String, String)>, RbacError>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), RbacError>;

    /// Returns `false` when there is no such assignment.
    async fn update_assignment(&self, assignment: &Assignment) -> Result<bool, RbacError>;

    async fn remove_assignment(&self, user_id: &str, item_name: &str) -> Result<bool, RbacError>;

    async fn get_assignment(
        &self,
        user_id: &str,
        item_name: &str,
    ) -> Result<Option<Assignment>, RbacError>;

    async fn assignments_for(&self, user_id: &str) -> Result<Vec<Assignment>, RbacError>;

    async fn all_assignments(&self) -> Result<Vec<Assignment>, RbacError>;

    async fn clear_assignments(&self) -> Result<(), RbacError>;
}

#[async_trait]
pub trait AuthStore: ItemStore + EdgeStore + AssignmentStore {
    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Persist pending changes. A no-op for stores that write through.
    async fn save(&self) -> Result<(), RbacError>;

    /// Remove all items, edges and assignments.
    async fn clear_all(&self) -> Result<(), RbacError>;

    /// Swap the whole policy for `snapshot` in one step; on error the
    /// previous policy is left as it was. The snapshot must already be
    /// validated.
    async fn replace_all(&self, snapshot: &Snapshot) -> Result<(), RbacError>;
}

/// Open the backend selected in `settings`.
pub async fn open(settings: &Settings) -> Result<Arc<dyn AuthStore>, RbacError> {
    let store: Arc<dyn AuthStore> = match settings.rbac.backend {
        Backend::Database => Arc::new(DatabaseStore::connect(&settings.database).await?),
        Backend::File => Arc::new(FileStore::open(&settings.file.path).await?),
    };
    tracing::info!(backend = store.backend_name(), "Opened authorization store");
    Ok(store)
}
