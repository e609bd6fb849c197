pub mod auth_assignment;
pub mod auth_item;
pub mod auth_item_child;

pub use auth_assignment::Entity as AuthAssignment;
pub use auth_item::Entity as AuthItem;
pub use auth_item_child::Entity as AuthItemChild;
