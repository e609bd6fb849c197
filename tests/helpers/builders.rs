use serde_json::Value;
use warden::{Assignment, AuthItem, Condition, ItemType, PolicyEngine};

/// Builder for creating test items with their children
pub struct ItemBuilder {
    item: AuthItem,
    children: Vec<String>,
}

impl ItemBuilder {
    pub fn role(name: &str) -> Self {
        Self::new(name, ItemType::Role)
    }

    pub fn task(name: &str) -> Self {
        Self::new(name, ItemType::Task)
    }

    pub fn operation(name: &str) -> Self {
        Self::new(name, ItemType::Operation)
    }

    fn new(name: &str, item_type: ItemType) -> Self {
        Self {
            item: AuthItem::new(name, item_type),
            children: Vec::new(),
        }
    }

    pub fn description(mut self, description: &str) -> Self {
        self.item.description = description.to_string();
        self
    }

    pub fn condition(mut self, condition: &str) -> Self {
        self.item.condition = Some(Condition::parse(condition).expect("Invalid test condition"));
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.item.data = data;
        self
    }

    /// Link an existing item as a child once this one is created
    pub fn child(mut self, name: &str) -> Self {
        self.children.push(name.to_string());
        self
    }

    pub async fn create(self, engine: &PolicyEngine) -> AuthItem {
        let item = engine
            .create_item(self.item)
            .await
            .expect("Failed to create test item");
        for child in &self.children {
            engine
                .add_item_child(&item.name, child)
                .await
                .expect("Failed to link test child");
        }
        item
    }
}

/// Builder for creating test assignments
pub struct AssignmentBuilder {
    user_id: String,
    item_name: String,
    condition: Option<Condition>,
    data: Value,
}

impl AssignmentBuilder {
    pub fn new(user_id: &str, item_name: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            item_name: item_name.to_string(),
            condition: None,
            data: Value::Null,
        }
    }

    pub fn condition(mut self, condition: &str) -> Self {
        self.condition = Some(Condition::parse(condition).expect("Invalid test condition"));
        self
    }

    pub fn data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    pub async fn create(self, engine: &PolicyEngine) -> Assignment {
        engine
            .assign(&self.user_id, &self.item_name, self.condition, self.data)
            .await
            .expect("Failed to create test assignment")
    }
}

/// The blog hierarchy: admin -> managePosts -> editPost
pub async fn seed_blog(engine: &PolicyEngine) {
    ItemBuilder::operation("editPost").create(engine).await;
    ItemBuilder::task("managePosts")
        .child("editPost")
        .create(engine)
        .await;
    ItemBuilder::role("admin")
        .description("Administrator")
        .child("managePosts")
        .create(engine)
        .await;
}
