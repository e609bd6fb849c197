use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;

/// Caller-supplied parameters for condition evaluation. The engine adds
/// `userId` before walking the hierarchy.
pub type Params = serde_json::Map<String, Value>;

/// Kind of an authorization item. The ordering matters: an item may only
/// contain children whose type is lower than or equal to its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ItemType {
    Operation = 0,
    Task = 1,
    Role = 2,
}

impl ItemType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemType::Operation => "operation",
            ItemType::Task => "task",
            ItemType::Role => "role",
        }
    }

    /// Whether an item of this type may have `child` as a direct child.
    pub fn can_contain(self, child: ItemType) -> bool {
        self >= child
    }
}

impl fmt::Display for ItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<ItemType> for i32 {
    fn from(value: ItemType) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for ItemType {
    type Error = String;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ItemType::Operation),
            1 => Ok(ItemType::Task),
            2 => Ok(ItemType::Role),
            other => Err(format!("invalid item type `{other}` (expected 0, 1 or 2)")),
        }
    }
}

impl FromStr for ItemType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "operation" | "0" => Ok(ItemType::Operation),
            "task" | "1" => Ok(ItemType::Task),
            "role" | "2" => Ok(ItemType::Role),
            other => Err(format!(
                "invalid item type `{other}` (expected operation, task or role)"
            )),
        }
    }
}

/// A node of the permission hierarchy.
///
/// Values are plain snapshots: changing a field does nothing until the item
/// is written back with [`crate::engine::PolicyEngine::update_item`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthItem {
    pub name: String,
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub data: Value,
}

impl AuthItem {
    pub fn new(name: impl Into<String>, item_type: ItemType) -> Self {
        Self {
            name: name.into(),
            item_type,
            description: String::new(),
            condition: None,
            data: Value::Null,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

/// A grant of an item to a user, optionally gated by its own condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub user_id: String,
    pub item_name: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub data: Value,
}

impl Assignment {
    pub fn new(user_id: impl Into<String>, item_name: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            item_name: item_name.into(),
            condition: None,
            data: Value::Null,
        }
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }
}

// ---------- API request/response types ----------

#[derive(Debug, Deserialize)]
pub struct CheckRequest {
    pub user_id: String,
    pub item: String,
    /// Parameters for condition evaluation
    #[serde(default)]
    pub params: Params,
}

#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    pub user_id: Option<String>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
}
