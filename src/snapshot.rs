//! Serialized form of a complete policy: a JSON object keyed by item name.
//!
//! ```json
//! {
//!   "admin": {
//!     "type": 2,
//!     "description": "Administrator",
//!     "condition": null,
//!     "data": null,
//!     "children": ["managePosts"],
//!     "assignments": { "alice": { "condition": null, "data": null } }
//!   }
//! }
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::condition::Condition;
use crate::errors::RbacError;
use crate::types::{Assignment, AuthItem, ItemType};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub items: BTreeMap<String, SnapshotItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotItem {
    #[serde(rename = "type")]
    pub item_type: ItemType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub data: Value,
    #[serde(default)]
    pub children: Vec<String>,
    #[serde(default)]
    pub assignments: BTreeMap<String, SnapshotAssignment>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotAssignment {
    #[serde(default)]
    pub condition: Option<Condition>,
    #[serde(default)]
    pub data: Value,
}

impl Snapshot {
    /// Read a snapshot file. A missing file is an empty policy; any other
    /// read failure is an error.
    pub fn read(path: &Path) -> Result<Self, RbacError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(RbacError::SnapshotLoad {
                    path: path.display().to_string(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&contents)?)
    }

    /// Write the snapshot next to `path` and move it into place.
    pub fn write(&self, path: &Path) -> Result<(), RbacError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let mut tmp = path.as_os_str().to_owned();
        tmp.push(".tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    /// Assemble a snapshot from flat record lists. Edges and assignments that
    /// refer to unknown items are dropped.
    pub fn from_parts(
        items: Vec<AuthItem>,
        edges: Vec<(String, String)>,
        assignments: Vec<Assignment>,
    ) -> Self {
        let mut out = BTreeMap::new();
        for item in items {
            out.insert(
                item.name,
                SnapshotItem {
                    item_type: item.item_type,
                    description: item.description,
                    condition: item.condition,
                    data: item.data,
                    children: Vec::new(),
                    assignments: BTreeMap::new(),
                },
            );
        }
        for (parent, child) in edges {
            if out.contains_key(&child) {
                if let Some(entry) = out.get_mut(&parent) {
                    entry.children.push(child);
                }
            }
        }
        for a in assignments {
            if let Some(entry) = out.get_mut(&a.item_name) {
                entry.assignments.insert(
                    a.user_id,
                    SnapshotAssignment {
                        condition: a.condition,
                        data: a.data,
                    },
                );
            }
        }
        Self { items: out }
    }

    /// Check the snapshot as a complete policy before it replaces one.
    ///
    /// Children that name no item are dropped with a warning and repeated
    /// children collapse to one edge. Every remaining edge must respect type
    /// ordering and the hierarchy must be acyclic.
    pub fn validated(&self) -> Result<Snapshot, RbacError> {
        let types: HashMap<String, ItemType> = self
            .items
            .iter()
            .map(|(name, entry)| (name.clone(), entry.item_type))
            .collect();

        let mut out = self.clone();
        for (parent, entry) in out.items.iter_mut() {
            let mut seen = BTreeSet::new();
            entry.children.retain(|child| {
                if !types.contains_key(child) {
                    tracing::warn!(parent = %parent, child = %child, "skipping snapshot child that names no item");
                    return false;
                }
                seen.insert(child.clone())
            });

            for child in &entry.children {
                if child == parent {
                    return Err(RbacError::LoopDetected {
                        parent: parent.clone(),
                        child: child.clone(),
                    });
                }
                let child_type = types[child];
                if !entry.item_type.can_contain(child_type) {
                    return Err(RbacError::InvalidTypeOrdering {
                        parent: parent.clone(),
                        parent_type: entry.item_type,
                        child: child.clone(),
                        child_type,
                    });
                }
            }
        }

        out.check_acyclic()?;
        Ok(out)
    }

    /// Depth-first search over child edges; every child must name an item.
    fn check_acyclic(&self) -> Result<(), RbacError> {
        enum Mark {
            OnPath,
            Done,
        }

        let mut marks: HashMap<&str, Mark> = HashMap::new();
        for root in self.items.keys() {
            if marks.contains_key(root.as_str()) {
                continue;
            }
            marks.insert(root, Mark::OnPath);
            let mut stack: Vec<(&str, usize)> = vec![(root.as_str(), 0)];

            while let Some(&(node, next)) = stack.last() {
                let children = &self.items[node].children;
                let Some(child) = children.get(next) else {
                    marks.insert(node, Mark::Done);
                    stack.pop();
                    continue;
                };
                if let Some(top) = stack.last_mut() {
                    top.1 += 1;
                }
                match marks.get(child.as_str()) {
                    Some(Mark::OnPath) => {
                        return Err(RbacError::LoopDetected {
                            parent: node.to_string(),
                            child: child.clone(),
                        });
                    }
                    Some(Mark::Done) => {}
                    None => {
                        marks.insert(child, Mark::OnPath);
                        stack.push((child.as_str(), 0));
                    }
                }
            }
        }
        Ok(())
    }

    pub fn items(&self) -> impl Iterator<Item = AuthItem> + '_ {
        self.items.iter().map(|(name, entry)| AuthItem {
            name: name.clone(),
            item_type: entry.item_type,
            description: entry.description.clone(),
            condition: entry.condition.clone(),
            data: entry.data.clone(),
        })
    }

    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.items.iter().flat_map(|(parent, entry)| {
            entry
                .children
                .iter()
                .map(move |child| (parent.as_str(), child.as_str()))
        })
    }

    pub fn assignments(&self) -> impl Iterator<Item = Assignment> + '_ {
        self.items.iter().flat_map(|(item_name, entry)| {
            entry.assignments.iter().map(move |(user_id, a)| Assignment {
                user_id: user_id.clone(),
                item_name: item_name.clone(),
                condition: a.condition.clone(),
                data: a.data.clone(),
            })
        })
    }
}
