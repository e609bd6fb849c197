//! Snapshot-file backend.
//!
//! The whole policy is loaded into memory when the store is opened and every
//! query runs against that copy. Mutations stay in memory until [`AuthStore::save`]
//! writes the full state back. Only one process should write a given file.
//!
//! Item names are interned to integer handles so edges and assignments never
//! repeat the name, which also makes a rename a single map update.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::condition::Condition;
use crate::errors::RbacError;
use crate::snapshot::Snapshot;
use crate::store::{AssignmentStore, AuthStore, EdgeStore, ItemStore};
use crate::types::{Assignment, AuthItem, ItemType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct ItemId(u32);

#[derive(Debug, Clone)]
struct Grant {
    condition: Option<Condition>,
    data: Value,
}

#[derive(Debug, Default)]
struct Graph {
    ids: HashMap<String, ItemId>,
    items: HashMap<ItemId, AuthItem>,
    children: HashMap<ItemId, BTreeSet<ItemId>>,
    parents: HashMap<ItemId, BTreeSet<ItemId>>,
    /// user id -> item -> grant
    assignments: HashMap<String, BTreeMap<ItemId, Grant>>,
    next_id: u32,
}

impl Graph {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        let mut graph = Graph::default();
        for item in snapshot.items() {
            graph.insert_item(item);
        }
        for (parent, child) in snapshot.edges() {
            match (graph.id(parent), graph.id(child)) {
                (Some(p), Some(c)) if p != c => graph.link(p, c),
                _ => tracing::warn!(parent, child, "skipping invalid snapshot edge"),
            }
        }
        for a in snapshot.assignments() {
            if let Some(id) = graph.id(&a.item_name) {
                graph.assignments.entry(a.user_id).or_default().insert(
                    id,
                    Grant {
                        condition: a.condition,
                        data: a.data,
                    },
                );
            }
        }
        graph
    }

    fn to_snapshot(&self) -> Snapshot {
        let items = self.items.values().cloned().collect();
        let edges = self
            .children
            .iter()
            .flat_map(|(p, cs)| cs.iter().map(move |c| (self.name(*p), self.name(*c))))
            .collect();
        let assignments = self
            .assignments
            .iter()
            .flat_map(|(user_id, grants)| {
                grants
                    .iter()
                    .map(move |(id, grant)| self.assignment(user_id, *id, grant))
            })
            .collect();
        Snapshot::from_parts(items, edges, assignments)
    }

    fn id(&self, name: &str) -> Option<ItemId> {
        self.ids.get(name).copied()
    }

    fn name(&self, id: ItemId) -> String {
        self.items
            .get(&id)
            .map(|item| item.name.clone())
            .unwrap_or_default()
    }

    fn assignment(&self, user_id: &str, id: ItemId, grant: &Grant) -> Assignment {
        Assignment {
            user_id: user_id.to_string(),
            item_name: self.name(id),
            condition: grant.condition.clone(),
            data: grant.data.clone(),
        }
    }

    fn insert_item(&mut self, item: AuthItem) -> ItemId {
        let id = ItemId(self.next_id);
        self.next_id += 1;
        self.ids.insert(item.name.clone(), id);
        self.items.insert(id, item);
        id
    }

    fn link(&mut self, parent: ItemId, child: ItemId) {
        self.children.entry(parent).or_default().insert(child);
        self.parents.entry(child).or_default().insert(parent);
    }

    fn unlink(&mut self, parent: ItemId, child: ItemId) -> bool {
        let removed = self
            .children
            .get_mut(&parent)
            .is_some_and(|cs| cs.remove(&child));
        if let Some(ps) = self.parents.get_mut(&child) {
            ps.remove(&parent);
        }
        removed
    }

    fn remove_item(&mut self, name: &str) -> bool {
        let Some(id) = self.ids.remove(name) else {
            return false;
        };
        self.items.remove(&id);
        for child in self.children.remove(&id).unwrap_or_default() {
            if let Some(ps) = self.parents.get_mut(&child) {
                ps.remove(&id);
            }
        }
        for parent in self.parents.remove(&id).unwrap_or_default() {
            if let Some(cs) = self.children.get_mut(&parent) {
                cs.remove(&id);
            }
        }
        for grants in self.assignments.values_mut() {
            grants.remove(&id);
        }
        true
    }
}

fn sorted_by_name(mut items: Vec<AuthItem>) -> Vec<AuthItem> {
    items.sort_by(|a, b| a.name.cmp(&b.name));
    items
}

#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    graph: RwLock<Graph>,
}

impl FileStore {
    /// Open the snapshot at `path`, loading it fully into memory. A missing
    /// file starts an empty policy that is created on the first save.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, RbacError> {
        let path = path.as_ref().to_path_buf();
        let graph = Self::read_graph(&path)?;
        tracing::info!(
            path = %path.display(),
            items = graph.items.len(),
            "Loaded authorization snapshot"
        );
        Ok(Self {
            path,
            graph: RwLock::new(graph),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Discard in-memory state and load the snapshot file again.
    pub async fn reload(&self) -> Result<(), RbacError> {
        let graph = Self::read_graph(&self.path)?;
        *self.graph.write().await = graph;
        Ok(())
    }

    fn read_graph(path: &Path) -> Result<Graph, RbacError> {
        let snapshot = Snapshot::read(path)?;
        Ok(Graph::from_snapshot(&snapshot))
    }
}

#[async_trait]
impl ItemStore for FileStore {
    async fn get_item(&self, name: &str) -> Result<Option<AuthItem>, RbacError> {
        let graph = self.graph.read().await;
        Ok(graph.id(name).and_then(|id| graph.items.get(&id)).cloned())
    }

    async fn list_items(&self, item_type: Option<ItemType>) -> Result<Vec<AuthItem>, RbacError> {
        let graph = self.graph.read().await;
        let items = graph
            .items
            .values()
            .filter(|item| item_type.is_none_or(|t| item.item_type == t))
            .cloned()
            .collect();
        Ok(sorted_by_name(items))
    }

    async fn find_items(&self, names: &[String]) -> Result<Vec<AuthItem>, RbacError> {
        let graph = self.graph.read().await;
        let wanted: BTreeSet<&str> = names.iter().map(String::as_str).collect();
        let items = wanted
            .into_iter()
            .filter_map(|name| graph.id(name).and_then(|id| graph.items.get(&id)))
            .cloned()
            .collect();
        Ok(items)
    }

    async fn insert_item(&self, item: &AuthItem) -> Result<(), RbacError> {
        let mut graph = self.graph.write().await;
        if graph.ids.contains_key(&item.name) {
            return Err(RbacError::NameCollision(item.name.clone()));
        }
        graph.insert_item(item.clone());
        Ok(())
    }

    async fn update_item(&self, old_name: &str, item: &AuthItem) -> Result<(), RbacError> {
        let mut graph = self.graph.write().await;
        let id = graph
            .id(old_name)
            .ok_or_else(|| RbacError::ItemNotFound(old_name.to_string()))?;
        if item.name != old_name {
            if graph.ids.contains_key(&item.name) {
                return Err(RbacError::NameCollision(item.name.clone()));
            }
            graph.ids.remove(old_name);
            graph.ids.insert(item.name.clone(), id);
        }
        graph.items.insert(id, item.clone());
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<bool, RbacError> {
        Ok(self.graph.write().await.remove_item(name))
    }
}

#[async_trait]
impl EdgeStore for FileStore {
    async fn insert_edge(&self, parent: &str, child: &str) -> Result<(), RbacError> {
        let mut graph = self.graph.write().await;
        let p = graph
            .id(parent)
            .ok_or_else(|| RbacError::ItemNotFound(parent.to_string()))?;
        let c = graph
            .id(child)
            .ok_or_else(|| RbacError::ItemNotFound(child.to_string()))?;
        graph.link(p, c);
        Ok(())
    }

    async fn remove_edge(&self, parent: &str, child: &str) -> Result<bool, RbacError> {
        let mut graph = self.graph.write().await;
        match (graph.id(parent), graph.id(child)) {
            (Some(p), Some(c)) => Ok(graph.unlink(p, c)),
            _ => Ok(false),
        }
    }

    async fn has_edge(&self, parent: &str, child: &str) -> Result<bool, RbacError> {
        let graph = self.graph.read().await;
        Ok(match (graph.id(parent), graph.id(child)) {
            (Some(p), Some(c)) => graph.children.get(&p).is_some_and(|cs| cs.contains(&c)),
            _ => false,
        })
    }

    async fn child_names(&self, parents: &[String]) -> Result<Vec<String>, RbacError> {
        let graph = self.graph.read().await;
        let names: BTreeSet<String> = parents
            .iter()
            .filter_map(|p| graph.id(p))
            .filter_map(|p| graph.children.get(&p))
            .flatten()
            .map(|c| graph.name(*c))
            .collect();
        Ok(names.into_iter().collect())
    }

    async fn parent_names(&self, child: &str) -> Result<Vec<String>, RbacError> {
        let graph = self.graph.read().await;
        let Some(c) = graph.id(child) else {
            return Ok(Vec::new());
        };
        let mut names: Vec<String> = graph
            .parents
            .get(&c)
            .into_iter()
            .flatten()
            .map(|p| graph.name(*p))
            .collect();
        names.sort();
        Ok(names)
    }

    async fn all_edges(&self) -> Result<Vec<(String, String)>, RbacError> {
        let guard = self.graph.read().await;
        let graph = &*guard;
        let mut edges: Vec<(String, String)> = graph
            .children
            .iter()
            .flat_map(|(p, cs)| cs.iter().map(move |c| (graph.name(*p), graph.name(*c))))
            .collect();
        edges.sort();
        Ok(edges)
    }
}

#[async_trait]
impl AssignmentStore for FileStore {
    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), RbacError> {
        let mut graph = self.graph.write().await;
        let id = graph
            .id(&assignment.item_name)
            .ok_or_else(|| RbacError::ItemNotFound(assignment.item_name.clone()))?;
        let grants = graph
            .assignments
            .entry(assignment.user_id.clone())
            .or_default();
        if grants.contains_key(&id) {
            return Err(RbacError::DuplicateAssignment {
                user_id: assignment.user_id.clone(),
                item: assignment.item_name.clone(),
            });
        }
        grants.insert(
            id,
            Grant {
                condition: assignment.condition.clone(),
                data: assignment.data.clone(),
            },
        );
        Ok(())
    }

    async fn update_assignment(&self, assignment: &Assignment) -> Result<bool, RbacError> {
        let mut graph = self.graph.write().await;
        let Some(id) = graph.id(&assignment.item_name) else {
            return Ok(false);
        };
        let Some(grant) = graph
            .assignments
            .get_mut(&assignment.user_id)
            .and_then(|grants| grants.get_mut(&id))
        else {
            return Ok(false);
        };
        grant.condition = assignment.condition.clone();
        grant.data = assignment.data.clone();
        Ok(true)
    }

    async fn remove_assignment(&self, user_id: &str, item_name: &str) -> Result<bool, RbacError> {
        let mut graph = self.graph.write().await;
        let Some(id) = graph.id(item_name) else {
            return Ok(false);
        };
        Ok(graph
            .assignments
            .get_mut(user_id)
            .is_some_and(|grants| grants.remove(&id).is_some()))
    }

    async fn get_assignment(
        &self,
        user_id: &str,
        item_name: &str,
    ) -> Result<Option<Assignment>, RbacError> {
        let graph = self.graph.read().await;
        let Some(id) = graph.id(item_name) else {
            return Ok(None);
        };
        Ok(graph
            .assignments
            .get(user_id)
            .and_then(|grants| grants.get(&id))
            .map(|grant| graph.assignment(user_id, id, grant)))
    }

    async fn assignments_for(&self, user_id: &str) -> Result<Vec<Assignment>, RbacError> {
        let graph = self.graph.read().await;
        let mut out: Vec<Assignment> = graph
            .assignments
            .get(user_id)
            .into_iter()
            .flatten()
            .map(|(id, grant)| graph.assignment(user_id, *id, grant))
            .collect();
        out.sort_by(|a, b| a.item_name.cmp(&b.item_name));
        Ok(out)
    }

    async fn all_assignments(&self) -> Result<Vec<Assignment>, RbacError> {
        let guard = self.graph.read().await;
        let graph = &*guard;
        let mut out: Vec<Assignment> = graph
            .assignments
            .iter()
            .flat_map(|(user_id, grants)| {
                grants
                    .iter()
                    .map(move |(id, grant)| graph.assignment(user_id, *id, grant))
            })
            .collect();
        out.sort_by(|a, b| (&a.user_id, &a.item_name).cmp(&(&b.user_id, &b.item_name)));
        Ok(out)
    }

    async fn clear_assignments(&self) -> Result<(), RbacError> {
        self.graph.write().await.assignments.clear();
        Ok(())
    }
}

#[async_trait]
impl AuthStore for FileStore {
    fn backend_name(&self) -> &'static str {
        "file"
    }

    async fn save(&self) -> Result<(), RbacError> {
        let snapshot = self.graph.read().await.to_snapshot();
        snapshot.write(&self.path)?;
        tracing::info!(
            path = %self.path.display(),
            items = snapshot.items.len(),
            "Saved authorization snapshot"
        );
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), RbacError> {
        *self.graph.write().await = Graph::default();
        Ok(())
    }

    async fn replace_all(&self, snapshot: &Snapshot) -> Result<(), RbacError> {
        let graph = Graph::from_snapshot(snapshot);
        *self.graph.write().await = graph;
        Ok(())
    }
}
