//! The policy engine: access checks and every mutation of the item graph.
//!
//! Graph invariants (type ordering, acyclicity, uniqueness) are enforced here
//! once, against the [`AuthStore`] traits, so both backends behave the same.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use serde_json::Value;

use crate::condition::Condition;
use crate::errors::RbacError;
use crate::rules::{Evaluator, RuleRegistry};
use crate::settings::Settings;
use crate::snapshot::Snapshot;
use crate::store::{self, AuthStore};
use crate::types::{Assignment, AuthItem, ItemType, Params};

pub struct PolicyEngine {
    store: Arc<dyn AuthStore>,
    evaluator: Evaluator,
    default_roles: HashSet<String>,
}

impl std::fmt::Debug for PolicyEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyEngine")
            .field("backend", &self.store.backend_name())
            .field("evaluator", &self.evaluator)
            .field("default_roles", &self.default_roles)
            .finish()
    }
}

impl PolicyEngine {
    pub fn new(store: Arc<dyn AuthStore>) -> Self {
        Self {
            store,
            evaluator: Evaluator::default(),
            default_roles: HashSet::new(),
        }
    }

    /// Open the configured backend and apply the `[rbac]` settings.
    pub async fn from_settings(settings: &Settings) -> Result<Self, RbacError> {
        let store = store::open(settings).await?;
        Ok(Self::new(store)
            .with_default_roles(settings.rbac.default_roles.iter().cloned())
            .with_surface_errors(settings.rbac.surface_errors))
    }

    pub fn with_default_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.default_roles = roles.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_surface_errors(mut self, surface_errors: bool) -> Self {
        self.evaluator.set_surface_errors(surface_errors);
        self
    }

    pub fn with_rules(mut self, rules: RuleRegistry) -> Self {
        *self.evaluator.rules_mut() = rules;
        self
    }

    /// Register a native rule, referenced from conditions as `@name`.
    pub fn register_rule<F>(&mut self, name: impl Into<String>, rule: F)
    where
        F: Fn(&Params, &Value) -> Result<bool, String> + Send + Sync + 'static,
    {
        self.evaluator.rules_mut().register(name, rule);
    }

    pub fn store(&self) -> &Arc<dyn AuthStore> {
        &self.store
    }

    pub fn default_roles(&self) -> &HashSet<String> {
        &self.default_roles
    }

    // ---------- access checks ----------

    /// Whether `user_id` may use `item_name` given `params`.
    ///
    /// Walks upward from the item: an item is granted when its own condition
    /// passes and it is a default role, or the user holds an assignment for it
    /// whose condition passes, or any parent is granted. Unknown items and
    /// failing conditions deny. Only backend failures (and condition failures
    /// when `surface_errors` is set) are returned as errors.
    pub async fn check_access(
        &self,
        user_id: &str,
        item_name: &str,
        params: &Params,
    ) -> Result<bool, RbacError> {
        let params = with_user_id(user_id, params);

        let assignments: HashMap<String, Assignment> = self
            .store
            .assignments_for(user_id)
            .await?
            .into_iter()
            .map(|a| (a.item_name.clone(), a))
            .collect();

        let mut visited = HashSet::new();
        let mut stack = vec![item_name.to_string()];

        while let Some(name) = stack.pop() {
            if !visited.insert(name.clone()) {
                continue;
            }

            // 1. Unknown items grant nothing
            let Some(item) = self.store.get_item(&name).await? else {
                continue;
            };

            // 2. A failing item condition blocks everything reached only through it
            if !self
                .evaluator
                .evaluate(item.condition.as_ref(), &params, &item.data)?
            {
                tracing::debug!(user_id, item = %name, "item condition failed");
                continue;
            }

            // 3. Default roles are held by everyone
            if self.default_roles.contains(&name) {
                tracing::debug!(user_id, item = item_name, via = %name, "access granted by default role");
                return Ok(true);
            }

            // 4. Explicit assignment
            if let Some(assignment) = assignments.get(&name) {
                if self.evaluator.evaluate(
                    assignment.condition.as_ref(),
                    &params,
                    &assignment.data,
                )? {
                    tracing::debug!(user_id, item = item_name, via = %name, "access granted by assignment");
                    return Ok(true);
                }
            }

            // 5. Otherwise any parent may grant it
            let parents = self.store.parent_names(&name).await?;
            stack.extend(parents.into_iter().rev());
        }

        tracing::debug!(user_id, item = item_name, "access denied");
        Ok(false)
    }

    /// Whether `target` is `item_name` itself or reachable from it through
    /// children whose conditions pass, evaluated on behalf of `user_id`.
    /// Assignments are not consulted.
    pub async fn item_covers(
        &self,
        user_id: &str,
        item_name: &str,
        target: &str,
        params: &Params,
    ) -> Result<bool, RbacError> {
        let params = with_user_id(user_id, params);
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([item_name.to_string()]);

        while let Some(name) = queue.pop_front() {
            if !visited.insert(name.clone()) {
                continue;
            }
            let Some(item) = self.store.get_item(&name).await? else {
                continue;
            };
            if !self
                .evaluator
                .evaluate(item.condition.as_ref(), &params, &item.data)?
            {
                continue;
            }
            if name == target {
                return Ok(true);
            }
            queue.extend(self.store.child_names(&[name]).await?);
        }
        Ok(false)
    }

    // ---------- items ----------

    pub async fn create_item(&self, item: AuthItem) -> Result<AuthItem, RbacError> {
        if self.store.get_item(&item.name).await?.is_some() {
            return Err(RbacError::NameCollision(item.name));
        }
        self.store.insert_item(&item).await?;
        tracing::debug!(item = %item.name, item_type = %item.item_type, "created item");
        Ok(item)
    }

    pub async fn create_role(
        &self,
        name: &str,
        description: &str,
    ) -> Result<AuthItem, RbacError> {
        self.create_item(AuthItem::new(name, ItemType::Role).with_description(description))
            .await
    }

    pub async fn create_task(
        &self,
        name: &str,
        description: &str,
    ) -> Result<AuthItem, RbacError> {
        self.create_item(AuthItem::new(name, ItemType::Task).with_description(description))
            .await
    }

    pub async fn create_operation(
        &self,
        name: &str,
        description: &str,
    ) -> Result<AuthItem, RbacError> {
        self.create_item(AuthItem::new(name, ItemType::Operation).with_description(description))
            .await
    }

    pub async fn get_item(&self, name: &str) -> Result<Option<AuthItem>, RbacError> {
        self.store.get_item(name).await
    }

    /// Write `item` back over the item stored as `old_name`.
    ///
    /// A different `item.name` renames the item; edges and assignments follow.
    /// A type change is rejected when an existing edge would break ordering.
    pub async fn update_item(&self, old_name: &str, item: &AuthItem) -> Result<(), RbacError> {
        let current = self
            .store
            .get_item(old_name)
            .await?
            .ok_or_else(|| RbacError::ItemNotFound(old_name.to_string()))?;

        if item.name != old_name && self.store.get_item(&item.name).await?.is_some() {
            return Err(RbacError::NameCollision(item.name.clone()));
        }

        if item.item_type != current.item_type {
            let parents = self.store.parent_names(old_name).await?;
            for parent in self.store.find_items(&parents).await? {
                if !parent.item_type.can_contain(item.item_type) {
                    return Err(RbacError::InvalidTypeOrdering {
                        parent: parent.name,
                        parent_type: parent.item_type,
                        child: item.name.clone(),
                        child_type: item.item_type,
                    });
                }
            }
            let children = self.store.child_names(&[old_name.to_string()]).await?;
            for child in self.store.find_items(&children).await? {
                if !item.item_type.can_contain(child.item_type) {
                    return Err(RbacError::InvalidTypeOrdering {
                        parent: item.name.clone(),
                        parent_type: item.item_type,
                        child: child.name,
                        child_type: child.item_type,
                    });
                }
            }
        }

        self.store.update_item(old_name, item).await?;
        if item.name != old_name {
            tracing::debug!(from = old_name, to = %item.name, "renamed item");
        }
        Ok(())
    }

    /// Remove an item with every edge and assignment that references it.
    pub async fn remove_item(&self, name: &str) -> Result<bool, RbacError> {
        let removed = self.store.remove_item(name).await?;
        if removed {
            tracing::debug!(item = name, "removed item");
        }
        Ok(removed)
    }

    /// List items, optionally only those assigned to `user_id` and only of one type.
    pub async fn get_items(
        &self,
        user_id: Option<&str>,
        item_type: Option<ItemType>,
    ) -> Result<Vec<AuthItem>, RbacError> {
        let Some(user_id) = user_id else {
            return self.store.list_items(item_type).await;
        };
        let names: Vec<String> = self
            .store
            .assignments_for(user_id)
            .await?
            .into_iter()
            .map(|a| a.item_name)
            .collect();
        let mut items = self.store.find_items(&names).await?;
        items.retain(|item| item_type.is_none_or(|t| item.item_type == t));
        Ok(items)
    }

    pub async fn get_roles(&self, user_id: Option<&str>) -> Result<Vec<AuthItem>, RbacError> {
        self.get_items(user_id, Some(ItemType::Role)).await
    }

    pub async fn get_tasks(&self, user_id: Option<&str>) -> Result<Vec<AuthItem>, RbacError> {
        self.get_items(user_id, Some(ItemType::Task)).await
    }

    pub async fn get_operations(&self, user_id: Option<&str>) -> Result<Vec<AuthItem>, RbacError> {
        self.get_items(user_id, Some(ItemType::Operation)).await
    }

    // ---------- hierarchy ----------

    pub async fn add_item_child(&self, parent: &str, child: &str) -> Result<(), RbacError> {
        if parent == child {
            return Err(RbacError::LoopDetected {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }

        let parent_item = self
            .store
            .get_item(parent)
            .await?
            .ok_or_else(|| RbacError::ItemNotFound(parent.to_string()))?;
        let child_item = self
            .store
            .get_item(child)
            .await?
            .ok_or_else(|| RbacError::ItemNotFound(child.to_string()))?;

        if !parent_item.item_type.can_contain(child_item.item_type) {
            return Err(RbacError::InvalidTypeOrdering {
                parent: parent_item.name,
                parent_type: parent_item.item_type,
                child: child_item.name,
                child_type: child_item.item_type,
            });
        }

        if self.store.has_edge(parent, child).await? {
            return Err(RbacError::EdgeExists {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }

        if self.reaches(child, parent).await? {
            return Err(RbacError::LoopDetected {
                parent: parent.to_string(),
                child: child.to_string(),
            });
        }

        self.store.insert_edge(parent, child).await?;
        tracing::debug!(parent, child, "added item child");
        Ok(())
    }

    /// Whether `to` is a descendant of `from`, expanding one level per query.
    async fn reaches(&self, from: &str, to: &str) -> Result<bool, RbacError> {
        let mut seen: HashSet<String> = HashSet::from([from.to_string()]);
        let mut frontier = vec![from.to_string()];

        while !frontier.is_empty() {
            let children = self.store.child_names(&frontier).await?;
            frontier.clear();
            for child in children {
                if child == to {
                    return Ok(true);
                }
                if seen.insert(child.clone()) {
                    frontier.push(child);
                }
            }
        }
        Ok(false)
    }

    pub async fn remove_item_child(&self, parent: &str, child: &str) -> Result<bool, RbacError> {
        let removed = self.store.remove_edge(parent, child).await?;
        if removed {
            tracing::debug!(parent, child, "removed item child");
        }
        Ok(removed)
    }

    pub async fn has_item_child(&self, parent: &str, child: &str) -> Result<bool, RbacError> {
        self.store.has_edge(parent, child).await
    }

    /// Direct children of every item in `names`, deduplicated.
    pub async fn get_item_children<S: AsRef<str>>(
        &self,
        names: &[S],
    ) -> Result<Vec<AuthItem>, RbacError> {
        let names: Vec<String> = names.iter().map(|n| n.as_ref().to_string()).collect();
        let children = self.store.child_names(&names).await?;
        self.store.find_items(&children).await
    }

    // ---------- assignments ----------

    pub async fn assign(
        &self,
        user_id: &str,
        item_name: &str,
        condition: Option<Condition>,
        data: Value,
    ) -> Result<Assignment, RbacError> {
        if self.store.get_assignment(user_id, item_name).await?.is_some() {
            return Err(RbacError::DuplicateAssignment {
                user_id: user_id.to_string(),
                item: item_name.to_string(),
            });
        }
        let assignment = Assignment {
            user_id: user_id.to_string(),
            item_name: item_name.to_string(),
            condition,
            data,
        };
        self.store.insert_assignment(&assignment).await?;
        tracing::debug!(user_id, item = item_name, "assigned item");
        Ok(assignment)
    }

    pub async fn revoke(&self, user_id: &str, item_name: &str) -> Result<bool, RbacError> {
        let removed = self.store.remove_assignment(user_id, item_name).await?;
        if removed {
            tracing::debug!(user_id, item = item_name, "revoked item");
        }
        Ok(removed)
    }

    pub async fn is_assigned(&self, user_id: &str, item_name: &str) -> Result<bool, RbacError> {
        Ok(self.store.get_assignment(user_id, item_name).await?.is_some())
    }

    pub async fn get_assignment(
        &self,
        user_id: &str,
        item_name: &str,
    ) -> Result<Option<Assignment>, RbacError> {
        self.store.get_assignment(user_id, item_name).await
    }

    pub async fn get_assignments(&self, user_id: &str) -> Result<Vec<Assignment>, RbacError> {
        self.store.assignments_for(user_id).await
    }

    /// Write back the condition and data of an existing assignment.
    pub async fn update_assignment(&self, assignment: &Assignment) -> Result<(), RbacError> {
        if !self.store.update_assignment(assignment).await? {
            return Err(RbacError::AssignmentNotFound {
                user_id: assignment.user_id.clone(),
                item: assignment.item_name.clone(),
            });
        }
        Ok(())
    }

    // ---------- bulk ----------

    pub async fn clear_assignments(&self) -> Result<(), RbacError> {
        self.store.clear_assignments().await
    }

    pub async fn clear_all(&self) -> Result<(), RbacError> {
        self.store.clear_all().await
    }

    /// Persist pending changes (the file backend); a no-op for the database.
    pub async fn save(&self) -> Result<(), RbacError> {
        self.store.save().await
    }

    pub async fn export_snapshot(&self) -> Result<Snapshot, RbacError> {
        Ok(Snapshot::from_parts(
            self.store.list_items(None).await?,
            self.store.all_edges().await?,
            self.store.all_assignments().await?,
        ))
    }

    /// Replace the whole policy with `snapshot`. The snapshot is checked for
    /// loops and bad type pairings before the store is touched, so a rejected
    /// snapshot leaves the current policy in place. The caller decides whether
    /// to [`save`](Self::save) the result.
    pub async fn import_snapshot(&self, snapshot: &Snapshot) -> Result<(), RbacError> {
        let snapshot = snapshot.validated()?;
        self.store.replace_all(&snapshot).await?;
        tracing::info!(items = snapshot.items.len(), "Imported authorization snapshot");
        Ok(())
    }
}

/// `params` with `userId` set to `user_id` unless the caller supplied one.
fn with_user_id(user_id: &str, params: &Params) -> Params {
    let mut params = params.clone();
    params
        .entry("userId")
        .or_insert_with(|| Value::String(user_id.to_string()));
    params
}
