//! Relational backend. Every call goes straight to the database; nothing is
//! cached, so changes made by other processes are visible immediately.

use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, DbErr,
    EntityTrait, QueryFilter, QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde_json::Value;

use crate::condition::Condition;
use crate::entities::{auth_assignment, auth_item, auth_item_child};
use crate::errors::RbacError;
use crate::settings::Database as DbCfg;
use crate::snapshot::Snapshot;
use crate::store::{AssignmentStore, AuthStore, EdgeStore, ItemStore};
use crate::types::{Assignment, AuthItem, ItemType};

#[derive(Debug, Clone)]
pub struct DatabaseStore {
    db: DatabaseConnection,
    /// Look the item up before inserting an assignment instead of relying on
    /// the foreign key alone. SQLite enforces foreign keys only while the
    /// connection's `foreign_keys` pragma is on, so it defaults to strict.
    strict_assignments: bool,
}

impl DatabaseStore {
    pub fn new(db: DatabaseConnection, strict_assignments: Option<bool>) -> Self {
        let strict_assignments = strict_assignments
            .unwrap_or_else(|| db.get_database_backend() == DatabaseBackend::Sqlite);
        Self {
            db,
            strict_assignments,
        }
    }

    pub async fn connect(cfg: &DbCfg) -> Result<Self, RbacError> {
        let db = Database::connect(&cfg.url).await?;
        if cfg.run_migrations {
            Migrator::up(&db, None).await?;
            tracing::info!("Applied authorization schema migrations");
        }
        Ok(Self::new(db, cfg.strict_assignments))
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    pub fn strict_assignments(&self) -> bool {
        self.strict_assignments
    }
}

fn encode_data(data: &Value) -> Result<Option<String>, RbacError> {
    if data.is_null() {
        Ok(None)
    } else {
        Ok(Some(serde_json::to_string(data)?))
    }
}

fn decode_data(raw: Option<&str>) -> Result<Value, RbacError> {
    match raw {
        None | Some("") => Ok(Value::Null),
        Some(s) => Ok(serde_json::from_str(s)?),
    }
}

fn item_from_model(model: auth_item::Model) -> Result<AuthItem, RbacError> {
    let item_type = ItemType::try_from(model.item_type).map_err(|e| RbacError::Db(DbErr::Custom(e)))?;
    Ok(AuthItem {
        name: model.name,
        item_type,
        description: model.description.unwrap_or_default(),
        condition: Condition::parse_optional(model.condition.as_deref())?,
        data: decode_data(model.data.as_deref())?,
    })
}

fn assignment_from_model(model: auth_assignment::Model) -> Result<Assignment, RbacError> {
    Ok(Assignment {
        user_id: model.user_id,
        item_name: model.item_name,
        condition: Condition::parse_optional(model.condition.as_deref())?,
        data: decode_data(model.data.as_deref())?,
    })
}

fn description_column(item: &AuthItem) -> Option<String> {
    (!item.description.is_empty()).then(|| item.description.clone())
}

fn condition_column(condition: &Option<Condition>) -> Option<String> {
    condition.as_ref().map(|c| c.to_string())
}

fn item_model(item: &AuthItem) -> Result<auth_item::ActiveModel, RbacError> {
    Ok(auth_item::ActiveModel {
        name: Set(item.name.clone()),
        item_type: Set(item.item_type.into()),
        description: Set(description_column(item)),
        condition: Set(condition_column(&item.condition)),
        data: Set(encode_data(&item.data)?),
    })
}

fn edge_model(parent: &str, child: &str) -> auth_item_child::ActiveModel {
    auth_item_child::ActiveModel {
        parent: Set(parent.to_string()),
        child: Set(child.to_string()),
    }
}

fn assignment_model(assignment: &Assignment) -> Result<auth_assignment::ActiveModel, RbacError> {
    Ok(auth_assignment::ActiveModel {
        user_id: Set(assignment.user_id.clone()),
        item_name: Set(assignment.item_name.clone()),
        condition: Set(condition_column(&assignment.condition)),
        data: Set(encode_data(&assignment.data)?),
    })
}

#[async_trait]
impl ItemStore for DatabaseStore {
    async fn get_item(&self, name: &str) -> Result<Option<AuthItem>, RbacError> {
        auth_item::Entity::find_by_id(name.to_string())
            .one(&self.db)
            .await?
            .map(item_from_model)
            .transpose()
    }

    async fn list_items(&self, item_type: Option<ItemType>) -> Result<Vec<AuthItem>, RbacError> {
        use auth_item::{Column, Entity};

        let mut query = Entity::find().order_by_asc(Column::Name);
        if let Some(item_type) = item_type {
            query = query.filter(Column::ItemType.eq(i32::from(item_type)));
        }
        query
            .all(&self.db)
            .await?
            .into_iter()
            .map(item_from_model)
            .collect()
    }

    async fn find_items(&self, names: &[String]) -> Result<Vec<AuthItem>, RbacError> {
        use auth_item::{Column, Entity};

        if names.is_empty() {
            return Ok(Vec::new());
        }
        Entity::find()
            .filter(Column::Name.is_in(names.iter().cloned()))
            .order_by_asc(Column::Name)
            .all(&self.db)
            .await?
            .into_iter()
            .map(item_from_model)
            .collect()
    }

    async fn insert_item(&self, item: &AuthItem) -> Result<(), RbacError> {
        auth_item::Entity::insert(item_model(item)?)
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn update_item(&self, old_name: &str, item: &AuthItem) -> Result<(), RbacError> {
        let txn = self.db.begin().await?;

        auth_item::Entity::update_many()
            .col_expr(auth_item::Column::Name, Expr::value(item.name.clone()))
            .col_expr(
                auth_item::Column::ItemType,
                Expr::value(i32::from(item.item_type)),
            )
            .col_expr(
                auth_item::Column::Description,
                Expr::value(description_column(item)),
            )
            .col_expr(
                auth_item::Column::Condition,
                Expr::value(condition_column(&item.condition)),
            )
            .col_expr(auth_item::Column::Data, Expr::value(encode_data(&item.data)?))
            .filter(auth_item::Column::Name.eq(old_name))
            .exec(&txn)
            .await?;

        // With enforced foreign keys ON UPDATE CASCADE has already moved these
        // rows and the statements below match nothing.
        if item.name != old_name {
            auth_item_child::Entity::update_many()
                .col_expr(
                    auth_item_child::Column::Parent,
                    Expr::value(item.name.clone()),
                )
                .filter(auth_item_child::Column::Parent.eq(old_name))
                .exec(&txn)
                .await?;
            auth_item_child::Entity::update_many()
                .col_expr(
                    auth_item_child::Column::Child,
                    Expr::value(item.name.clone()),
                )
                .filter(auth_item_child::Column::Child.eq(old_name))
                .exec(&txn)
                .await?;
            auth_assignment::Entity::update_many()
                .col_expr(
                    auth_assignment::Column::ItemName,
                    Expr::value(item.name.clone()),
                )
                .filter(auth_assignment::Column::ItemName.eq(old_name))
                .exec(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(())
    }

    async fn remove_item(&self, name: &str) -> Result<bool, RbacError> {
        let txn = self.db.begin().await?;

        auth_item_child::Entity::delete_many()
            .filter(
                sea_orm::Condition::any()
                    .add(auth_item_child::Column::Parent.eq(name))
                    .add(auth_item_child::Column::Child.eq(name)),
            )
            .exec(&txn)
            .await?;
        auth_assignment::Entity::delete_many()
            .filter(auth_assignment::Column::ItemName.eq(name))
            .exec(&txn)
            .await?;
        let res = auth_item::Entity::delete_many()
            .filter(auth_item::Column::Name.eq(name))
            .exec(&txn)
            .await?;

        txn.commit().await?;
        Ok(res.rows_affected > 0)
    }
}

#[async_trait]
impl EdgeStore for DatabaseStore {
    async fn insert_edge(&self, parent: &str, child: &str) -> Result<(), RbacError> {
        auth_item_child::Entity::insert(edge_model(parent, child))
            .exec_without_returning(&self.db)
            .await?;
        Ok(())
    }

    async fn remove_edge(&self, parent: &str, child: &str) -> Result<bool, RbacError> {
        use auth_item_child::{Column, Entity};

        let res = Entity::delete_many()
            .filter(Column::Parent.eq(parent))
            .filter(Column::Child.eq(child))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn has_edge(&self, parent: &str, child: &str) -> Result<bool, RbacError> {
        Ok(
            auth_item_child::Entity::find_by_id((parent.to_string(), child.to_string()))
                .one(&self.db)
                .await?
                .is_some(),
        )
    }

    async fn child_names(&self, parents: &[String]) -> Result<Vec<String>, RbacError> {
        use auth_item_child::{Column, Entity};

        if parents.is_empty() {
            return Ok(Vec::new());
        }
        let edges = Entity::find()
            .filter(Column::Parent.is_in(parents.iter().cloned()))
            .order_by_asc(Column::Child)
            .all(&self.db)
            .await?;
        let mut names: Vec<String> = edges.into_iter().map(|e| e.child).collect();
        names.dedup();
        Ok(names)
    }

    async fn parent_names(&self, child: &str) -> Result<Vec<String>, RbacError> {
        use auth_item_child::{Column, Entity};

        Ok(Entity::find()
            .filter(Column::Child.eq(child))
            .order_by_asc(Column::Parent)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|e| e.parent)
            .collect())
    }

    async fn all_edges(&self) -> Result<Vec<(String, String)>, RbacError> {
        use auth_item_child::{Column, Entity};

        Ok(Entity::find()
            .order_by_asc(Column::Parent)
            .order_by_asc(Column::Child)
            .all(&self.db)
            .await?
            .into_iter()
            .map(|e| (e.parent, e.child))
            .collect())
    }
}

#[async_trait]
impl AssignmentStore for DatabaseStore {
    async fn insert_assignment(&self, assignment: &Assignment) -> Result<(), RbacError> {
        if self.strict_assignments
            && auth_item::Entity::find_by_id(assignment.item_name.clone())
                .one(&self.db)
                .await?
                .is_none()
        {
            return Err(RbacError::ItemNotFound(assignment.item_name.clone()));
        }

        auth_assignment::Entity::insert(assignment_model(assignment)?)
            .exec_without_returning(&self.db)
            .await
            .map_err(|e| match e.sql_err() {
                Some(SqlErr::ForeignKeyConstraintViolation(_)) => {
                    RbacError::ItemNotFound(assignment.item_name.clone())
                }
                Some(SqlErr::UniqueConstraintViolation(_)) => RbacError::DuplicateAssignment {
                    user_id: assignment.user_id.clone(),
                    item: assignment.item_name.clone(),
                },
                _ => e.into(),
            })?;
        Ok(())
    }

    async fn update_assignment(&self, assignment: &Assignment) -> Result<bool, RbacError> {
        use auth_assignment::{Column, Entity};

        let res = Entity::update_many()
            .col_expr(
                Column::Condition,
                Expr::value(condition_column(&assignment.condition)),
            )
            .col_expr(Column::Data, Expr::value(encode_data(&assignment.data)?))
            .filter(Column::UserId.eq(assignment.user_id.as_str()))
            .filter(Column::ItemName.eq(assignment.item_name.as_str()))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn remove_assignment(&self, user_id: &str, item_name: &str) -> Result<bool, RbacError> {
        use auth_assignment::{Column, Entity};

        let res = Entity::delete_many()
            .filter(Column::UserId.eq(user_id))
            .filter(Column::ItemName.eq(item_name))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected > 0)
    }

    async fn get_assignment(
        &self,
        user_id: &str,
        item_name: &str,
    ) -> Result<Option<Assignment>, RbacError> {
        auth_assignment::Entity::find_by_id((user_id.to_string(), item_name.to_string()))
            .one(&self.db)
            .await?
            .map(assignment_from_model)
            .transpose()
    }

    async fn assignments_for(&self, user_id: &str) -> Result<Vec<Assignment>, RbacError> {
        use auth_assignment::{Column, Entity};

        Entity::find()
            .filter(Column::UserId.eq(user_id))
            .order_by_asc(Column::ItemName)
            .all(&self.db)
            .await?
            .into_iter()
            .map(assignment_from_model)
            .collect()
    }

    async fn all_assignments(&self) -> Result<Vec<Assignment>, RbacError> {
        use auth_assignment::{Column, Entity};

        Entity::find()
            .order_by_asc(Column::UserId)
            .order_by_asc(Column::ItemName)
            .all(&self.db)
            .await?
            .into_iter()
            .map(assignment_from_model)
            .collect()
    }

    async fn clear_assignments(&self) -> Result<(), RbacError> {
        auth_assignment::Entity::delete_many().exec(&self.db).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthStore for DatabaseStore {
    fn backend_name(&self) -> &'static str {
        "database"
    }

    async fn save(&self) -> Result<(), RbacError> {
        tracing::debug!("database store writes through, nothing to save");
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), RbacError> {
        let txn = self.db.begin().await?;
        auth_assignment::Entity::delete_many().exec(&txn).await?;
        auth_item_child::Entity::delete_many().exec(&txn).await?;
        auth_item::Entity::delete_many().exec(&txn).await?;
        txn.commit().await?;
        Ok(())
    }

    async fn replace_all(&self, snapshot: &Snapshot) -> Result<(), RbacError> {
        let txn = self.db.begin().await?;
        auth_assignment::Entity::delete_many().exec(&txn).await?;
        auth_item_child::Entity::delete_many().exec(&txn).await?;
        auth_item::Entity::delete_many().exec(&txn).await?;

        for item in snapshot.items() {
            auth_item::Entity::insert(item_model(&item)?)
                .exec_without_returning(&txn)
                .await?;
        }
        for (parent, child) in snapshot.edges() {
            auth_item_child::Entity::insert(edge_model(parent, child))
                .exec_without_returning(&txn)
                .await?;
        }
        for assignment in snapshot.assignments() {
            auth_assignment::Entity::insert(assignment_model(&assignment)?)
                .exec_without_returning(&txn)
                .await?;
        }

        txn.commit().await?;
        Ok(())
    }
}
