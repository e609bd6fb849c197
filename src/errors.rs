use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use miette::Diagnostic;
use serde_json::json;
use thiserror::Error;

use crate::types::ItemType;

#[derive(Debug, Error, Diagnostic)]
pub enum RbacError {
    #[error("Authorization item `{0}` does not exist")]
    #[diagnostic(
        code(warden::item_not_found),
        help("Create the item first with create_item / create_role / create_task / create_operation")
    )]
    ItemNotFound(String),

    #[error("Cannot add {child_type} `{child}` as a child of {parent_type} `{parent}`")]
    #[diagnostic(
        code(warden::invalid_type_ordering),
        help("A role may contain roles, tasks and operations; a task may contain tasks and operations; an operation contains nothing")
    )]
    InvalidTypeOrdering {
        parent: String,
        parent_type: ItemType,
        child: String,
        child_type: ItemType,
    },

    #[error("Cannot add `{child}` as a child of `{parent}`: a loop has been detected")]
    #[diagnostic(
        code(warden::loop_detected),
        help("`{parent}` is already reachable from `{child}`; the hierarchy must stay acyclic")
    )]
    LoopDetected { parent: String, child: String },

    #[error("Item `{parent}` already has a child `{child}`")]
    #[diagnostic(code(warden::edge_exists))]
    EdgeExists { parent: String, child: String },

    #[error("Item `{item}` has already been assigned to user `{user_id}`")]
    #[diagnostic(
        code(warden::duplicate_assignment),
        help("Revoke the existing assignment or update it with update_assignment")
    )]
    DuplicateAssignment { user_id: String, item: String },

    #[error("Item `{item}` is not assigned to user `{user_id}`")]
    #[diagnostic(code(warden::assignment_not_found))]
    AssignmentNotFound { user_id: String, item: String },

    #[error("Unable to add or rename an item: the name `{0}` is already in use")]
    #[diagnostic(code(warden::name_collision))]
    NameCollision(String),

    #[error("Invalid condition expression: {0}")]
    #[diagnostic(
        code(warden::invalid_condition),
        help("Supported operators: ==, !=, >, <, >=, <=, &&, ||, !, in. Paths start at `params` or `data` (e.g. params.ownerId). Registered rules are written @name")
    )]
    InvalidCondition(String),

    #[error("Failed to evaluate condition `{condition}`: {reason}")]
    #[diagnostic(code(warden::predicate_evaluation))]
    PredicateEvaluation { condition: String, reason: String },

    #[error("Failed to load policy snapshot `{path}`")]
    #[diagnostic(
        code(warden::snapshot_load),
        help("Check that the file is readable and contains a JSON object keyed by item name")
    )]
    SnapshotLoad {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    #[diagnostic(code(warden::io))]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    #[diagnostic(code(warden::serde))]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    #[diagnostic(code(warden::db))]
    Db(#[from] sea_orm::DbErr),

    #[error("Config error: {0}")]
    #[diagnostic(code(warden::config))]
    Config(#[from] config::ConfigError),
}

impl IntoResponse for RbacError {
    fn into_response(self) -> Response {
        let status = match &self {
            RbacError::ItemNotFound(_) | RbacError::AssignmentNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            RbacError::InvalidTypeOrdering { .. }
            | RbacError::InvalidCondition(_)
            | RbacError::PredicateEvaluation { .. } => StatusCode::BAD_REQUEST,
            RbacError::LoopDetected { .. }
            | RbacError::EdgeExists { .. }
            | RbacError::DuplicateAssignment { .. }
            | RbacError::NameCollision(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}
