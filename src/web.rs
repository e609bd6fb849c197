use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde_json::json;

use crate::engine::PolicyEngine;
use crate::errors::RbacError;
use crate::settings::Settings;
use crate::types::{Assignment, CheckRequest, CheckResponse, ItemType, ItemsQuery};

pub fn router(engine: Arc<PolicyEngine>) -> Router {
    Router::new()
        .route("/v1/check", post(handle_check))
        .route("/v1/items", get(list_items))
        .route("/v1/users/{user_id}/assignments", get(user_assignments))
        .route("/healthz", get(health))
        .with_state(engine)
}

pub async fn serve(settings: &Settings, engine: Arc<PolicyEngine>) -> miette::Result<()> {
    let addr: SocketAddr = settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    tracing::info!(%addr, backend = engine.store().backend_name(), "Authorization API listening");
    axum::serve(listener, router(engine))
        .await
        .into_diagnostic()?;
    Ok(())
}

async fn handle_check(
    State(engine): State<Arc<PolicyEngine>>,
    Json(req): Json<CheckRequest>,
) -> Result<Json<CheckResponse>, RbacError> {
    let allowed = engine
        .check_access(&req.user_id, &req.item, &req.params)
        .await?;
    Ok(Json(CheckResponse { allowed }))
}

async fn list_items(
    State(engine): State<Arc<PolicyEngine>>,
    Query(query): Query<ItemsQuery>,
) -> Response {
    let item_type = match query.item_type.as_deref().map(str::parse::<ItemType>) {
        None => None,
        Some(Ok(t)) => Some(t),
        Some(Err(e)) => {
            return (StatusCode::BAD_REQUEST, Json(json!({ "error": e }))).into_response();
        }
    };
    match engine.get_items(query.user_id.as_deref(), item_type).await {
        Ok(items) => Json(items).into_response(),
        Err(e) => e.into_response(),
    }
}

async fn user_assignments(
    State(engine): State<Arc<PolicyEngine>>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<Assignment>>, RbacError> {
    Ok(Json(engine.get_assignments(&user_id).await?))
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}
