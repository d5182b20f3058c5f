// src/api/connections.rs

use axum::extract::{Json, Path, State};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use super::error::ApiError;
use super::extract::AuthUser;
use super::wire::ConnectionDto;
use crate::connections::{CreateConnectionRequest, ProbeOutcome, UpdateConnectionRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/test", post(probe))
        .route("/", post(create).get(list))
        .route("/{id}", get(get_one).patch(update).delete(delete))
}

async fn probe(
    State(state): State<Arc<AppState>>,
    AuthUser(_user): AuthUser,
    Json(req): Json<CreateConnectionRequest>,
) -> Json<ProbeOutcome> {
    Json(state.connections.probe(&req).await)
}

async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateConnectionRequest>,
) -> Result<Json<ConnectionDto>, ApiError> {
    let connection = state.connections.create(&user.id, req).await?;
    Ok(Json(connection.into()))
}

async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<ConnectionDto>>, ApiError> {
    let connections = state.connections.list_owned(&user.id).await?;
    Ok(Json(connections.into_iter().map(Into::into).collect()))
}

async fn get_one(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ConnectionDto>, ApiError> {
    let connection = state.connections.get_owned(&id, &user.id).await?;
    Ok(Json(connection.into()))
}

async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateConnectionRequest>,
) -> Result<Json<ConnectionDto>, ApiError> {
    let connection = state.connections.update(&id, &user.id, req).await?;

    // The payload changed: discard the pooled engine and invalidate every
    // dependent agent's cached answers.
    state.engines.invalidate(&id);
    for agent_id in state.connections.dependent_agents(&id).await? {
        state.agents.bump_schema_version(&agent_id).await?;
    }

    Ok(Json(connection.into()))
}

async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.connections.delete(&id, &user.id).await?;
    state.engines.invalidate(&id);
    Ok(Json(serde_json::json!({ "deleted": id })))
}
