// src/api/chat_sessions.rs

use axum::extract::{Json, Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;

use super::error::ApiError;
use super::extract::AuthUser;
use super::pagination::{PageParams, Paginated};
use super::wire::{ChatSessionDto, MessageDto};
use crate::sessions::{CreateSessionRequest, UpdateSessionRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create))
        .route("/{id}", get(get_one).put(update).delete(delete))
        .route("/{id}/messages", get(messages))
}

async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateSessionRequest>,
) -> Result<Json<ChatSessionDto>, ApiError> {
    // The agent must be the caller's.
    state.agents.get_owned(&req.agent_id, &user.id).await?;
    let session = state
        .sessions
        .create(&user.id, &req.agent_id, req.title)
        .await?;
    Ok(Json(session.into()))
}

async fn get_one(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<ChatSessionDto>, ApiError> {
    let session = state.sessions.get_owned(&id, &user.id).await?;
    Ok(Json(session.into()))
}

async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateSessionRequest>,
) -> Result<Json<ChatSessionDto>, ApiError> {
    let session = state.sessions.update(&id, &user.id, req).await?;
    Ok(Json(session.into()))
}

async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.sessions.delete(&id, &user.id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

/// Paginated messages, newest page first.
async fn messages(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<MessageDto>>, ApiError> {
    state.sessions.get_owned(&id, &user.id).await?;

    let (page, per_page) = params.normalize();
    let (messages, total) = state.sessions.messages(&id, page, per_page).await?;

    Ok(Json(Paginated::new(
        messages.into_iter().map(Into::into).collect(),
        page,
        per_page,
        total,
    )))
}
