// src/api/agents.rs

use axum::extract::{Json, Path, Query, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::extract::AuthUser;
use super::pagination::{PageParams, Paginated};
use super::wire::{AgentDto, ChatSessionDto, RunDto};
use crate::agents::{CreateAgentRequest, UpdateAgentRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(create).get(list))
        .route("/{id}", get(get_one).patch(update).delete(delete))
        .route("/{id}/run", post(run))
        .route("/{id}/chat-sessions", get(chat_sessions))
}

async fn create(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Json(req): Json<CreateAgentRequest>,
) -> Result<Json<AgentDto>, ApiError> {
    let agent = state.agents.create(&user.id, req).await?;
    Ok(Json(agent.into()))
}

async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
) -> Result<Json<Vec<AgentDto>>, ApiError> {
    let agents = state.agents.list_owned(&user.id).await?;
    Ok(Json(agents.into_iter().map(Into::into).collect()))
}

async fn get_one(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<AgentDto>, ApiError> {
    let agent = state.agents.get_owned(&id, &user.id).await?;
    Ok(Json(agent.into()))
}

async fn update(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateAgentRequest>,
) -> Result<Json<AgentDto>, ApiError> {
    let agent = state.agents.update(&id, &user.id, req).await?;
    Ok(Json(agent.into()))
}

async fn delete(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.agents.delete(&id, &user.id).await?;
    Ok(Json(serde_json::json!({ "deleted": id })))
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    question: String,
    chat_session_id: Option<String>,
}

/// Submit a question. Returns the queued run; clients poll `GET /runs/{id}`.
async fn run(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Json(req): Json<RunRequest>,
) -> Result<Json<RunDto>, ApiError> {
    let agent = state.agents.get_owned(&id, &user.id).await?;
    let run = state
        .runs
        .create_run(&user.id, &agent, &req.question, req.chat_session_id)
        .await?;
    Ok(Json(run.into()))
}

async fn chat_sessions(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
    Query(params): Query<PageParams>,
) -> Result<Json<Paginated<ChatSessionDto>>, ApiError> {
    state.agents.get_owned(&id, &user.id).await?;

    let (page, per_page) = params.normalize();
    let (sessions, total) = state
        .sessions
        .list_for_agent(&id, &user.id, page, per_page)
        .await?;

    Ok(Json(Paginated::new(
        sessions.into_iter().map(Into::into).collect(),
        page,
        per_page,
        total,
    )))
}
