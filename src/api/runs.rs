// src/api/runs.rs

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::extract::AuthUser;
use super::pagination::{PageParams, Paginated};
use super::wire::RunDto;
use crate::runs::RunFilters;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list))
        .route("/{id}", get(get_one))
        .route("/{id}/cancel", post(cancel))
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    page: Option<i64>,
    per_page: Option<i64>,
    agent_id: Option<String>,
    chat_session_id: Option<String>,
    status: Option<String>,
}

async fn list(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Query(query): Query<ListQuery>,
) -> Result<Json<Paginated<RunDto>>, ApiError> {
    let (page, per_page) = PageParams {
        page: query.page,
        per_page: query.per_page,
    }
    .normalize();
    let filters = RunFilters {
        agent_id: query.agent_id,
        chat_session_id: query.chat_session_id,
        status: query.status,
    };

    let (runs, total) = state.runs.list_runs(&user.id, &filters, page, per_page).await?;

    Ok(Json(Paginated::new(
        runs.into_iter().map(Into::into).collect(),
        page,
        per_page,
        total,
    )))
}

async fn get_one(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<RunDto>, ApiError> {
    let run = state.runs.get_run_owned(&id, &user.id).await?;
    Ok(Json(run.into()))
}

/// Cancel a run still waiting in the queue. In-flight runs are unaffected.
async fn cancel(
    State(state): State<Arc<AppState>>,
    AuthUser(user): AuthUser,
    Path(id): Path<String>,
) -> Result<Json<RunDto>, ApiError> {
    let run = state.runs.cancel_run(&id, &user.id).await?;
    Ok(Json(run.into()))
}
