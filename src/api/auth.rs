// src/api/auth.rs

use axum::extract::{Json, State};
use axum::routing::{get, post};
use axum::Router;
use serde::Serialize;
use std::sync::Arc;

use super::error::ApiError;
use super::extract::AuthUser;
use super::wire::UserDto;
use crate::auth::{LoginRequest, RegisterRequest};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/me", get(me))
}

#[derive(Serialize)]
struct AuthBody {
    user: UserDto,
    token: String,
}

async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<AuthBody>, ApiError> {
    let response = state
        .auth
        .register(req)
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?;

    Ok(Json(AuthBody {
        user: response.user.into(),
        token: response.token,
    }))
}

async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<AuthBody>, ApiError> {
    let response = state
        .auth
        .login(req)
        .await
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

    Ok(Json(AuthBody {
        user: response.user.into(),
        token: response.token,
    }))
}

async fn me(AuthUser(user): AuthUser) -> Json<UserDto> {
    Json(user.into())
}
