// src/api/mod.rs

pub mod agents;
pub mod auth;
pub mod chat_sessions;
pub mod connections;
pub mod error;
pub mod extract;
pub mod pagination;
pub mod runs;
pub mod wire;

use axum::routing::get;
use axum::{Json, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub use error::ApiError;
pub use extract::AuthUser;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/auth", auth::router())
        .nest("/connections", connections::router())
        .nest("/agents", agents::router())
        .nest("/runs", runs::router())
        .nest("/chat-sessions", chat_sessions::router())
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
