// src/api/extract.rs
// Bearer-token extractor for protected routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use std::sync::Arc;

use super::error::ApiError;
use crate::auth::{verify_token, User};
use crate::state::AppState;

/// The authenticated user, resolved from `Authorization: Bearer <jwt>`.
pub struct AuthUser(pub User);

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthorized("missing bearer token".to_string()))?;

        let token = header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ApiError::Unauthorized("malformed authorization header".to_string()))?;

        let claims = verify_token(token)
            .map_err(|_| ApiError::Unauthorized("invalid or expired token".to_string()))?;

        let user = state
            .auth
            .verify_user_id(&claims.sub)
            .await
            .map_err(|e| ApiError::Unauthorized(e.to_string()))?;

        Ok(AuthUser(user))
    }
}
