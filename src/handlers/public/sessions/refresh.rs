use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::auth::{issue_access_token, Claims};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct RefreshResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    pub session_id: String,
}

/// POST /api/sessions/refresh - Exchange a refresh token for a new access token
///
/// The refresh token stays valid until its own expiry or logout. A token whose
/// session is gone is discarded and rejected.
pub async fn post(
    State(state): State<AppState>,
    Json(request): Json<RefreshRequest>,
) -> ApiResult<RefreshResponse> {
    let refresh_token = request.refresh_token.trim();
    if refresh_token.is_empty() {
        return Err(ApiError::validation_error("refresh_token is required", None));
    }

    let session_id = state
        .sessions
        .validate_refresh_token(refresh_token)
        .await?
        .ok_or_else(|| ApiError::unauthorized("Invalid or expired refresh token"))?;

    let Some(session) = state.sessions.validate_session(&session_id).await? else {
        state.sessions.destroy_refresh_token(refresh_token).await?;
        return Err(ApiError::unauthorized("Session expired"));
    };

    let security = &state.config.security;
    let claims = Claims::for_session(&session, session_id.clone(), security.jwt_expiry_hours);
    let access_token = issue_access_token(&claims, security)?;

    info!(user = %session.user_id, session = %session_id, "access token refreshed");
    Ok(ApiResponse::success(RefreshResponse {
        access_token,
        token_type: "Bearer",
        expires_in: security.jwt_expiry_hours * 3600,
        session_id,
    }))
}
