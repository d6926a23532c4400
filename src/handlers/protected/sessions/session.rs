use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, ApiResult, AuthUser, ADMIN_ROLES};
use crate::sessions::SessionSummary;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// GET /api/sessions/my - The caller's live sessions, current one flagged
pub async fn my_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Vec<SessionSummary>> {
    let mut sessions = state.sessions.user_sessions(auth_user.user_id).await?;
    for session in &mut sessions {
        session.is_current = session.session_id == auth_user.session_id;
    }
    Ok(ApiResponse::success(sessions))
}

/// DELETE /api/sessions/:id - End one session (own sessions, or any for administrators)
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(session_id): Path<String>,
) -> ApiResult<Value> {
    let session = state
        .sessions
        .peek_session(&session_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Session not found"))?;

    if session.user_id != auth_user.user_id {
        require_role(&auth_user, ADMIN_ROLES)?;
    }

    state.sessions.destroy_session(&session_id).await?;
    Ok(ApiResponse::success(json!({ "session_id": session_id, "destroyed": true })))
}

/// POST /api/sessions/logout - End the current session and revoke its access token
pub async fn logout(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    request: Option<Json<LogoutRequest>>,
) -> ApiResult<Value> {
    state.sessions.destroy_session(&auth_user.session_id).await?;
    state.sessions.blacklist_token(&auth_user.token, auth_user.exp).await?;

    if let Some(refresh_token) = request.and_then(|Json(r)| r.refresh_token) {
        state.sessions.destroy_refresh_token(&refresh_token).await?;
    }

    info!(user = %auth_user.user_id, session = %auth_user.session_id, "logged out");
    Ok(ApiResponse::success(json!({ "logged_out": true })))
}

/// POST /api/sessions/logout-all - End every session of the caller
pub async fn logout_all(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Value> {
    let terminated = state.sessions.destroy_all_user_sessions(auth_user.user_id).await?;
    state.sessions.blacklist_token(&auth_user.token, auth_user.exp).await?;

    info!(user = %auth_user.user_id, terminated, "logged out everywhere");
    Ok(ApiResponse::success(json!({ "terminated": terminated })))
}
