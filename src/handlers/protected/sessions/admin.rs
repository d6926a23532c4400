use axum::extract::{Extension, Path, State};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use crate::middleware::{require_role, ApiResponse, ApiResult, AuthUser, ADMIN_ROLES};
use crate::permissions::UserRole;
use crate::sessions::{SessionStats, SessionSummary};
use crate::state::AppState;

/// GET /api/sessions - Active users and sessions per device
pub async fn stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<SessionStats> {
    require_role(&auth_user, ADMIN_ROLES)?;
    Ok(ApiResponse::success(state.sessions.session_stats().await?))
}

/// GET /api/sessions/user/:id - Live sessions of any user
pub async fn user_sessions(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Vec<SessionSummary>> {
    require_role(&auth_user, ADMIN_ROLES)?;
    Ok(ApiResponse::success(state.sessions.user_sessions(user_id).await?))
}

/// POST /api/sessions/user/:id/terminate-all - End every session of a user
pub async fn terminate_all(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
) -> ApiResult<Value> {
    require_role(&auth_user, &[UserRole::SystemAdmin])?;
    let terminated = state.sessions.destroy_all_user_sessions(user_id).await?;
    info!(admin = %auth_user.user_id, user = %user_id, terminated, "sessions terminated");
    Ok(ApiResponse::success(json!({ "user_id": user_id, "terminated": terminated })))
}

/// POST /api/sessions/cleanup - Drop index entries whose sessions expired
pub async fn cleanup(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Value> {
    require_role(&auth_user, &[UserRole::SystemAdmin])?;
    let removed = state.sessions.cleanup_expired().await?;
    Ok(ApiResponse::success(json!({ "removed": removed })))
}
