use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::managed_group;
use crate::database::models::GroupMember;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::services::BulkAddResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub user_id: Uuid,
    #[serde(default)]
    pub role: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkAddRequest {
    pub user_ids: Vec<Uuid>,
    #[serde(default)]
    pub role: Option<String>,
}

/// GET /api/groups/:id/members - Members of a group
pub async fn list(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Vec<GroupMember>> {
    managed_group(&state, &auth_user, group_id).await?;
    Ok(ApiResponse::success(state.access.list_members(group_id).await?))
}

/// POST /api/groups/:id/members - Add one user (409 when already a member)
pub async fn add(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(request): Json<AddMemberRequest>,
) -> ApiResult<GroupMember> {
    managed_group(&state, &auth_user, group_id).await?;
    let member = state
        .access
        .add_member(group_id, request.user_id, request.role.as_deref(), Some(auth_user.user_id))
        .await?;
    Ok(ApiResponse::created(member))
}

/// POST /api/groups/:id/members/bulk - Add several users, skipping existing members
pub async fn bulk_add(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(request): Json<BulkAddRequest>,
) -> ApiResult<BulkAddResult> {
    if request.user_ids.is_empty() {
        return Err(ApiError::validation_error("user_ids must not be empty", None));
    }
    managed_group(&state, &auth_user, group_id).await?;
    let result = state
        .access
        .bulk_add_members(group_id, &request.user_ids, request.role.as_deref(), Some(auth_user.user_id))
        .await?;
    Ok(ApiResponse::success(result))
}

/// DELETE /api/groups/:id/members/:user_id - Remove a member
pub async fn remove(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path((group_id, user_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Value> {
    managed_group(&state, &auth_user, group_id).await?;
    state.access.remove_member(group_id, user_id).await?;
    Ok(ApiResponse::success(json!({ "group_id": group_id, "user_id": user_id, "removed": true })))
}
