use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde_json::{json, Value};
use uuid::Uuid;

use super::managed_group;
use crate::database::models::{GroupFilter, GroupUpdate, NewGroup, UserGroup};
use crate::middleware::{require_permission, ApiResponse, ApiResult, AuthUser, ScopeQuery, MANAGE_USERS};
use crate::services::{CloneGroupRequest, GroupStats};
use crate::state::AppState;

fn scope_of(institution_id: &Option<String>, school_id: &Option<String>) -> ScopeQuery {
    ScopeQuery {
        institution_id: institution_id.clone(),
        school_id: school_id.clone(),
    }
}

/// GET /api/groups - List groups, filtered by scope, activity and a name search
pub async fn list(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<Vec<UserGroup>> {
    let context = scope_of(&filter.institution_id, &filter.school_id).context();
    require_permission(&state, &auth_user, MANAGE_USERS, &context).await?;

    let groups = state.access.list_groups(&filter).await?;
    Ok(ApiResponse::success(groups))
}

/// POST /api/groups - Create a group in the given scope
pub async fn create(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(payload): Json<NewGroup>,
) -> ApiResult<UserGroup> {
    let context = scope_of(&payload.institution_id, &payload.school_id).context();
    require_permission(&state, &auth_user, MANAGE_USERS, &context).await?;

    let group = state.access.create_group(payload).await?;
    Ok(ApiResponse::created(group))
}

/// GET /api/groups/stats - Group and membership totals for a scope
pub async fn stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Query(filter): Query<GroupFilter>,
) -> ApiResult<GroupStats> {
    let context = scope_of(&filter.institution_id, &filter.school_id).context();
    require_permission(&state, &auth_user, MANAGE_USERS, &context).await?;

    Ok(ApiResponse::success(state.access.group_stats(&filter).await?))
}

/// GET /api/groups/:id - One group with its member count
pub async fn get(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<UserGroup> {
    let group = managed_group(&state, &auth_user, group_id).await?;
    Ok(ApiResponse::success(group))
}

/// PUT /api/groups/:id - Change name, description or active flag
pub async fn update(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(update): Json<GroupUpdate>,
) -> ApiResult<UserGroup> {
    managed_group(&state, &auth_user, group_id).await?;
    let group = state.access.update_group(group_id, update).await?;
    Ok(ApiResponse::success(group))
}

/// DELETE /api/groups/:id - Delete a group with its memberships and grants
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Value> {
    managed_group(&state, &auth_user, group_id).await?;
    state.access.delete_group(group_id).await?;
    Ok(ApiResponse::success(json!({ "id": group_id, "deleted": true })))
}

/// POST /api/groups/:id/clone - Copy a group and its grants under a new name
///
/// Members are not copied. Without an explicit scope the copy keeps the
/// source group's scope; the caller must be able to manage both.
pub async fn clone(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(request): Json<CloneGroupRequest>,
) -> ApiResult<UserGroup> {
    let source = managed_group(&state, &auth_user, group_id).await?;
    if request.institution_id.is_some() || request.school_id.is_some() {
        let target = scope_of(&request.institution_id, &request.school_id).context();
        if target != source.context() {
            require_permission(&state, &auth_user, MANAGE_USERS, &target).await?;
        }
    }

    let group = state.access.clone_group(group_id, request).await?;
    Ok(ApiResponse::created(group))
}
