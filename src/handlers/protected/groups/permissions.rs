use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{managed_group, require_grant_scope};
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult, AuthUser};
use crate::permissions::{PermissionContext, PermissionGrant, PermissionMatrix};
use crate::services::GrantInput;
use crate::state::AppState;

/// Identifies one stored grant: `?permission_key=&context_type=&context_id=`
#[derive(Debug, Deserialize)]
pub struct GrantKeyQuery {
    pub permission_key: String,
    pub context_type: Option<String>,
    pub context_id: Option<String>,
}

impl GrantKeyQuery {
    pub fn context(&self) -> Result<PermissionContext, ApiError> {
        Ok(PermissionContext::parse(self.context_type.as_deref(), self.context_id.as_deref())?)
    }
}

#[derive(Debug, Deserialize)]
pub struct BulkGrantRequest {
    pub permissions: Vec<GrantInput>,
}

/// GET /api/groups/:id/permissions - Stored grants of a group
pub async fn list(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<Vec<PermissionGrant>> {
    managed_group(&state, &auth_user, group_id).await?;
    Ok(ApiResponse::success(state.access.group_permissions(group_id).await?))
}

/// PUT /api/groups/:id/permissions - Set one grant (replaces the value at that context)
pub async fn put(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(input): Json<GrantInput>,
) -> ApiResult<PermissionGrant> {
    let group = managed_group(&state, &auth_user, group_id).await?;
    let context = PermissionContext::parse(input.context_type.as_deref(), input.context_id.as_deref())?;
    require_grant_scope(&state, &auth_user, &group, &context).await?;
    let grant = state
        .access
        .set_group_permission(group_id, &input.permission_key, input.allowed, context)
        .await?;
    Ok(ApiResponse::success(grant))
}

/// DELETE /api/groups/:id/permissions - Remove one grant
pub async fn delete(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Query(query): Query<GrantKeyQuery>,
) -> ApiResult<Value> {
    let group = managed_group(&state, &auth_user, group_id).await?;
    let context = query.context()?;
    require_grant_scope(&state, &auth_user, &group, &context).await?;
    let removed = state
        .access
        .remove_group_permission(group_id, &query.permission_key, &context)
        .await?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "Group has no '{}' grant at {}",
            query.permission_key, context
        )));
    }
    Ok(ApiResponse::success(json!({ "removed": true })))
}

/// POST /api/groups/:id/permissions/bulk - Set many grants; nothing is written if any is invalid
pub async fn bulk(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
    Json(request): Json<BulkGrantRequest>,
) -> ApiResult<Vec<PermissionGrant>> {
    if request.permissions.is_empty() {
        return Err(ApiError::validation_error("permissions must not be empty", None));
    }
    let group = managed_group(&state, &auth_user, group_id).await?;
    let mut checked: Vec<PermissionContext> = Vec::new();
    for input in &request.permissions {
        let context = PermissionContext::parse(input.context_type.as_deref(), input.context_id.as_deref())?;
        if !checked.contains(&context) {
            require_grant_scope(&state, &auth_user, &group, &context).await?;
            checked.push(context);
        }
    }
    let saved = state
        .access
        .bulk_set_group_permissions(group_id, &request.permissions)
        .await?;
    Ok(ApiResponse::success(saved))
}

/// GET /api/groups/:id/permissions/matrix - Stored values per key and scope
pub async fn matrix(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(group_id): Path<Uuid>,
) -> ApiResult<PermissionMatrix> {
    managed_group(&state, &auth_user, group_id).await?;
    Ok(ApiResponse::success(state.access.group_matrix(group_id).await?))
}
