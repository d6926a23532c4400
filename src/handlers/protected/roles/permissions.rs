use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Serialize;

use crate::middleware::{require_role, ApiResponse, ApiResult, AuthUser, ADMIN_ROLES};
use crate::permissions::{catalog, PermissionContext, PermissionGrant, UserRole};
use crate::services::GrantInput;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct RolePermissions {
    pub role: &'static str,
    /// Keys allowed at global when nothing is stored for the role.
    pub allowed: Vec<&'static str>,
    /// Stored role grants, which take precedence over `allowed`.
    pub grants: Vec<PermissionGrant>,
}

/// GET /api/roles - Built-in roles with their default and stored grants
pub async fn list(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Vec<RolePermissions>> {
    require_role(&auth_user, ADMIN_ROLES)?;

    let mut roles = Vec::with_capacity(UserRole::ALL.len());
    for role in UserRole::ALL.iter() {
        roles.push(RolePermissions {
            role: role.as_str(),
            allowed: catalog::all_keys()
                .filter(|key| role.default_for(key) == Some(true))
                .collect(),
            grants: state.access.role_grants(role.as_str()).await?,
        });
    }
    Ok(ApiResponse::success(roles))
}

/// PUT /api/roles/:role/permissions - Store a role grant, overriding the built-in default
pub async fn put(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(role): Path<String>,
    Json(input): Json<GrantInput>,
) -> ApiResult<PermissionGrant> {
    require_role(&auth_user, &[UserRole::SystemAdmin])?;

    let context = PermissionContext::parse(input.context_type.as_deref(), input.context_id.as_deref())?;
    let grant = state
        .access
        .set_role_permission(&role, &input.permission_key, input.allowed, context)
        .await?;
    Ok(ApiResponse::success(grant))
}
