use serde::Deserialize;
use tracing::warn;

use super::auth::AuthUser;
use crate::error::ApiError;
use crate::permissions::{PermissionContext, Resolution, UserRole};
use crate::state::AppState;

/// Roles allowed to read operational data (session and cache statistics).
pub const ADMIN_ROLES: &[UserRole] = &[UserRole::SystemAdmin, UserRole::InstitutionManager];

/// Grants, groups and other users' permissions are managed under this key.
pub const MANAGE_USERS: &str = "canManageInstitutionUsers";

/// `?institution_id=&school_id=` scope selector shared by guarded routes.
#[derive(Debug, Default, Clone, Deserialize)]
pub struct ScopeQuery {
    pub institution_id: Option<String>,
    pub school_id: Option<String>,
}

impl ScopeQuery {
    /// The narrowest scope present: school, then institution, then global.
    pub fn context(&self) -> PermissionContext {
        let present = |id: &Option<String>| id.as_deref().map(str::trim).filter(|s| !s.is_empty()).map(String::from);
        match (present(&self.school_id), present(&self.institution_id)) {
            (Some(school), _) => PermissionContext::school(school),
            (None, Some(institution)) => PermissionContext::institution(institution),
            (None, None) => PermissionContext::global(),
        }
    }
}

/// 403 unless the caller holds one of `roles`.
pub fn require_role(user: &AuthUser, roles: &[UserRole]) -> Result<(), ApiError> {
    if roles.iter().any(|role| role.as_str() == user.role) {
        return Ok(());
    }
    warn!(user = %user.user_id, role = %user.role, "role check failed");
    Err(ApiError::forbidden(format!(
        "Requires role {}",
        roles.iter().map(UserRole::as_str).collect::<Vec<_>>().join(" or ")
    )))
}

/// 403 unless `permission_key` resolves to allowed for the caller at `context`.
pub async fn require_permission(
    state: &AppState,
    user: &AuthUser,
    permission_key: &str,
    context: &PermissionContext,
) -> Result<Resolution, ApiError> {
    let resolution = state
        .resolver()
        .resolve(&user.principal(), permission_key, context)
        .await?;

    if resolution.allowed {
        Ok(resolution)
    } else {
        warn!(user = %user.user_id, key = permission_key, context = %context, "permission denied");
        Err(ApiError::forbidden(format!("Missing permission '{}'", permission_key)))
    }
}
