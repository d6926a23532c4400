use std::collections::BTreeMap;

use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::error::ApiError;
use crate::handlers::protected::groups::permissions::GrantKeyQuery;
use crate::middleware::{require_permission, ApiResponse, ApiResult, AuthUser, ScopeQuery, MANAGE_USERS};
use crate::permissions::{PermissionContext, PermissionGrant, PermissionMatrix, Principal, Resolution};
use crate::services::GrantInput;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub permission_key: String,
    pub institution_id: Option<String>,
    pub school_id: Option<String>,
}

/// `?institutions=1,2&schools=10,11`
#[derive(Debug, Default, Deserialize)]
pub struct MatrixQuery {
    pub institutions: Option<String>,
    pub schools: Option<String>,
}

fn split_ids(raw: &Option<String>) -> Vec<String> {
    raw.as_deref()
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(String::from)
        .collect()
}

/// The caller reads their own permissions freely, using the role in their
/// token. Anyone else's need the management permission at each scope read.
async fn target_principal(
    state: &AppState,
    auth_user: &AuthUser,
    user_id: Uuid,
    contexts: &[PermissionContext],
) -> Result<Principal, ApiError> {
    if user_id == auth_user.user_id {
        return Ok(auth_user.principal());
    }
    for context in contexts {
        require_permission(state, auth_user, MANAGE_USERS, context).await?;
    }
    Ok(state.access.principal_for(user_id).await?)
}

/// GET /api/users/:id/permissions/effective - Every catalog key resolved at one scope
pub async fn effective(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<BTreeMap<String, Resolution>> {
    let context = scope.context();
    let principal = target_principal(&state, &auth_user, user_id, std::slice::from_ref(&context)).await?;
    let resolved = state.access.effective_permissions(&principal, &context).await?;
    Ok(ApiResponse::success(resolved))
}

/// GET /api/users/:id/permissions/check - Resolve one key, with the deciding source
pub async fn check(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<Resolution> {
    let context = ScopeQuery {
        institution_id: query.institution_id,
        school_id: query.school_id,
    }
    .context();
    let principal = target_principal(&state, &auth_user, user_id, std::slice::from_ref(&context)).await?;
    let resolution = state
        .resolver()
        .resolve(&principal, &query.permission_key, &context)
        .await?;
    Ok(ApiResponse::success(resolution))
}

/// GET /api/users/:id/permissions/matrix - Resolved values at global and each listed scope
pub async fn matrix(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<MatrixQuery>,
) -> ApiResult<PermissionMatrix> {
    let institutions = split_ids(&query.institutions);
    let schools = split_ids(&query.schools);

    let mut contexts: Vec<PermissionContext> = institutions
        .iter()
        .map(PermissionContext::institution)
        .chain(schools.iter().map(PermissionContext::school))
        .collect();
    if contexts.is_empty() {
        contexts.push(PermissionContext::global());
    }

    let principal = target_principal(&state, &auth_user, user_id, &contexts).await?;
    let matrix = state
        .resolver()
        .resolve_matrix(&principal, &institutions, &schools)
        .await?;
    Ok(ApiResponse::success(matrix))
}

/// GET /api/users/:id/permissions/contextual - Direct grants stored for a user
pub async fn contextual_get(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(scope): Query<ScopeQuery>,
) -> ApiResult<Vec<PermissionGrant>> {
    target_principal(&state, &auth_user, user_id, &[scope.context()]).await?;
    Ok(ApiResponse::success(state.access.user_grants(user_id).await?))
}

/// PUT /api/users/:id/permissions/contextual - Set a direct grant
pub async fn contextual_put(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Json(input): Json<GrantInput>,
) -> ApiResult<PermissionGrant> {
    let context = PermissionContext::parse(input.context_type.as_deref(), input.context_id.as_deref())?;
    require_permission(&state, &auth_user, MANAGE_USERS, &context).await?;

    let grant = state
        .access
        .set_user_permission(user_id, &input.permission_key, input.allowed, context)
        .await?;
    Ok(ApiResponse::success(grant))
}

/// DELETE /api/users/:id/permissions/contextual - Remove a direct grant
pub async fn contextual_delete(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Path(user_id): Path<Uuid>,
    Query(query): Query<GrantKeyQuery>,
) -> ApiResult<Value> {
    let context = query.context()?;
    require_permission(&state, &auth_user, MANAGE_USERS, &context).await?;

    let removed = state
        .access
        .remove_user_permission(user_id, &query.permission_key, &context)
        .await?;
    if !removed {
        return Err(ApiError::not_found(format!(
            "User has no direct '{}' grant at {}",
            query.permission_key, context
        )));
    }
    Ok(ApiResponse::success(json!({ "removed": true })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_lists_ignore_blanks() {
        assert_eq!(split_ids(&Some("1, 2,,3 ".to_string())), vec!["1", "2", "3"]);
        assert!(split_ids(&None).is_empty());
    }
}
