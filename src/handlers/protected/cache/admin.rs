use axum::{
    extract::{Extension, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use crate::cache::{CacheHealth, CacheStats};
use crate::error::ApiError;
use crate::middleware::{require_role, ApiResponse, ApiResult, AuthUser, ADMIN_ROLES};
use crate::permissions::UserRole;
use crate::state::AppState;

/// Either a tag or a key pattern (glob relative to the cache prefix).
#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    pub tag: Option<String>,
    pub pattern: Option<String>,
}

/// GET /api/cache/stats - Hit, miss, set and delete counters
pub async fn stats(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<CacheStats> {
    require_role(&auth_user, ADMIN_ROLES)?;
    Ok(ApiResponse::success(state.cache.stats()))
}

/// GET /api/cache/health - Backend round-trip check
pub async fn health(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<CacheHealth> {
    require_role(&auth_user, ADMIN_ROLES)?;
    Ok(ApiResponse::success(state.cache.health_check().await))
}

/// POST /api/cache/invalidate - Drop entries by `{tag}` or `{pattern}`
pub async fn invalidate(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
    Json(request): Json<InvalidateRequest>,
) -> ApiResult<Value> {
    require_role(&auth_user, ADMIN_ROLES)?;

    let tag = request.tag.as_deref().map(str::trim).filter(|s| !s.is_empty());
    let pattern = request.pattern.as_deref().map(str::trim).filter(|s| !s.is_empty());

    let removed = match (tag, pattern) {
        (Some(tag), None) => state.cache.invalidate_tag(tag).await,
        (None, Some(pattern)) => state.cache.delete_by_pattern(pattern).await,
        _ => return Err(ApiError::validation_error("Provide exactly one of tag or pattern", None)),
    };

    info!(admin = %auth_user.user_id, ?tag, ?pattern, removed, "cache invalidated");
    Ok(ApiResponse::success(json!({ "removed": removed })))
}

/// POST /api/cache/clear - Remove every cache entry (SYSTEM_ADMIN only)
pub async fn clear(
    State(state): State<AppState>,
    Extension(auth_user): Extension<AuthUser>,
) -> ApiResult<Value> {
    require_role(&auth_user, &[UserRole::SystemAdmin])?;
    let removed = state.cache.clear().await;
    state.cache.reset_stats();
    Ok(ApiResponse::success(json!({ "removed": removed })))
}
