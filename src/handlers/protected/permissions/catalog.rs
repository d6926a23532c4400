use axum::extract::State;
use serde_json::Value;

use crate::cache::keys;
use crate::error::ApiError;
use crate::middleware::{ApiResponse, ApiResult};
use crate::permissions::catalog;
use crate::state::AppState;

/// GET /api/permissions/catalog - Permission keys grouped by category
pub async fn get(State(state): State<AppState>) -> ApiResult<Value> {
    let value = state
        .cache
        .static_cache(&keys::catalog(), || async { catalog::catalog_json() })
        .await
        .map_err(|e| {
            tracing::error!(error = %e, "failed to serialize permission catalog");
            ApiError::internal_server_error("Failed to load permission catalog")
        })?;
    Ok(ApiResponse::success(value))
}
