use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde_json::{json, Value};

use crate::cache::HealthStatus;
use crate::state::AppState;

/// GET / - Service name, version and endpoint map
pub async fn root() -> Json<Value> {
    let version = env!("CARGO_PKG_VERSION");

    Json(json!({
        "success": true,
        "data": {
            "name": "Educational Portal API",
            "version": version,
            "description": "Contextual permissions, response caching and session storage",
            "endpoints": {
                "health": "/health (public)",
                "refresh": "/api/sessions/refresh (public)",
                "groups": "/api/groups[/:id[/members|/permissions]] (protected)",
                "users": "/api/users/:id/permissions/* (protected)",
                "roles": "/api/roles[/:role/permissions] (protected, administrators)",
                "catalog": "/api/permissions/catalog (protected)",
                "sessions": "/api/sessions/* (protected)",
                "cache": "/api/cache/* (protected, administrators)",
            }
        }
    }))
}

/// GET /health - Permission store and cache backend status
///
/// 200 while both answer; 503 when the store is down or the cache is unhealthy.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    let cache = state.cache.health_check().await;
    let store = state.access.store_health().await;

    let store_ok = store.is_ok();
    let cache_ok = !state.cache.is_enabled() || cache.status != HealthStatus::Unhealthy;

    let body = json!({
        "status": if store_ok && cache_ok { "ok" } else { "degraded" },
        "timestamp": now,
        "database": {
            "backend": state.access.store_name(),
            "status": if store_ok { "ok" } else { "unavailable" },
        },
        "cache": cache,
    });

    if store_ok && cache_ok {
        (StatusCode::OK, Json(json!({ "success": true, "data": body })))
    } else {
        if let Err(e) = store {
            tracing::error!(error = %e, "permission store health check failed");
        }
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "success": false,
                "error": "service degraded",
                "code": "SERVICE_UNAVAILABLE",
                "data": body
            })),
        )
    }
}
