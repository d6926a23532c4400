use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn_with_state,
    routing::{delete, get, post, put},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::config::SecurityConfig;
use crate::handlers::{protected, public};
use crate::middleware::{require_auth, response_cache};
use crate::state::AppState;

/// Full application router.
///
/// Protected routes run `require_auth` first and `response_cache` inside it,
/// so cached responses are always scoped to the authenticated caller.
pub fn router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .merge(group_routes())
        .merge(user_routes())
        .merge(role_routes())
        .merge(session_routes())
        .merge(cache_routes())
        .route("/api/permissions/catalog", get(protected::permissions::catalog))
        .layer(from_fn_with_state(state.clone(), response_cache))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        // Public
        .route("/", get(public::root))
        .route("/health", get(public::health))
        .route("/api/sessions/refresh", post(public::sessions::refresh))
        // Protected API
        .merge(protected_routes)
        // Global middleware
        .layer(cors_layer(&state.config.security))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(security: &SecurityConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = security
        .cors_origins
        .iter()
        .filter_map(|origin| HeaderValue::from_str(origin).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE, header::CACHE_CONTROL])
        .allow_credentials(true)
}

fn group_routes() -> Router<AppState> {
    use protected::groups;

    Router::new()
        .route("/api/groups", get(groups::group_list).post(groups::group_create))
        .route("/api/groups/stats", get(groups::group_stats))
        .route(
            "/api/groups/:id",
            get(groups::group_get)
                .put(groups::group_update)
                .delete(groups::group_delete),
        )
        .route("/api/groups/:id/clone", post(groups::group_clone))
        // Membership
        .route("/api/groups/:id/members", get(groups::members_list).post(groups::members_add))
        .route("/api/groups/:id/members/bulk", post(groups::members_bulk_add))
        .route("/api/groups/:id/members/:user_id", delete(groups::members_remove))
        // Grants
        .route(
            "/api/groups/:id/permissions",
            get(groups::permissions_list)
                .put(groups::permissions_put)
                .delete(groups::permissions_delete),
        )
        .route("/api/groups/:id/permissions/bulk", post(groups::permissions_bulk))
        .route("/api/groups/:id/permissions/matrix", get(groups::permissions_matrix))
}

fn user_routes() -> Router<AppState> {
    use protected::users;

    Router::new()
        .route("/api/users/:id/permissions/effective", get(users::permissions_effective))
        .route("/api/users/:id/permissions/check", get(users::permissions_check))
        .route("/api/users/:id/permissions/matrix", get(users::permissions_matrix))
        .route(
            "/api/users/:id/permissions/contextual",
            get(users::permissions_contextual_get)
                .put(users::permissions_contextual_put)
                .delete(users::permissions_contextual_delete),
        )
}

fn role_routes() -> Router<AppState> {
    use protected::roles;

    Router::new()
        .route("/api/roles", get(roles::roles_list))
        .route("/api/roles/:role/permissions", put(roles::permissions_put))
}

fn session_routes() -> Router<AppState> {
    use protected::sessions;

    Router::new()
        .route("/api/sessions", get(sessions::stats))
        .route("/api/sessions/my", get(sessions::my_sessions))
        .route("/api/sessions/logout", post(sessions::logout))
        .route("/api/sessions/logout-all", post(sessions::logout_all))
        .route("/api/sessions/cleanup", post(sessions::cleanup))
        .route("/api/sessions/user/:id", get(sessions::user_sessions))
        .route("/api/sessions/user/:id/terminate-all", post(sessions::terminate_all))
        .route("/api/sessions/:id", delete(sessions::delete))
}

fn cache_routes() -> Router<AppState> {
    use protected::cache;

    Router::new()
        .route("/api/cache/stats", get(cache::stats))
        .route("/api/cache/health", get(cache::health))
        .route("/api/cache/invalidate", post(cache::invalidate))
        .route("/api/cache/clear", post(cache::clear))
}
