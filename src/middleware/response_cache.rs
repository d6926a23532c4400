use std::time::Duration;

use axum::{
    body::{to_bytes, Body, HttpBody},
    extract::{Request, State},
    http::{header, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::auth::AuthUser;
use crate::cache::CacheOptions;
use crate::state::AppState;

pub const X_CACHE: &str = "x-cache";

/// Route prefixes whose responses are never stored.
const NEVER_CACHE: &[&str] = &["/api/sessions", "/api/cache", "/api/auth"];

/// Resources whose changes also affect resolved permissions.
const PERMISSION_RESOURCES: &[&str] = &["groups", "users", "roles"];

#[derive(Debug, Serialize, Deserialize)]
struct CachedResponse {
    status: u16,
    content_type: Option<String>,
    body: String,
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::OK);
        let mut response = (status, self.body).into_response();
        if let Some(value) = self.content_type.and_then(|ct| HeaderValue::from_str(&ct).ok()) {
            response.headers_mut().insert(header::CONTENT_TYPE, value);
        }
        response
    }
}

/// Caches successful `GET`/`HEAD` responses under `/api/` per caller, and
/// invalidates the matching tags after successful mutations.
///
/// Must sit inside [`super::require_auth`] so the caller is known.
pub async fn response_cache(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    if !path.starts_with("/api/") {
        return next.run(request).await;
    }

    let method = request.method().clone();
    if is_mutation(&method) {
        let response = next.run(request).await;
        if response.status().is_success() && !is_never_cached(&path) {
            let tags = tags_for_path(&path);
            if !tags.is_empty() {
                let removed = state.cache.invalidate_tags(&tags).await;
                debug!(%method, path = %path, ?tags, removed, "response cache invalidated");
            }
        }
        return response;
    }

    if method != Method::GET && method != Method::HEAD {
        return next.run(request).await;
    }

    let config = &state.config.cache;
    if !config.response_cache_enabled
        || !state.cache.is_enabled()
        || is_never_cached(&path)
        || bypass_requested(request.headers())
    {
        return mark(next.run(request).await, "BYPASS");
    }

    let scope = request
        .extensions()
        .get::<AuthUser>()
        .map(|user| user.user_id.to_string())
        .unwrap_or_else(|| "anon".to_string());
    let key = cache_key(&method, request.uri(), &scope);

    if let Some(cached) = state.cache.get::<CachedResponse>(&key).await {
        debug!(key = %key, "response cache hit");
        return mark(cached.into_response(), "HIT");
    }

    let response = next.run(request).await;
    if response.status() != StatusCode::OK {
        return mark(response, "MISS");
    }

    // Bodies without a known bound within the limit stream through untouched.
    let limit = config.max_body_bytes;
    match response.body().size_hint().upper() {
        Some(upper) if upper as usize <= limit => {}
        hint => {
            debug!(key = %key, upper = ?hint, limit, "response too large to cache");
            return mark(response, "MISS");
        }
    }

    let (parts, body) = response.into_parts();
    let bytes = match to_bytes(body, limit).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(key = %key, error = %e, "failed to buffer response body");
            return mark(StatusCode::INTERNAL_SERVER_ERROR.into_response(), "MISS");
        }
    };

    if let Ok(text) = std::str::from_utf8(&bytes) {
        let cached = CachedResponse {
            status: parts.status.as_u16(),
            content_type: parts
                .headers
                .get(header::CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(String::from),
            body: text.to_string(),
        };
        let options = CacheOptions::ttl(Duration::from_secs(config.response_ttl_secs.max(1)))
            .tags(tags_for_path(&path));
        state.cache.set(&key, &cached, options).await;
    }

    mark(Response::from_parts(parts, Body::from(bytes)), "MISS")
}

fn mark(mut response: Response, outcome: &'static str) -> Response {
    response.headers_mut().insert(X_CACHE, HeaderValue::from_static(outcome));
    response
}

fn is_mutation(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH | Method::DELETE)
}

fn is_never_cached(path: &str) -> bool {
    NEVER_CACHE
        .iter()
        .any(|prefix| path == *prefix || path.starts_with(&format!("{}/", prefix)))
}

fn bypass_requested(headers: &HeaderMap) -> bool {
    headers
        .get_all(header::CACHE_CONTROL)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|directive| matches!(directive.trim().to_ascii_lowercase().as_str(), "no-cache" | "no-store"))
}

/// `resp:{method}:{path}?{sorted query}:{scope}`
fn cache_key(method: &Method, uri: &Uri, scope: &str) -> String {
    let mut pairs: Vec<&str> = uri
        .query()
        .unwrap_or("")
        .split('&')
        .filter(|pair| !pair.is_empty())
        .collect();
    pairs.sort_unstable();
    format!("resp:{}:{}?{}:{}", method, uri.path(), pairs.join("&"), scope)
}

/// `/api/{resource}/{id}/...` gives `{resource}` and `{resource}:{id}`;
/// permission-bearing resources also carry `permissions`.
fn tags_for_path(path: &str) -> Vec<String> {
    let mut segments = path.trim_start_matches("/api/").split('/').filter(|s| !s.is_empty());
    let Some(resource) = segments.next() else {
        return Vec::new();
    };

    let mut tags = vec![resource.to_string()];
    if let Some(id) = segments.next() {
        tags.push(format!("{}:{}", resource, id));
    }
    if PERMISSION_RESOURCES.contains(&resource) && !tags.iter().any(|t| t == "permissions") {
        tags.push("permissions".to_string());
    }
    tags
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_sorts_query_and_scopes_by_caller() {
        let a: Uri = "/api/groups?b=2&a=1".parse().unwrap();
        let b: Uri = "/api/groups?a=1&b=2".parse().unwrap();
        assert_eq!(cache_key(&Method::GET, &a, "u1"), cache_key(&Method::GET, &b, "u1"));
        assert_eq!(cache_key(&Method::GET, &a, "u1"), "resp:GET:/api/groups?a=1&b=2:u1");
        assert_ne!(cache_key(&Method::GET, &a, "u1"), cache_key(&Method::GET, &a, "u2"));
    }

    #[test]
    fn tags_follow_resource_and_id() {
        assert_eq!(
            tags_for_path("/api/groups/abc/members"),
            vec!["groups", "groups:abc", "permissions"]
        );
        assert_eq!(tags_for_path("/api/permissions/catalog"), vec!["permissions", "permissions:catalog"]);
        assert!(tags_for_path("/api/").is_empty());
    }

    #[test]
    fn never_cache_matches_whole_segments() {
        assert!(is_never_cached("/api/sessions"));
        assert!(is_never_cached("/api/sessions/my"));
        assert!(is_never_cached("/api/cache/stats"));
        assert!(!is_never_cached("/api/sessionsx"));
        assert!(!is_never_cached("/api/groups"));
    }

    #[test]
    fn cache_control_directives_bypass() {
        let mut headers = HeaderMap::new();
        assert!(!bypass_requested(&headers));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("max-age=0, No-Cache"));
        assert!(bypass_requested(&headers));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        assert!(bypass_requested(&headers));
    }
}
