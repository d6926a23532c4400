use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::auth::{decode_access_token, Claims};
use crate::error::ApiError;
use crate::permissions::catalog::canonical_role;
use crate::permissions::{Principal, UserRole};
use crate::state::AppState;

/// Authenticated user context extracted from JWT
#[derive(Clone, Debug)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub institution_id: Option<String>,
    pub session_id: String,
    /// The raw token, kept so logout can blacklist it.
    pub token: String,
    pub exp: i64,
}

impl AuthUser {
    fn from_claims(claims: Claims, token: String) -> Self {
        Self {
            user_id: claims.sub,
            email: claims.email,
            name: claims.name,
            role: canonical_role(&claims.role),
            institution_id: claims.institution_id,
            session_id: claims.session_id,
            token,
            exp: claims.exp,
        }
    }

    pub fn principal(&self) -> Principal {
        Principal::new(self.user_id, self.role.clone())
    }

    pub fn is_system_admin(&self) -> bool {
        self.role == UserRole::SystemAdmin.as_str()
    }
}

/// JWT authentication middleware: validates the token, checks the blacklist
/// and that the session still exists, then injects [`AuthUser`].
pub async fn require_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_token(request.headers(), &state.config.security.auth_cookie_name)
        .map_err(ApiError::unauthorized)?;

    let claims = decode_access_token(&token, &state.config.security)?;

    if state.sessions.is_token_blacklisted(&token).await? {
        return Err(ApiError::unauthorized("Token has been revoked"));
    }

    let session = state.sessions.validate_session(&claims.session_id).await?;
    match session {
        Some(data) if data.user_id == claims.sub => {}
        _ => return Err(ApiError::unauthorized("Session expired or not found")),
    }

    let auth_user = AuthUser::from_claims(claims, token);
    tracing::debug!(user = %auth_user.user_id, role = %auth_user.role, "request authenticated");
    request.extensions_mut().insert(auth_user);

    Ok(next.run(request).await)
}

/// Token from the Authorization header, or from the auth cookie when the
/// header is absent.
fn extract_token(headers: &HeaderMap, cookie_name: &str) -> Result<String, String> {
    if let Some(auth_header) = headers.get(header::AUTHORIZATION) {
        let auth_str = auth_header
            .to_str()
            .map_err(|_| "Invalid Authorization header format".to_string())?;

        return match auth_str.strip_prefix("Bearer ") {
            Some(token) if !token.trim().is_empty() => Ok(token.trim().to_string()),
            Some(_) => Err("Empty JWT token".to_string()),
            None => Err("Authorization header must use Bearer token format".to_string()),
        };
    }

    cookie_value(headers, cookie_name).ok_or_else(|| "Missing Authorization header or auth cookie".to_string())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|cookies| cookies.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}
