use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::SecurityConfig;
use crate::sessions::{SessionData, SessionUser};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub institution_id: Option<String>,
    pub session_id: String,
    pub exp: i64,
    pub iat: i64,
}

impl Claims {
    pub fn new(user: &SessionUser, session_id: impl Into<String>, expiry_hours: u64) -> Self {
        let now = Utc::now();
        let exp = (now + Duration::hours(expiry_hours as i64)).timestamp();

        Self {
            sub: user.user_id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            institution_id: user.institution_id.clone(),
            session_id: session_id.into(),
            exp,
            iat: now.timestamp(),
        }
    }

    /// Claims for a fresh access token on an existing session.
    pub fn for_session(data: &SessionData, session_id: impl Into<String>, expiry_hours: u64) -> Self {
        let user = SessionUser {
            user_id: data.user_id,
            email: data.email.clone(),
            name: data.name.clone(),
            role: data.role.clone(),
            institution_id: data.institution_id.clone(),
            permissions: data.permissions.clone(),
        };
        Self::new(&user, session_id, expiry_hours)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("JWT secret not configured")]
    MissingSecret,

    #[error("Invalid token: {0}")]
    InvalidToken(#[from] jsonwebtoken::errors::Error),
}

pub fn issue_access_token(claims: &Claims, security: &SecurityConfig) -> Result<String, AuthError> {
    if security.jwt_secret.is_empty() {
        return Err(AuthError::MissingSecret);
    }
    let encoding_key = EncodingKey::from_secret(security.jwt_secret.as_bytes());
    Ok(encode(&Header::default(), claims, &encoding_key)?)
}

/// Verifies signature and expiry.
pub fn decode_access_token(token: &str, security: &SecurityConfig) -> Result<Claims, AuthError> {
    if security.jwt_secret.is_empty() {
        return Err(AuthError::MissingSecret);
    }
    let decoding_key = DecodingKey::from_secret(security.jwt_secret.as_bytes());
    let data = decode::<Claims>(token, &decoding_key, &Validation::default())?;
    Ok(data.claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn user() -> SessionUser {
        SessionUser {
            user_id: Uuid::new_v4(),
            email: "coord@escola.test".to_string(),
            name: "Coordenação".to_string(),
            role: "COORDINATOR".to_string(),
            institution_id: Some("3".to_string()),
            permissions: vec![],
        }
    }

    #[test]
    fn tokens_round_trip_with_the_same_secret() {
        let security = AppConfig::development().security;
        let claims = Claims::new(&user(), "s-1", 1);
        let token = issue_access_token(&claims, &security).unwrap();
        assert_eq!(decode_access_token(&token, &security).unwrap(), claims);
    }

    #[test]
    fn wrong_secret_and_expired_tokens_are_rejected() {
        let security = AppConfig::development().security;
        let token = issue_access_token(&Claims::new(&user(), "s-1", 1), &security).unwrap();

        let mut other = security.clone();
        other.jwt_secret = "another-secret".to_string();
        assert!(matches!(decode_access_token(&token, &other), Err(AuthError::InvalidToken(_))));

        let mut expired = Claims::new(&user(), "s-1", 1);
        expired.exp = Utc::now().timestamp() - 3600;
        let token = issue_access_token(&expired, &security).unwrap();
        assert!(decode_access_token(&token, &security).is_err());
    }

    #[test]
    fn empty_secret_is_refused() {
        let mut security = AppConfig::development().security;
        security.jwt_secret.clear();
        assert!(matches!(
            issue_access_token(&Claims::new(&user(), "s", 1), &security),
            Err(AuthError::MissingSecret)
        ));
    }
}
