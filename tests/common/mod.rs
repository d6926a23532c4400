#![allow(dead_code)]

use std::sync::Arc;

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder};
use uuid::Uuid;

use edu_portal_api::auth::{issue_access_token, Claims};
use edu_portal_api::config::AppConfig;
use edu_portal_api::database::MemoryPermissionStore;
use edu_portal_api::sessions::{ClientInfo, SessionUser};
use edu_portal_api::{router, AppState};

/// A server running in-process on a free port with in-memory backends.
pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub store: Arc<MemoryPermissionStore>,
    pub client: Client,
}

/// Credentials of a user with a live session.
pub struct TestUser {
    pub user_id: Uuid,
    pub role: String,
    pub session_id: String,
    pub token: String,
    pub refresh_token: String,
}

impl TestServer {
    pub async fn start() -> Result<Self> {
        Self::start_with(AppConfig::development()).await
    }

    pub async fn start_with(config: AppConfig) -> Result<Self> {
        let port = portpicker::pick_unused_port().context("failed to pick free port")?;
        let (state, store) = AppState::in_memory(config).await;

        let listener = tokio::net::TcpListener::bind(("127.0.0.1", port))
            .await
            .context("failed to bind test listener")?;
        let app = router(state.clone());
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        Ok(Self {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            store,
            client: Client::new(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Registers a new user with `role` and opens a session for it.
    pub async fn login(&self, role: &str) -> Result<TestUser> {
        self.login_as(Uuid::new_v4(), role).await
    }

    /// Opens another session for a given user.
    pub async fn login_as(&self, user_id: Uuid, role: &str) -> Result<TestUser> {
        self.store.set_user_role(user_id, role).await;

        let user = SessionUser {
            user_id,
            email: format!("{}@escola.test", user_id.simple()),
            name: format!("{} user", role.to_lowercase()),
            role: role.to_string(),
            institution_id: None,
            permissions: Vec::new(),
        };
        let client = ClientInfo {
            ip_address: Some("127.0.0.1".to_string()),
            user_agent: Some("integration-test".to_string()),
        };
        let session = self.state.sessions.create_session(&user, &client, false).await?;

        let security = &self.state.config.security;
        let claims = Claims::new(&user, session.session_id.clone(), security.jwt_expiry_hours);
        let token = issue_access_token(&claims, security)?;

        Ok(TestUser {
            user_id,
            role: role.to_string(),
            session_id: session.session_id,
            token,
            refresh_token: session.refresh_token,
        })
    }

    pub fn get(&self, user: &TestUser, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&user.token)
    }

    pub fn post(&self, user: &TestUser, path: &str) -> RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&user.token)
    }

    pub fn put(&self, user: &TestUser, path: &str) -> RequestBuilder {
        self.client.put(self.url(path)).bearer_auth(&user.token)
    }

    pub fn delete(&self, user: &TestUser, path: &str) -> RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(&user.token)
    }
}

/// Value of the `X-Cache` response header.
pub fn cache_outcome(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get("x-cache")
        .and_then(|v| v.to_str().ok())
        .map(String::from)
}
