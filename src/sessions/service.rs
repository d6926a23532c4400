use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::device::{detect_device_type, DeviceType};
use super::error::SessionError;
use crate::cache::KvBackend;
use crate::config::SessionConfig;

const SESSION_PREFIX: &str = "session:";
const USER_SESSIONS_PREFIX: &str = "user_sessions:";
const ACTIVE_USERS: &str = "active_users";
const REFRESH_TOKEN_PREFIX: &str = "refresh_token:";
const BLACKLIST_PREFIX: &str = "blacklisted_tokens:";
const DEVICE_COUNT_PREFIX: &str = "session_count:";
const STATS_CACHE: &str = "session_stats_cache";

fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_PREFIX, session_id)
}

fn user_sessions_key(user_id: Uuid) -> String {
    format!("{}{}", USER_SESSIONS_PREFIX, user_id)
}

fn device_count_key(device: DeviceType) -> String {
    format!("{}{}", DEVICE_COUNT_PREFIX, device)
}

/// Tokens are blacklisted by digest so raw JWTs never sit in the store.
fn blacklist_key(token: &str) -> String {
    let digest = Sha256::digest(token.as_bytes());
    let hex: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}", BLACKLIST_PREFIX, hex)
}

/// Identity copied into a new session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    #[serde(default)]
    pub institution_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub role: String,
    pub institution_id: Option<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub device_type: DeviceType,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedSession {
    pub session_id: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

/// One live session as listed to its owner or an admin.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub user_id: Uuid,
    pub email: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub device_type: DeviceType,
    pub is_current: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    pub active_users: usize,
    pub total_active_sessions: i64,
    pub sessions_by_device: BTreeMap<String, i64>,
}

/// Session records, refresh tokens and the token blacklist.
///
/// Keys are not namespaced by the cache prefix; they share the backend with
/// [`crate::cache::CacheService`] but live beside it.
#[derive(Clone)]
pub struct SessionService {
    kv: Arc<dyn KvBackend>,
    config: SessionConfig,
}

impl SessionService {
    pub fn new(kv: Arc<dyn KvBackend>, config: SessionConfig) -> Self {
        Self { kv, config }
    }

    fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.config.session_ttl_secs)
    }

    fn refresh_ttl(&self) -> Duration {
        Duration::from_secs(self.config.refresh_ttl_secs)
    }

    pub async fn create_session(
        &self,
        user: &SessionUser,
        client: &ClientInfo,
        remember: bool,
    ) -> Result<CreatedSession, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let refresh_token = Uuid::new_v4().simple().to_string();
        let now = Utc::now();
        let device_type = detect_device_type(client.user_agent.as_deref());

        let data = SessionData {
            user_id: user.user_id,
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role.clone(),
            institution_id: user.institution_id.clone(),
            permissions: user.permissions.clone(),
            created_at: now,
            last_activity: now,
            ip_address: client.ip_address.clone(),
            user_agent: client.user_agent.clone(),
            device_type,
        };
        let ttl = if remember { self.refresh_ttl() } else { self.session_ttl() };

        self.kv
            .set(&session_key(&session_id), &serde_json::to_string(&data)?, Some(ttl))
            .await?;
        self.kv
            .set(
                &format!("{}{}", REFRESH_TOKEN_PREFIX, refresh_token),
                &session_id,
                Some(self.refresh_ttl()),
            )
            .await?;

        let user_key = user_sessions_key(user.user_id);
        self.kv.sadd(&user_key, std::slice::from_ref(&session_id)).await?;
        if self.kv.ttl(&user_key).await?.map_or(true, |remaining| remaining < ttl) {
            self.kv.expire(&user_key, ttl).await?;
        }
        self.kv.sadd(ACTIVE_USERS, &[user.user_id.to_string()]).await?;
        self.kv.incr(&device_count_key(device_type)).await?;
        self.kv.del(&[STATS_CACHE.to_string()]).await?;

        info!(user = %user.user_id, session = %session_id, device = %device_type, "session created");
        Ok(CreatedSession {
            session_id,
            refresh_token,
            expires_in: ttl.as_secs(),
        })
    }

    async fn read_session(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        match self.kv.get(&session_key(session_id)).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Returns the session and records activity on it. The remaining lifetime
    /// is kept as is.
    pub async fn validate_session(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        let key = session_key(session_id);
        let Some(mut data) = self.read_session(session_id).await? else {
            return Ok(None);
        };
        data.last_activity = Utc::now();
        let remaining = self.kv.ttl(&key).await?.unwrap_or_else(|| self.session_ttl());
        self.kv.set(&key, &serde_json::to_string(&data)?, Some(remaining)).await?;
        Ok(Some(data))
    }

    /// Looks a session up without touching its activity timestamp.
    pub async fn peek_session(&self, session_id: &str) -> Result<Option<SessionData>, SessionError> {
        self.read_session(session_id).await
    }

    pub async fn destroy_session(&self, session_id: &str) -> Result<bool, SessionError> {
        let Some(data) = self.read_session(session_id).await? else {
            return Ok(false);
        };

        self.kv.del(&[session_key(session_id)]).await?;
        let user_key = user_sessions_key(data.user_id);
        self.kv.srem(&user_key, &[session_id.to_string()]).await?;
        self.decrement_device(data.device_type).await?;

        if self.kv.scard(&user_key).await? == 0 {
            self.kv.srem(ACTIVE_USERS, &[data.user_id.to_string()]).await?;
            self.kv.del(&[user_key]).await?;
        }
        self.kv.del(&[STATS_CACHE.to_string()]).await?;

        info!(user = %data.user_id, session = %session_id, "session destroyed");
        Ok(true)
    }

    async fn decrement_device(&self, device: DeviceType) -> Result<(), SessionError> {
        let key = device_count_key(device);
        let current = self
            .kv
            .get(&key)
            .await?
            .and_then(|raw| raw.parse::<i64>().ok())
            .unwrap_or(0);
        if current > 0 {
            self.kv.decr(&key).await?;
        }
        Ok(())
    }

    /// Ends every session of a user; returns how many were live.
    pub async fn destroy_all_user_sessions(&self, user_id: Uuid) -> Result<usize, SessionError> {
        let user_key = user_sessions_key(user_id);
        let session_ids = self.kv.smembers(&user_key).await?;

        let mut destroyed = 0;
        for session_id in &session_ids {
            if let Some(data) = self.read_session(session_id).await? {
                self.kv.del(&[session_key(session_id)]).await?;
                self.decrement_device(data.device_type).await?;
                destroyed += 1;
            }
        }
        self.kv.del(&[user_key]).await?;
        self.kv.srem(ACTIVE_USERS, &[user_id.to_string()]).await?;
        self.kv.del(&[STATS_CACHE.to_string()]).await?;

        info!(user = %user_id, destroyed, "all user sessions destroyed");
        Ok(destroyed)
    }

    /// Live sessions of a user, most recently active first.
    pub async fn user_sessions(&self, user_id: Uuid) -> Result<Vec<SessionSummary>, SessionError> {
        let mut sessions = Vec::new();
        for session_id in self.kv.smembers(&user_sessions_key(user_id)).await? {
            let Some(data) = self.read_session(&session_id).await? else {
                continue;
            };
            let expires_at = self
                .kv
                .ttl(&session_key(&session_id))
                .await?
                .and_then(|ttl| chrono::Duration::from_std(ttl).ok())
                .map(|ttl| Utc::now() + ttl);
            sessions.push(SessionSummary {
                session_id,
                user_id: data.user_id,
                email: data.email,
                name: data.name,
                created_at: data.created_at,
                last_activity: data.last_activity,
                expires_at,
                ip_address: data.ip_address,
                user_agent: data.user_agent,
                device_type: data.device_type,
                is_current: false,
            });
        }
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    /// Session id a refresh token belongs to.
    pub async fn validate_refresh_token(&self, refresh_token: &str) -> Result<Option<String>, SessionError> {
        Ok(self
            .kv
            .get(&format!("{}{}", REFRESH_TOKEN_PREFIX, refresh_token))
            .await?)
    }

    pub async fn destroy_refresh_token(&self, refresh_token: &str) -> Result<bool, SessionError> {
        let removed = self
            .kv
            .del(&[format!("{}{}", REFRESH_TOKEN_PREFIX, refresh_token)])
            .await?;
        Ok(removed > 0)
    }

    /// Blacklists a token until its own expiry (`exp`, unix seconds). Tokens
    /// that already expired are not stored; returns whether an entry was written.
    pub async fn blacklist_token(&self, token: &str, exp: i64) -> Result<bool, SessionError> {
        let remaining = exp - Utc::now().timestamp();
        if remaining <= 0 {
            debug!("token already expired, not blacklisted");
            return Ok(false);
        }
        self.kv
            .set(&blacklist_key(token), "1", Some(Duration::from_secs(remaining as u64)))
            .await?;
        Ok(true)
    }

    pub async fn is_token_blacklisted(&self, token: &str) -> Result<bool, SessionError> {
        Ok(self.kv.get(&blacklist_key(token)).await?.as_deref() == Some("1"))
    }

    /// Active users and sessions per device, cached briefly.
    pub async fn session_stats(&self) -> Result<SessionStats, SessionError> {
        if let Some(raw) = self.kv.get(STATS_CACHE).await? {
            match serde_json::from_str::<SessionStats>(&raw) {
                Ok(stats) => return Ok(stats),
                Err(e) => warn!(error = %e, "ignoring unreadable session stats cache"),
            }
        }

        let active_users = self.kv.scard(ACTIVE_USERS).await?;
        let mut sessions_by_device = BTreeMap::new();
        for device in DeviceType::ALL {
            let count = self
                .kv
                .get(&device_count_key(device))
                .await?
                .and_then(|raw| raw.parse::<i64>().ok())
                .unwrap_or(0)
                .max(0);
            sessions_by_device.insert(device.to_string(), count);
        }
        let stats = SessionStats {
            active_users,
            total_active_sessions: sessions_by_device.values().sum(),
            sessions_by_device,
        };

        let ttl = Duration::from_secs(self.config.stats_cache_secs.max(1));
        self.kv.set(STATS_CACHE, &serde_json::to_string(&stats)?, Some(ttl)).await?;
        Ok(stats)
    }

    /// Drops session ids whose records expired from the per-user sets and
    /// `active_users`, then recounts the per-device counters from the live
    /// records. Returns how many dangling ids were removed.
    pub async fn cleanup_expired(&self) -> Result<usize, SessionError> {
        let mut removed = 0;

        for user_key in self.kv.keys(&format!("{}*", USER_SESSIONS_PREFIX)).await? {
            let mut dangling = Vec::new();
            for session_id in self.kv.smembers(&user_key).await? {
                if self.kv.get(&session_key(&session_id)).await?.is_none() {
                    dangling.push(session_id);
                }
            }
            removed += self.kv.srem(&user_key, &dangling).await?;

            if self.kv.scard(&user_key).await? == 0 {
                self.kv.del(&[user_key.clone()]).await?;
                let user_id = user_key.trim_start_matches(USER_SESSIONS_PREFIX).to_string();
                self.kv.srem(ACTIVE_USERS, &[user_id]).await?;
            }
        }

        // Users whose session set expired on its own.
        for user_id in self.kv.smembers(ACTIVE_USERS).await? {
            let user_key = format!("{}{}", USER_SESSIONS_PREFIX, user_id);
            if self.kv.scard(&user_key).await? == 0 {
                self.kv.srem(ACTIVE_USERS, &[user_id]).await?;
            }
        }

        let mut counts: BTreeMap<DeviceType, i64> = DeviceType::ALL.iter().map(|d| (*d, 0)).collect();
        for key in self.kv.keys(&format!("{}*", SESSION_PREFIX)).await? {
            let Some(raw) = self.kv.get(&key).await? else {
                continue;
            };
            match serde_json::from_str::<SessionData>(&raw) {
                Ok(data) => *counts.entry(data.device_type).or_insert(0) += 1,
                Err(e) => warn!(key, error = %e, "skipping unreadable session record"),
            }
        }
        for (device, count) in counts {
            self.kv.set(&device_count_key(device), &count.to_string(), None).await?;
        }
        self.kv.del(&[STATS_CACHE.to_string()]).await?;

        info!(removed, "expired sessions cleaned up");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;

    const PHONE: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148";
    const DESKTOP: &str = "Mozilla/5.0 (X11; Linux x86_64) Firefox/121.0";

    fn service() -> (SessionService, Arc<MemoryBackend>) {
        let kv = Arc::new(MemoryBackend::new());
        (SessionService::new(kv.clone(), SessionConfig::default()), kv)
    }

    fn user() -> SessionUser {
        SessionUser {
            user_id: Uuid::new_v4(),
            email: "ana@escola.test".to_string(),
            name: "Ana".to_string(),
            role: "TEACHER".to_string(),
            institution_id: Some("1".to_string()),
            permissions: vec![],
        }
    }

    fn client(ua: &str) -> ClientInfo {
        ClientInfo {
            ip_address: Some("10.0.0.1".to_string()),
            user_agent: Some(ua.to_string()),
        }
    }

    #[tokio::test]
    async fn create_validate_destroy() {
        let (sessions, _) = service();
        let user = user();
        let created = sessions.create_session(&user, &client(PHONE), false).await.unwrap();
        assert_eq!(created.expires_in, 86_400);

        let data = sessions.validate_session(&created.session_id).await.unwrap().unwrap();
        assert_eq!(data.user_id, user.user_id);
        assert_eq!(data.device_type, DeviceType::Mobile);
        assert!(data.last_activity >= data.created_at);

        assert_eq!(
            sessions.validate_refresh_token(&created.refresh_token).await.unwrap(),
            Some(created.session_id.clone())
        );

        assert!(sessions.destroy_session(&created.session_id).await.unwrap());
        assert!(!sessions.destroy_session(&created.session_id).await.unwrap());
        assert!(sessions.validate_session(&created.session_id).await.unwrap().is_none());
        assert_eq!(sessions.session_stats().await.unwrap().active_users, 0);
    }

    #[tokio::test]
    async fn remember_me_uses_refresh_lifetime() {
        let (sessions, kv) = service();
        let created = sessions.create_session(&user(), &client(DESKTOP), true).await.unwrap();
        assert_eq!(created.expires_in, 7 * 86_400);
        let ttl = kv.ttl(&session_key(&created.session_id)).await.unwrap().unwrap();
        assert!(ttl > Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn stats_track_devices_and_are_invalidated() {
        let (sessions, _) = service();
        let a = user();
        let b = user();
        sessions.create_session(&a, &client(PHONE), false).await.unwrap();
        sessions.create_session(&a, &client(DESKTOP), false).await.unwrap();
        let stats = sessions.session_stats().await.unwrap();
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.total_active_sessions, 2);
        assert_eq!(stats.sessions_by_device["mobile"], 1);

        sessions.create_session(&b, &client(DESKTOP), false).await.unwrap();
        let stats = sessions.session_stats().await.unwrap();
        assert_eq!(stats.active_users, 2);
        assert_eq!(stats.sessions_by_device["desktop"], 2);
    }

    #[tokio::test]
    async fn destroy_all_sessions_of_one_user() {
        let (sessions, _) = service();
        let a = user();
        let b = user();
        sessions.create_session(&a, &client(PHONE), false).await.unwrap();
        sessions.create_session(&a, &client(DESKTOP), false).await.unwrap();
        let kept = sessions.create_session(&b, &client(DESKTOP), false).await.unwrap();

        assert_eq!(sessions.destroy_all_user_sessions(a.user_id).await.unwrap(), 2);
        assert!(sessions.user_sessions(a.user_id).await.unwrap().is_empty());
        assert!(sessions.validate_session(&kept.session_id).await.unwrap().is_some());

        let stats = sessions.session_stats().await.unwrap();
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.total_active_sessions, 1);
    }

    #[tokio::test]
    async fn user_sessions_most_recent_first() {
        let (sessions, _) = service();
        let a = user();
        let first = sessions.create_session(&a, &client(PHONE), false).await.unwrap();
        let second = sessions.create_session(&a, &client(DESKTOP), false).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        sessions.validate_session(&first.session_id).await.unwrap();

        let listed = sessions.user_sessions(a.user_id).await.unwrap();
        let ids: Vec<_> = listed.iter().map(|s| s.session_id.clone()).collect();
        assert_eq!(ids, vec![first.session_id, second.session_id]);
        assert!(listed[0].expires_at.is_some());
    }

    #[tokio::test]
    async fn blacklist_respects_token_expiry() {
        let (sessions, _) = service();
        let now = Utc::now().timestamp();
        assert!(sessions.blacklist_token("live.jwt", now + 600).await.unwrap());
        assert!(sessions.is_token_blacklisted("live.jwt").await.unwrap());

        assert!(!sessions.blacklist_token("dead.jwt", now - 5).await.unwrap());
        assert!(!sessions.is_token_blacklisted("dead.jwt").await.unwrap());
        assert!(!sessions.is_token_blacklisted("other.jwt").await.unwrap());
    }

    #[tokio::test]
    async fn refresh_tokens_can_be_revoked() {
        let (sessions, _) = service();
        let created = sessions.create_session(&user(), &client(DESKTOP), false).await.unwrap();
        assert!(sessions.destroy_refresh_token(&created.refresh_token).await.unwrap());
        assert_eq!(sessions.validate_refresh_token(&created.refresh_token).await.unwrap(), None);
    }

    #[tokio::test]
    async fn cleanup_drops_dangling_ids_and_recounts() {
        let (sessions, kv) = service();
        let a = user();
        let gone = sessions.create_session(&a, &client(PHONE), false).await.unwrap();
        let live = sessions.create_session(&a, &client(DESKTOP), false).await.unwrap();
        let b = user();
        let b_session = sessions.create_session(&b, &client(PHONE), false).await.unwrap();

        // Simulate expiry of the records without going through destroy_session.
        kv.del(&[session_key(&gone.session_id), session_key(&b_session.session_id)])
            .await
            .unwrap();

        assert_eq!(sessions.cleanup_expired().await.unwrap(), 2);
        let remaining = sessions.user_sessions(a.user_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].session_id, live.session_id);

        let stats = sessions.session_stats().await.unwrap();
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.sessions_by_device["mobile"], 0);
        assert_eq!(stats.sessions_by_device["desktop"], 1);
    }
}
