use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub environment: Environment,
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub session: SessionConfig,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// When unset the permission store runs in memory.
    pub url: Option<String>,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackendKind {
    Memory,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub enabled: bool,
    pub backend: CacheBackendKind,
    pub redis_url: String,
    pub key_prefix: String,
    pub default_ttl_secs: u64,
    pub response_cache_enabled: bool,
    pub response_ttl_secs: u64,
    pub max_body_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    pub session_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
    pub stats_cache_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityConfig {
    pub jwt_secret: String,
    pub jwt_expiry_hours: u64,
    pub cors_origins: Vec<String>,
    pub auth_cookie_name: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let environment = match env::var("APP_ENV").as_deref() {
            Ok("production") | Ok("prod") => Environment::Production,
            Ok("staging") | Ok("stage") => Environment::Staging,
            _ => Environment::Development,
        };

        // Set defaults based on environment, then override with specific env vars
        match environment {
            Environment::Production => Self::production(),
            Environment::Staging => Self::staging(),
            Environment::Development => Self::development(),
        }
        .with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // Server overrides
        if let Some(v) = env::var("PORTAL_API_PORT").ok().or_else(|| env::var("PORT").ok()) {
            self.server.port = v.parse().unwrap_or(self.server.port);
        }

        // Database overrides
        if let Ok(v) = env::var("DATABASE_URL") {
            if !v.trim().is_empty() {
                self.database.url = Some(v);
            }
        }
        if let Ok(v) = env::var("DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = v.parse().unwrap_or(self.database.max_connections);
        }
        if let Ok(v) = env::var("DATABASE_CONNECTION_TIMEOUT") {
            self.database.connection_timeout = v.parse().unwrap_or(self.database.connection_timeout);
        }

        // Cache overrides
        if let Ok(v) = env::var("REDIS_ENABLED") {
            self.cache.enabled = v.parse().unwrap_or(self.cache.enabled);
        }
        if let Ok(v) = env::var("CACHE_BACKEND") {
            self.cache.backend = match v.to_ascii_lowercase().as_str() {
                "redis" => CacheBackendKind::Redis,
                "memory" => CacheBackendKind::Memory,
                _ => self.cache.backend,
            };
        }
        if let Ok(v) = env::var("REDIS_URL") {
            self.cache.redis_url = v;
        }
        if let Ok(v) = env::var("CACHE_PREFIX") {
            self.cache.key_prefix = v;
        }
        if let Ok(v) = env::var("CACHE_DEFAULT_TTL_SECS") {
            self.cache.default_ttl_secs = v.parse().unwrap_or(self.cache.default_ttl_secs);
        }
        if let Ok(v) = env::var("RESPONSE_CACHE_ENABLED") {
            self.cache.response_cache_enabled = v.parse().unwrap_or(self.cache.response_cache_enabled);
        }
        if let Ok(v) = env::var("RESPONSE_CACHE_TTL_SECS") {
            self.cache.response_ttl_secs = v.parse().unwrap_or(self.cache.response_ttl_secs);
        }
        if let Ok(v) = env::var("RESPONSE_CACHE_MAX_BODY_BYTES") {
            self.cache.max_body_bytes = v.parse().unwrap_or(self.cache.max_body_bytes);
        }

        // Session overrides
        if let Ok(v) = env::var("SESSION_TTL_SECS") {
            self.session.session_ttl_secs = v.parse().unwrap_or(self.session.session_ttl_secs);
        }
        if let Ok(v) = env::var("SESSION_REFRESH_TTL_SECS") {
            self.session.refresh_ttl_secs = v.parse().unwrap_or(self.session.refresh_ttl_secs);
        }

        // Security overrides
        if let Ok(v) = env::var("JWT_SECRET") {
            self.security.jwt_secret = v;
        }
        if let Ok(v) = env::var("SECURITY_JWT_EXPIRY_HOURS") {
            self.security.jwt_expiry_hours = v.parse().unwrap_or(self.security.jwt_expiry_hours);
        }
        if let Ok(v) = env::var("SECURITY_CORS_ORIGINS") {
            self.security.cors_origins = v.split(',').map(|s| s.trim().to_string()).collect();
        }
        if let Ok(v) = env::var("AUTH_COOKIE_NAME") {
            self.security.auth_cookie_name = v;
        }

        self
    }

    pub fn development() -> Self {
        Self {
            environment: Environment::Development,
            server: ServerConfig { port: 3001 },
            database: DatabaseConfig {
                url: None,
                max_connections: 10,
                connection_timeout: 30,
            },
            cache: CacheConfig {
                enabled: true,
                backend: CacheBackendKind::Memory,
                redis_url: "redis://127.0.0.1:6379/0".to_string(),
                key_prefix: "portal_cache:".to_string(),
                default_ttl_secs: 30 * 60,
                response_cache_enabled: true,
                response_ttl_secs: 60,
                max_body_bytes: 1024 * 1024, // 1MB
            },
            session: SessionConfig::default(),
            security: SecurityConfig {
                jwt_secret: "development-secret-change-me".to_string(),
                jwt_expiry_hours: 24,
                cors_origins: vec!["http://localhost:3000".to_string()],
                auth_cookie_name: "auth_token".to_string(),
            },
        }
    }

    fn staging() -> Self {
        Self {
            environment: Environment::Staging,
            server: ServerConfig { port: 3001 },
            database: DatabaseConfig {
                url: None,
                max_connections: 20,
                connection_timeout: 10,
            },
            cache: CacheConfig {
                enabled: true,
                backend: CacheBackendKind::Redis,
                redis_url: "redis://127.0.0.1:6379/0".to_string(),
                key_prefix: "portal_cache:".to_string(),
                default_ttl_secs: 30 * 60,
                response_cache_enabled: true,
                response_ttl_secs: 120,
                max_body_bytes: 512 * 1024,
            },
            session: SessionConfig::default(),
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 4,
                cors_origins: vec!["https://staging.example.com".to_string()],
                auth_cookie_name: "auth_token".to_string(),
            },
        }
    }

    fn production() -> Self {
        Self {
            environment: Environment::Production,
            server: ServerConfig { port: 3001 },
            database: DatabaseConfig {
                url: None,
                max_connections: 50,
                connection_timeout: 5,
            },
            cache: CacheConfig {
                enabled: true,
                backend: CacheBackendKind::Redis,
                redis_url: "redis://127.0.0.1:6379/0".to_string(),
                key_prefix: "portal_cache:".to_string(),
                default_ttl_secs: 30 * 60,
                response_cache_enabled: true,
                response_ttl_secs: 300,
                max_body_bytes: 512 * 1024,
            },
            session: SessionConfig::default(),
            security: SecurityConfig {
                jwt_secret: String::new(),
                jwt_expiry_hours: 1,
                cors_origins: vec!["https://portal.example.com".to_string()],
                auth_cookie_name: "auth_token".to_string(),
            },
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: 24 * 60 * 60,
            refresh_ttl_secs: 7 * 24 * 60 * 60,
            stats_cache_secs: 30,
        }
    }
}

// Global singleton config - initialized once at startup
pub static CONFIG: Lazy<AppConfig> = Lazy::new(AppConfig::from_env);

// Convenience function for accessing config
pub fn config() -> &'static AppConfig {
    &CONFIG
}

#[macro_export]
macro_rules! is_production {
    () => {
        matches!($crate::config::CONFIG.environment, $crate::config::Environment::Production)
    };
}
