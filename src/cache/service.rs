use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use super::backend::KvBackend;
use super::error::CacheError;
use super::keys::{self, ttl};
use crate::config::CacheConfig;

/// Pings slower than this report the cache as degraded.
const HEALTHY_LATENCY: Duration = Duration::from_millis(100);

/// What is actually stored under a cache key.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry<T> {
    pub data: T,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

impl<T> CacheEntry<T> {
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Default)]
pub struct CacheOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    pub version: Option<String>,
}

impl CacheOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub backend: &'static str,
    pub hits: u64,
    pub misses: u64,
    pub sets: u64,
    pub deletes: u64,
    pub hit_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone, Serialize)]
pub struct CacheHealth {
    pub status: HealthStatus,
    pub backend: &'static str,
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct WarmupReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<String>,
}

pub type WarmupTask = Arc<dyn Fn(CacheService) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    sets: AtomicU64,
    deletes: AtomicU64,
}

struct Inner {
    backend: Arc<dyn KvBackend>,
    prefix: String,
    enabled: bool,
    default_ttl: Duration,
    counters: Counters,
    warmups: RwLock<Vec<(String, WarmupTask)>>,
}

/// Tagged JSON cache over a [`KvBackend`].
///
/// Backend failures are logged and reported as a miss (reads) or `false`
/// (writes); callers never see them as errors.
#[derive(Clone)]
pub struct CacheService {
    inner: Arc<Inner>,
}

impl CacheService {
    pub fn new(backend: Arc<dyn KvBackend>, config: &CacheConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                prefix: config.key_prefix.clone(),
                enabled: config.enabled,
                default_ttl: Duration::from_secs(config.default_ttl_secs.max(1)),
                counters: Counters::default(),
                warmups: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn backend(&self) -> &Arc<dyn KvBackend> {
        &self.inner.backend
    }

    pub fn prefix(&self) -> &str {
        &self.inner.prefix
    }

    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.inner.prefix, key)
    }

    fn miss(&self) {
        self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.inner.enabled {
            self.miss();
            return None;
        }
        let full_key = self.full_key(key);

        let raw = match self.inner.backend.get(&full_key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "cache miss");
                self.miss();
                return None;
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed");
                self.miss();
                return None;
            }
        };

        match serde_json::from_str::<CacheEntry<T>>(&raw) {
            Ok(entry) if !entry.is_expired() => {
                debug!(key, "cache hit");
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.data)
            }
            Ok(_) => {
                debug!(key, "cache entry expired");
                self.drop_key(&full_key).await;
                self.miss();
                None
            }
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable cache entry");
                self.drop_key(&full_key).await;
                self.miss();
                None
            }
        }
    }

    /// Stores `value` and registers the key under each tag. Returns whether the
    /// value was written.
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, options: CacheOptions) -> bool {
        if !self.inner.enabled {
            return false;
        }
        match self.try_set(key, value, options).await {
            Ok(()) => {
                self.inner.counters.sets.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(e) => {
                error!(key, error = %e, "cache write failed");
                false
            }
        }
    }

    async fn try_set<T: Serialize>(&self, key: &str, value: &T, options: CacheOptions) -> Result<(), CacheError> {
        let ttl = options.ttl.unwrap_or(self.inner.default_ttl);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(365));
        let entry = CacheEntry {
            data: value,
            created_at: now,
            expires_at,
            tags: options.tags,
            version: options.version,
        };
        let full_key = self.full_key(key);
        let raw = serde_json::to_string(&entry)?;
        self.inner.backend.set(&full_key, &raw, Some(ttl)).await?;

        for tag in &entry.tags {
            let tag_key = keys::tag_set(&self.inner.prefix, tag);
            self.inner.backend.sadd(&tag_key, std::slice::from_ref(&full_key)).await?;
            // The tag set has to outlive every key it tracks.
            let current = self.inner.backend.ttl(&tag_key).await?;
            if current.map_or(true, |remaining| remaining < ttl) {
                self.inner.backend.expire(&tag_key, ttl).await?;
            }
        }
        debug!(key, ttl_secs = ttl.as_secs(), tags = ?entry.tags, "cache set");
        Ok(())
    }

    /// Cache-aside: returns the cached value or computes, stores and returns it.
    /// Errors from `fetch` are passed through and nothing is stored.
    pub async fn get_or_set<T, E, F, Fut>(&self, key: &str, options: CacheOptions, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.get::<T>(key).await {
            return Ok(hit);
        }
        let value = fetch().await?;
        self.set(key, &value, options).await;
        Ok(value)
    }

    /// Database query results, tagged `queries`.
    pub async fn query_cache<T, E, F, Fut>(&self, key: &str, options: CacheOptions, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let options = CacheOptions {
            ttl: options.ttl.or(Some(ttl::MEDIUM)),
            ..options
        }
        .tag("queries");
        self.get_or_set(&format!("query:{}", key), options, fetch).await
    }

    /// Rarely changing data kept for a day, tagged `static`.
    pub async fn static_cache<T, E, F, Fut>(&self, key: &str, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.get_or_set(key, CacheOptions::ttl(ttl::VERY_LONG).tag("static"), fetch)
            .await
    }

    /// Frequently changing data kept for five minutes, tagged `dynamic` plus
    /// the tags of whatever it is derived from.
    pub async fn dynamic_cache<T, E, F, Fut>(&self, key: &str, tags: &[&str], fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let options = CacheOptions::ttl(ttl::SHORT)
            .tag("dynamic")
            .tags(tags.iter().copied());
        self.get_or_set(key, options, fetch).await
    }

    async fn drop_key(&self, full_key: &str) -> usize {
        match self.inner.backend.del(&[full_key.to_string()]).await {
            Ok(n) => {
                self.inner.counters.deletes.fetch_add(n as u64, Ordering::Relaxed);
                n
            }
            Err(e) => {
                warn!(key = full_key, error = %e, "cache delete failed");
                0
            }
        }
    }

    pub async fn delete(&self, key: &str) -> bool {
        self.drop_key(&self.full_key(key)).await > 0
    }

    /// Deletes every key stored with `tag`, and the tag set itself. Returns how
    /// many cached keys were removed.
    pub async fn invalidate_tag(&self, tag: &str) -> usize {
        let tag_key = keys::tag_set(&self.inner.prefix, tag);
        let members = match self.inner.backend.smembers(&tag_key).await {
            Ok(members) => members,
            Err(e) => {
                error!(tag, error = %e, "failed to read tag set");
                return 0;
            }
        };

        let removed = if members.is_empty() {
            0
        } else {
            match self.inner.backend.del(&members).await {
                Ok(n) => n,
                Err(e) => {
                    error!(tag, error = %e, "failed to invalidate tag");
                    return 0;
                }
            }
        };
        if let Err(e) = self.inner.backend.del(&[tag_key]).await {
            warn!(tag, error = %e, "failed to drop tag set");
        }
        self.inner.counters.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        if removed > 0 {
            info!(tag, removed, "invalidated cache tag");
        }
        removed
    }

    pub async fn invalidate_tags<S: AsRef<str>>(&self, tags: &[S]) -> usize {
        let mut removed = 0;
        for tag in tags {
            removed += self.invalidate_tag(tag.as_ref()).await;
        }
        removed
    }

    /// Deletes keys (relative to the prefix) matching a glob pattern.
    pub async fn delete_by_pattern(&self, pattern: &str) -> usize {
        let full_pattern = self.full_key(pattern);
        let matched = match self.inner.backend.keys(&full_pattern).await {
            Ok(keys) => keys,
            Err(e) => {
                error!(pattern, error = %e, "failed to scan cache keys");
                return 0;
            }
        };
        if matched.is_empty() {
            return 0;
        }
        match self.inner.backend.del(&matched).await {
            Ok(removed) => {
                self.inner.counters.deletes.fetch_add(removed as u64, Ordering::Relaxed);
                info!(pattern, removed, "deleted cache keys by pattern");
                removed
            }
            Err(e) => {
                error!(pattern, error = %e, "failed to delete cache keys");
                0
            }
        }
    }

    /// Removes everything under the prefix, tag sets included.
    pub async fn clear(&self) -> usize {
        let removed = self.delete_by_pattern("*").await;
        info!(removed, "cache cleared");
        removed
    }

    pub fn stats(&self) -> CacheStats {
        let c = &self.inner.counters;
        let hits = c.hits.load(Ordering::Relaxed);
        let misses = c.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            enabled: self.inner.enabled,
            backend: self.inner.backend.name(),
            hits,
            misses,
            sets: c.sets.load(Ordering::Relaxed),
            deletes: c.deletes.load(Ordering::Relaxed),
            hit_rate: if lookups == 0 { 0.0 } else { hits as f64 / lookups as f64 },
        }
    }

    pub fn reset_stats(&self) {
        let c = &self.inner.counters;
        for counter in [&c.hits, &c.misses, &c.sets, &c.deletes] {
            counter.store(0, Ordering::Relaxed);
        }
    }

    pub async fn health_check(&self) -> CacheHealth {
        let backend = self.inner.backend.name();
        if !self.inner.enabled {
            return CacheHealth {
                status: HealthStatus::Unhealthy,
                backend,
                latency_ms: None,
                message: Some("cache disabled".to_string()),
            };
        }

        let started = Instant::now();
        match self.inner.backend.ping().await {
            Ok(()) => {
                let latency = started.elapsed();
                CacheHealth {
                    status: if latency < HEALTHY_LATENCY {
                        HealthStatus::Healthy
                    } else {
                        HealthStatus::Degraded
                    },
                    backend,
                    latency_ms: Some(latency.as_millis() as u64),
                    message: None,
                }
            }
            Err(e) => {
                error!(error = %e, "cache health check failed");
                CacheHealth {
                    status: HealthStatus::Unhealthy,
                    backend,
                    latency_ms: None,
                    message: Some(e.to_string()),
                }
            }
        }
    }

    /// Registers a named warmup task; a task with the same name is replaced.
    pub async fn register_warmup<F>(&self, name: impl Into<String>, task: F)
    where
        F: Fn(CacheService) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync + 'static,
    {
        let name = name.into();
        let mut warmups = self.inner.warmups.write().await;
        warmups.retain(|(existing, _)| existing != &name);
        warmups.push((name, Arc::new(task)));
    }

    /// Runs the named warmup tasks (all when `names` is `None`) concurrently.
    /// A failing task is logged and does not affect the others.
    pub async fn warmup(&self, names: Option<&[String]>) -> WarmupReport {
        let selected: Vec<(String, WarmupTask)> = self
            .inner
            .warmups
            .read()
            .await
            .iter()
            .filter(|(name, _)| names.map_or(true, |wanted| wanted.contains(name)))
            .cloned()
            .collect();

        let runs = selected.into_iter().map(|(name, task)| {
            let cache = self.clone();
            async move {
                let outcome = task(cache).await;
                (name, outcome)
            }
        });

        let mut report = WarmupReport::default();
        for (name, outcome) in join_all(runs).await {
            match outcome {
                Ok(()) => {
                    debug!(task = %name, "cache warmup finished");
                    report.succeeded.push(name);
                }
                Err(e) => {
                    error!(task = %name, error = %e, "cache warmup failed");
                    report.failed.push(name);
                }
            }
        }
        info!(succeeded = report.succeeded.len(), failed = report.failed.len(), "cache warmup complete");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::config::AppConfig;
    use futures::FutureExt;

    fn service() -> CacheService {
        CacheService::new(Arc::new(MemoryBackend::new()), &AppConfig::development().cache)
    }

    #[tokio::test]
    async fn set_then_get_counts_hits_and_misses() {
        let cache = service();
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(cache.set("k", &"v".to_string(), CacheOptions::default()).await);
        assert_eq!(cache.get::<String>("k").await.as_deref(), Some("v"));

        let stats = cache.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
        assert_eq!(stats.hit_rate, 0.5);

        cache.reset_stats();
        assert_eq!(cache.stats().hits, 0);
    }

    #[tokio::test]
    async fn values_are_stored_under_the_prefix() {
        let cache = service();
        cache.set("user:1", &1u32, CacheOptions::default()).await;
        let keys = cache.backend().keys("*").await.unwrap();
        assert_eq!(keys, vec!["portal_cache:user:1".to_string()]);
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let cache = service();
        cache
            .set("short", &1u8, CacheOptions::ttl(Duration::from_millis(30)))
            .await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(cache.get::<u8>("short").await, None);
    }

    #[tokio::test]
    async fn invalidate_tag_removes_tagged_keys_only() {
        let cache = service();
        cache.set("a", &1, CacheOptions::default().tag("groups")).await;
        cache.set("b", &2, CacheOptions::default().tags(["groups", "groups:1"])).await;
        cache.set("c", &3, CacheOptions::default().tag("users")).await;

        assert_eq!(cache.invalidate_tag("groups").await, 2);
        assert_eq!(cache.get::<i32>("a").await, None);
        assert_eq!(cache.get::<i32>("b").await, None);
        assert_eq!(cache.get::<i32>("c").await, Some(3));
        assert_eq!(cache.invalidate_tag("groups").await, 0);
        // Stale member in another tag set is harmless.
        assert_eq!(cache.invalidate_tag("groups:1").await, 0);
    }

    #[tokio::test]
    async fn tag_sets_outlive_their_keys() {
        let cache = service();
        cache.set("a", &1, CacheOptions::ttl(Duration::from_secs(10)).tag("t")).await;
        cache.set("b", &1, CacheOptions::ttl(Duration::from_secs(120)).tag("t")).await;
        let tag_ttl = cache
            .backend()
            .ttl(&keys::tag_set(cache.prefix(), "t"))
            .await
            .unwrap()
            .unwrap();
        assert!(tag_ttl > Duration::from_secs(100));
    }

    #[tokio::test]
    async fn get_or_set_only_fetches_on_miss() {
        let cache = service();
        let mut calls = 0;
        for _ in 0..3 {
            let value: Result<u32, CacheError> = cache
                .get_or_set("computed", CacheOptions::default(), || {
                    calls += 1;
                    async { Ok(42) }
                })
                .await;
            assert_eq!(value.unwrap(), 42);
        }
        assert_eq!(calls, 1);
    }

    #[tokio::test]
    async fn fetch_errors_are_not_cached() {
        let cache = service();
        let failed: Result<u32, &str> = cache.query_cache("q", CacheOptions::default(), || async { Err("boom") }).await;
        assert!(failed.is_err());
        let ok: Result<u32, &str> = cache.query_cache("q", CacheOptions::default(), || async { Ok(7) }).await;
        assert_eq!(ok.unwrap(), 7);
        assert_eq!(cache.invalidate_tag("queries").await, 1);
    }

    #[tokio::test]
    async fn pattern_delete_and_clear() {
        let cache = service();
        cache.set("list:groups:1", &1, CacheOptions::default()).await;
        cache.set("list:groups:2", &1, CacheOptions::default()).await;
        cache.set("user:1", &1, CacheOptions::default().tag("users")).await;

        assert_eq!(cache.delete_by_pattern("list:groups:*").await, 2);
        // user:1 plus its tag set.
        assert_eq!(cache.clear().await, 2);
        assert!(cache.backend().keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_cache_is_inert() {
        let mut config = AppConfig::development().cache;
        config.enabled = false;
        let cache = CacheService::new(Arc::new(MemoryBackend::new()), &config);
        assert!(!cache.set("k", &1, CacheOptions::default()).await);
        assert_eq!(cache.get::<i32>("k").await, None);
        assert_eq!(cache.health_check().await.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn memory_backend_is_healthy() {
        let health = service().health_check().await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.backend, "memory");
    }

    #[tokio::test]
    async fn warmup_isolates_failures() {
        let cache = service();
        cache
            .register_warmup("catalog", |cache: CacheService| {
                async move {
                    cache.set("warm", &true, CacheOptions::default()).await;
                    Ok(())
                }
                .boxed()
            })
            .await;
        cache
            .register_warmup("broken", |_| async { Err(anyhow::anyhow!("source offline")) }.boxed())
            .await;

        let report = cache.warmup(None).await;
        assert_eq!(report.succeeded, vec!["catalog".to_string()]);
        assert_eq!(report.failed, vec!["broken".to_string()]);
        assert_eq!(cache.get::<bool>("warm").await, Some(true));

        let only = cache.warmup(Some(&["broken".to_string()])).await;
        assert!(only.succeeded.is_empty());
        assert_eq!(only.failed.len(), 1);
    }
}
