use futures::FutureExt;
use std::sync::Arc;
use tracing::info;

use crate::cache::{keys, CacheService, KvBackend, MemoryBackend, RedisBackend};
use crate::config::{AppConfig, CacheBackendKind};
use crate::database::{DatabaseManager, MemoryPermissionStore, PermissionStore, PgPermissionStore};
use crate::permissions::catalog;
use crate::permissions::PermissionResolver;
use crate::services::AccessService;
use crate::sessions::SessionService;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub access: AccessService,
    pub cache: CacheService,
    pub sessions: SessionService,
    /// Set when the key/value backend is in-process and needs periodic purging.
    memory_kv: Option<Arc<MemoryBackend>>,
}

impl AppState {
    /// Connects the configured backends: PostgreSQL when a database URL is set
    /// (memory otherwise) and Redis or memory for cache and sessions.
    pub async fn build(config: AppConfig) -> anyhow::Result<Self> {
        let store: Arc<dyn PermissionStore> = match &config.database.url {
            Some(_) => {
                let pool = DatabaseManager::connect(&config.database).await?;
                info!("Permission store: postgres");
                Arc::new(PgPermissionStore::new(pool))
            }
            None => {
                info!("Permission store: memory (DATABASE_URL not set)");
                Arc::new(MemoryPermissionStore::new())
            }
        };

        let (kv, memory_kv): (Arc<dyn KvBackend>, Option<Arc<MemoryBackend>>) = match config.cache.backend {
            CacheBackendKind::Redis => (Arc::new(RedisBackend::connect(&config.cache.redis_url).await?), None),
            CacheBackendKind::Memory => {
                let memory = Arc::new(MemoryBackend::new());
                (memory.clone(), Some(memory))
            }
        };
        info!(backend = kv.name(), "Cache and session backend ready");

        Ok(Self::assemble(config, store, kv, memory_kv).await)
    }

    /// Fully in-process state; the returned store handle lets callers seed roles.
    pub async fn in_memory(config: AppConfig) -> (Self, Arc<MemoryPermissionStore>) {
        let store = Arc::new(MemoryPermissionStore::new());
        let memory = Arc::new(MemoryBackend::new());
        let state = Self::assemble(config, store.clone(), memory.clone(), Some(memory)).await;
        (state, store)
    }

    async fn assemble(
        config: AppConfig,
        store: Arc<dyn PermissionStore>,
        kv: Arc<dyn KvBackend>,
        memory_kv: Option<Arc<MemoryBackend>>,
    ) -> Self {
        let cache = CacheService::new(kv.clone(), &config.cache);
        let sessions = SessionService::new(kv, config.session.clone());
        let access = AccessService::new(store, cache.clone());

        cache
            .register_warmup("permission_catalog", |cache: CacheService| {
                async move {
                    cache
                        .static_cache(&keys::catalog(), || async {
                            Ok::<_, anyhow::Error>(catalog::catalog_json()?)
                        })
                        .await?;
                    Ok::<(), anyhow::Error>(())
                }
                .boxed()
            })
            .await;

        Self {
            config: Arc::new(config),
            access,
            cache,
            sessions,
            memory_kv,
        }
    }

    pub fn resolver(&self) -> &PermissionResolver {
        self.access.resolver()
    }

    /// Drops expired entries from an in-process backend. Redis expires keys itself.
    pub async fn purge_expired(&self) -> usize {
        match &self.memory_kv {
            Some(memory) => memory.purge_expired().await,
            None => 0,
        }
    }
}
