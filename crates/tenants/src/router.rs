//! Per-tenant connection routing.
//!
//! One pooled handle per tenant key, opened lazily on first use and closed
//! after sitting idle. Handles are keyed strictly by tenant; a failure while
//! connecting one tenant leaves every other cached handle untouched.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicI64, Ordering},
    },
    time::Duration,
};

use {
    dashmap::DashMap,
    parley_common::{time::now_ms, types::TenantKey},
    parley_config::RouterConfig,
    parley_store::{SqliteConversationStore, SqliteRuleStore},
    sqlx::SqlitePool,
    tokio::sync::OnceCell,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use parley_metrics::{counter, gauge, labels, router as router_metrics};

use crate::{
    error::{Error, Result},
    registry::{Tenant, TenantRegistry, open_sqlite},
};

/// Live access to one tenant's database.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    tenant_key: TenantKey,
    pool: SqlitePool,
}

impl StoreHandle {
    pub fn new(tenant_key: TenantKey, pool: SqlitePool) -> Self {
        Self { tenant_key, pool }
    }

    pub fn tenant_key(&self) -> &TenantKey {
        &self.tenant_key
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn conversations(&self) -> SqliteConversationStore {
        SqliteConversationStore::new(self.pool.clone(), self.tenant_key.clone())
    }

    pub fn rules(&self) -> SqliteRuleStore {
        SqliteRuleStore::new(self.pool.clone())
    }
}

/// Timing and retry knobs for [`ConnectionRouter`].
#[derive(Debug, Clone)]
pub struct RouterOptions {
    pub idle_ttl: Duration,
    pub connect_timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub max_connections: u32,
}

impl Default for RouterOptions {
    fn default() -> Self {
        Self::from(&RouterConfig::default())
    }
}

impl From<&RouterConfig> for RouterOptions {
    fn from(cfg: &RouterConfig) -> Self {
        Self {
            idle_ttl: Duration::from_secs(cfg.idle_ttl_secs),
            connect_timeout: Duration::from_secs(cfg.connect_timeout_secs),
            max_retries: cfg.max_retries,
            backoff_base: Duration::from_millis(cfg.backoff_base_ms),
            max_connections: cfg.max_connections.max(1),
        }
    }
}

struct Slot {
    handle: OnceCell<StoreHandle>,
    last_used_ms: AtomicI64,
}

impl Slot {
    fn new() -> Self {
        Self {
            handle: OnceCell::new(),
            last_used_ms: AtomicI64::new(now_ms()),
        }
    }

    fn touch(&self) {
        self.last_used_ms.store(now_ms(), Ordering::Relaxed);
    }

    /// Initialized, unused for at least `ttl`, and no connection checked out.
    fn is_idle(&self, now: i64, ttl: Duration) -> bool {
        let Some(handle) = self.handle.get() else {
            return false;
        };
        let idle_for = now.saturating_sub(self.last_used_ms.load(Ordering::Relaxed));
        idle_for >= ttl.as_millis() as i64 && handle.pool.num_idle() as u32 == handle.pool.size()
    }
}

/// Hands out [`StoreHandle`]s by tenant key.
pub struct ConnectionRouter {
    registry: Arc<dyn TenantRegistry>,
    slots: DashMap<TenantKey, Arc<Slot>>,
    options: RouterOptions,
}

impl ConnectionRouter {
    pub fn new(registry: Arc<dyn TenantRegistry>, options: RouterOptions) -> Self {
        Self {
            registry,
            slots: DashMap::new(),
            options,
        }
    }

    pub fn registry(&self) -> &Arc<dyn TenantRegistry> {
        &self.registry
    }

    /// Handle for a registered tenant, connecting on first use.
    pub async fn get(&self, key: &TenantKey) -> Result<StoreHandle> {
        let tenant = self
            .registry
            .get(key)
            .await?
            .ok_or_else(|| Error::TenantNotFound(key.to_string()))?;
        self.get_for(&tenant).await
    }

    /// Handle for an already resolved tenant.
    pub async fn get_for(&self, tenant: &Tenant) -> Result<StoreHandle> {
        // Clone the slot out so no map guard is held across the await.
        let slot = self
            .slots
            .entry(tenant.key.clone())
            .or_insert_with(|| Arc::new(Slot::new()))
            .clone();
        let handle = match slot.handle.get_or_try_init(|| self.connect(tenant)).await {
            Ok(handle) => handle.clone(),
            Err(e) => {
                self.slots
                    .remove_if(&tenant.key, |_, s| !s.handle.initialized());
                return Err(e);
            },
        };
        slot.touch();
        self.report_active();
        Ok(handle)
    }

    /// Drop one tenant's handle, e.g. after its connection faulted. Other
    /// tenants are unaffected.
    pub async fn invalidate(&self, key: &TenantKey) {
        if let Some((_, slot)) = self.slots.remove(key)
            && let Some(handle) = slot.handle.get()
        {
            warn!(tenant = %key, "invalidating tenant store handle");
            handle.pool.close().await;
        }
        self.report_active();
    }

    /// Close handles idle beyond the TTL. Returns how many were closed.
    pub async fn evict_idle(&self) -> usize {
        let now = now_ms();
        let ttl = self.options.idle_ttl;
        let candidates: Vec<TenantKey> = self
            .slots
            .iter()
            .filter(|e| e.value().is_idle(now, ttl))
            .map(|e| e.key().clone())
            .collect();

        let mut evicted = 0;
        for key in candidates {
            let Some((_, slot)) = self.slots.remove_if(&key, |_, slot| slot.is_idle(now, ttl))
            else {
                continue;
            };
            if let Some(handle) = slot.handle.get() {
                handle.pool.close().await;
            }
            debug!(tenant = %key, "evicted idle tenant store handle");
            evicted += 1;
        }

        #[cfg(feature = "metrics")]
        counter!(router_metrics::EVICTIONS_TOTAL).increment(evicted as u64);
        self.report_active();
        evicted
    }

    /// Tenant keys with a live handle.
    pub fn cached_tenants(&self) -> Vec<TenantKey> {
        let mut keys: Vec<_> = self
            .slots
            .iter()
            .filter(|e| e.value().handle.initialized())
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        keys
    }

    /// Close every cached handle.
    pub async fn close_all(&self) {
        let keys: Vec<_> = self.slots.iter().map(|e| e.key().clone()).collect();
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key)
                && let Some(handle) = slot.handle.get()
            {
                handle.pool.close().await;
            }
        }
    }

    /// Run [`evict_idle`](Self::evict_idle) every `every` until the router is
    /// dropped.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(router) = weak.upgrade() else {
                    break;
                };
                router.evict_idle().await;
            }
        })
    }

    async fn connect(&self, tenant: &Tenant) -> Result<StoreHandle> {
        let mut attempt = 0u32;
        loop {
            let outcome = tokio::time::timeout(
                self.options.connect_timeout,
                open_tenant_store(&tenant.store_location, self.options.max_connections),
            )
            .await;

            let reason = match outcome {
                Ok(Ok(pool)) => {
                    info!(tenant = %tenant.key, attempt, "tenant store connected");
                    #[cfg(feature = "metrics")]
                    counter!(router_metrics::CONNECTS_TOTAL, labels::TENANT => tenant.key.to_string())
                        .increment(1);
                    return Ok(StoreHandle::new(tenant.key.clone(), pool));
                },
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!(
                    "connect timed out after {}ms",
                    self.options.connect_timeout.as_millis()
                ),
            };

            if attempt >= self.options.max_retries {
                warn!(tenant = %tenant.key, attempt, %reason, "tenant store unavailable");
                #[cfg(feature = "metrics")]
                counter!(router_metrics::CONNECT_FAILURES_TOTAL, labels::TENANT => tenant.key.to_string())
                    .increment(1);
                return Err(Error::store_unavailable(&tenant.key, reason));
            }

            let delay = self.options.backoff_base * 2u32.saturating_pow(attempt);
            debug!(tenant = %tenant.key, attempt, %reason, delay_ms = delay.as_millis() as u64, "retrying tenant store connect");
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn report_active(&self) {
        #[cfg(feature = "metrics")]
        gauge!(router_metrics::HANDLES_ACTIVE).set(self.slots.len() as f64);
    }
}

/// Open a tenant database and bring its schema up to date.
pub async fn open_tenant_store(location: &str, max_connections: u32) -> Result<SqlitePool> {
    let pool = open_sqlite(location, max_connections).await?;
    parley_store::run_migrations(&pool).await?;
    Ok(pool)
}
