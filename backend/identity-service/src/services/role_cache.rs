/// In-memory TTL cache in front of a [`RoleAuthority`]
///
/// Read operations are memoized per (operation, subject, qualifier) for a fixed TTL. Expired
/// entries are never served and are replaced on the next read. `assign_role` passes straight
/// through and does not invalidate anything, so role changes become visible within one TTL.
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use prometheus::{register_int_counter_vec, IntCounterVec};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

use super::role_authority::RoleAuthority;
use crate::error::Result;

// ============================================================================
// PROMETHEUS METRICS
// ============================================================================

static CACHE_HIT: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_role_cache_hit_total",
        "Role authority answers served from cache",
        &["op"]
    )
    .expect("Failed to register identity_role_cache_hit_total")
});

static CACHE_MISS: Lazy<IntCounterVec> = Lazy::new(|| {
    register_int_counter_vec!(
        "identity_role_cache_miss_total",
        "Role authority lookups that went to the authority",
        &["op"]
    )
    .expect("Failed to register identity_role_cache_miss_total")
});

// ============================================================================
// CLOCK
// ============================================================================

/// Time source for expiry decisions
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.offset.lock() += by;
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock()
    }
}

// ============================================================================
// CACHE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CacheKey {
    Role(Uuid),
    Permissions(Uuid),
    HasPermission(Uuid, String),
    HasRole(Uuid, String),
}

impl CacheKey {
    fn op(&self) -> &'static str {
        match self {
            CacheKey::Role(_) => "role",
            CacheKey::Permissions(_) => "perms",
            CacheKey::HasPermission(..) => "perm",
            CacheKey::HasRole(..) => "role_check",
        }
    }
}

#[derive(Debug, Clone)]
enum CachedValue {
    Role(String),
    Permissions(BTreeSet<String>),
    Allowed(bool),
}

#[derive(Debug, Clone)]
struct CachedEntry {
    value: CachedValue,
    expires_at: Instant,
}

pub struct CachingRoleAuthority {
    inner: Arc<dyn RoleAuthority>,
    /// Sharded map: readers of one key never wait on writers of another
    store: DashMap<CacheKey, CachedEntry>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl CachingRoleAuthority {
    pub fn new(inner: Arc<dyn RoleAuthority>, ttl: Duration) -> Self {
        Self::with_clock(inner, ttl, Arc::new(SystemClock))
    }

    pub fn with_clock(inner: Arc<dyn RoleAuthority>, ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner,
            store: DashMap::new(),
            ttl,
            clock,
        }
    }

    /// Number of stored entries, live or expired
    pub fn len(&self) -> usize {
        self.store.len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }

    fn lookup(&self, key: &CacheKey) -> Option<CachedValue> {
        let now = self.clock.now();
        let hit = self
            .store
            .get(key)
            .filter(|entry| now < entry.expires_at)
            .map(|entry| entry.value.clone());

        match hit {
            Some(value) => {
                CACHE_HIT.with_label_values(&[key.op()]).inc();
                Some(value)
            }
            None => {
                CACHE_MISS.with_label_values(&[key.op()]).inc();
                None
            }
        }
    }

    fn insert(&self, key: CacheKey, value: CachedValue) {
        let expires_at = self.clock.now() + self.ttl;
        debug!(op = key.op(), "Caching role authority answer");
        self.store.insert(key, CachedEntry { value, expires_at });
    }
}

#[async_trait]
impl RoleAuthority for CachingRoleAuthority {
    async fn resolve_role(&self, subject: Uuid) -> Result<String> {
        let key = CacheKey::Role(subject);
        if let Some(CachedValue::Role(role)) = self.lookup(&key) {
            return Ok(role);
        }

        let role = self.inner.resolve_role(subject).await?;
        self.insert(key, CachedValue::Role(role.clone()));
        Ok(role)
    }

    async fn list_permissions(&self, subject: Uuid) -> Result<BTreeSet<String>> {
        let key = CacheKey::Permissions(subject);
        if let Some(CachedValue::Permissions(perms)) = self.lookup(&key) {
            return Ok(perms);
        }

        let perms = self.inner.list_permissions(subject).await?;
        self.insert(key, CachedValue::Permissions(perms.clone()));
        Ok(perms)
    }

    async fn has_permission(&self, subject: Uuid, permission: &str) -> Result<bool> {
        let key = CacheKey::HasPermission(subject, permission.to_string());
        if let Some(CachedValue::Allowed(allowed)) = self.lookup(&key) {
            return Ok(allowed);
        }

        let allowed = self.inner.has_permission(subject, permission).await?;
        self.insert(key, CachedValue::Allowed(allowed));
        Ok(allowed)
    }

    async fn has_role(&self, subject: Uuid, role: &str) -> Result<bool> {
        let key = CacheKey::HasRole(subject, role.to_string());
        if let Some(CachedValue::Allowed(allowed)) = self.lookup(&key) {
            return Ok(allowed);
        }

        let allowed = self.inner.has_role(subject, role).await?;
        self.insert(key, CachedValue::Allowed(allowed));
        Ok(allowed)
    }

    async fn assign_role(&self, subject: Uuid, role: &str) -> Result<()> {
        self.inner.assign_role(subject, role).await
    }
}
