//! Tenant-scoped TTL cache with tag invalidation.
//!
//! Entries are keyed by `(tenant, key)` and carry tags naming what they
//! were computed from (`"invoices"`, `"products"`, ...). When a projection
//! applies an event, the matching tag is invalidated for that tenant only.
//! Every invalidation bumps a generation counter, and a value computed
//! across a bump is returned but not stored.

use std::collections::{BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::RwLock;
use std::time::{Duration, Instant};

use tracing::debug;

use kedai_core::TenantId;

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    tags: BTreeSet<&'static str>,
    expires_at: Instant,
}

#[derive(Debug)]
struct State<K, V> {
    entries: HashMap<(TenantId, K), Entry<V>>,
    /// Invalidation count per tenant and tag. `None` counts tenant-wide drops.
    generations: HashMap<(TenantId, Option<String>), u64>,
}

impl<K, V> State<K, V> {
    fn generation(&self, tenant_id: TenantId, tags: &[&'static str]) -> u64 {
        let of = |tag: Option<&str>| {
            self.generations
                .get(&(tenant_id, tag.map(str::to_string)))
                .copied()
                .unwrap_or(0)
        };
        tags.iter().map(|t| of(Some(*t))).sum::<u64>() + of(None)
    }

    fn bump(&mut self, tenant_id: TenantId, tag: Option<&str>) {
        *self
            .generations
            .entry((tenant_id, tag.map(str::to_string)))
            .or_insert(0) += 1;
    }
}

#[derive(Debug)]
pub struct TaggedCache<K, V> {
    ttl: Duration,
    inner: RwLock<State<K, V>>,
}

impl<K, V> TaggedCache<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            inner: RwLock::new(State {
                entries: HashMap::new(),
                generations: HashMap::new(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Live entry, if any. Expired entries read as missing.
    pub fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let state = self.inner.read().ok()?;
        let entry = state.entries.get(&(tenant_id, key.clone()))?;
        (entry.expires_at > Instant::now()).then(|| entry.value.clone())
    }

    pub fn insert(&self, tenant_id: TenantId, key: K, value: V, tags: &[&'static str]) {
        self.insert_with_ttl(tenant_id, key, value, tags, self.ttl);
    }

    pub fn insert_with_ttl(
        &self,
        tenant_id: TenantId,
        key: K,
        value: V,
        tags: &[&'static str],
        ttl: Duration,
    ) {
        if let Ok(mut state) = self.inner.write() {
            state.entries.insert(
                (tenant_id, key),
                Entry {
                    value,
                    tags: tags.iter().copied().collect(),
                    expires_at: Instant::now() + ttl,
                },
            );
        }
    }

    /// Cached value, or `compute()` stored under `tags`. The computed value
    /// is not stored when one of `tags` was invalidated while computing.
    pub fn get_or_insert_with(
        &self,
        tenant_id: TenantId,
        key: K,
        tags: &[&'static str],
        compute: impl FnOnce() -> V,
    ) -> V {
        if let Some(hit) = self.get(tenant_id, &key) {
            return hit;
        }
        let Some(started) = self.inner.read().ok().map(|s| s.generation(tenant_id, tags)) else {
            return compute();
        };
        let value = compute();
        if let Ok(mut state) = self.inner.write() {
            if state.generation(tenant_id, tags) == started {
                state.entries.insert(
                    (tenant_id, key),
                    Entry {
                        value: value.clone(),
                        tags: tags.iter().copied().collect(),
                        expires_at: Instant::now() + self.ttl,
                    },
                );
            } else {
                debug!(%tenant_id, "cache fill skipped after invalidation");
            }
        }
        value
    }

    /// Drops the tenant's entries tagged `tag`. Returns how many.
    pub fn invalidate(&self, tenant_id: TenantId, tag: &str) -> usize {
        let Ok(mut state) = self.inner.write() else {
            return 0;
        };
        state.bump(tenant_id, Some(tag));
        let before = state.entries.len();
        state
            .entries
            .retain(|(t, _), entry| *t != tenant_id || !entry.tags.contains(tag));
        let removed = before - state.entries.len();
        if removed > 0 {
            debug!(%tenant_id, tag, removed, "cache entries invalidated");
        }
        removed
    }

    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut state) = self.inner.write() {
            state.bump(tenant_id, None);
            state.entries.retain(|(t, _), _| *t != tenant_id);
        }
    }

    /// Removes expired entries of every tenant. Returns how many.
    pub fn purge_expired(&self) -> usize {
        let Ok(mut state) = self.inner.write() else {
            return 0;
        };
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.expires_at > now);
        before - state.entries.len()
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalidation_is_per_tenant_and_tag() {
        let cache = TaggedCache::new(Duration::from_secs(60));
        let (a, b) = (TenantId::new(), TenantId::new());
        cache.insert(a, "summary", 1, &["invoices", "products"]);
        cache.insert(a, "stock", 2, &["products"]);
        cache.insert(b, "summary", 3, &["invoices"]);

        assert_eq!(cache.invalidate(a, "invoices"), 1);
        assert_eq!(cache.get(a, &"summary"), None);
        assert_eq!(cache.get(a, &"stock"), Some(2));
        assert_eq!(cache.get(b, &"summary"), Some(3));
    }

    #[test]
    fn expired_entries_are_misses_and_purged() {
        let cache = TaggedCache::new(Duration::from_secs(60));
        let tenant = TenantId::new();
        cache.insert_with_ttl(tenant, 1u32, "old", &[], Duration::ZERO);
        cache.insert(tenant, 2u32, "fresh", &[]);

        assert_eq!(cache.get(tenant, &1), None);
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn computes_once_until_invalidated() {
        let cache = TaggedCache::new(Duration::from_secs(60));
        let tenant = TenantId::new();
        let mut calls = 0;
        for _ in 0..3 {
            cache.get_or_insert_with(tenant, "k", &["receipts"], || {
                calls += 1;
                calls
            });
        }
        assert_eq!(calls, 1);

        cache.invalidate(tenant, "receipts");
        assert_eq!(cache.get_or_insert_with(tenant, "k", &["receipts"], || 99), 99);
    }

    #[test]
    fn value_computed_across_an_invalidation_is_not_kept() {
        let cache = TaggedCache::new(Duration::from_secs(60));
        let tenant = TenantId::new();

        let stale = cache.get_or_insert_with(tenant, "summary", &["invoices"], || {
            cache.invalidate(tenant, "invoices");
            1
        });
        assert_eq!(stale, 1);
        assert_eq!(cache.get(tenant, &"summary"), None);

        // Other tags and tenants do not block the fill.
        cache.get_or_insert_with(tenant, "summary", &["invoices"], || {
            cache.invalidate(tenant, "products");
            cache.invalidate(TenantId::new(), "invoices");
            2
        });
        assert_eq!(cache.get(tenant, &"summary"), Some(2));

        cache.get_or_insert_with(tenant, "stock", &["products"], || {
            cache.invalidate_tenant(tenant);
            3
        });
        assert_eq!(cache.get(tenant, &"stock"), None);
    }
}
