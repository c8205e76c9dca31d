//! Shared Cache Handle
//!
//! Cloneable handle for using one cache from several async tasks.
//!
//! The cache lock is only held for bookkeeping. Producers run outside it,
//! behind a per-key gate: overlapping `remember_async` calls for one key
//! produce the value once, while other keys and reads stay available.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::hash::Hash;
use std::sync::Arc;

use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, trace};

use crate::cache::{AsyncValue, CacheMap, CacheStats, Expiration, Value};
use crate::config::Config;

/// Thread-safe handle to a [`CacheMap`].
pub struct SharedCacheMap<K, V> {
    /// Cache guarded by an async mutex
    cache: Arc<Mutex<CacheMap<K, V>>>,
    /// One gate per key with a producer in flight
    in_flight: Arc<Mutex<HashMap<K, Arc<Mutex<()>>>>>,
}

impl<K, V> SharedCacheMap<K, V> {
    /// Wraps an existing cache.
    pub fn new(cache: CacheMap<K, V>) -> Self {
        Self {
            cache: Arc::new(Mutex::new(cache)),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Creates a shared cache from configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::new(CacheMap::with_config(config))
    }

    /// Locks the cache for a sequence of operations.
    ///
    /// Producers started through this handle run without the lock, so holding
    /// the guard never waits on them.
    pub async fn lock(&self) -> MutexGuard<'_, CacheMap<K, V>> {
        self.cache.lock().await
    }

    /// Returns current cache statistics.
    pub async fn stats(&self) -> CacheStats {
        self.cache.lock().await.stats()
    }

    /// Drops every staleness record.
    pub async fn clear_metadata(&self) {
        self.cache.lock().await.clear_metadata();
    }
}

impl<K: Eq + Hash + Clone, V: Clone> SharedCacheMap<K, V> {
    /// Returns a copy of the cached value for `key`.
    pub async fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.lock().await.get(key).cloned()
    }

    /// Conditional write, see [`CacheMap::add`].
    pub async fn add<'a>(&self, key: K, value: impl Into<Value<'a, V>>) {
        self.cache.lock().await.add(key, value);
    }

    /// Conditional write with expiration, see [`CacheMap::add_until`].
    pub async fn add_until<'a>(
        &self,
        key: K,
        value: impl Into<Value<'a, V>>,
        expires_on: impl Into<Expiration<V>>,
    ) {
        self.cache.lock().await.add_until(key, value, expires_on);
    }

    /// Returns and removes the cached value for `key`.
    pub async fn pull<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.cache.lock().await.pull(key)
    }

    /// Registers or replaces a staleness record, see [`CacheMap::set_expiration`].
    pub async fn set_expiration(&self, key: K, expires_on: impl Into<Expiration<V>>) {
        self.cache.lock().await.set_expiration(key, expires_on);
    }

    /// See [`CacheMap::set_expiration_with`].
    pub async fn set_expiration_with(
        &self,
        key: K,
        expires_on: impl Into<Expiration<V>>,
        delete_if_stale: bool,
    ) {
        self.cache
            .lock()
            .await
            .set_expiration_with(key, expires_on, delete_if_stale);
    }

    /// Shared [`CacheMap::remember_async`]; returns a copy of the value.
    ///
    /// A producer may use this handle, except to remember the same key.
    pub async fn remember_async<'a>(&self, key: K, value: impl Into<AsyncValue<'a, V>>) -> V {
        self.remember_gated(key, value.into(), None).await
    }

    /// Shared [`CacheMap::remember_async_until`]; returns a copy of the value.
    pub async fn remember_async_until<'a>(
        &self,
        key: K,
        value: impl Into<AsyncValue<'a, V>>,
        expires_on: impl Into<Expiration<V>>,
    ) -> V {
        self.remember_gated(key, value.into(), Some(expires_on.into()))
            .await
    }

    async fn remember_gated(
        &self,
        key: K,
        value: AsyncValue<'_, V>,
        expires_on: Option<Expiration<V>>,
    ) -> V {
        let gate = self.gate_for(&key).await;
        let permit = gate.lock().await;
        let stored = self.remember_unlocked(key.clone(), value, expires_on).await;
        drop(permit);

        self.release_gate(&key, gate).await;
        stored
    }

    /// Writes like `write_async`, awaiting the producer without the cache lock.
    async fn remember_unlocked(
        &self,
        key: K,
        value: AsyncValue<'_, V>,
        mut expires_on: Option<Expiration<V>>,
    ) -> V {
        let needs_candidate = {
            let mut cache = self.cache.lock().await;
            let needs_candidate = cache.needs_candidate(&key);
            if !needs_candidate {
                if let Some(fresh) = cache.prepare_write(&key, expires_on.take()) {
                    return fresh.clone();
                }
            }
            needs_candidate
        };

        debug!("Awaiting producer outside the shared cache lock");
        let produced = value.resolve().await;

        let mut cache = self.cache.lock().await;
        let stored = if needs_candidate {
            cache
                .write(key, Value::Literal(produced), expires_on)
                .clone()
        } else {
            cache.insert_produced(key, produced).clone()
        };
        stored
    }

    async fn gate_for(&self, key: &K) -> Arc<Mutex<()>> {
        let mut gates = self.in_flight.lock().await;
        Arc::clone(gates.entry(key.clone()).or_default())
    }

    async fn release_gate(&self, key: &K, gate: Arc<Mutex<()>>) {
        let mut gates = self.in_flight.lock().await;
        // Held by the map and this caller only
        if Arc::strong_count(&gate) == 2 {
            gates.remove(key);
            trace!("Released producer gate");
        }
    }
}

impl<K, V> Clone for SharedCacheMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
            in_flight: Arc::clone(&self.in_flight),
        }
    }
}

impl<K, V> Default for SharedCacheMap<K, V> {
    fn default() -> Self {
        Self::new(CacheMap::new())
    }
}
