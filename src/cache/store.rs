//! Cache Store Module
//!
//! Main cache engine: a key/value map plus a side table of staleness records
//! consulted on every conditional write.

use std::borrow::Borrow;
use std::collections::hash_map::{self, Entry, HashMap};
use std::fmt;
use std::future::Future;
use std::hash::Hash;

use chrono::TimeDelta;
use tracing::{debug, trace};

use crate::cache::stats::WriteOutcome;
use crate::cache::{AsyncValue, CacheStats, Expiration, Staleness, Value};
use crate::config::Config;
use crate::error::{CacheError, Result};

// == Cache Map ==
/// Associative cache with optional per-key staleness-driven invalidation.
///
/// Keys without a staleness record never expire. Records live in their own
/// table and may exist before the key is cached; deleting, pulling or
/// clearing entries leaves records in place.
#[derive(Debug)]
pub struct CacheMap<K, V> {
    /// Cached entries
    entries: HashMap<K, V>,
    /// Staleness records, keyed like `entries`
    metadata: HashMap<K, Staleness<V>>,
    /// Write statistics
    stats: CacheStats,
    /// Expiration for keys written with neither an expiration nor a record
    default_expiration: Option<TimeDelta>,
}

/// Producer of a fallible async write, or its already awaited output.
enum Pending<V, F> {
    Ready(V),
    Deferred(F),
}

impl<K, V> CacheMap<K, V> {
    // == Constructor ==
    /// Creates an empty cache where keys never expire unless told otherwise.
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            metadata: HashMap::new(),
            stats: CacheStats::new(),
            default_expiration: None,
        }
    }

    /// Creates an empty cache with room for `capacity` entries.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: HashMap::with_capacity(capacity),
            ..Self::new()
        }
    }

    /// Creates an empty cache from configuration.
    pub fn with_config(config: &Config) -> Self {
        Self {
            default_expiration: config.default_expiration(),
            ..Self::with_capacity(config.initial_capacity)
        }
    }

    // == Length ==
    /// Returns the current number of entries in the cache.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    // == Is Empty ==
    /// Returns true if the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes every entry. Staleness records are kept.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterates over cached keys.
    pub fn keys(&self) -> hash_map::Keys<'_, K, V> {
        self.entries.keys()
    }

    /// Iterates over cached values.
    pub fn values(&self) -> hash_map::Values<'_, K, V> {
        self.entries.values()
    }

    /// Iterates over cached entries.
    pub fn iter(&self) -> hash_map::Iter<'_, K, V> {
        self.entries.iter()
    }

    // == Clear Metadata ==
    /// Drops every staleness record; all keys revert to never expiring.
    pub fn clear_metadata(&mut self) {
        debug!("Cleared {} staleness records", self.metadata.len());
        self.metadata.clear();
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot(self.entries.len())
    }

    /// Resets the counters to zero.
    pub fn reset_stats(&mut self) {
        self.stats = CacheStats::new();
    }
}

impl<K: Eq + Hash + Clone, V> CacheMap<K, V> {
    // == Map Surface ==
    /// Returns the cached value for `key`.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get(key)
    }

    /// Returns a mutable reference to the cached value for `key`.
    pub fn get_mut<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.get_mut(key)
    }

    /// Returns the cached value, or `NotFound` if the key is absent.
    pub fn require<Q>(&self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.entries
            .get(key)
            .ok_or_else(|| CacheError::NotFound(format!("{:?}", key)))
    }

    /// Stores a value unconditionally, bypassing staleness checks.
    ///
    /// Returns the previous value, if any.
    pub fn set(&mut self, key: K, value: V) -> Option<V> {
        self.entries.insert(key, value)
    }

    /// Returns true if `key` is cached.
    pub fn has<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.contains_key(key)
    }

    /// Removes an entry, returning its value. The key's record is kept.
    pub fn delete<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key)
    }

    // == Pull ==
    /// Returns the cached value and removes it. The key's record is kept.
    pub fn pull<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.entries.remove(key)
    }

    // == Add ==
    /// Caches `value` unless `key` already holds a fresh entry.
    ///
    /// Uses the key's registered record, if any, to decide freshness.
    pub fn add<'a>(&mut self, key: K, value: impl Into<Value<'a, V>>) -> &mut Self {
        self.write(key, value.into(), None);
        self
    }

    /// Caches `value` unless `key` already holds a fresh entry, registering
    /// `expires_on` when the key has no record yet or its entry went stale.
    pub fn add_until<'a>(
        &mut self,
        key: K,
        value: impl Into<Value<'a, V>>,
        expires_on: impl Into<Expiration<V>>,
    ) -> &mut Self {
        self.write(key, value.into(), Some(expires_on.into()));
        self
    }

    // == Remember ==
    /// Like [`add`](Self::add), but returns the cached value.
    ///
    /// A producer only runs when the key is absent or stale, or when a custom
    /// predicate needs the candidate value to decide.
    pub fn remember<'a>(&mut self, key: K, value: impl Into<Value<'a, V>>) -> &V {
        self.write(key, value.into(), None)
    }

    /// Like [`add_until`](Self::add_until), but returns the cached value.
    pub fn remember_until<'a>(
        &mut self,
        key: K,
        value: impl Into<Value<'a, V>>,
        expires_on: impl Into<Expiration<V>>,
    ) -> &V {
        self.write(key, value.into(), Some(expires_on.into()))
    }

    /// Caches during a window registered eagerly on first use.
    ///
    /// The record is installed through [`set_expiration`](Self::set_expiration)
    /// only when the key has none, and is not renewed afterwards: once a
    /// duration has elapsed every call recomputes the value.
    pub fn remember_during<'a>(
        &mut self,
        key: K,
        value: impl Into<Value<'a, V>>,
        expires_on: impl Into<Expiration<V>>,
    ) -> &V {
        if !self.metadata.contains_key(&key) {
            self.set_expiration(key.clone(), expires_on);
        }
        self.write(key, value.into(), None)
    }

    // == Remember Async ==
    /// Async flavor of [`remember`](Self::remember).
    ///
    /// The cache stays mutably borrowed while the producer runs, so calls on
    /// one instance never overlap.
    pub async fn remember_async<'a>(&mut self, key: K, value: impl Into<AsyncValue<'a, V>>) -> &V {
        &*self.write_async(key, value.into(), None).await
    }

    /// Async flavor of [`remember_until`](Self::remember_until).
    pub async fn remember_async_until<'a>(
        &mut self,
        key: K,
        value: impl Into<AsyncValue<'a, V>>,
        expires_on: impl Into<Expiration<V>>,
    ) -> &V {
        &*self
            .write_async(key, value.into(), Some(expires_on.into()))
            .await
    }

    /// Like [`remember_async`](Self::remember_async) with a fallible producer.
    ///
    /// A producer error is returned unchanged and nothing is cached; a stale
    /// entry evicted before the producer ran stays evicted.
    pub async fn try_remember_async<F, Fut, E>(
        &mut self,
        key: K,
        produce: F,
    ) -> std::result::Result<&V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.try_write_async(key, produce, None)
            .await
            .map(|value| &*value)
    }

    /// Like [`remember_async_until`](Self::remember_async_until) with a
    /// fallible producer.
    pub async fn try_remember_async_until<F, Fut, E>(
        &mut self,
        key: K,
        produce: F,
        expires_on: impl Into<Expiration<V>>,
    ) -> std::result::Result<&V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        self.try_write_async(key, produce, Some(expires_on.into()))
            .await
            .map(|value| &*value)
    }

    // == Set Expiration ==
    /// Registers or replaces the staleness record for `key`, evicting the
    /// cached entry if the new record already considers it stale.
    ///
    /// The key does not need to be cached yet. See
    /// [`set_expiration_with`](Self::set_expiration_with) to keep a stale entry.
    pub fn set_expiration(&mut self, key: K, expires_on: impl Into<Expiration<V>>) {
        self.set_expiration_with(key, expires_on, true);
    }

    /// Registers or replaces the staleness record for `key`.
    ///
    /// With `delete_if_stale`, a cached entry the new record already considers
    /// stale is evicted; the stored value stands in as the candidate for
    /// custom predicates.
    pub fn set_expiration_with(
        &mut self,
        key: K,
        expires_on: impl Into<Expiration<V>>,
        delete_if_stale: bool,
    ) {
        let record = expires_on.into().normalize();

        if delete_if_stale {
            let stale = self
                .entries
                .get(&key)
                .is_some_and(|current| record.is_stale(Some(current), current));
            if stale {
                self.entries.remove(&key);
                self.stats.count_stale_eviction();
                debug!("Evicted stale cache entry while setting its expiration");
            }
        }

        debug!(?record, "Registered staleness record");
        self.metadata.insert(key, record);
    }

    /// Drops the record for `key`; the key reverts to never expiring.
    ///
    /// Returns true if a record was removed.
    pub fn clear_metadata_for<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.metadata.remove(key).is_some()
    }

    // == Introspection ==
    /// Returns the staleness record registered for `key`.
    pub fn expiration<Q>(&self, key: &Q) -> Option<&Staleness<V>>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.metadata.get(key)
    }

    /// Returns true if `key` has a staleness record.
    pub fn has_expiration<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.metadata.contains_key(key)
    }

    /// Returns true if `key` is absent or its entry is stale.
    ///
    /// Custom predicates see the stored value as both candidate and current.
    pub fn is_stale<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        match self.entries.get(key) {
            None => true,
            Some(current) => self
                .metadata
                .get(key)
                .is_some_and(|record| record.is_stale(Some(current), current)),
        }
    }

    // == Purge Stale ==
    /// Removes every entry whose record reports stale.
    ///
    /// Returns the number of entries removed.
    pub fn purge_stale(&mut self) -> usize {
        let stale_keys: Vec<K> = self
            .entries
            .iter()
            .filter(|(key, current)| {
                self.metadata
                    .get(*key)
                    .is_some_and(|record| record.is_stale(Some(*current), current))
            })
            .map(|(key, _)| key.clone())
            .collect();

        let count = stale_keys.len();

        for key in stale_keys {
            self.entries.remove(&key);
            self.stats.count_stale_eviction();
        }

        if count > 0 {
            debug!("Purged {} stale cache entries", count);
        }
        count
    }

    // == Conditional Write Engine ==
    pub(crate) fn write(
        &mut self,
        key: K,
        value: Value<'_, V>,
        expires_on: Option<Expiration<V>>,
    ) -> &mut V {
        let value = if self.needs_candidate(&key) {
            value.force()
        } else {
            value
        };

        self.invalidate(&key, expires_on, value.as_literal());
        self.insert_if_absent(key, || value.into_inner())
    }

    async fn write_async(
        &mut self,
        key: K,
        value: AsyncValue<'_, V>,
        expires_on: Option<Expiration<V>>,
    ) -> &mut V {
        let value = if self.needs_candidate(&key) {
            value.force().await
        } else {
            value
        };

        self.invalidate(&key, expires_on, value.as_literal());

        match self.entries.entry(key) {
            Entry::Occupied(slot) => {
                self.stats.count_write(WriteOutcome::Kept);
                trace!("Kept fresh cache entry");
                slot.into_mut()
            }
            Entry::Vacant(slot) => {
                self.stats.count_write(WriteOutcome::Stored);
                trace!("Awaiting producer for new cache entry");
                slot.insert(value.resolve().await)
            }
        }
    }

    async fn try_write_async<F, Fut, E>(
        &mut self,
        key: K,
        produce: F,
        expires_on: Option<Expiration<V>>,
    ) -> std::result::Result<&mut V, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<V, E>>,
    {
        let pending = if self.needs_candidate(&key) {
            Pending::Ready(produce().await?)
        } else {
            Pending::Deferred(produce)
        };

        let candidate = match &pending {
            Pending::Ready(value) => Some(value),
            Pending::Deferred(_) => None,
        };
        self.invalidate(&key, expires_on, candidate);

        match self.entries.entry(key) {
            Entry::Occupied(slot) => {
                self.stats.count_write(WriteOutcome::Kept);
                Ok(slot.into_mut())
            }
            Entry::Vacant(slot) => {
                let value = match pending {
                    Pending::Ready(value) => value,
                    Pending::Deferred(produce) => produce().await?,
                };
                self.stats.count_write(WriteOutcome::Stored);
                Ok(slot.insert(value))
            }
        }
    }

    /// Evicts or keeps the entry for `key` ahead of a value produced outside
    /// the cache.
    ///
    /// Returns the fresh cached value, counted as a hit. `None` means the key
    /// is vacant and [`insert_produced`](Self::insert_produced) should follow.
    /// Only valid when [`needs_candidate`](Self::needs_candidate) is false.
    pub(crate) fn prepare_write(&mut self, key: &K, expires_on: Option<Expiration<V>>) -> Option<&V> {
        self.invalidate(key, expires_on, None);

        let fresh = self.entries.get(key);
        if fresh.is_some() {
            self.stats.count_write(WriteOutcome::Kept);
            trace!("Kept fresh cache entry");
        }
        fresh
    }

    /// Second half of [`prepare_write`](Self::prepare_write).
    ///
    /// An entry written in between wins over `value`.
    pub(crate) fn insert_produced(&mut self, key: K, value: V) -> &mut V {
        self.insert_if_absent(key, || value)
    }

    fn insert_if_absent(&mut self, key: K, produce: impl FnOnce() -> V) -> &mut V {
        match self.entries.entry(key) {
            Entry::Occupied(slot) => {
                self.stats.count_write(WriteOutcome::Kept);
                trace!("Kept fresh cache entry");
                slot.into_mut()
            }
            Entry::Vacant(slot) => {
                self.stats.count_write(WriteOutcome::Stored);
                trace!("Stored new cache entry");
                slot.insert(produce())
            }
        }
    }

    /// True when deciding freshness requires the candidate value.
    pub(crate) fn needs_candidate(&self, key: &K) -> bool {
        self.entries.contains_key(key)
            && self
                .metadata
                .get(key)
                .is_some_and(Staleness::observes_candidate)
    }

    /// Evicts a stale entry and (re)installs the key's record.
    ///
    /// An absent key counts as stale. A cached key without a record counts as
    /// fresh and only picks up `expires_on` as its new record.
    fn invalidate(&mut self, key: &K, expires_on: Option<Expiration<V>>, candidate: Option<&V>) {
        let expires_on = expires_on.or_else(|| self.default_expiration_for(key));

        if expires_on.is_none() && !self.metadata.contains_key(key) {
            return;
        }

        let stale = match (self.entries.get(key), self.metadata.get(key)) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(current), Some(record)) => record.is_stale(candidate, current),
        };

        if stale && self.entries.remove(key).is_some() {
            self.stats.count_stale_eviction();
            debug!("Evicted stale cache entry");
        }

        if stale || !self.metadata.contains_key(key) {
            if let Some(expiration) = expires_on {
                let record = expiration.normalize();
                debug!(?record, "Installed staleness record");
                self.metadata.insert(key.clone(), record);
            }
        }
    }

    fn default_expiration_for(&self, key: &K) -> Option<Expiration<V>> {
        if self.metadata.contains_key(key) {
            return None;
        }
        self.default_expiration.map(Expiration::After)
    }
}

impl<K, V> Default for CacheMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash, V> FromIterator<(K, V)> for CacheMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            ..Self::new()
        }
    }
}

impl<K: Eq + Hash, V> Extend<(K, V)> for CacheMap<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }
}

impl<K, V> IntoIterator for CacheMap<K, V> {
    type Item = (K, V);
    type IntoIter = hash_map::IntoIter<K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<'c, K, V> IntoIterator for &'c CacheMap<K, V> {
    type Item = (&'c K, &'c V);
    type IntoIter = hash_map::Iter<'c, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}
