// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Concurrent cache region with transaction-deferred mutations
//!
//! Lookups follow an optimistic-read, pessimistic-recheck protocol:
//!
//! 1. Under the read lock, return a live entry if the policy allows reads.
//! 2. Otherwise claim the upgrade slot and recheck; another caller may have
//!    committed an entry in between.
//! 3. Otherwise compute while holding only the claim, then schedule the
//!    insert/update (or the removal of a stale entry) through the
//!    [`DeferredCommitScheduler`]. The write itself takes the write lock when
//!    the scheduled action runs, which may be after the ambient transaction
//!    commits and on another thread.
//!
//! Every scheduled write carries the entry version observed during the
//! recheck. If a different live entry was committed in the meantime the
//! write is dropped, so only one computed value per key is committed per
//! race window.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::events::{CacheEvent, CacheListener, RemovalReason};
use super::lock::{LockStats, UpgradeableLock};
use super::policy::{CachePolicy, Expiry};
use crate::config::CacheConfig;
use crate::txn::{DeferredCommitScheduler, Scheduled};

/// Bounds shared by every cache key
pub trait RegionKey: Debug + Clone + Eq + Hash + Send + Sync + 'static {}
impl<T> RegionKey for T where T: Debug + Clone + Eq + Hash + Send + Sync + 'static {}

/// Bounds shared by every cached value
pub trait RegionValue: Clone + Send + Sync + 'static {}
impl<T> RegionValue for T where T: Clone + Send + Sync + 'static {}

struct CacheEntry<V> {
    value: V,
    version: u64,
    expiry: Mutex<Expiry>,
}

impl<V> CacheEntry<V> {
    fn new(value: V, version: u64, expiry: Expiry) -> Self {
        Self {
            value,
            version,
            expiry: Mutex::new(expiry),
        }
    }

    fn is_live(&self, now: Instant) -> bool {
        !self.expiry.lock().is_expired_at(now)
    }

    /// Live check that also restarts the sliding window on success
    fn hit(&self, now: Instant) -> bool {
        let mut expiry = self.expiry.lock();
        if expiry.is_expired_at(now) {
            return false;
        }
        expiry.touch(now);
        true
    }
}

/// When a scheduled write may be applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteCondition {
    /// Apply unconditionally
    Always,
    /// Apply only if the entry is still the one observed (`None`: absent).
    /// An expired entry never blocks the write.
    Observed(Option<u64>),
}

enum Mutation<K, V> {
    Upsert {
        key: K,
        value: V,
        policy: CachePolicy,
        version: u64,
        condition: WriteCondition,
    },
    Remove {
        key: K,
        reason: RemovalReason,
        condition: WriteCondition,
    },
}

/// Region counters
#[derive(Debug, Default)]
struct StatsTracker {
    hits: AtomicU64,
    misses: AtomicU64,
    computes: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    removals: AtomicU64,
    expirations: AtomicU64,
    sweeps: AtomicU64,
    skipped_sweeps: AtomicU64,
    dropped_writes: AtomicU64,
}

impl StatsTracker {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn add(counter: &AtomicU64, amount: usize) {
        counter.fetch_add(amount as u64, Ordering::Relaxed);
    }
}

/// Snapshot of a region's counters
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RegionStats {
    pub hits: u64,
    pub misses: u64,
    pub computes: u64,
    pub inserts: u64,
    pub updates: u64,
    pub removals: u64,
    pub expirations: u64,
    pub sweeps: u64,
    pub skipped_sweeps: u64,
    /// Scheduled writes dropped because another value was committed first
    pub dropped_writes: u64,
    pub entries: usize,
    pub lock: LockStats,
}

impl RegionStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Result of one expiry sweep
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepOutcome {
    /// Number of expired entries removed
    Swept(usize),
    /// The write lock was not available within the timeout
    Skipped,
}

pub(crate) struct RegionInner<K: RegionKey, V: RegionValue> {
    name: String,
    entries: UpgradeableLock<HashMap<K, CacheEntry<V>>>,
    scheduler: DeferredCommitScheduler,
    enabled: bool,
    default_policy: CachePolicy,
    next_version: AtomicU64,
    stats: StatsTracker,
    listeners: RwLock<Vec<Arc<dyn CacheListener<K>>>>,
}

/// Concurrently accessed cache keyed by opaque request keys
///
/// Cloning yields another handle to the same region.
pub struct CacheRegion<K: RegionKey, V: RegionValue> {
    inner: Arc<RegionInner<K, V>>,
}

impl<K: RegionKey, V: RegionValue> Clone for CacheRegion<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<K: RegionKey, V: RegionValue> CacheRegion<K, V> {
    /// Region following the calling thread's ambient transaction
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_scheduler(name, DeferredCommitScheduler::ambient())
    }

    pub fn with_scheduler(name: impl Into<String>, scheduler: DeferredCommitScheduler) -> Self {
        Self::build(name.into(), scheduler, true, CachePolicy::default())
    }

    /// Region honouring `config.enabled` and `config.default_policy`
    pub fn with_config(
        name: impl Into<String>,
        config: &CacheConfig,
        scheduler: DeferredCommitScheduler,
    ) -> Self {
        Self::build(
            name.into(),
            scheduler,
            config.enabled,
            config.default_policy.clone(),
        )
    }

    fn build(
        name: String,
        scheduler: DeferredCommitScheduler,
        enabled: bool,
        default_policy: CachePolicy,
    ) -> Self {
        log::debug!("Created cache region '{}' (enabled: {})", name, enabled);
        Self {
            inner: Arc::new(RegionInner {
                name,
                entries: UpgradeableLock::new(HashMap::new()),
                scheduler,
                enabled,
                default_policy,
                next_version: AtomicU64::new(1),
                stats: StatsTracker::default(),
                listeners: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled
    }

    pub fn default_policy(&self) -> &CachePolicy {
        &self.inner.default_policy
    }

    /// Return the cached value for `key`, or compute it
    ///
    /// The computed value is always returned to the caller, whether or not it
    /// ends up cached. Errors from `compute` propagate untouched and leave the
    /// cache unchanged.
    pub fn get_or_compute<F, E>(&self, key: K, policy: &CachePolicy, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let inner = &self.inner;
        if !inner.enabled {
            StatsTracker::bump(&inner.stats.computes);
            return compute();
        }

        // Phase 1: optimistic read
        if policy.allow_read {
            let entries = inner.entries.read();
            if let Some(entry) = entries.get(&key) {
                if entry.hit(Instant::now()) {
                    StatsTracker::bump(&inner.stats.hits);
                    log::trace!("Cache '{}' hit for {:?}", inner.name, key);
                    return Ok(entry.value.clone());
                }
            }
        }

        // Phase 2: claim the upgrade slot and recheck
        let claim = inner.entries.upgradeable();
        let observed = {
            let entries = claim.read();
            match entries.get(&key) {
                Some(entry) if policy.allow_read && entry.hit(Instant::now()) => {
                    StatsTracker::bump(&inner.stats.hits);
                    log::trace!("Cache '{}' hit for {:?} on recheck", inner.name, key);
                    return Ok(entry.value.clone());
                }
                Some(entry) => Some(entry.version),
                None => None,
            }
        };
        StatsTracker::bump(&inner.stats.misses);

        // Phase 3: compute holding only the claim, then schedule the write
        log::trace!("Cache '{}' miss for {:?}, computing", inner.name, key);
        StatsTracker::bump(&inner.stats.computes);
        let value = compute()?;

        if policy.allow_write {
            let version = inner.allocate_version();
            inner.schedule(Mutation::Upsert {
                key,
                value: value.clone(),
                policy: policy.clone(),
                version,
                condition: WriteCondition::Observed(observed),
            });
        } else if observed.is_some() {
            inner.schedule(Mutation::Remove {
                key,
                reason: RemovalReason::Deleted,
                condition: WriteCondition::Observed(observed),
            });
        }

        drop(claim);
        Ok(value)
    }

    /// [`get_or_compute`](Self::get_or_compute) with the region's default policy
    pub fn get_or_compute_default<F, E>(&self, key: K, compute: F) -> Result<V, E>
    where
        F: FnOnce() -> Result<V, E>,
    {
        let policy = self.inner.default_policy.clone();
        self.get_or_compute(key, &policy, compute)
    }

    /// Live value for `key`, refreshing its sliding expiry.
    /// An expired entry found here is removed on the spot.
    pub fn get(&self, key: &K) -> Option<V> {
        if !self.inner.enabled {
            return None;
        }
        let expired_version = {
            let entries = self.inner.entries.read();
            let entry = entries.get(key)?;
            if entry.hit(Instant::now()) {
                StatsTracker::bump(&self.inner.stats.hits);
                return Some(entry.value.clone());
            }
            entry.version
        };
        StatsTracker::bump(&self.inner.stats.misses);
        self.inner.evict_expired(key, expired_version);
        None
    }

    /// Live entry present for `key`; does not count as a hit
    pub fn contains_key(&self, key: &K) -> bool {
        let entries = self.inner.entries.read();
        entries
            .get(key)
            .map(|entry| entry.is_live(Instant::now()))
            .unwrap_or(false)
    }

    /// Schedule an unconditional insert-or-update
    pub fn put(&self, key: K, value: V, policy: &CachePolicy) -> Scheduled {
        if !self.inner.enabled {
            return Scheduled::Immediate;
        }
        let version = self.inner.allocate_version();
        self.inner.schedule(Mutation::Upsert {
            key,
            value,
            policy: policy.clone(),
            version,
            condition: WriteCondition::Always,
        })
    }

    /// Schedule deletion of `key`
    pub fn remove(&self, key: K) -> Scheduled {
        self.inner.schedule(Mutation::Remove {
            key,
            reason: RemovalReason::Deleted,
            condition: WriteCondition::Always,
        })
    }

    /// Schedule deletion of every entry whose key matches `predicate`
    ///
    /// Matching keys are snapshotted under the read lock; the deletions are
    /// scheduled after it is released. Returns the number of matches.
    pub fn invalidate_where<P>(&self, predicate: P) -> usize
    where
        P: Fn(&K) -> bool,
    {
        let matches: Vec<K> = {
            let entries = self.inner.entries.read();
            entries
                .keys()
                .filter(|key| predicate(key))
                .cloned()
                .collect()
        };

        log::debug!(
            "Cache '{}' invalidating {} entr{}",
            self.inner.name,
            matches.len(),
            if matches.len() == 1 { "y" } else { "ies" }
        );

        let count = matches.len();
        for key in matches {
            self.inner.schedule(Mutation::Remove {
                key,
                reason: RemovalReason::Invalidated,
                condition: WriteCondition::Always,
            });
        }
        count
    }

    /// Remove every entry immediately, outside any transaction
    pub fn clear(&self) {
        self.inner.clear();
    }

    /// Remove expired entries if the write lock is available within `timeout`
    pub fn sweep_expired(&self, timeout: Duration) -> SweepOutcome {
        self.inner.sweep_expired(timeout)
    }

    /// Number of stored entries, including expired ones not yet swept
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn add_listener(&self, listener: Arc<dyn CacheListener<K>>) {
        self.inner.listeners.write().push(listener);
    }

    pub fn stats(&self) -> RegionStats {
        self.inner.stats()
    }

    pub(crate) fn inner(&self) -> Arc<RegionInner<K, V>> {
        self.inner.clone()
    }
}

impl<K: RegionKey, V: RegionValue> RegionInner<K, V> {
    fn allocate_version(&self) -> u64 {
        self.next_version.fetch_add(1, Ordering::Relaxed)
    }

    fn schedule(self: &Arc<Self>, mutation: Mutation<K, V>) -> Scheduled {
        let region = self.clone();
        let scheduled = self.scheduler.schedule(move |deferred| {
            if deferred {
                log::trace!("Applying deferred mutation to cache '{}'", region.name);
            }
            region.apply(mutation);
        });
        if let Scheduled::Deferred(id) = scheduled {
            log::debug!("Cache '{}' mutation deferred until {} commits", self.name, id);
        }
        scheduled
    }

    fn apply(&self, mutation: Mutation<K, V>) {
        let event = {
            let mut entries = self.entries.write();
            let now = Instant::now();
            match mutation {
                Mutation::Upsert {
                    key,
                    value,
                    policy,
                    version,
                    condition,
                } => {
                    let existing = entries.get(&key);
                    if !Self::condition_holds(condition, existing, now) {
                        StatsTracker::bump(&self.stats.dropped_writes);
                        log::debug!(
                            "Cache '{}' dropped write for {:?}: a newer entry was committed",
                            self.name,
                            key
                        );
                        return;
                    }
                    let event = if existing.is_some() {
                        StatsTracker::bump(&self.stats.updates);
                        CacheEvent::Updated { key: key.clone() }
                    } else {
                        StatsTracker::bump(&self.stats.inserts);
                        CacheEvent::Inserted { key: key.clone() }
                    };
                    entries.insert(key, CacheEntry::new(value, version, policy.expiry_from(now)));
                    event
                }
                Mutation::Remove {
                    key,
                    reason,
                    condition,
                } => {
                    let existing = entries.get(&key);
                    if existing.is_none() || !Self::condition_holds(condition, existing, now) {
                        return;
                    }
                    entries.remove(&key);
                    StatsTracker::bump(&self.stats.removals);
                    CacheEvent::Removed { key, reason }
                }
            }
        };

        log::trace!("Cache '{}' applied {:?}", self.name, event);
        self.notify(&event);
    }

    fn condition_holds(
        condition: WriteCondition,
        existing: Option<&CacheEntry<V>>,
        now: Instant,
    ) -> bool {
        match condition {
            WriteCondition::Always => true,
            WriteCondition::Observed(observed) => match existing {
                None => true,
                Some(entry) => Some(entry.version) == observed || !entry.is_live(now),
            },
        }
    }

    fn notify(&self, event: &CacheEvent<K>) {
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_event(&self.name, event);
        }
    }

    fn clear(&self) {
        let removed: Vec<K> = {
            let mut entries = self.entries.write();
            entries.drain().map(|(key, _)| key).collect()
        };
        StatsTracker::add(&self.stats.removals, removed.len());
        log::debug!("Cache '{}' cleared {} entries", self.name, removed.len());
        for key in removed {
            self.notify(&CacheEvent::Removed {
                key,
                reason: RemovalReason::Cleared,
            });
        }
    }

    /// Remove `key` if it still holds the expired entry `version`
    fn evict_expired(&self, key: &K, version: u64) {
        let evicted = {
            let mut entries = self.entries.write();
            let stale = entries
                .get(key)
                .map(|entry| entry.version == version && !entry.is_live(Instant::now()))
                .unwrap_or(false);
            if stale {
                entries.remove(key);
            }
            stale
        };
        if !evicted {
            return;
        }

        StatsTracker::bump(&self.stats.expirations);
        log::trace!("Cache '{}' evicted expired entry {:?}", self.name, key);
        self.notify(&CacheEvent::Removed {
            key: key.clone(),
            reason: RemovalReason::Expired,
        });
    }

    fn sweep_expired(&self, timeout: Duration) -> SweepOutcome {
        let expired: Vec<K> = {
            let mut entries = match self.entries.try_write_for(timeout) {
                Some(entries) => entries,
                None => {
                    StatsTracker::bump(&self.stats.skipped_sweeps);
                    log::trace!("Cache '{}' busy, skipping expiry sweep", self.name);
                    return SweepOutcome::Skipped;
                }
            };
            let now = Instant::now();
            let keys: Vec<K> = entries
                .iter()
                .filter(|(_, entry)| !entry.is_live(now))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &keys {
                entries.remove(key);
            }
            keys
        };

        StatsTracker::bump(&self.stats.sweeps);
        StatsTracker::add(&self.stats.expirations, expired.len());
        if !expired.is_empty() {
            log::debug!(
                "Cache '{}' swept {} expired entries",
                self.name,
                expired.len()
            );
        }

        let count = expired.len();
        for key in expired {
            self.notify(&CacheEvent::Removed {
                key,
                reason: RemovalReason::Expired,
            });
        }
        SweepOutcome::Swept(count)
    }

    fn stats(&self) -> RegionStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        RegionStats {
            hits: load(&self.stats.hits),
            misses: load(&self.stats.misses),
            computes: load(&self.stats.computes),
            inserts: load(&self.stats.inserts),
            updates: load(&self.stats.updates),
            removals: load(&self.stats.removals),
            expirations: load(&self.stats.expirations),
            sweeps: load(&self.stats.sweeps),
            skipped_sweeps: load(&self.stats.skipped_sweeps),
            dropped_writes: load(&self.stats.dropped_writes),
            entries: self.entries.read().len(),
            lock: self.entries.stats(),
        }
    }
}

/// Type-erased view of a region used by the registry and sweeper
pub trait Sweepable: Send + Sync {
    fn region_name(&self) -> &str;
    fn sweep_expired(&self, timeout: Duration) -> SweepOutcome;
    fn clear(&self);
    fn entry_count(&self) -> usize;
    fn region_stats(&self) -> RegionStats;
}

impl<K: RegionKey, V: RegionValue> Sweepable for RegionInner<K, V> {
    fn region_name(&self) -> &str {
        &self.name
    }

    fn sweep_expired(&self, timeout: Duration) -> SweepOutcome {
        RegionInner::sweep_expired(self, timeout)
    }

    fn clear(&self) {
        RegionInner::clear(self)
    }

    fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    fn region_stats(&self) -> RegionStats {
        self.stats()
    }
}

impl<K: RegionKey, V: RegionValue> Debug for CacheRegion<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheRegion")
            .field("name", &self.inner.name)
            .field("enabled", &self.inner.enabled)
            .field("entries", &self.len())
            .finish()
    }
}
