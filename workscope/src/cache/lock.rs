// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Three-phase reader/writer lock with an explicit upgrade intent
//!
//! Read: many holders, no mutation. Upgradeable: at most one holder, which
//! may briefly read and then escalate to write without giving up its claim.
//! Write: exclusive.
//!
//! Releasing a plain read lock and then taking the write lock is NOT an
//! upgrade: two callers can both observe a miss and both write. The intent
//! token closes that window because only its holder may recheck-then-act.
//! The token blocks neither plain readers nor plain writers, so deferred
//! commits and sweeps still progress while its holder computes. The token is
//! reentrant: a holder that looks up another key of the same region while
//! computing claims it again instead of deadlocking.

use parking_lot::{
    ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock acquisition counters and accumulated wait time
#[derive(Debug, Default)]
pub struct LockTracker {
    reads: AtomicU64,
    upgradeables: AtomicU64,
    writes: AtomicU64,
    write_timeouts: AtomicU64,
    wait_nanos: AtomicU64,
}

/// Snapshot of [`LockTracker`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockStats {
    pub reads: u64,
    pub upgradeables: u64,
    pub writes: u64,
    pub write_timeouts: u64,
    pub total_wait: Duration,
}

impl LockTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn track<T, F>(&self, counter: &AtomicU64, operation: F) -> T
    where
        F: FnOnce() -> T,
    {
        let started = Instant::now();
        let result = operation();
        self.add_lock_wait_time(started.elapsed());
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    pub fn add_lock_wait_time(&self, duration: Duration) {
        let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        self.wait_nanos.fetch_add(nanos, Ordering::Relaxed);
    }

    pub fn total_lock_wait_time(&self) -> Duration {
        Duration::from_nanos(self.wait_nanos.load(Ordering::Relaxed))
    }

    pub fn stats(&self) -> LockStats {
        LockStats {
            reads: self.reads.load(Ordering::Relaxed),
            upgradeables: self.upgradeables.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            write_timeouts: self.write_timeouts.load(Ordering::Relaxed),
            total_wait: self.total_lock_wait_time(),
        }
    }
}

/// Reader/writer lock with a single-holder upgrade path
#[derive(Debug)]
pub struct UpgradeableLock<T> {
    data: RwLock<T>,
    intent: ReentrantMutex<()>,
    tracker: LockTracker,
}

impl<T> UpgradeableLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            data: RwLock::new(value),
            intent: ReentrantMutex::new(()),
            tracker: LockTracker::new(),
        }
    }

    /// Shared read access
    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.tracker.track(&self.tracker.reads, || self.data.read())
    }

    /// Exclusive write access
    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.tracker.track(&self.tracker.writes, || self.data.write())
    }

    /// Exclusive write access, giving up after `timeout`
    pub fn try_write_for(&self, timeout: Duration) -> Option<RwLockWriteGuard<'_, T>> {
        let started = Instant::now();
        let guard = self.data.try_write_for(timeout);
        self.tracker.add_lock_wait_time(started.elapsed());
        let counter = match guard {
            Some(_) => &self.tracker.writes,
            None => &self.tracker.write_timeouts,
        };
        counter.fetch_add(1, Ordering::Relaxed);
        guard
    }

    /// Claim the single upgrade slot; blocks while another caller holds it
    pub fn upgradeable(&self) -> UpgradeableGuard<'_, T> {
        let intent = self
            .tracker
            .track(&self.tracker.upgradeables, || self.intent.lock());
        UpgradeableGuard {
            lock: self,
            _intent: intent,
        }
    }

    pub fn stats(&self) -> LockStats {
        self.tracker.stats()
    }
}

/// Holder of the upgrade slot
///
/// Data access goes through [`read`](UpgradeableGuard::read) and
/// [`upgrade`](UpgradeableGuard::upgrade); both guards must be dropped before
/// any code that takes the plain write lock runs on this thread.
pub struct UpgradeableGuard<'a, T> {
    lock: &'a UpgradeableLock<T>,
    _intent: ReentrantMutexGuard<'a, ()>,
}

impl<'a, T> UpgradeableGuard<'a, T> {
    /// Read the data while keeping the upgrade claim
    pub fn read(&self) -> RwLockReadGuard<'a, T> {
        self.lock.read()
    }

    /// Escalate to exclusive access without giving up the upgrade claim
    pub fn upgrade(&self) -> RwLockWriteGuard<'a, T> {
        self.lock.write()
    }
}
