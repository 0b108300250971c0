// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Named region set and background expiry sweep

use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::region::{CacheRegion, RegionKey, RegionStats, RegionValue, SweepOutcome, Sweepable};
use crate::config::CacheConfig;
use crate::error::{Result, WorkError};

/// Set of cache regions swept and cleared together
#[derive(Default)]
pub struct CacheRegistry {
    regions: RwLock<Vec<Arc<dyn Sweepable>>>,
}

impl CacheRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a region; names must be unique within the registry
    pub fn register<K: RegionKey, V: RegionValue>(&self, region: &CacheRegion<K, V>) -> Result<()> {
        let mut regions = self.regions.write();
        if regions
            .iter()
            .any(|existing| existing.region_name() == region.name())
        {
            return Err(WorkError::Config(format!(
                "Cache region '{}' is already registered",
                region.name()
            )));
        }
        regions.push(region.inner());
        log::debug!("Registered cache region '{}'", region.name());
        Ok(())
    }

    /// Drop a region from the registry; returns false if it was not registered
    pub fn unregister(&self, name: &str) -> bool {
        let mut regions = self.regions.write();
        let before = regions.len();
        regions.retain(|region| region.region_name() != name);
        regions.len() != before
    }

    pub fn region_names(&self) -> Vec<String> {
        self.regions
            .read()
            .iter()
            .map(|region| region.region_name().to_string())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total stored entries across regions
    pub fn total_entries(&self) -> usize {
        self.snapshot()
            .iter()
            .map(|region| region.entry_count())
            .sum()
    }

    /// Per-region statistics keyed by region name
    pub fn stats(&self) -> Vec<(String, RegionStats)> {
        self.snapshot()
            .iter()
            .map(|region| (region.region_name().to_string(), region.region_stats()))
            .collect()
    }

    /// Sweep every region once, skipping regions whose lock is busy
    pub fn sweep_all(&self, lock_timeout: Duration) -> Vec<(String, SweepOutcome)> {
        self.snapshot()
            .iter()
            .map(|region| {
                (
                    region.region_name().to_string(),
                    region.sweep_expired(lock_timeout),
                )
            })
            .collect()
    }

    pub fn clear_all(&self) {
        for region in self.snapshot() {
            region.clear();
        }
    }

    // Callers iterate the snapshot without holding the registry lock
    fn snapshot(&self) -> Vec<Arc<dyn Sweepable>> {
        self.regions.read().clone()
    }
}

struct SweeperSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

/// Background thread that periodically removes expired entries
///
/// Each cycle tries to take every region's write lock for at most
/// `sweep_lock_timeout`; busy regions are skipped until the next cycle.
pub struct ExpirySweeper {
    signal: Arc<SweeperSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    /// Start sweeping `registry` with the interval and timeout from `config`
    pub fn start(registry: Arc<CacheRegistry>, config: &CacheConfig) -> Result<Self> {
        Self::start_with(registry, config.sweep_interval(), config.sweep_lock_timeout())
    }

    pub fn start_with(
        registry: Arc<CacheRegistry>,
        interval: Duration,
        lock_timeout: Duration,
    ) -> Result<Self> {
        if interval.is_zero() {
            return Err(WorkError::Config(
                "Sweep interval must be greater than zero".to_string(),
            ));
        }

        let signal = Arc::new(SweeperSignal {
            stopped: Mutex::new(false),
            wake: Condvar::new(),
        });

        let thread_signal = signal.clone();
        let handle = std::thread::Builder::new()
            .name("workscope-sweeper".to_string())
            .spawn(move || Self::run(registry, thread_signal, interval, lock_timeout))
            .map_err(|e| WorkError::Config(format!("Failed to start expiry sweeper: {}", e)))?;

        log::info!(
            "Expiry sweeper started (interval {:?}, lock timeout {:?})",
            interval,
            lock_timeout
        );

        Ok(Self {
            signal,
            handle: Some(handle),
        })
    }

    fn run(
        registry: Arc<CacheRegistry>,
        signal: Arc<SweeperSignal>,
        interval: Duration,
        lock_timeout: Duration,
    ) {
        loop {
            {
                let mut stopped = signal.stopped.lock();
                if !*stopped {
                    signal.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    break;
                }
            }

            let outcomes = registry.sweep_all(lock_timeout);
            let skipped = outcomes
                .iter()
                .filter(|(_, outcome)| *outcome == SweepOutcome::Skipped)
                .count();
            if skipped > 0 {
                log::debug!("Expiry sweep skipped {} busy region(s)", skipped);
            }
        }
        log::info!("Expiry sweeper stopped");
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Stop the thread and wait for it to exit
    pub fn stop(&mut self) {
        {
            let mut stopped = self.signal.stopped.lock();
            *stopped = true;
        }
        self.signal.wake.notify_all();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Expiry sweeper thread panicked");
            }
        }
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        self.stop();
    }
}
