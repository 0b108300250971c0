// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Cache change notifications

use std::fmt::Debug;

/// Why an entry left the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Explicit delete, or a recompute that was not allowed to write
    Deleted,
    /// Matched an invalidation predicate
    Invalidated,
    /// Removed by the expiry sweep
    Expired,
    /// Region cleared
    Cleared,
}

/// Change applied to a cache region
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheEvent<K> {
    Inserted { key: K },
    Updated { key: K },
    Removed { key: K, reason: RemovalReason },
}

impl<K> CacheEvent<K> {
    pub fn key(&self) -> &K {
        match self {
            CacheEvent::Inserted { key }
            | CacheEvent::Updated { key }
            | CacheEvent::Removed { key, .. } => key,
        }
    }
}

/// Receives change notifications from a region
///
/// Listeners run on whichever thread applied the change, after the region's
/// write lock has been released.
pub trait CacheListener<K>: Send + Sync
where
    K: Debug,
{
    fn on_event(&self, region: &str, event: &CacheEvent<K>);
}

impl<K, F> CacheListener<K> for F
where
    K: Debug,
    F: Fn(&str, &CacheEvent<K>) + Send + Sync,
{
    fn on_event(&self, region: &str, event: &CacheEvent<K>) {
        self(region, event)
    }
}
