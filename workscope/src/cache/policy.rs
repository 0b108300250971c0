// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Per-entry cache policies

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Rules applied to one cached lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CachePolicy {
    /// Serve the value from cache when a live entry exists
    pub allow_read: bool,

    /// Store freshly computed values in the cache
    pub allow_write: bool,

    /// Fixed lifetime measured from insertion
    pub absolute_expiration: Option<Duration>,

    /// Lifetime that restarts on every hit
    pub sliding_expiration: Option<Duration>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            allow_read: true,
            allow_write: true,
            absolute_expiration: None,
            sliding_expiration: None,
        }
    }
}

impl CachePolicy {
    /// Always compute; never read or write the cache
    pub fn bypass() -> Self {
        Self {
            allow_read: false,
            allow_write: false,
            ..Self::default()
        }
    }

    /// Always compute and refresh the cached value for other callers
    pub fn write_only() -> Self {
        Self {
            allow_read: false,
            ..Self::default()
        }
    }

    /// Serve cached values but never store new ones
    pub fn read_only() -> Self {
        Self {
            allow_write: false,
            ..Self::default()
        }
    }

    pub fn with_absolute_expiration(mut self, ttl: Duration) -> Self {
        self.absolute_expiration = Some(ttl);
        self
    }

    pub fn with_sliding_expiration(mut self, ttl: Duration) -> Self {
        self.sliding_expiration = Some(ttl);
        self
    }

    /// Expiry state for an entry inserted at `now`
    pub(crate) fn expiry_from(&self, now: Instant) -> Expiry {
        Expiry {
            absolute_deadline: self.absolute_expiration.map(|ttl| now + ttl),
            sliding_window: self.sliding_expiration,
            last_access: now,
        }
    }
}

/// Expiry metadata stored alongside a cache entry
#[derive(Debug, Clone, Copy)]
pub(crate) struct Expiry {
    pub absolute_deadline: Option<Instant>,
    pub sliding_window: Option<Duration>,
    pub last_access: Instant,
}

impl Expiry {
    pub fn is_expired_at(&self, now: Instant) -> bool {
        if let Some(deadline) = self.absolute_deadline {
            if now >= deadline {
                return true;
            }
        }
        if let Some(window) = self.sliding_window {
            if now.duration_since(self.last_access) >= window {
                return true;
            }
        }
        false
    }

    /// Restart the sliding window
    pub fn touch(&mut self, now: Instant) {
        self.last_access = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_expiration_never_expires() {
        let now = Instant::now();
        let expiry = CachePolicy::default().expiry_from(now);
        assert!(!expiry.is_expired_at(now + Duration::from_secs(86_400)));
    }

    #[test]
    fn test_absolute_expiration() {
        let now = Instant::now();
        let expiry = CachePolicy::default()
            .with_absolute_expiration(Duration::from_secs(10))
            .expiry_from(now);

        assert!(!expiry.is_expired_at(now + Duration::from_secs(9)));
        assert!(expiry.is_expired_at(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_sliding_expiration_is_refreshed_by_touch() {
        let now = Instant::now();
        let mut expiry = CachePolicy::default()
            .with_sliding_expiration(Duration::from_secs(5))
            .expiry_from(now);

        expiry.touch(now + Duration::from_secs(4));
        assert!(!expiry.is_expired_at(now + Duration::from_secs(8)));
        assert!(expiry.is_expired_at(now + Duration::from_secs(9)));
    }

    #[test]
    fn test_absolute_wins_over_sliding() {
        let now = Instant::now();
        let mut expiry = CachePolicy::default()
            .with_absolute_expiration(Duration::from_secs(6))
            .with_sliding_expiration(Duration::from_secs(5))
            .expiry_from(now);

        expiry.touch(now + Duration::from_secs(4));
        assert!(expiry.is_expired_at(now + Duration::from_secs(6)));
    }

    #[test]
    fn test_presets() {
        assert!(!CachePolicy::bypass().allow_read);
        assert!(!CachePolicy::bypass().allow_write);
        assert!(CachePolicy::read_only().allow_read);
        assert!(!CachePolicy::read_only().allow_write);
        assert!(!CachePolicy::write_only().allow_read);
    }
}
