// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transactional caching
//!
//! This module provides:
//! - Per-entry cache policies (read/write permission, absolute and sliding expiry)
//! - An upgradeable reader/writer lock for recheck-then-write lookups
//! - Cache regions whose mutations are deferred until the ambient transaction commits
//! - Change notifications for inserted, updated and removed entries
//! - A region registry and a background expiry sweeper

pub mod events;
pub mod lock;
pub mod policy;
pub mod region;
pub mod registry;

pub use events::{CacheEvent, CacheListener, RemovalReason};
pub use lock::{LockStats, UpgradeableGuard, UpgradeableLock};
pub use policy::CachePolicy;
pub use region::{CacheRegion, RegionKey, RegionStats, RegionValue, SweepOutcome, Sweepable};
pub use registry::{CacheRegistry, ExpirySweeper};
