// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Enlisted units and grouped flushing
//!
//! An [`EnlistedUnit`] is anything holding pending changes that must be
//! applied when the surrounding operation succeeds: a persistence session,
//! an outbox, a buffered writer. Units that report the same
//! [`FlushGroupId`] are merged into a [`UnitGroup`] and flush as one step.

pub mod controller;
pub mod group;

pub use controller::{FlushController, FlushReport};
pub use group::UnitGroup;

use std::fmt;
use std::sync::Arc;

use crate::error::Result;

/// Identifier shared by units that must flush together
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlushGroupId(pub i32);

impl FlushGroupId {
    pub fn new(id: i32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

impl fmt::Display for FlushGroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group_{}", self.0)
    }
}

impl From<i32> for FlushGroupId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

/// A participant with pending changes
pub trait EnlistedUnit: Send + Sync {
    /// Units with equal ids are merged; `None` is never merged
    fn flush_group_id(&self) -> Option<FlushGroupId> {
        None
    }

    /// Hint for batching; the controller still flushes synchronously
    fn can_flush_asynchronously(&self) -> bool {
        false
    }

    /// Whether there is anything to flush right now
    fn requires_flush(&self) -> bool;

    /// Apply pending changes
    fn flush(&self) -> Result<()>;

    /// Name used in logs and flush reports
    fn name(&self) -> String {
        "unit".to_string()
    }
}

/// Identity of a shared unit, ignoring vtable metadata
pub(crate) fn same_unit(a: &Arc<dyn EnlistedUnit>, b: &Arc<dyn EnlistedUnit>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}
