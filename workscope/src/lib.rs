// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Workscope - unit-of-work scoped transactional cache coordination
//!
//! Workscope is the core a message-processing runtime sits on: every handler
//! invocation runs inside a nested unit of work whose side effects are only
//! applied once the outermost operation is known to have succeeded.
//!
//! # Features
//!
//! - **Ambient work context**: per-thread, nestable [`WorkContext`] entered and
//!   exited around each handler invocation
//! - **Buffered events**: events published during an operation are held per
//!   nesting level and delivered only on success
//! - **Grouped flushing**: enlisted units sharing a flush group flush as one,
//!   in reverse enlistment order
//! - **Transactional caches**: [`CacheRegion`] applies its mutations only once
//!   the surrounding transaction commits
//!
//! # Usage
//!
//! ```rust,ignore
//! use workscope::{CachePolicy, CacheRegion, OperationScope};
//!
//! let region: CacheRegion<String, u64> = CacheRegion::new("orders");
//!
//! let scope = OperationScope::begin()?;
//! let total = region.get_or_compute("total".to_string(), &CachePolicy::default(), || {
//!     Ok::<_, std::io::Error>(42)
//! })?;
//! scope.complete()?;
//! ```

pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod event;
pub mod txn;
pub mod unit;

pub use cache::{
    CacheEvent, CacheListener, CachePolicy, CacheRegion, CacheRegistry, ExpirySweeper,
    RegionStats, RemovalReason,
};
pub use config::{CacheConfig, ContextConfig, WorkscopeConfig};
pub use context::{run_in_scope, ExitOutcome, OperationScope, ScopeToken, WorkContext};
pub use error::{Result, ValidationError, WorkError};
pub use event::{Event, EventBuffer, EventBus};
pub use txn::{
    AmbientTransaction, DeferredCommitScheduler, LocalTransaction, Scheduled,
    ThreadTransactionSource, TransactionId, TransactionOutcome, TransactionScope,
    TransactionSource, TransactionStatus,
};
pub use unit::{EnlistedUnit, FlushController, FlushGroupId, FlushReport, UnitGroup};

/// Workscope version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Workscope crate name
pub const CRATE_NAME: &str = env!("CARGO_PKG_NAME");
