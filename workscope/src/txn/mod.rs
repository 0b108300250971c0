// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Ambient transactions and deferred commit scheduling
//!
//! The transaction itself is an external collaborator: this module only needs
//! to know whether one is active and to be told when it commits or aborts.
//!
//! # Features
//! - [`AmbientTransaction`] / [`TransactionSource`] collaborator traits
//! - [`LocalTransaction`], an in-process implementation with completion callbacks
//! - [`TransactionScope`], a per-thread ambient transaction stack
//! - [`DeferredCommitScheduler`], which runs actions now or on commit

pub mod local;
pub mod scheduler;
pub mod state;

pub use local::{LocalTransaction, ThreadTransactionSource, TransactionScope};
pub use scheduler::{DeferredCommitScheduler, Scheduled};
pub use state::{TransactionId, TransactionOutcome, TransactionStatus};

use std::sync::Arc;

/// Callback invoked once when a transaction completes
pub type CompletionCallback = Box<dyn FnOnce(TransactionOutcome) + Send + 'static>;

/// A transaction that deferred work can attach to
pub trait AmbientTransaction: Send + Sync {
    /// Unique identifier of the transaction
    fn id(&self) -> TransactionId;

    /// Current lifecycle status
    fn status(&self) -> TransactionStatus;

    /// Register a callback for commit/abort. If the transaction has already
    /// completed the callback runs immediately with the recorded outcome.
    fn on_completion(&self, callback: CompletionCallback);
}

/// Lookup of the ambient transaction for the calling thread of control
pub trait TransactionSource: Send + Sync {
    fn current(&self) -> Option<Arc<dyn AmbientTransaction>>;
}

/// Source that never reports a transaction
#[derive(Debug, Clone, Copy, Default)]
pub struct NoTransactions;

impl TransactionSource for NoTransactions {
    fn current(&self) -> Option<Arc<dyn AmbientTransaction>> {
        None
    }
}
