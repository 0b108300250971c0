// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Deferred commit scheduling
//!
//! An action scheduled here runs right away when there is no ambient
//! transaction (or it has already committed), runs on commit when one is
//! active, and is dropped if the transaction aborts.

use std::sync::Arc;

use super::local::ThreadTransactionSource;
use super::state::{TransactionId, TransactionOutcome, TransactionStatus};
use super::{NoTransactions, TransactionSource};

/// How a scheduled action was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheduled {
    /// The action already ran on the calling thread
    Immediate,
    /// The action waits for the outcome of this transaction
    Deferred(TransactionId),
    /// The ambient transaction had already aborted; the action was dropped
    Dropped(TransactionId),
}

/// Runs actions now, or once the ambient transaction commits
#[derive(Clone)]
pub struct DeferredCommitScheduler {
    source: Arc<dyn TransactionSource>,
}

impl DeferredCommitScheduler {
    pub fn new(source: Arc<dyn TransactionSource>) -> Self {
        Self { source }
    }

    /// Scheduler that follows the calling thread's [`TransactionScope`](super::TransactionScope)
    pub fn ambient() -> Self {
        Self::new(Arc::new(ThreadTransactionSource))
    }

    /// Scheduler that never defers
    pub fn immediate() -> Self {
        Self::new(Arc::new(NoTransactions))
    }

    /// True when an action scheduled now would wait for a transaction
    pub fn would_defer(&self) -> bool {
        self.source
            .current()
            .map(|txn| txn.status().is_active())
            .unwrap_or(false)
    }

    /// Schedule `action`. It receives `true` when it runs because a
    /// transaction committed and `false` when it runs immediately.
    pub fn schedule<F>(&self, action: F) -> Scheduled
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let transaction = match self.source.current() {
            Some(transaction) => transaction,
            None => {
                action(false);
                return Scheduled::Immediate;
            }
        };

        let id = transaction.id();
        match transaction.status() {
            TransactionStatus::Committed => {
                log::trace!("Transaction {} already committed, running action now", id);
                action(false);
                Scheduled::Immediate
            }
            TransactionStatus::RolledBack => {
                log::debug!("Transaction {} already aborted, dropping action", id);
                Scheduled::Dropped(id)
            }
            TransactionStatus::Active => {
                log::trace!("Deferring action until transaction {} completes", id);
                transaction.on_completion(Box::new(move |outcome| match outcome {
                    TransactionOutcome::Committed => action(true),
                    TransactionOutcome::Aborted => {
                        log::debug!("Transaction {} aborted, deferred action dropped", id);
                    }
                }));
                Scheduled::Deferred(id)
            }
        }
    }
}

impl Default for DeferredCommitScheduler {
    fn default() -> Self {
        Self::ambient()
    }
}

impl std::fmt::Debug for DeferredCommitScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredCommitScheduler")
            .field("would_defer", &self.would_defer())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::txn::{AmbientTransaction, LocalTransaction, TransactionScope};
    use parking_lot::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<bool>>>, impl FnOnce(bool) + Send + 'static) {
        let runs = Arc::new(Mutex::new(Vec::new()));
        let sink = runs.clone();
        (runs, move |deferred| sink.lock().push(deferred))
    }

    #[test]
    fn test_runs_immediately_without_transaction() {
        let scheduler = DeferredCommitScheduler::ambient();
        let (runs, action) = recorder();

        assert_eq!(scheduler.schedule(action), Scheduled::Immediate);
        assert_eq!(*runs.lock(), vec![false]);
    }

    #[test]
    fn test_defers_until_commit() {
        let scheduler = DeferredCommitScheduler::ambient();
        let scope = TransactionScope::begin();
        let (runs, action) = recorder();

        assert!(scheduler.would_defer());
        assert_eq!(scheduler.schedule(action), Scheduled::Deferred(scope.id()));
        assert!(runs.lock().is_empty());

        scope.commit().unwrap();
        assert_eq!(*runs.lock(), vec![true]);
    }

    #[test]
    fn test_dropped_on_abort() {
        let scheduler = DeferredCommitScheduler::ambient();
        let scope = TransactionScope::begin();
        let (runs, action) = recorder();

        scheduler.schedule(action);
        scope.rollback().unwrap();
        assert!(runs.lock().is_empty());
    }

    #[test]
    fn test_completed_ambient_transaction() {
        let scheduler = DeferredCommitScheduler::ambient();

        let committed = LocalTransaction::begin();
        committed.commit().unwrap();
        {
            let _guard = TransactionScope::attach(committed);
            let (runs, action) = recorder();
            assert_eq!(scheduler.schedule(action), Scheduled::Immediate);
            assert_eq!(*runs.lock(), vec![false]);
        }

        let aborted = LocalTransaction::begin();
        aborted.rollback().unwrap();
        {
            let _guard = TransactionScope::attach(aborted.clone());
            let (runs, action) = recorder();
            assert_eq!(scheduler.schedule(action), Scheduled::Dropped(aborted.id()));
            assert!(runs.lock().is_empty());
        }
    }

    #[test]
    fn test_immediate_scheduler_ignores_ambient_transaction() {
        let scheduler = DeferredCommitScheduler::immediate();
        let _scope = TransactionScope::begin();
        let (runs, action) = recorder();

        assert!(!scheduler.would_defer());
        assert_eq!(scheduler.schedule(action), Scheduled::Immediate);
        assert_eq!(*runs.lock(), vec![false]);
    }
}
