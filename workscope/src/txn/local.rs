// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! In-process transactions and the per-thread ambient transaction stack

use parking_lot::Mutex;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use super::state::{TransactionId, TransactionOutcome, TransactionStatus};
use super::{AmbientTransaction, CompletionCallback, TransactionSource};
use crate::error::{Result, WorkError};

thread_local! {
    static AMBIENT_TRANSACTIONS: RefCell<Vec<Arc<dyn AmbientTransaction>>> =
        const { RefCell::new(Vec::new()) };
}

struct LocalState {
    status: TransactionStatus,
    callbacks: Vec<CompletionCallback>,
}

/// Transaction whose outcome is decided in-process by calling
/// [`commit`](LocalTransaction::commit) or [`rollback`](LocalTransaction::rollback)
pub struct LocalTransaction {
    id: TransactionId,
    state: Mutex<LocalState>,
}

impl LocalTransaction {
    /// Start a new active transaction
    pub fn begin() -> Arc<Self> {
        let transaction = Arc::new(Self {
            id: TransactionId::new(),
            state: Mutex::new(LocalState {
                status: TransactionStatus::Active,
                callbacks: Vec::new(),
            }),
        });
        log::debug!("Began local transaction {}", transaction.id);
        transaction
    }

    /// Commit and run every registered callback with `Committed`
    pub fn commit(&self) -> Result<()> {
        self.complete(TransactionStatus::Committed)
    }

    /// Roll back and run every registered callback with `Aborted`
    pub fn rollback(&self) -> Result<()> {
        self.complete(TransactionStatus::RolledBack)
    }

    /// Number of callbacks waiting for the outcome
    pub fn pending_callbacks(&self) -> usize {
        self.state.lock().callbacks.len()
    }

    fn complete(&self, status: TransactionStatus) -> Result<()> {
        let callbacks = {
            let mut state = self.state.lock();
            if !state.status.is_active() {
                return Err(WorkError::Transaction(format!(
                    "Transaction {} already completed as {:?}",
                    self.id, state.status
                )));
            }
            state.status = status;
            std::mem::take(&mut state.callbacks)
        };

        let outcome = match status {
            TransactionStatus::Committed => TransactionOutcome::Committed,
            _ => TransactionOutcome::Aborted,
        };

        log::debug!(
            "Transaction {} completed as {:?}, notifying {} callback(s)",
            self.id,
            outcome,
            callbacks.len()
        );

        // Callbacks run without the state lock so they may inspect the transaction
        for callback in callbacks {
            callback(outcome);
        }
        Ok(())
    }
}

impl AmbientTransaction for LocalTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    fn on_completion(&self, callback: CompletionCallback) {
        let mut state = self.state.lock();
        match state.status.outcome() {
            None => state.callbacks.push(callback),
            Some(outcome) => {
                drop(state);
                callback(outcome);
            }
        }
    }
}

impl std::fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalTransaction")
            .field("id", &self.id)
            .field("status", &self.status())
            .finish()
    }
}

fn push_ambient(transaction: Arc<dyn AmbientTransaction>) {
    AMBIENT_TRANSACTIONS.with(|stack| stack.borrow_mut().push(transaction));
}

fn pop_ambient(id: TransactionId) {
    AMBIENT_TRANSACTIONS.with(|stack| {
        let mut stack = stack.borrow_mut();
        match stack.iter().rposition(|txn| txn.id() == id) {
            Some(position) => {
                if position + 1 != stack.len() {
                    log::warn!("Ambient transaction {} released out of order", id);
                }
                stack.remove(position);
            }
            None => log::warn!("Ambient transaction {} was not on this thread's stack", id),
        }
    });
}

/// Ambient transaction for the calling thread, if any
pub fn current_transaction() -> Option<Arc<dyn AmbientTransaction>> {
    AMBIENT_TRANSACTIONS.with(|stack| stack.borrow().last().cloned())
}

/// Per-thread ambient transaction scope
///
/// While the scope is alive its transaction is the one reported by
/// [`ThreadTransactionSource`]. Dropping a scope that was not committed
/// rolls the transaction back.
pub struct TransactionScope {
    transaction: Arc<LocalTransaction>,
    completed: bool,
    // Ambient state is thread-local, so the scope must stay on its thread
    _not_send: PhantomData<*const ()>,
}

impl TransactionScope {
    /// Begin a new local transaction and make it ambient
    pub fn begin() -> Self {
        let transaction = LocalTransaction::begin();
        push_ambient(transaction.clone());
        Self {
            transaction,
            completed: false,
            _not_send: PhantomData,
        }
    }

    /// Make an externally owned transaction ambient until the guard drops.
    /// The guard never completes the transaction.
    pub fn attach(transaction: Arc<dyn AmbientTransaction>) -> AttachedTransaction {
        let id = transaction.id();
        push_ambient(transaction);
        AttachedTransaction {
            id,
            _not_send: PhantomData,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.transaction.id()
    }

    pub fn transaction(&self) -> Arc<LocalTransaction> {
        self.transaction.clone()
    }

    /// Leave the scope and commit
    pub fn commit(mut self) -> Result<()> {
        self.completed = true;
        pop_ambient(self.transaction.id());
        self.transaction.commit()
    }

    /// Leave the scope and roll back
    pub fn rollback(mut self) -> Result<()> {
        self.completed = true;
        pop_ambient(self.transaction.id());
        self.transaction.rollback()
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        pop_ambient(self.transaction.id());
        if let Err(e) = self.transaction.rollback() {
            log::error!("Failed to roll back abandoned transaction scope: {}", e);
        }
    }
}

/// Guard returned by [`TransactionScope::attach`]
pub struct AttachedTransaction {
    id: TransactionId,
    _not_send: PhantomData<*const ()>,
}

impl Drop for AttachedTransaction {
    fn drop(&mut self) {
        pop_ambient(self.id);
    }
}

/// Transaction source backed by the per-thread ambient stack
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadTransactionSource;

impl TransactionSource for ThreadTransactionSource {
    fn current(&self) -> Option<Arc<dyn AmbientTransaction>> {
        current_transaction()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_callbacks_run_once_on_commit() {
        let txn = LocalTransaction::begin();
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        txn.on_completion(Box::new(move |outcome| {
            assert_eq!(outcome, TransactionOutcome::Committed);
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(txn.pending_callbacks(), 1);

        txn.commit().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(txn.pending_callbacks(), 0);

        // Completing twice is rejected and does not re-run callbacks
        assert!(matches!(txn.rollback(), Err(WorkError::Transaction(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_registration_sees_outcome() {
        let txn = LocalTransaction::begin();
        txn.rollback().unwrap();

        let seen = Arc::new(Mutex::new(None));
        let slot = seen.clone();
        txn.on_completion(Box::new(move |outcome| *slot.lock() = Some(outcome)));

        assert_eq!(*seen.lock(), Some(TransactionOutcome::Aborted));
    }

    #[test]
    fn test_scope_nesting_restores_previous() {
        assert!(current_transaction().is_none());

        let outer = TransactionScope::begin();
        let outer_id = outer.id();
        assert_eq!(current_transaction().map(|t| t.id()), Some(outer_id));

        {
            let inner = TransactionScope::begin();
            assert_eq!(current_transaction().map(|t| t.id()), Some(inner.id()));
            inner.commit().unwrap();
        }

        assert_eq!(current_transaction().map(|t| t.id()), Some(outer_id));
        outer.commit().unwrap();
        assert!(current_transaction().is_none());
    }

    #[test]
    fn test_dropped_scope_rolls_back() {
        let txn = {
            let scope = TransactionScope::begin();
            scope.transaction()
        };
        assert_eq!(txn.status(), TransactionStatus::RolledBack);
        assert!(ThreadTransactionSource.current().is_none());
    }

    #[test]
    fn test_attach_does_not_complete() {
        let txn = LocalTransaction::begin();
        {
            let _guard = TransactionScope::attach(txn.clone());
            assert_eq!(
                ThreadTransactionSource.current().map(|t| t.id()),
                Some(txn.id())
            );
        }
        assert!(ThreadTransactionSource.current().is_none());
        assert_eq!(txn.status(), TransactionStatus::Active);
    }
}
