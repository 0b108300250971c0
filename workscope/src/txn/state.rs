// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Transaction identity and lifecycle states

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier for a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId(u64);

impl TransactionId {
    /// Allocate the next process-unique transaction ID
    pub fn new() -> Self {
        TransactionId(NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the underlying ID value
    pub fn id(&self) -> u64 {
        self.0
    }

    /// Wrap an ID issued by an external transaction coordinator
    pub fn from_u64(id: u64) -> Self {
        TransactionId(id)
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Transaction lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Transaction is active; its outcome is not yet known
    Active,
    /// Transaction has been committed successfully
    Committed,
    /// Transaction has been rolled back
    RolledBack,
}

impl TransactionStatus {
    pub fn is_active(&self) -> bool {
        *self == TransactionStatus::Active
    }

    /// Outcome for a finished transaction, `None` while still active
    pub fn outcome(&self) -> Option<TransactionOutcome> {
        match self {
            TransactionStatus::Active => None,
            TransactionStatus::Committed => Some(TransactionOutcome::Committed),
            TransactionStatus::RolledBack => Some(TransactionOutcome::Aborted),
        }
    }
}

/// Final result reported to completion callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionOutcome {
    Committed,
    Aborted,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_ids_are_unique() {
        let first = TransactionId::new();
        let second = TransactionId::new();
        assert_ne!(first, second);
        assert!(second.id() > first.id());
        assert_eq!(TransactionId::from_u64(7).to_string(), "txn_7");
    }

    #[test]
    fn test_status_outcome() {
        assert_eq!(TransactionStatus::Active.outcome(), None);
        assert_eq!(
            TransactionStatus::Committed.outcome(),
            Some(TransactionOutcome::Committed)
        );
        assert_eq!(
            TransactionStatus::RolledBack.outcome(),
            Some(TransactionOutcome::Aborted)
        );
    }
}
