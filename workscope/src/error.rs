// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Error types for work scopes, flushing and transactions

use std::fmt;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, WorkError>;

/// Errors raised by the unit-of-work core
#[derive(Error, Debug)]
pub enum WorkError {
    #[error("No ambient work context: {0}")]
    NoAmbientContext(String),

    #[error("Scope exited out of order: top level is {expected}, token is for level {actual}")]
    OutOfOrderExit { expected: usize, actual: usize },

    #[error("Scope token belongs to another work context")]
    ForeignScope,

    #[error("Work context nesting exceeds limit of {limit} levels")]
    NestingTooDeep { limit: usize },

    #[error("Event validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Flush failed for unit '{unit}': {message}")]
    FlushFailed { unit: String, message: String },

    #[error("Publish failed: {0}")]
    PublishFailed(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkError {
    /// Usage errors are programmer mistakes: no ambient context, scopes exited
    /// out of order, or tokens from a different context.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            WorkError::NoAmbientContext(_)
                | WorkError::OutOfOrderExit { .. }
                | WorkError::ForeignScope
                | WorkError::NestingTooDeep { .. }
        )
    }
}

/// A single failed rule on an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationFailure {
    pub field: String,
    pub message: String,
}

/// Validation failures collected for one event
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationError {
    failures: Vec<ValidationFailure>,
}

impl ValidationError {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shorthand for a single failure
    pub fn single(field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut error = Self::new();
        error.add(field, message);
        error
    }

    pub fn add(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.failures.push(ValidationFailure {
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn failures(&self) -> &[ValidationFailure] {
        &self.failures
    }

    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }

    /// `Ok(())` when nothing failed, otherwise `Err(self)`
    pub fn into_result(self) -> std::result::Result<(), ValidationError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(self)
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .failures
            .iter()
            .map(|failure| format!("{}: {}", failure.field, failure.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

impl std::error::Error for ValidationError {}
