// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! RAII wrapper around enter/exit

use super::{ExitOutcome, ScopeToken, WorkContext};
use crate::config::ContextConfig;
use crate::error::{Result, WorkError};

/// Guard for one handler invocation
///
/// [`complete`](OperationScope::complete) exits with success. Dropping the
/// guard without completing it, including during a panic, exits with failure.
pub struct OperationScope {
    token: Option<ScopeToken>,
}

impl OperationScope {
    pub fn begin() -> Result<Self> {
        Ok(Self {
            token: Some(WorkContext::enter()?),
        })
    }

    pub fn begin_with(config: &ContextConfig) -> Result<Self> {
        Ok(Self {
            token: Some(WorkContext::enter_with(config)?),
        })
    }

    pub fn depth(&self) -> usize {
        self.token.as_ref().map(ScopeToken::depth).unwrap_or(0)
    }

    pub fn is_outermost(&self) -> bool {
        self.token
            .as_ref()
            .map(ScopeToken::is_outermost)
            .unwrap_or(false)
    }

    /// Exit with success
    pub fn complete(mut self) -> Result<ExitOutcome> {
        match self.token.take() {
            Some(token) => WorkContext::exit(token, true),
            None => Err(WorkError::NoAmbientContext(
                "operation scope already exited".to_string(),
            )),
        }
    }

    /// Exit with failure
    pub fn abandon(mut self) -> Result<ExitOutcome> {
        match self.token.take() {
            Some(token) => WorkContext::exit(token, false),
            None => Err(WorkError::NoAmbientContext(
                "operation scope already exited".to_string(),
            )),
        }
    }
}

impl Drop for OperationScope {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = WorkContext::exit(token, false) {
                log::error!("Failed to exit abandoned operation scope: {}", e);
            }
        }
    }
}

/// Run `operation` inside its own scope, completing the scope only if it succeeds
pub fn run_in_scope<T, E, F>(operation: F) -> std::result::Result<T, E>
where
    F: FnOnce() -> std::result::Result<T, E>,
    E: From<WorkError>,
{
    let scope = OperationScope::begin()?;
    match operation() {
        Ok(value) => {
            scope.complete()?;
            Ok(value)
        }
        Err(e) => {
            drop(scope);
            Err(e)
        }
    }
}
