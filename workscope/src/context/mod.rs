// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Ambient, nestable work context
//!
//! Each thread has at most one [`WorkContext`]. [`WorkContext::enter`]
//! creates it or pushes a nesting level; [`WorkContext::exit`] pops the
//! level named by its [`ScopeToken`]:
//!
//! - a successful child level appends its events to the parent level
//! - a failed level discards its events
//! - the outermost level flushes the enlisted units (last enlisted first),
//!   publishes the remaining events in order and disposes the context
//! - exiting any level but the top one fails and abandons the whole
//!   context, dropping every level's events and the enlisted units
//!
//! Flushing and publishing run after the context has been disposed, so
//! units and buses must not rely on ambient state.

mod scope;

pub use scope::{run_in_scope, OperationScope};

use std::any::Any;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::rc::Rc;
use std::sync::Arc;
use uuid::Uuid;

use crate::cache::{CachePolicy, CacheRegion};
use crate::config::ContextConfig;
use crate::error::{Result, WorkError};
use crate::event::{Event, EventBuffer, EventBus};
use crate::txn::DeferredCommitScheduler;
use crate::unit::{EnlistedUnit, FlushController, FlushReport};

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<Rc<WorkContext>>> = const { RefCell::new(None) };
}

type ItemValue = Arc<dyn Any + Send + Sync>;

/// Handle for one nesting level; must be passed to [`WorkContext::exit`]
/// exactly once, on the thread that entered it
#[must_use = "a scope token must be exited"]
#[derive(Debug)]
pub struct ScopeToken {
    context_id: Uuid,
    depth: usize,
    _not_send: PhantomData<*const ()>,
}

impl ScopeToken {
    pub fn context_id(&self) -> Uuid {
        self.context_id
    }

    /// Nesting level, 1 for the outermost scope
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_outermost(&self) -> bool {
        self.depth == 1
    }
}

/// What happened when a level was exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitOutcome {
    /// Nested level succeeded; its events moved to the parent level
    Merged { events: usize },
    /// Level failed; its events (and, at the outermost level, its units) were dropped
    Discarded { events: usize, units: usize },
    /// Outermost level succeeded: units flushed, then events published
    Completed { report: FlushReport, published: usize },
}

/// Per-thread unit of work
pub struct WorkContext {
    id: Uuid,
    config: ContextConfig,
    levels: RefCell<Vec<EventBuffer>>,
    controller: RefCell<FlushController>,
    items: CacheRegion<String, ItemValue>,
}

impl WorkContext {
    fn new(config: ContextConfig) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            config,
            levels: RefCell::new(Vec::new()),
            controller: RefCell::new(FlushController::new()),
            items: CacheRegion::with_scheduler(
                format!("work_context_{}", id.simple()),
                DeferredCommitScheduler::immediate(),
            ),
        }
    }

    /// Ambient context of the calling thread
    pub fn current() -> Option<Rc<WorkContext>> {
        CURRENT_CONTEXT.with(|current| current.borrow().clone())
    }

    pub fn is_active() -> bool {
        CURRENT_CONTEXT.with(|current| current.borrow().is_some())
    }

    /// Enter a scope with default limits
    pub fn enter() -> Result<ScopeToken> {
        Self::enter_with(&ContextConfig::default())
    }

    /// Enter a scope, creating the ambient context if there is none.
    /// `config` only applies when a new context is created.
    pub fn enter_with(config: &ContextConfig) -> Result<ScopeToken> {
        let context = match Self::current() {
            Some(context) => context,
            None => {
                let context = Rc::new(WorkContext::new(config.clone()));
                log::debug!("Created work context {}", context.id);
                CURRENT_CONTEXT.with(|current| *current.borrow_mut() = Some(context.clone()));
                context
            }
        };

        let mut levels = context.levels.borrow_mut();
        let limit = context.config.max_nesting_depth;
        if levels.len() >= limit {
            log::error!(
                "Work context {} cannot nest beyond {} levels",
                context.id,
                limit
            );
            let abandoned = levels.is_empty();
            drop(levels);
            if abandoned {
                Self::dispose();
            }
            return Err(WorkError::NestingTooDeep { limit });
        }

        levels.push(EventBuffer::new());
        let depth = levels.len();
        log::trace!("Entered level {} of work context {}", depth, context.id);

        Ok(ScopeToken {
            context_id: context.id,
            depth,
            _not_send: PhantomData,
        })
    }

    /// Leave the level named by `token`
    pub fn exit(token: ScopeToken, succeeded: bool) -> Result<ExitOutcome> {
        let context = Self::current().ok_or_else(|| {
            log::error!("Scope exited with no ambient work context");
            WorkError::NoAmbientContext("exit called outside any work scope".to_string())
        })?;

        if token.context_id != context.id {
            log::error!(
                "Scope token for context {} exited in context {}",
                token.context_id,
                context.id
            );
            return Err(WorkError::ForeignScope);
        }

        let top = context.depth();
        if top != token.depth {
            log::error!(
                "Work context {} exited level {} while level {} is on top, abandoning it",
                context.id,
                token.depth,
                top
            );
            Self::dispose();
            context.abandon();
            return Err(WorkError::OutOfOrderExit {
                expected: top,
                actual: token.depth,
            });
        }

        let buffer = match context.levels.borrow_mut().pop() {
            Some(buffer) => buffer,
            None => {
                return Err(WorkError::NoAmbientContext(
                    "work context has no open levels".to_string(),
                ))
            }
        };

        if token.depth > 1 {
            return Ok(context.exit_nested(buffer, succeeded));
        }

        Self::dispose();
        context.complete(buffer, succeeded)
    }

    /// Add `unit` to the ambient context's flush set.
    /// Returns false if the same unit was already enlisted.
    pub fn enlist(unit: Arc<dyn EnlistedUnit>) -> Result<bool> {
        let context = Self::require("enlist")?;
        let added = context.controller.borrow_mut().enlist(unit);
        Ok(added)
    }

    /// Validate `event` and buffer it in the innermost level for `bus`
    pub fn publish(bus: Arc<dyn EventBus>, event: Box<dyn Event>) -> Result<()> {
        let context = Self::require("publish")?;
        let mut levels = context.levels.borrow_mut();
        match levels.last_mut() {
            Some(level) => level.push(bus, event),
            None => Err(WorkError::NoAmbientContext(
                "work context has no open levels".to_string(),
            )),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Number of open levels
    pub fn depth(&self) -> usize {
        self.levels.borrow().len()
    }

    /// Buffered events across every open level
    pub fn pending_events(&self) -> usize {
        self.levels.borrow().iter().map(EventBuffer::len).sum()
    }

    /// Buffered event types of the innermost level
    pub fn pending_event_types(&self) -> Vec<String> {
        self.levels
            .borrow()
            .last()
            .map(EventBuffer::event_types)
            .unwrap_or_default()
    }

    /// Enlisted units, counting each group member
    pub fn enlisted_count(&self) -> usize {
        self.controller.borrow().unit_count()
    }

    /// Store a scratch value for the rest of this context's lifetime
    pub fn set_item<T>(&self, key: impl Into<String>, value: T)
    where
        T: Any + Send + Sync,
    {
        let value: ItemValue = Arc::new(value);
        self.items.put(key.into(), value, &CachePolicy::default());
    }

    /// Scratch value stored under `key`, if it has type `T`
    pub fn item<T>(&self, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.items
            .get(&key.to_string())
            .and_then(|value| value.downcast::<T>().ok())
    }

    pub fn remove_item(&self, key: &str) {
        self.items.remove(key.to_string());
    }

    fn require(operation: &str) -> Result<Rc<WorkContext>> {
        Self::current().ok_or_else(|| {
            log::error!("{} called with no ambient work context", operation);
            WorkError::NoAmbientContext(format!("{} requires an active work scope", operation))
        })
    }

    fn dispose() {
        CURRENT_CONTEXT.with(|current| current.borrow_mut().take());
    }

    /// Drop every level and unit; the context is already detached
    fn abandon(&self) {
        let events: usize = self
            .levels
            .borrow_mut()
            .drain(..)
            .map(|mut level| level.discard())
            .sum();
        let mut controller = self.controller.borrow_mut();
        let units = controller.unit_count();
        controller.discard();
        drop(controller);
        self.items.clear();
        log::warn!(
            "Work context {} abandoned, discarded {} event(s) and {} unit(s)",
            self.id,
            events,
            units
        );
    }

    fn exit_nested(&self, mut buffer: EventBuffer, succeeded: bool) -> ExitOutcome {
        let events = buffer.len();
        if succeeded {
            let mut levels = self.levels.borrow_mut();
            if let Some(parent) = levels.last_mut() {
                parent.append(buffer);
            }
            log::trace!("Merged {} event(s) into parent level of {}", events, self.id);
            ExitOutcome::Merged { events }
        } else {
            buffer.discard();
            log::debug!(
                "Nested level of work context {} failed, discarded {} event(s)",
                self.id,
                events
            );
            ExitOutcome::Discarded { events, units: 0 }
        }
    }

    fn complete(&self, mut buffer: EventBuffer, succeeded: bool) -> Result<ExitOutcome> {
        let mut controller = std::mem::take(&mut *self.controller.borrow_mut());
        self.items.clear();

        if !succeeded {
            let events = buffer.discard();
            let units = controller.unit_count();
            controller.discard();
            log::debug!(
                "Work context {} failed, discarded {} event(s) and {} unit(s)",
                self.id,
                events,
                units
            );
            return Ok(ExitOutcome::Discarded { events, units });
        }

        let report = match controller.flush() {
            Ok(report) => report,
            Err(e) => {
                let dropped = buffer.discard();
                log::warn!(
                    "Work context {} flush failed, {} event(s) not published",
                    self.id,
                    dropped
                );
                return Err(e);
            }
        };

        let published = buffer.publish_all()?;
        log::debug!(
            "Work context {} completed: {} unit(s) flushed, {} event(s) published",
            self.id,
            report.flushed.len(),
            published
        );
        Ok(ExitOutcome::Completed { report, published })
    }
}

impl std::fmt::Debug for WorkContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkContext")
            .field("id", &self.id)
            .field("depth", &self.depth())
            .field("pending_events", &self.pending_events())
            .field("enlisted", &self.enlisted_count())
            .finish()
    }
}
