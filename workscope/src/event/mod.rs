// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Buffered event publication
//!
//! Events published inside a work scope are validated, tagged with their
//! target bus and held in an [`EventBuffer`] until the scope succeeds.

use std::fmt::Debug;
use std::sync::Arc;

use crate::error::{Result, ValidationError, WorkError};

/// A message delivered to subscribers of an [`EventBus`]
pub trait Event: Debug + Send + 'static {
    /// Name used for routing and logs
    fn event_type(&self) -> &str;

    /// Reject malformed events before they are buffered
    fn validate(&self) -> std::result::Result<(), ValidationError> {
        Ok(())
    }
}

/// Delivery target for published events
pub trait EventBus: Send + Sync {
    fn publish(&self, event: Box<dyn Event>) -> Result<()>;

    fn name(&self) -> &str {
        "bus"
    }
}

struct BufferedEvent {
    bus: Arc<dyn EventBus>,
    event: Box<dyn Event>,
}

/// Ordered, not-yet-published events of one scope level
#[derive(Default)]
pub struct EventBuffer {
    events: Vec<BufferedEvent>,
}

impl EventBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate `event` and queue it for `bus`. An invalid event is never buffered.
    pub fn push(&mut self, bus: Arc<dyn EventBus>, event: Box<dyn Event>) -> Result<()> {
        if let Err(e) = event.validate() {
            log::warn!("Rejected {} event: {}", event.event_type(), e);
            return Err(WorkError::Validation(e));
        }
        log::trace!("Buffered {} event for '{}'", event.event_type(), bus.name());
        self.events.push(BufferedEvent { bus, event });
        Ok(())
    }

    /// Move every event of `child` after the events already buffered here
    pub fn append(&mut self, mut child: EventBuffer) {
        self.events.append(&mut child.events);
    }

    /// Drop every buffered event unpublished; returns how many were dropped
    pub fn discard(&mut self) -> usize {
        let count = self.events.len();
        self.events.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Buffered event types in publish order
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .iter()
            .map(|buffered| buffered.event.event_type().to_string())
            .collect()
    }

    /// Publish in FIFO order, stopping at the first bus error
    ///
    /// Events after a failed one are dropped. Returns the number published.
    pub fn publish_all(self) -> Result<usize> {
        let total = self.events.len();
        let mut published = 0;
        for BufferedEvent { bus, event } in self.events {
            let event_type = event.event_type().to_string();
            if let Err(e) = bus.publish(event) {
                log::error!(
                    "Publishing {} to '{}' failed after {} of {} event(s): {}",
                    event_type,
                    bus.name(),
                    published,
                    total,
                    e
                );
                return Err(match e {
                    WorkError::PublishFailed(_) => e,
                    other => WorkError::PublishFailed(format!("{}: {}", event_type, other)),
                });
            }
            published += 1;
        }
        if published > 0 {
            log::debug!("Published {} buffered event(s)", published);
        }
        Ok(published)
    }
}

impl std::fmt::Debug for EventBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBuffer")
            .field("events", &self.event_types())
            .finish()
    }
}
