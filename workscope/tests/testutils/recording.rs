//! Recording implementations of the unit-of-work collaborator traits

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use workscope::unit::{EnlistedUnit, FlushGroupId};
use workscope::{Event, EventBus, Result, ValidationError, WorkError};

/// Ordered log shared by units and buses
#[derive(Debug, Default)]
pub struct Journal {
    entries: Mutex<Vec<String>>,
}

impl Journal {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Entries starting with `prefix`, prefix stripped
    pub fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.entries
            .lock()
            .iter()
            .filter_map(|entry| entry.strip_prefix(prefix).map(str::to_string))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

/// Unit that records `flush:<name>` in the journal when flushed
pub struct RecordingUnit {
    name: String,
    group: Option<i32>,
    dirty: AtomicBool,
    failing: bool,
    asynchronous: bool,
    flushes: AtomicUsize,
    journal: Arc<Journal>,
}

impl RecordingUnit {
    pub fn new(name: &str, journal: &Arc<Journal>) -> Self {
        Self {
            name: name.to_string(),
            group: None,
            dirty: AtomicBool::new(true),
            failing: false,
            asynchronous: false,
            flushes: AtomicUsize::new(0),
            journal: journal.clone(),
        }
    }

    pub fn in_group(mut self, id: i32) -> Self {
        self.group = Some(id);
        self
    }

    /// Reports nothing to flush
    pub fn clean(self) -> Self {
        self.dirty.store(false, Ordering::SeqCst);
        self
    }

    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    pub fn asynchronous(mut self) -> Self {
        self.asynchronous = true;
        self
    }

    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }
}

impl EnlistedUnit for RecordingUnit {
    fn flush_group_id(&self) -> Option<FlushGroupId> {
        self.group.map(FlushGroupId)
    }

    fn can_flush_asynchronously(&self) -> bool {
        self.asynchronous
    }

    fn requires_flush(&self) -> bool {
        self.dirty.load(Ordering::SeqCst)
    }

    fn flush(&self) -> Result<()> {
        if self.failing {
            self.journal.record(format!("failed:{}", self.name));
            return Err(WorkError::FlushFailed {
                unit: self.name.clone(),
                message: "simulated failure".to_string(),
            });
        }
        self.flushes.fetch_add(1, Ordering::SeqCst);
        self.dirty.store(false, Ordering::SeqCst);
        self.journal.record(format!("flush:{}", self.name));
        Ok(())
    }

    fn name(&self) -> String {
        self.name.clone()
    }
}

/// Bus that records `event:<type>` in the journal
pub struct RecordingBus {
    journal: Arc<Journal>,
    fail_on: Option<String>,
}

impl RecordingBus {
    pub fn new(journal: &Arc<Journal>) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            fail_on: None,
        })
    }

    /// Bus that rejects events of type `event_type`
    pub fn failing_on(journal: &Arc<Journal>, event_type: &str) -> Arc<Self> {
        Arc::new(Self {
            journal: journal.clone(),
            fail_on: Some(event_type.to_string()),
        })
    }
}

impl EventBus for RecordingBus {
    fn publish(&self, event: Box<dyn Event>) -> Result<()> {
        if self.fail_on.as_deref() == Some(event.event_type()) {
            return Err(WorkError::PublishFailed(format!(
                "bus rejected {}",
                event.event_type()
            )));
        }
        self.journal.record(format!("event:{}", event.event_type()));
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Event whose validity is chosen by the test
#[derive(Debug, Clone)]
pub struct TestEvent {
    name: String,
    valid: bool,
}

impl TestEvent {
    pub fn new(name: &str) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            valid: true,
        })
    }

    pub fn invalid(name: &str) -> Box<Self> {
        Box::new(Self {
            name: name.to_string(),
            valid: false,
        })
    }
}

impl Event for TestEvent {
    fn event_type(&self) -> &str {
        &self.name
    }

    fn validate(&self) -> std::result::Result<(), ValidationError> {
        if self.valid {
            Ok(())
        } else {
            Err(ValidationError::single("payload", "rejected by test"))
        }
    }
}
