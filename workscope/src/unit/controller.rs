// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Ordered, grouped flushing of enlisted units

use std::sync::Arc;

use super::group::UnitGroup;
use super::{same_unit, EnlistedUnit, FlushGroupId};
use crate::error::{Result, WorkError};

enum Enlisted {
    Single(Arc<dyn EnlistedUnit>),
    Group(UnitGroup),
}

impl Enlisted {
    fn unit(&self) -> &dyn EnlistedUnit {
        match self {
            Enlisted::Single(unit) => unit.as_ref(),
            Enlisted::Group(group) => group,
        }
    }

    fn contains(&self, candidate: &Arc<dyn EnlistedUnit>) -> bool {
        match self {
            Enlisted::Single(unit) => same_unit(unit, candidate),
            Enlisted::Group(group) => group.contains(candidate),
        }
    }

    fn member_count(&self) -> usize {
        match self {
            Enlisted::Single(_) => 1,
            Enlisted::Group(group) => group.len(),
        }
    }

    /// Units of this entry that require a flush now; empty when clean
    fn collect(&self) -> Vec<Arc<dyn EnlistedUnit>> {
        match self {
            Enlisted::Single(unit) if unit.requires_flush() => vec![unit.clone()],
            Enlisted::Single(_) => Vec::new(),
            Enlisted::Group(group) => group.collect(),
        }
    }

    fn flush_collected(&self, collected: &[Arc<dyn EnlistedUnit>]) -> Result<()> {
        match self {
            Enlisted::Single(unit) => unit.flush(),
            Enlisted::Group(group) => group.flush_collected(collected),
        }
    }
}

/// Outcome of a successful [`FlushController::flush`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Names of flushed units (groups as one entry), in flush order
    pub flushed: Vec<String>,
    /// Units that reported nothing to flush
    pub skipped: usize,
    /// Flushed units that declared they could flush asynchronously
    pub asynchronous_capable: usize,
}

impl FlushReport {
    pub fn flushed_count(&self) -> usize {
        self.flushed.len()
    }
}

/// Pending units of one work context
///
/// Flush order is the reverse of enlistment order. A group takes the
/// position of its most recently enlisted member.
#[derive(Default)]
pub struct FlushController {
    entries: Vec<Enlisted>,
}

impl FlushController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `unit`, merging it with an enlisted unit of the same flush group.
    /// Returns false if this exact unit is already enlisted.
    pub fn enlist(&mut self, unit: Arc<dyn EnlistedUnit>) -> bool {
        if self.contains(&unit) {
            log::trace!("Unit '{}' already enlisted", unit.name());
            return false;
        }

        let group_id = match unit.flush_group_id() {
            Some(id) => id,
            None => {
                log::debug!("Enlisted unit '{}'", unit.name());
                self.entries.push(Enlisted::Single(unit));
                return true;
            }
        };

        let merged = match self.position_of_group(group_id) {
            Some(position) => match self.entries.remove(position) {
                Enlisted::Single(existing) => {
                    let mut group = UnitGroup::new(group_id, existing);
                    group.push(unit);
                    group
                }
                Enlisted::Group(mut group) => {
                    group.push(unit);
                    group
                }
            },
            None => {
                log::debug!("Enlisted unit '{}' in {}", unit.name(), group_id);
                self.entries.push(Enlisted::Single(unit));
                return true;
            }
        };

        log::debug!(
            "Merged unit into {} ({} members)",
            group_id,
            merged.len()
        );
        self.entries.push(Enlisted::Group(merged));
        true
    }

    pub fn contains(&self, unit: &Arc<dyn EnlistedUnit>) -> bool {
        self.entries.iter().any(|entry| entry.contains(unit))
    }

    /// Number of flush steps after merging
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of enlisted units, counting each group member
    pub fn unit_count(&self) -> usize {
        self.entries.iter().map(Enlisted::member_count).sum()
    }

    /// Flush-step names in enlistment order
    pub fn names(&self) -> Vec<String> {
        self.entries.iter().map(|entry| entry.unit().name()).collect()
    }

    /// Forget every enlisted unit without flushing
    pub fn discard(&mut self) {
        if !self.entries.is_empty() {
            log::debug!("Discarding {} enlisted unit(s)", self.entries.len());
        }
        self.entries.clear();
    }

    /// Flush every unit that requires it, last enlisted first
    ///
    /// Which units and group members require a flush is decided once, before
    /// the first flush runs. The enlisted set is consumed, so each unit is flushed at most once.
    /// The first failure aborts the remaining flushes; units flushed before
    /// it stay flushed.
    pub fn flush(&mut self) -> Result<FlushReport> {
        let entries = std::mem::take(&mut self.entries);

        // Decide the flush set, down to group members, before any unit runs
        let pending: Vec<(Enlisted, Vec<Arc<dyn EnlistedUnit>>)> = entries
            .into_iter()
            .map(|entry| {
                let collected = entry.collect();
                (entry, collected)
            })
            .collect();

        let mut report = FlushReport::default();
        for (entry, collected) in pending.iter().rev() {
            let unit = entry.unit();
            if collected.is_empty() {
                report.skipped += 1;
                log::trace!("Unit '{}' has nothing to flush", unit.name());
                continue;
            }

            let name = unit.name();
            log::debug!("Flushing unit '{}'", name);
            if let Err(e) = entry.flush_collected(collected) {
                log::error!("Flush of unit '{}' failed: {}", name, e);
                return Err(match e {
                    WorkError::FlushFailed { .. } => e,
                    other => WorkError::FlushFailed {
                        unit: name,
                        message: other.to_string(),
                    },
                });
            }
            if unit.can_flush_asynchronously() {
                report.asynchronous_capable += 1;
            }
            report.flushed.push(name);
        }

        log::debug!(
            "Flushed {} unit(s), skipped {}",
            report.flushed.len(),
            report.skipped
        );
        Ok(report)
    }

    fn position_of_group(&self, id: FlushGroupId) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.unit().flush_group_id() == Some(id))
    }
}

impl std::fmt::Debug for FlushController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlushController")
            .field("entries", &self.names())
            .finish()
    }
}
