// Copyright (c) 2024-2025 DeepGraph Inc.
// SPDX-License-Identifier: Apache-2.0
//
//! Composite unit for members sharing a flush group

use std::sync::Arc;

use super::{same_unit, EnlistedUnit, FlushGroupId};
use crate::error::Result;

/// Two or more units flushed as a single step
///
/// Members flush in enlistment order. A member failure stops the group and
/// leaves earlier members flushed.
pub struct UnitGroup {
    id: FlushGroupId,
    members: Vec<Arc<dyn EnlistedUnit>>,
}

impl UnitGroup {
    pub fn new(id: FlushGroupId, first: Arc<dyn EnlistedUnit>) -> Self {
        Self {
            id,
            members: vec![first],
        }
    }

    pub fn id(&self) -> FlushGroupId {
        self.id
    }

    /// Append a member; a unit already in the group is ignored
    pub fn push(&mut self, unit: Arc<dyn EnlistedUnit>) -> bool {
        if self.contains(&unit) {
            return false;
        }
        self.members.push(unit);
        true
    }

    pub fn contains(&self, unit: &Arc<dyn EnlistedUnit>) -> bool {
        self.members.iter().any(|member| same_unit(member, unit))
    }

    pub fn members(&self) -> &[Arc<dyn EnlistedUnit>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Members that require a flush right now, in enlistment order
    pub(crate) fn collect(&self) -> Vec<Arc<dyn EnlistedUnit>> {
        self.members
            .iter()
            .filter(|member| {
                let required = member.requires_flush();
                if !required {
                    log::trace!("{} member '{}' has nothing to flush", self.id, member.name());
                }
                required
            })
            .cloned()
            .collect()
    }

    /// Flush `collected` in order, stopping at the first failure
    pub(crate) fn flush_collected(&self, collected: &[Arc<dyn EnlistedUnit>]) -> Result<()> {
        for member in collected {
            log::debug!("Flushing {} member '{}'", self.id, member.name());
            member.flush()?;
        }
        Ok(())
    }
}

impl EnlistedUnit for UnitGroup {
    fn flush_group_id(&self) -> Option<FlushGroupId> {
        Some(self.id)
    }

    fn can_flush_asynchronously(&self) -> bool {
        self.members
            .iter()
            .all(|member| member.can_flush_asynchronously())
    }

    fn requires_flush(&self) -> bool {
        self.members.iter().any(|member| member.requires_flush())
    }

    fn flush(&self) -> Result<()> {
        let collected = self.collect();
        self.flush_collected(&collected)
    }

    fn name(&self) -> String {
        let names: Vec<String> = self.members.iter().map(|member| member.name()).collect();
        format!("{}[{}]", self.id, names.join(", "))
    }
}

impl std::fmt::Debug for UnitGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitGroup")
            .field("id", &self.id)
            .field("members", &self.members.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkError;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Member {
        name: &'static str,
        dirty: AtomicBool,
        fail: bool,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Member {
        fn new(name: &'static str, dirty: bool, log: &Arc<Mutex<Vec<&'static str>>>) -> Arc<Self> {
            Arc::new(Self {
                name,
                dirty: AtomicBool::new(dirty),
                fail: false,
                log: log.clone(),
            })
        }
    }

    impl EnlistedUnit for Member {
        fn flush_group_id(&self) -> Option<FlushGroupId> {
            Some(FlushGroupId(1))
        }

        fn requires_flush(&self) -> bool {
            self.dirty.load(Ordering::SeqCst)
        }

        fn flush(&self) -> Result<()> {
            if self.fail {
                return Err(WorkError::FlushFailed {
                    unit: self.name.to_string(),
                    message: "disk full".to_string(),
                });
            }
            self.log.lock().push(self.name);
            self.dirty.store(false, Ordering::SeqCst);
            Ok(())
        }

        fn name(&self) -> String {
            self.name.to_string()
        }
    }

    #[test]
    fn test_members_flush_in_enlistment_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut group = UnitGroup::new(FlushGroupId(1), Member::new("a", true, &log));
        group.push(Member::new("b", false, &log));
        group.push(Member::new("c", true, &log));

        assert!(group.requires_flush());
        group.flush().unwrap();
        assert_eq!(*log.lock(), vec!["a", "c"]);
        assert!(!group.requires_flush());
        assert_eq!(group.name(), "group_1[a, b, c]");
    }

    #[test]
    fn test_duplicate_member_ignored() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let member: Arc<dyn EnlistedUnit> = Member::new("a", true, &log);
        let mut group = UnitGroup::new(FlushGroupId(1), member.clone());
        assert!(!group.push(member));
        assert_eq!(group.len(), 1);
    }

    #[test]
    fn test_member_failure_stops_group() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let failing = Arc::new(Member {
            name: "bad",
            dirty: AtomicBool::new(true),
            fail: true,
            log: log.clone(),
        });
        let mut group = UnitGroup::new(FlushGroupId(1), Member::new("a", true, &log));
        group.push(failing);
        group.push(Member::new("c", true, &log));

        assert!(matches!(group.flush(), Err(WorkError::FlushFailed { .. })));
        assert_eq!(*log.lock(), vec!["a"]);
    }
}
