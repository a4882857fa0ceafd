//! Hardware counter export.
//!
//! Two execution contexts touch the counters:
//!
//! - the state-update path, which only *queues* stat additions and removals
//!   in a [`StatChangeQueue`] while a delta is applied and hands the queue to
//!   [`StatUpdater::refresh`] once per batch;
//! - the poller ([`spawn_stat_poller`]), which reads every known counter
//!   from hardware under the updater's read lock.
//!
//! Only `refresh` changes the set of known counters, so the poller never
//! sees a half-applied batch.

mod counter;
mod poller;
mod updater;

use bcm_sdk::api::StatType;
use bcm_sdk::{AclStatHandle, TeFlowStatHandle};
use std::fmt;

use crate::capabilities::StatTableAccess;

pub use counter::MonotonicCounter;
pub use poller::spawn_stat_poller;
pub use updater::StatUpdater;

/// Hardware counter object a set of counters is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatKey {
    Acl(AclStatHandle),
    TeFlow(TeFlowStatHandle),
}

impl From<AclStatHandle> for StatKey {
    fn from(handle: AclStatHandle) -> Self {
        StatKey::Acl(handle)
    }
}

impl From<TeFlowStatHandle> for StatKey {
    fn from(handle: TeFlowStatHandle) -> Self {
        StatKey::TeFlow(handle)
    }
}

impl fmt::Display for StatKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatKey::Acl(handle) => write!(f, "acl stat {}", handle),
            StatKey::TeFlow(handle) => write!(f, "teflow stat {}", handle),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingStat {
    pub key: StatKey,
    pub name: String,
    pub types: Vec<StatType>,
}

/// Stat changes requested while one state delta is applied.
#[derive(Debug, Default)]
pub struct StatChangeQueue {
    additions: Vec<PendingStat>,
    removals: Vec<StatKey>,
}

impl StatChangeQueue {
    fn add(&mut self, key: StatKey, name: &str, types: &[StatType]) {
        self.additions.push(PendingStat {
            key,
            name: name.to_string(),
            types: types.to_vec(),
        });
    }

    fn remove(&mut self, key: StatKey) {
        // A stat created and released within the same batch never reaches
        // the updater.
        if let Some(pos) = self.additions.iter().position(|p| p.key == key) {
            self.additions.remove(pos);
            return;
        }
        self.removals.push(key);
    }

    pub fn is_empty(&self) -> bool {
        self.additions.is_empty() && self.removals.is_empty()
    }

    pub fn pending_acl_additions(&self) -> usize {
        self.additions
            .iter()
            .filter(|p| matches!(p.key, StatKey::Acl(_)))
            .count()
    }

    pub fn pending_removals(&self) -> usize {
        self.removals.len()
    }

    pub(crate) fn removals(&self) -> &[StatKey] {
        &self.removals
    }

    pub(crate) fn additions(&self) -> &[PendingStat] {
        &self.additions
    }

    pub(crate) fn take(&mut self) -> (Vec<StatKey>, Vec<PendingStat>) {
        (
            std::mem::take(&mut self.removals),
            std::mem::take(&mut self.additions),
        )
    }
}

impl StatTableAccess for StatChangeQueue {
    fn to_be_added_acl_stat(&mut self, handle: AclStatHandle, name: &str, types: &[StatType]) {
        self.add(handle.into(), name, types);
    }

    fn to_be_removed_acl_stat(&mut self, handle: AclStatHandle) {
        self.remove(handle.into());
    }

    fn to_be_added_teflow_stat(&mut self, handle: TeFlowStatHandle, name: &str, types: &[StatType]) {
        self.add(handle.into(), name, types);
    }

    fn to_be_removed_teflow_stat(&mut self, handle: TeFlowStatHandle) {
        self.remove(handle.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcm_sdk::Handle;

    #[test]
    fn test_removal_cancels_pending_addition() {
        let mut queue = StatChangeQueue::default();
        let stat = Handle::from_raw_unchecked(3);
        queue.to_be_added_acl_stat(stat, "stat0", &[StatType::Packets]);
        queue.to_be_removed_acl_stat(stat);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_removal_then_readd_keeps_both() {
        let mut queue = StatChangeQueue::default();
        let stat = Handle::from_raw_unchecked(3);
        queue.to_be_removed_acl_stat(stat);
        queue.to_be_added_acl_stat(stat, "stat1", &[StatType::Bytes]);
        assert_eq!(queue.pending_removals(), 1);
        assert_eq!(queue.pending_acl_additions(), 1);
    }
}
