//! ACL entries by priority, with the stats and ranges they share.

use std::collections::BTreeMap;
use std::sync::Arc;

use bcm_sdk::api::RangeSpec;
use bcm_sdk::AclEntryHandle;

use super::entry::AclEntry;
use super::range::AclRangeTable;
use super::stat::{AclStat, AclStatTable};
use crate::capabilities::{AclMirrorAccess, MirrorTableAccess, StatTableAccess};
use crate::error::{HalError, HalResult};
use crate::hw::HwContext;
use crate::nexthop::MultiPathNextHopTable;
use crate::state::{AclEntryState, MirrorDirection};
use crate::warm_boot::{AclStatRecord, WarmBootCache};
use crate::debug_log;

const SOURCE: &str = "AclTable";

/// What ACL entries reach outside the ACL table.
pub struct AclDeps<'a> {
    pub cache: &'a mut WarmBootCache,
    pub next_hops: &'a mut MultiPathNextHopTable,
    pub stat_access: &'a mut dyn StatTableAccess,
    pub mirrors: &'a dyn MirrorTableAccess,
}

pub struct AclTable {
    ctx: Arc<HwContext>,
    entries: BTreeMap<i32, AclEntry>,
    names: BTreeMap<String, i32>,
    stats: AclStatTable,
    ranges: AclRangeTable,
}

impl AclTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            stats: AclStatTable::new(ctx.clone()),
            ranges: AclRangeTable::new(ctx.clone()),
            ctx,
            entries: BTreeMap::new(),
            names: BTreeMap::new(),
        }
    }

    pub fn process_added(
        &mut self,
        state: &Arc<AclEntryState>,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<()> {
        if self.names.contains_key(&state.name) {
            return Err(HalError::exists("acl", &state.name));
        }
        if let Some(other) = self.entries.get(&state.priority) {
            return Err(HalError::exists(
                "acl priority",
                format!("{} (held by {})", state.priority, other.state().name),
            ));
        }
        let entry = AclEntry::new(
            self.ctx.clone(),
            state.clone(),
            &mut self.stats,
            &mut self.ranges,
            deps,
        )?;
        debug_log!(
            SOURCE,
            priority = state.priority,
            handle = %entry.handle(),
            "added acl {}",
            state.name
        );
        self.names.insert(state.name.clone(), state.priority);
        self.entries.insert(state.priority, entry);
        Ok(())
    }

    pub fn process_removed(
        &mut self,
        state: &Arc<AclEntryState>,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<()> {
        let priority = self
            .names
            .remove(&state.name)
            .ok_or_else(|| HalError::not_found("acl", &state.name))?;
        let entry = self
            .entries
            .remove(&priority)
            .ok_or_else(|| HalError::not_found("acl priority", priority))?;
        entry.remove(&mut self.stats, &mut self.ranges, deps);
        Ok(())
    }

    /// Replaces the entry: the old one is fully released before the new one
    /// is created, so shared stats and ranges are reused, not duplicated.
    pub fn process_changed(
        &mut self,
        old: &Arc<AclEntryState>,
        new: &Arc<AclEntryState>,
        deps: &mut AclDeps<'_>,
    ) -> HalResult<()> {
        self.process_removed(old, deps)?;
        self.process_added(new, deps)
    }

    pub fn entry(&self, priority: i32) -> Option<&AclEntry> {
        self.entries.get(&priority)
    }

    pub fn entry_by_name(&self, name: &str) -> Option<&AclEntry> {
        self.names.get(name).and_then(|p| self.entries.get(p))
    }

    pub fn acl_stat(&self, name: &str) -> Option<&AclStat> {
        self.stats.acl_stat(name)
    }

    pub fn acl_stat_ref_count(&self, name: &str) -> Option<u32> {
        self.stats.ref_count(name)
    }

    pub fn acl_stat_count(&self) -> usize {
        self.stats.len()
    }

    pub fn range_ref_count(&self, spec: &RangeSpec) -> Option<u32> {
        self.ranges.range_ref_count(spec)
    }

    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Stat names to persist for the next warm boot.
    pub fn acl_stat_records(&self) -> BTreeMap<String, AclStatRecord> {
        self.stats
            .iter()
            .map(|(name, stat)| {
                (
                    name.clone(),
                    AclStatRecord {
                        handle: stat.handle(),
                        types: stat.types().to_vec(),
                    },
                )
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn states(&self) -> BTreeMap<String, Arc<AclEntryState>> {
        self.entries
            .values()
            .map(|entry| (entry.state().name.clone(), entry.state().clone()))
            .collect()
    }
}

impl AclMirrorAccess for AclTable {
    fn acl_mirror_users(&self, mirror: &str) -> Vec<(AclEntryHandle, MirrorDirection)> {
        let mut users = Vec::new();
        for entry in self.entries.values() {
            let state = entry.state();
            if state.ingress_mirror() == Some(mirror) {
                users.push((entry.handle(), MirrorDirection::Ingress));
            }
            if state.egress_mirror() == Some(mirror) {
                users.push((entry.handle(), MirrorDirection::Egress));
            }
        }
        users
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use crate::mirror::MirrorTable;
    use crate::state::{MatchAction, TrafficCounter, ValueRange};
    use crate::stats::StatChangeQueue;
    use bcm_sdk::api::{RangeKind, StatType};
    use bcm_sdk::{BcmStatus, FakeSdk};

    struct Fixture {
        sdk: Arc<FakeSdk>,
        table: AclTable,
        cache: WarmBootCache,
        next_hops: MultiPathNextHopTable,
        queue: StatChangeQueue,
        mirrors: MirrorTable,
    }

    impl Fixture {
        fn new() -> Self {
            let sdk = Arc::new(FakeSdk::new());
            let ctx = HwContext::new(sdk.clone(), HalConfig::default());
            let mut cache = WarmBootCache::new(ctx.clone());
            cache.populate(None).unwrap();
            Self {
                sdk,
                table: AclTable::new(ctx.clone()),
                cache,
                next_hops: MultiPathNextHopTable::new(ctx.clone()),
                queue: StatChangeQueue::default(),
                mirrors: MirrorTable::new(ctx),
            }
        }

        fn add(&mut self, acl: AclEntryState) -> HalResult<()> {
            let mut deps = AclDeps {
                cache: &mut self.cache,
                next_hops: &mut self.next_hops,
                stat_access: &mut self.queue,
                mirrors: &self.mirrors,
            };
            self.table.process_added(&Arc::new(acl), &mut deps)
        }

        fn remove(&mut self, acl: AclEntryState) -> HalResult<()> {
            let mut deps = AclDeps {
                cache: &mut self.cache,
                next_hops: &mut self.next_hops,
                stat_access: &mut self.queue,
                mirrors: &self.mirrors,
            };
            self.table.process_removed(&Arc::new(acl), &mut deps)
        }
    }

    fn counted(name: &str, priority: i32, stat: &str) -> AclEntryState {
        AclEntryState {
            action: Some(MatchAction {
                traffic_counter: Some(TrafficCounter::new(stat, vec![StatType::Packets])),
                ..Default::default()
            }),
            ..AclEntryState::new(name, priority)
        }
    }

    #[test]
    fn test_entries_share_ranges() {
        let mut f = Fixture::new();
        let ranged = |name: &str, priority| AclEntryState {
            dst_l4_port_range: Some(ValueRange::new(100, 200)),
            ..AclEntryState::new(name, priority)
        };
        f.add(ranged("acl0", 1)).unwrap();
        f.add(ranged("acl1", 2)).unwrap();

        let spec = RangeSpec {
            kind: RangeKind::DstL4Port,
            min: 100,
            max: 200,
        };
        assert_eq!(f.table.range_ref_count(&spec), Some(2));
        assert_eq!(f.sdk.range_count(), 1);

        f.remove(ranged("acl0", 1)).unwrap();
        f.remove(ranged("acl1", 2)).unwrap();
        assert_eq!(f.sdk.range_count(), 0);
        assert_eq!(f.sdk.entry_count(HalConfig::default().acl_group_id), 0);
    }

    #[test]
    fn test_duplicate_priority_rejected() {
        let mut f = Fixture::new();
        f.add(AclEntryState::new("acl0", 1)).unwrap();
        assert!(matches!(
            f.add(AclEntryState::new("acl1", 1)),
            Err(HalError::ObjectExists { .. })
        ));
        assert_eq!(f.table.len(), 1);
    }

    #[test]
    fn test_failed_install_rolls_back_entry_and_stat() {
        let mut f = Fixture::new();
        f.sdk.fail_next("entry_install", BcmStatus::Internal);

        assert!(f.add(counted("acl0", 1, "stat0")).is_err());
        assert!(f.table.is_empty());
        assert_eq!(f.table.acl_stat_ref_count("stat0"), None);
        assert_eq!(f.sdk.stat_count(), 0);
        assert_eq!(f.sdk.entry_count(HalConfig::default().acl_group_id), 0);
        assert_eq!(f.queue.pending_acl_additions(), 0);
    }

    #[test]
    fn test_stat_records_follow_table() {
        let mut f = Fixture::new();
        f.add(counted("acl0", 1, "stat0")).unwrap();
        let records = f.table.acl_stat_records();
        assert_eq!(records.len(), 1);
        assert_eq!(
            Some(records["stat0"].handle),
            f.table.entry(1).and_then(AclEntry::stat_handle)
        );
    }

    #[test]
    fn test_dropped_table_detaches_stats_first() {
        let mut f = Fixture::new();
        f.add(counted("acl0", 1, "stat0")).unwrap();
        f.add(counted("acl1", 2, "stat0")).unwrap();
        let sdk = f.sdk.clone();
        sdk.clear_calls();

        drop(f);
        assert_eq!(sdk.entry_count(HalConfig::default().acl_group_id), 0);
        assert_eq!(sdk.stat_count(), 0);
        let ops = sdk.ops();
        assert_eq!(ops.iter().filter(|op| **op == "stat_detach").count(), 2);
        let first_destroy = ops.iter().position(|op| *op == "entry_destroy").unwrap();
        let last_detach = ops.iter().rposition(|op| *op == "stat_detach").unwrap();
        let stat_destroy = ops.iter().position(|op| *op == "stat_destroy").unwrap();
        assert!(ops.iter().position(|op| *op == "stat_detach").unwrap() < first_destroy);
        assert!(last_detach < stat_destroy);
    }
}
