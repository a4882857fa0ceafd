//! TeFlow entries by flow key.

use std::collections::BTreeMap;
use std::sync::Arc;

use super::entry::TeFlowEntry;
use super::stat::TeFlowStatTable;
use crate::capabilities::StatTableAccess;
use crate::error::{HalError, HalResult};
use crate::hw::HwContext;
use crate::nexthop::MultiPathNextHopTable;
use crate::state::{TeFlowEntryState, TeFlowKey};
use crate::warm_boot::{TeFlowGroupState, WarmBootCache};
use crate::{debug_log, info_log};

const SOURCE: &str = "TeFlowTable";

/// What TeFlow entries reach outside the TeFlow table.
pub struct TeFlowDeps<'a> {
    pub cache: &'a mut WarmBootCache,
    pub next_hops: &'a mut MultiPathNextHopTable,
    pub stat_access: &'a mut dyn StatTableAccess,
}

pub struct TeFlowTable {
    ctx: Arc<HwContext>,
    group: TeFlowGroupState,
    entries: BTreeMap<TeFlowKey, TeFlowEntry>,
    stats: TeFlowStatTable,
}

impl TeFlowTable {
    /// `group` comes from the warm-boot state when there is one, so a
    /// restarted agent keeps matching on the prefix length the exact-match
    /// group was created with.
    pub fn new(ctx: Arc<HwContext>, group: TeFlowGroupState) -> Self {
        info_log!(
            SOURCE,
            dst_prefix_length = group.dst_prefix_length,
            hint_id = group.hint_id,
            "teflow group"
        );
        Self {
            stats: TeFlowStatTable::new(ctx.clone()),
            ctx,
            group,
            entries: BTreeMap::new(),
        }
    }

    fn check_prefix(&self, state: &TeFlowEntryState) -> HalResult<()> {
        if state.flow.dst_prefix.len != self.group.dst_prefix_length {
            return Err(HalError::InvalidConfig(format!(
                "teflow {} prefix length must be {}",
                state.flow, self.group.dst_prefix_length
            )));
        }
        Ok(())
    }

    pub fn process_added(
        &mut self,
        state: &Arc<TeFlowEntryState>,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<()> {
        self.check_prefix(state)?;
        if self.entries.contains_key(&state.flow) {
            return Err(HalError::exists("teflow", state.flow));
        }
        let entry = TeFlowEntry::new(self.ctx.clone(), state.clone(), &mut self.stats, deps)?;
        debug_log!(SOURCE, flow = %state.flow, handle = %entry.handle(), "added teflow");
        self.entries.insert(state.flow, entry);
        Ok(())
    }

    pub fn process_removed(
        &mut self,
        state: &Arc<TeFlowEntryState>,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<()> {
        let entry = self
            .entries
            .remove(&state.flow)
            .ok_or_else(|| HalError::not_found("teflow", state.flow))?;
        entry.remove(&mut self.stats, deps);
        Ok(())
    }

    /// Updates the entry in place; the hardware entry is kept.
    pub fn process_changed(
        &mut self,
        old: &Arc<TeFlowEntryState>,
        new: &Arc<TeFlowEntryState>,
        deps: &mut TeFlowDeps<'_>,
    ) -> HalResult<()> {
        self.check_prefix(new)?;
        let entry = self
            .entries
            .get_mut(&old.flow)
            .ok_or_else(|| HalError::not_found("teflow", old.flow))?;
        entry.update(new.clone(), &mut self.stats, deps)
    }

    pub fn entry(&self, key: &TeFlowKey) -> Option<&TeFlowEntry> {
        self.entries.get(key)
    }

    pub fn group_state(&self) -> TeFlowGroupState {
        self.group
    }

    pub fn stat_ref_count(&self, counter_id: &str) -> Option<u32> {
        self.stats.ref_count(counter_id)
    }

    pub fn stat_count(&self) -> usize {
        self.stats.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn states(&self) -> BTreeMap<TeFlowKey, Arc<TeFlowEntryState>> {
        self.entries
            .iter()
            .map(|(key, entry)| (*key, entry.state().clone()))
            .collect()
    }
}
