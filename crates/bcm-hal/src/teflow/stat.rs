//! Flex counters of TeFlow entries, shared by counter id.

use std::sync::Arc;

use bcm_hal_common::RefCountMap;
use bcm_sdk::api::StatType;
use bcm_sdk::{FlexCounterKind, TeFlowStatHandle};

use crate::capabilities::StatTableAccess;
use crate::error::{fatal, HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::debug_log;

const SOURCE: &str = "TeFlowStatTable";

/// Every TeFlow counter counts packets and bytes.
pub const TEFLOW_STAT_TYPES: [StatType; 2] = [StatType::Packets, StatType::Bytes];

#[derive(Debug)]
pub struct TeFlowStat {
    counter: Owned<FlexCounterKind>,
}

impl TeFlowStat {
    fn adopt(ctx: &Arc<HwContext>, handle: TeFlowStatHandle) -> Self {
        Self {
            counter: Owned::new(ctx.clone(), handle, "teflow stat", |sdk, h| {
                sdk.flexctr_destroy(h)
            }),
        }
    }

    pub fn handle(&self) -> TeFlowStatHandle {
        self.counter.handle()
    }
}

pub struct TeFlowStatTable {
    ctx: Arc<HwContext>,
    stats: RefCountMap<String, TeFlowStat>,
}

impl TeFlowStatTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            stats: RefCountMap::new(),
        }
    }

    pub fn inc_ref_or_create(
        &mut self,
        counter_id: &str,
        stat_access: &mut dyn StatTableAccess,
    ) -> HalResult<TeFlowStatHandle> {
        let ctx = &self.ctx;
        let (stat, refs) = self.stats.inc_ref_or_create(counter_id.to_string(), || {
            let handle = ctx
                .sdk()
                .flexctr_create(ctx.config().teflow_group_id, &TEFLOW_STAT_TYPES)
                .map_err(|e| HalError::from_bcm("teflow stat", e))?;
            Ok::<_, HalError>(TeFlowStat::adopt(ctx, handle))
        })?;
        let handle = stat.handle();
        if refs == 1 {
            stat_access.to_be_added_teflow_stat(handle, counter_id, &TEFLOW_STAT_TYPES);
        }
        debug_log!(SOURCE, stat = %handle, refs, "referenced teflow stat {}", counter_id);
        Ok(handle)
    }

    /// Like [`inc_ref_or_create`](Self::inc_ref_or_create), adopting the
    /// counter an entry had attached before a warm boot.
    pub fn inc_ref_or_adopt(
        &mut self,
        counter_id: &str,
        existing: TeFlowStatHandle,
        stat_access: &mut dyn StatTableAccess,
    ) -> HalResult<TeFlowStatHandle> {
        let ctx = &self.ctx;
        let (stat, refs) = self.stats.inc_ref_or_create(counter_id.to_string(), || {
            Ok::<_, HalError>(TeFlowStat::adopt(ctx, existing))
        })?;
        let handle = stat.handle();
        if handle != existing {
            fatal(
                SOURCE,
                format!(
                    "teflow stat {} is {} but an entry still has {} attached",
                    counter_id, handle, existing
                ),
            );
        }
        if refs == 1 {
            stat_access.to_be_added_teflow_stat(handle, counter_id, &TEFLOW_STAT_TYPES);
        }
        Ok(handle)
    }

    pub fn deref(
        &mut self,
        counter_id: &str,
        stat_access: &mut dyn StatTableAccess,
    ) -> HalResult<()> {
        let released = self
            .stats
            .deref(&counter_id.to_string())
            .map_err(|e| HalError::refcount("teflow stat", counter_id, e))?;
        if let Some(stat) = released {
            stat_access.to_be_removed_teflow_stat(stat.handle());
        }
        Ok(())
    }

    pub fn stat(&self, counter_id: &str) -> Option<&TeFlowStat> {
        self.stats.get(&counter_id.to_string())
    }

    pub fn ref_count(&self, counter_id: &str) -> Option<u32> {
        self.stats.ref_count(&counter_id.to_string())
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }
}
