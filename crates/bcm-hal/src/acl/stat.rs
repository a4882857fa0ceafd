//! Named ACL stats.
//!
//! Entries naming the same traffic counter share one hardware stat. The
//! table owns the stats and counts the entries attached to each; the stat is
//! destroyed, and its counters dropped from the stat updater, when the last
//! entry lets go of it.

use std::sync::Arc;

use bcm_hal_common::RefCountMap;
use bcm_sdk::api::StatType;
use bcm_sdk::{AclStatHandle, FieldStatKind};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::capabilities::StatTableAccess;
use crate::error::{fatal, HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::warm_boot::WarmBootCache;
use crate::{audit_log, debug_log};

const SOURCE: &str = "AclStatTable";

/// One hardware stat.
#[derive(Debug)]
pub struct AclStat {
    stat: Owned<FieldStatKind>,
    types: Vec<StatType>,
}

impl AclStat {
    fn create(ctx: &Arc<HwContext>, types: &[StatType]) -> HalResult<Self> {
        let handle = ctx
            .sdk()
            .stat_create(ctx.config().acl_group_id, types)
            .map_err(|e| HalError::from_bcm("acl stat", e))?;
        Ok(Self::adopt(ctx, handle, types))
    }

    fn adopt(ctx: &Arc<HwContext>, handle: AclStatHandle, types: &[StatType]) -> Self {
        Self {
            stat: Owned::new(ctx.clone(), handle, "acl stat", |sdk, h| sdk.stat_destroy(h)),
            types: types.to_vec(),
        }
    }

    pub fn handle(&self) -> AclStatHandle {
        self.stat.handle()
    }

    pub fn types(&self) -> &[StatType] {
        &self.types
    }
}

pub struct AclStatTable {
    ctx: Arc<HwContext>,
    stats: RefCountMap<String, AclStat>,
}

impl AclStatTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            stats: RefCountMap::new(),
        }
    }

    /// Takes a reference on the stat `name`, creating it on first use. On
    /// first use after a warm boot the stat the previous run kept under the
    /// same name is adopted instead, so entries adopted later still find
    /// the stat they have attached.
    pub fn inc_ref_or_create(
        &mut self,
        name: &str,
        types: &[StatType],
        cache: &mut WarmBootCache,
        stat_access: &mut dyn StatTableAccess,
    ) -> HalResult<AclStatHandle> {
        let ctx = &self.ctx;
        let mut adopted = false;
        let (stat, refs) = self.stats.inc_ref_or_create(name.to_string(), || {
            let equivalence = ctx.config().asic.stat_equivalence();
            match cache.find_acl_stat_by_name(name) {
                Some(record) if equivalence.matches(&record.types, types) => {
                    let handle = record.handle;
                    cache.programmed_acl_stat_by_name(name);
                    adopted = true;
                    Ok(AclStat::adopt(ctx, handle, types))
                }
                _ => AclStat::create(ctx, types),
            }
        })?;
        let handle = stat.handle();
        if refs == 1 {
            stat_access.to_be_added_acl_stat(handle, name, types);
            if !adopted {
                audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_type("acl_stat")
                    .with_object_id(format!("{} ({})", handle, name)));
            }
        }
        debug_log!(SOURCE, stat = %handle, refs, adopted, "referenced acl stat {}", name);
        Ok(handle)
    }

    /// Takes a reference on the stat `name`, adopting `existing` if the name
    /// has no stat yet. Used when an entry claims the stat it had attached
    /// before a warm boot.
    pub fn inc_ref_or_adopt(
        &mut self,
        name: &str,
        types: &[StatType],
        existing: AclStatHandle,
        stat_access: &mut dyn StatTableAccess,
    ) -> HalResult<AclStatHandle> {
        if let Some(other) = self.holder(existing).filter(|other| *other != name) {
            fatal(
                SOURCE,
                format!(
                    "acl stat {} is already held as {}, cannot adopt it as {}",
                    existing, other, name
                ),
            );
        }
        let ctx = &self.ctx;
        let (stat, refs) = self
            .stats
            .inc_ref_or_create(name.to_string(), || {
                Ok::<_, HalError>(AclStat::adopt(ctx, existing, types))
            })?;
        let handle = stat.handle();
        if handle != existing {
            fatal(
                SOURCE,
                format!(
                    "acl stat {} is {} but an entry still has {} attached",
                    name, handle, existing
                ),
            );
        }
        if refs == 1 {
            stat_access.to_be_added_acl_stat(handle, name, types);
        }
        debug_log!(SOURCE, stat = %handle, refs, "adopted acl stat {}", name);
        Ok(handle)
    }

    /// Drops one reference on `name`, destroying the stat with the last one.
    /// The stat must already be detached from the releasing entry.
    pub fn deref(&mut self, name: &str, stat_access: &mut dyn StatTableAccess) -> HalResult<()> {
        let released = self
            .stats
            .deref(&name.to_string())
            .map_err(|e| HalError::refcount("acl stat", name, e))?;
        if let Some(stat) = released {
            let handle = stat.handle();
            stat_access.to_be_removed_acl_stat(handle);
            drop(stat);
            debug_log!(SOURCE, stat = %handle, "released acl stat {}", name);
        }
        Ok(())
    }

    pub fn acl_stat(&self, name: &str) -> Option<&AclStat> {
        self.stats.get(&name.to_string())
    }

    /// Name the stat `handle` is held under.
    pub fn holder(&self, handle: AclStatHandle) -> Option<&str> {
        self.stats
            .iter()
            .find(|(_, stat)| stat.handle() == handle)
            .map(|(name, _)| name.as_str())
    }

    pub fn ref_count(&self, name: &str) -> Option<u32> {
        self.stats.ref_count(&name.to_string())
    }

    pub fn len(&self) -> usize {
        self.stats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stats.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &AclStat)> {
        self.stats.iter()
    }
}
