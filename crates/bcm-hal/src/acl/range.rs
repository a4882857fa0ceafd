//! ACL range checkers.
//!
//! Range checkers are a small shared hardware table: entries qualifying on
//! the same L4 port or packet length range share one checker.

use std::sync::Arc;

use bcm_hal_common::RefCountMap;
use bcm_sdk::api::RangeSpec;
use bcm_sdk::{AclRangeHandle, FieldRangeKind};

use crate::error::{HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::warm_boot::WarmBootCache;
use crate::debug_log;

const SOURCE: &str = "AclRangeTable";

#[derive(Debug)]
pub struct AclRange {
    range: Owned<FieldRangeKind>,
    spec: RangeSpec,
}

impl AclRange {
    pub fn handle(&self) -> AclRangeHandle {
        self.range.handle()
    }

    pub fn spec(&self) -> &RangeSpec {
        &self.spec
    }
}

pub struct AclRangeTable {
    ctx: Arc<HwContext>,
    ranges: RefCountMap<RangeSpec, AclRange>,
}

impl AclRangeTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            ranges: RefCountMap::new(),
        }
    }

    /// Takes a reference on the checker for `spec`. A new checker adopts
    /// the one left in hardware by the previous run when there is one.
    pub fn inc_ref_or_create(
        &mut self,
        spec: &RangeSpec,
        cache: &mut WarmBootCache,
    ) -> HalResult<AclRangeHandle> {
        let ctx = &self.ctx;
        let (range, refs) = self.ranges.inc_ref_or_create(*spec, || {
            let handle = match cache.find_range(spec) {
                Some(handle) => {
                    cache.programmed_range(spec);
                    handle
                }
                None => ctx
                    .sdk()
                    .range_create(spec)
                    .map_err(|e| HalError::from_bcm("acl range", e))?,
            };
            Ok::<_, HalError>(AclRange {
                range: Owned::new(ctx.clone(), handle, "acl range", |sdk, h| {
                    sdk.range_destroy(h)
                }),
                spec: *spec,
            })
        })?;
        debug_log!(SOURCE, range = %range.handle(), refs, "referenced range {:?}", spec);
        Ok(range.handle())
    }

    pub fn deref(&mut self, spec: &RangeSpec) -> HalResult<()> {
        self.ranges
            .deref(spec)
            .map(drop)
            .map_err(|e| HalError::refcount("acl range", format!("{:?}", spec), e))
    }

    pub fn range(&self, spec: &RangeSpec) -> Option<&AclRange> {
        self.ranges.get(spec)
    }

    pub fn range_ref_count(&self, spec: &RangeSpec) -> Option<u32> {
        self.ranges.ref_count(spec)
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}
