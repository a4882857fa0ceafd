//! Multipath next hops used by redirect actions.
//!
//! Redirects to the same set of next hops share one ECMP egress. An empty
//! set redirects to the SDK's drop egress, which the agent never creates or
//! destroys.

use std::collections::BTreeSet;
use std::sync::Arc;

use bcm_hal_common::RefCountMap;
use bcm_sdk::api::EgressPath;
use bcm_sdk::{EgressId, EgressKind};

use crate::error::{HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::state::NextHop;
use crate::warm_boot::WarmBootCache;
use crate::debug_log;

const SOURCE: &str = "MultiPathNextHopTable";

#[derive(Debug)]
pub enum MultiPathNextHop {
    Drop(EgressId),
    Ecmp(Owned<EgressKind>),
}

impl MultiPathNextHop {
    pub fn egress_id(&self) -> EgressId {
        match self {
            MultiPathNextHop::Drop(egress) => *egress,
            MultiPathNextHop::Ecmp(egress) => egress.handle(),
        }
    }
}

pub fn egress_paths<'a>(next_hops: impl IntoIterator<Item = &'a NextHop>) -> BTreeSet<EgressPath> {
    next_hops.into_iter().map(|nh| EgressPath::from(*nh)).collect()
}

pub struct MultiPathNextHopTable {
    ctx: Arc<HwContext>,
    next_hops: RefCountMap<BTreeSet<EgressPath>, MultiPathNextHop>,
}

impl MultiPathNextHopTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            next_hops: RefCountMap::new(),
        }
    }

    pub fn inc_ref_or_create(
        &mut self,
        paths: &BTreeSet<EgressPath>,
        cache: &mut WarmBootCache,
    ) -> HalResult<EgressId> {
        let ctx = &self.ctx;
        let (next_hop, refs) = self.next_hops.inc_ref_or_create(paths.clone(), || {
            if paths.is_empty() {
                return Ok(MultiPathNextHop::Drop(ctx.sdk().drop_egress_id()));
            }
            let egress = match cache.find_egress(paths) {
                Some(egress) => {
                    cache.programmed_egress(paths);
                    egress
                }
                None => {
                    let paths: Vec<_> = paths.iter().copied().collect();
                    ctx.sdk()
                        .egress_create(&paths)
                        .map_err(|e| HalError::from_bcm("egress", e))?
                }
            };
            Ok::<_, HalError>(MultiPathNextHop::Ecmp(Owned::new(
                ctx.clone(),
                egress,
                "egress",
                |sdk, h| sdk.egress_destroy(h),
            )))
        })?;
        let egress = next_hop.egress_id();
        debug_log!(SOURCE, egress = %egress, refs, "referenced {} paths", paths.len());
        Ok(egress)
    }

    pub fn deref(&mut self, paths: &BTreeSet<EgressPath>) -> HalResult<()> {
        self.next_hops
            .deref(paths)
            .map(drop)
            .map_err(|e| HalError::refcount("next hop", format!("{} paths", paths.len()), e))
    }

    pub fn ref_count(&self, paths: &BTreeSet<EgressPath>) -> Option<u32> {
        self.next_hops.ref_count(paths)
    }

    pub fn len(&self) -> usize {
        self.next_hops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.next_hops.is_empty()
    }
}
