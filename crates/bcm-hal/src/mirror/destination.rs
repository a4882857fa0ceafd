//! Mirror destinations.

use std::sync::Arc;

use bcm_sdk::api::mirror::MIRROR_DEST_TUNNEL_SFLOW;
use bcm_sdk::api::MirrorDestination;
use bcm_sdk::{port_gport, MirrorDestKind, MirrorHandle};

use crate::audit::{AuditCategory, AuditOutcome, AuditRecord};
use crate::error::{HalError, HalResult};
use crate::hw::{HwContext, Owned};
use crate::state::MirrorState;
use crate::warm_boot::WarmBootCache;
use crate::{audit_log, debug_log};

const SOURCE: &str = "MirrorDestination";

/// A programmed mirror destination: where mirrored copies leave the switch.
#[derive(Debug)]
pub struct MirrorDest {
    dest: Owned<MirrorDestKind>,
    flags: u32,
}

impl MirrorDest {
    /// Programs the destination of a resolved mirror, adopting the one the
    /// previous run left for the same egress port and tunnel.
    pub fn program(
        ctx: &Arc<HwContext>,
        state: &MirrorState,
        egress_port: bcm_sdk::PortId,
        cache: &mut WarmBootCache,
    ) -> HalResult<Self> {
        let dest = MirrorDestination {
            gport: port_gport(egress_port),
            tunnel: state.tunnel.clone(),
            dscp: state.dscp,
            truncate: state.truncate,
        };
        let flags = dest.flags();

        let handle = match cache.find_mirror(dest.gport, &dest.tunnel) {
            Some(handle) => {
                cache.programmed_mirror(dest.gport, &dest.tunnel);
                debug_log!(
                    SOURCE,
                    handle = %handle,
                    "found mirror {} in warm boot cache",
                    state.name
                );
                handle
            }
            None => {
                let handle = ctx
                    .sdk()
                    .mirror_destination_create(&dest)
                    .map_err(|e| HalError::from_bcm("mirror destination", e))?;
                audit_log!(AuditRecord::new(AuditCategory::ResourceCreate, SOURCE, "create")
                    .with_outcome(AuditOutcome::Success)
                    .with_object_type("mirror_destination")
                    .with_object_id(format!("{} ({})", handle, state.name)));
                handle
            }
        };

        Ok(Self {
            dest: Owned::new(ctx.clone(), handle, "mirror destination", |sdk, h| {
                sdk.mirror_destination_destroy(h)
            }),
            flags,
        })
    }

    pub fn handle(&self) -> MirrorHandle {
        self.dest.handle()
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    /// sFlow destinations are bound to all sampled ports at once.
    pub fn is_sflow(&self) -> bool {
        self.flags & MIRROR_DEST_TUNNEL_SFLOW != 0
    }
}
