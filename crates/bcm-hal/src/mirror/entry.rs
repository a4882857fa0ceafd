//! One mirror session and the ports and ACL entries mirroring through it.

use std::sync::Arc;

use bcm_sdk::api::mirror::{MIRROR_PORT_EGRESS, MIRROR_PORT_INGRESS, MIRROR_PORT_SFLOW, PORT_INVALID};
use bcm_sdk::api::FieldAction;
use bcm_sdk::{port_gport, AclEntryHandle, Gport, MirrorHandle, PortId};

use super::destination::MirrorDest;
use crate::error::{check_fatal, fatal, HalError, HalResult};
use crate::hw::HwContext;
use crate::state::{MirrorAction, MirrorDirection, MirrorState, SampleDestination};
use crate::warm_boot::WarmBootCache;
use crate::{debug_log, info_log};

const SOURCE: &str = "Mirror";

/// Port mirror flags for `direction`. Ports sampling to the mirror also
/// carry the sFlow flag.
pub fn port_mirror_flags(direction: MirrorDirection, sample_dest: Option<SampleDestination>) -> u32 {
    let mut flags = match direction {
        MirrorDirection::Ingress => MIRROR_PORT_INGRESS,
        MirrorDirection::Egress => MIRROR_PORT_EGRESS,
    };
    if sample_dest == Some(SampleDestination::Mirror) {
        flags |= MIRROR_PORT_SFLOW;
    }
    flags
}

pub fn acl_mirror_action(direction: MirrorDirection, handle: MirrorHandle) -> FieldAction {
    match direction {
        MirrorDirection::Ingress => FieldAction::MirrorIngress(handle),
        MirrorDirection::Egress => FieldAction::MirrorEgress(handle),
    }
}

#[derive(Debug)]
pub struct Mirror {
    ctx: Arc<HwContext>,
    state: Arc<MirrorState>,
    dest: Option<MirrorDest>,
    mirrored_ports: u32,
}

impl Mirror {
    /// Programs the destination when the mirror is resolved. An unresolved
    /// mirror exists in software only and ignores every action.
    pub fn new(
        ctx: Arc<HwContext>,
        state: Arc<MirrorState>,
        cache: &mut WarmBootCache,
    ) -> HalResult<Self> {
        let dest = match state.egress_port {
            Some(port) if state.is_resolved() => {
                Some(MirrorDest::program(&ctx, &state, port, cache)?)
            }
            _ => {
                info_log!(SOURCE, "mirror {} is not resolved, not programming", state.name);
                None
            }
        };
        Ok(Self {
            ctx,
            state,
            dest,
            mirrored_ports: 0,
        })
    }

    pub fn state(&self) -> &Arc<MirrorState> {
        &self.state
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    pub fn is_programmed(&self) -> bool {
        self.dest.is_some()
    }

    pub fn handle(&self) -> Option<MirrorHandle> {
        self.dest.as_ref().map(MirrorDest::handle)
    }

    pub fn mirrored_ports(&self) -> u32 {
        self.mirrored_ports
    }

    pub fn apply_port_mirror_action(
        &mut self,
        port: PortId,
        action: MirrorAction,
        direction: MirrorDirection,
        sample_dest: Option<SampleDestination>,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        let Some(dest) = &self.dest else {
            return Ok(());
        };
        let handle = dest.handle();
        let flags = port_mirror_flags(direction, sample_dest);
        // sFlow destinations are bound once for all sampled ports.
        let gport = if dest.is_sflow() { PORT_INVALID } else { port_gport(port) };

        match action {
            MirrorAction::Start => {
                if let Some(existing) = cache.find_mirrored_port(gport, flags) {
                    if existing != handle {
                        fatal(
                            SOURCE,
                            format!(
                                "port {} is mirrored to {} but mirror {} is {}",
                                port, existing, self.state.name, handle
                            ),
                        );
                    }
                    cache.programmed_mirrored_port(gport, flags);
                } else if !dest.is_sflow() || self.mirrored_ports == 0 {
                    self.port_dest_add(gport, flags, handle)?;
                }
                self.mirrored_ports += 1;
                debug_log!(
                    SOURCE,
                    port,
                    handle = %handle,
                    "started {} mirroring on port {} to {}",
                    direction,
                    port,
                    self.state.name
                );
            }
            MirrorAction::Stop => {
                if !dest.is_sflow() || self.mirrored_ports == 1 {
                    check_fatal(
                        SOURCE,
                        self.ctx.sdk().mirror_port_dest_delete(gport, flags, handle),
                        format_args!("failed to stop {} mirroring on port {}", direction, port),
                    );
                }
                self.mirrored_ports = self.mirrored_ports.saturating_sub(1);
                debug_log!(
                    SOURCE,
                    port,
                    handle = %handle,
                    "stopped {} mirroring on port {} to {}",
                    direction,
                    port,
                    self.state.name
                );
            }
        }
        Ok(())
    }

    fn port_dest_add(&self, gport: Gport, flags: u32, handle: MirrorHandle) -> HalResult<()> {
        self.ctx
            .sdk()
            .mirror_port_dest_add(gport, flags, handle)
            .map_err(|e| HalError::from_bcm("port mirror", e))
    }

    pub fn apply_acl_mirror_action(
        &self,
        entry: AclEntryHandle,
        action: MirrorAction,
        direction: MirrorDirection,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        let Some(handle) = self.handle() else {
            return Ok(());
        };
        let sdk = self.ctx.sdk();
        let field_action = acl_mirror_action(direction, handle);

        match action {
            MirrorAction::Start => {
                if let Some(existing) = cache.find_mirrored_acl(entry, direction) {
                    if existing != handle {
                        fatal(
                            SOURCE,
                            format!(
                                "acl entry {} {} mirrors to {} but mirror {} is {}",
                                entry, direction, existing, self.state.name, handle
                            ),
                        );
                    }
                    cache.programmed_mirrored_acl(entry, direction);
                    return Ok(());
                }
                sdk.action_add(entry, field_action)
                    .map_err(|e| HalError::from_bcm("acl mirror action", e))?;
                if let Err(e) = sdk.entry_install(entry) {
                    check_fatal(
                        SOURCE,
                        sdk.action_delete(entry, field_action),
                        format_args!("failed to undo {} mirroring on acl entry {}", direction, entry),
                    );
                    return Err(HalError::from_bcm("acl entry", e));
                }
            }
            MirrorAction::Stop => {
                check_fatal(
                    SOURCE,
                    sdk.action_delete(entry, field_action),
                    format_args!("failed to stop {} mirroring on acl entry {}", direction, entry),
                );
                check_fatal(
                    SOURCE,
                    sdk.entry_install(entry),
                    format_args!("failed to reinstall acl entry {}", entry),
                );
            }
        }
        debug_log!(
            SOURCE,
            entry = %entry,
            handle = %handle,
            "{:?} {} mirroring on acl entry to {}",
            action,
            direction,
            self.state.name
        );
        Ok(())
    }
}
