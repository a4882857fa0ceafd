//! Ports, as far as mirroring is concerned.

use std::collections::BTreeMap;
use std::sync::Arc;

use bcm_sdk::PortId;

use crate::capabilities::{MirrorTableAccess, PortTableAccess};
use crate::error::{HalError, HalResult};
use crate::state::{MirrorAction, MirrorDirection, PortState, SampleDestination};
use crate::warm_boot::WarmBootCache;
use crate::{debug_log, warn_log};

const SOURCE: &str = "PortTable";

type MirrorUse<'a> = (&'a str, MirrorDirection, Option<SampleDestination>);

fn mirror_uses(port: &PortState) -> Vec<MirrorUse<'_>> {
    let mut uses = Vec::new();
    if let Some(mirror) = &port.ingress_mirror {
        uses.push((mirror.as_str(), MirrorDirection::Ingress, port.sample_dest));
    }
    if let Some(mirror) = &port.egress_mirror {
        uses.push((mirror.as_str(), MirrorDirection::Egress, port.sample_dest));
    }
    uses
}

#[derive(Debug, Default)]
pub struct PortTable {
    ports: BTreeMap<PortId, Arc<PortState>>,
}

impl PortTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_added(
        &mut self,
        state: &Arc<PortState>,
        mirrors: &mut dyn MirrorTableAccess,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        if self.ports.contains_key(&state.id) {
            return Err(HalError::exists("port", state.id));
        }
        start_all(state.id, &mirror_uses(state), mirrors, cache)?;
        self.ports.insert(state.id, state.clone());
        debug_log!(SOURCE, port = state.id, "added port {}", state.name);
        Ok(())
    }

    pub fn process_removed(
        &mut self,
        state: &Arc<PortState>,
        mirrors: &mut dyn MirrorTableAccess,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        let port = self
            .ports
            .remove(&state.id)
            .ok_or_else(|| HalError::not_found("port", state.id))?;
        stop_all(port.id, &mirror_uses(&port), mirrors, cache);
        debug_log!(SOURCE, port = state.id, "removed port {}", state.name);
        Ok(())
    }

    /// Moves the port's mirroring from the old mirrors to the new ones. A
    /// direction is only touched when its mirror or the sampling changed.
    pub fn process_changed(
        &mut self,
        old: &Arc<PortState>,
        new: &Arc<PortState>,
        mirrors: &mut dyn MirrorTableAccess,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        if !self.ports.contains_key(&old.id) {
            return Err(HalError::not_found("port", old.id));
        }
        let old_uses = mirror_uses(old);
        let new_uses = mirror_uses(new);
        let stopping: Vec<_> = old_uses
            .iter()
            .filter(|u| !new_uses.contains(u))
            .copied()
            .collect();
        let starting: Vec<_> = new_uses
            .iter()
            .filter(|u| !old_uses.contains(u))
            .copied()
            .collect();

        stop_all(old.id, &stopping, mirrors, cache);
        if let Err(e) = start_all(new.id, &starting, mirrors, cache) {
            if let Err(restore) = start_all(old.id, &stopping, mirrors, cache) {
                warn_log!(
                    SOURCE,
                    port = old.id,
                    "failed to restore mirroring of port {}: {}",
                    old.name,
                    restore
                );
            }
            return Err(e);
        }
        self.ports.insert(new.id, new.clone());
        Ok(())
    }

    pub fn port(&self, id: PortId) -> Option<&Arc<PortState>> {
        self.ports.get(&id)
    }

    pub fn states(&self) -> BTreeMap<PortId, Arc<PortState>> {
        self.ports.clone()
    }
}

/// Starts every use, or none of them.
fn start_all(
    port: PortId,
    uses: &[MirrorUse<'_>],
    mirrors: &mut dyn MirrorTableAccess,
    cache: &mut WarmBootCache,
) -> HalResult<()> {
    for (i, (mirror, direction, sample_dest)) in uses.iter().enumerate() {
        let started = mirrors.apply_port_mirror_action(
            mirror,
            port,
            MirrorAction::Start,
            *direction,
            *sample_dest,
            cache,
        );
        if let Err(e) = started {
            stop_all(port, &uses[..i], mirrors, cache);
            return Err(e);
        }
    }
    Ok(())
}

fn stop_all(
    port: PortId,
    uses: &[MirrorUse<'_>],
    mirrors: &mut dyn MirrorTableAccess,
    cache: &mut WarmBootCache,
) {
    for (mirror, direction, sample_dest) in uses.iter().rev() {
        // Stopping only fails by aborting.
        let _ = mirrors.apply_port_mirror_action(
            mirror,
            port,
            MirrorAction::Stop,
            *direction,
            *sample_dest,
            cache,
        );
    }
}

impl PortTableAccess for PortTable {
    fn mirrored_ports(
        &self,
        mirror: &str,
    ) -> Vec<(PortId, MirrorDirection, Option<SampleDestination>)> {
        self.ports
            .values()
            .flat_map(|port| {
                mirror_uses(port)
                    .into_iter()
                    .filter(|(name, _, _)| *name == mirror)
                    .map(|(_, direction, sample_dest)| (port.id, direction, sample_dest))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
