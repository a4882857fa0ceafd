//! Table of mirror sessions.

use std::collections::BTreeMap;
use std::sync::Arc;

use bcm_sdk::{AclEntryHandle, BcmError, BcmStatus, MirrorHandle, PortId};

use super::entry::Mirror;
use crate::capabilities::{AclMirrorAccess, MirrorTableAccess, PortTableAccess};
use crate::error::{HalError, HalResult};
use crate::hw::HwContext;
use crate::state::{MirrorAction, MirrorDirection, MirrorState, SampleDestination};
use crate::warm_boot::WarmBootCache;
use crate::{debug_log, warn_log};

const SOURCE: &str = "MirrorTable";

pub struct MirrorTable {
    ctx: Arc<HwContext>,
    mirrors: BTreeMap<String, Mirror>,
}

impl MirrorTable {
    pub fn new(ctx: Arc<HwContext>) -> Self {
        Self {
            ctx,
            mirrors: BTreeMap::new(),
        }
    }

    /// Creates the mirror and starts every port and ACL entry that already
    /// references it. Nothing is left behind on failure.
    pub fn process_added(
        &mut self,
        state: &Arc<MirrorState>,
        ports: &dyn PortTableAccess,
        acls: &dyn AclMirrorAccess,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        if self.mirrors.contains_key(&state.name) {
            return Err(HalError::exists("mirror", &state.name));
        }
        let max = self.ctx.config().max_mirrors;
        if self.mirrors.len() >= max {
            return Err(HalError::from_bcm(
                "mirror destination",
                BcmError::new(
                    BcmStatus::Resource,
                    format!("{} mirrors configured, at most {} supported", max + 1, max),
                ),
            ));
        }

        let mut mirror = Mirror::new(self.ctx.clone(), state.clone(), cache)?;
        if mirror.is_programmed() {
            start_users(&mut mirror, ports, acls, cache)?;
        }
        debug_log!(SOURCE, "added mirror {}", state.name);
        self.mirrors.insert(state.name.clone(), mirror);
        Ok(())
    }

    /// Stops whatever still mirrors through the mirror, then destroys it.
    pub fn process_removed(
        &mut self,
        state: &Arc<MirrorState>,
        ports: &dyn PortTableAccess,
        acls: &dyn AclMirrorAccess,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        let mut mirror = self
            .mirrors
            .remove(&state.name)
            .ok_or_else(|| HalError::not_found("mirror", &state.name))?;
        stop_users(&mut mirror, ports, acls, cache);
        debug_log!(SOURCE, "removed mirror {}", state.name);
        Ok(())
    }

    /// Moves every user of the old mirror onto the new one.
    pub fn process_changed(
        &mut self,
        old: &Arc<MirrorState>,
        new: &Arc<MirrorState>,
        ports: &dyn PortTableAccess,
        acls: &dyn AclMirrorAccess,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        self.process_removed(old, ports, acls, cache)?;
        self.process_added(new, ports, acls, cache)
    }

    pub fn mirror(&self, name: &str) -> Option<&Mirror> {
        self.mirrors.get(name)
    }

    pub fn len(&self) -> usize {
        self.mirrors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirrors.is_empty()
    }

    /// Mirror states as applied to hardware.
    pub fn states(&self) -> BTreeMap<String, Arc<MirrorState>> {
        self.mirrors
            .iter()
            .map(|(name, mirror)| (name.clone(), mirror.state().clone()))
            .collect()
    }
}

fn start_users(
    mirror: &mut Mirror,
    ports: &dyn PortTableAccess,
    acls: &dyn AclMirrorAccess,
    cache: &mut WarmBootCache,
) -> HalResult<()> {
    let mut started_ports = Vec::new();
    let mut started_acls = Vec::new();

    let result = (|| {
        for (port, direction, sample_dest) in ports.mirrored_ports(mirror.name()) {
            mirror.apply_port_mirror_action(port, MirrorAction::Start, direction, sample_dest, cache)?;
            started_ports.push((port, direction, sample_dest));
        }
        for (entry, direction) in acls.acl_mirror_users(mirror.name()) {
            mirror.apply_acl_mirror_action(entry, MirrorAction::Start, direction, cache)?;
            started_acls.push((entry, direction));
        }
        Ok::<_, HalError>(())
    })();

    if let Err(e) = result {
        warn_log!(SOURCE, "failed to start users of mirror {}: {}", mirror.name(), e);
        for (entry, direction) in started_acls.into_iter().rev() {
            let _ = mirror.apply_acl_mirror_action(entry, MirrorAction::Stop, direction, cache);
        }
        for (port, direction, sample_dest) in started_ports.into_iter().rev() {
            let _ = mirror.apply_port_mirror_action(
                port,
                MirrorAction::Stop,
                direction,
                sample_dest,
                cache,
            );
        }
        return Err(e);
    }
    Ok(())
}

fn stop_users(
    mirror: &mut Mirror,
    ports: &dyn PortTableAccess,
    acls: &dyn AclMirrorAccess,
    cache: &mut WarmBootCache,
) {
    if !mirror.is_programmed() {
        return;
    }
    // Stops cannot fail short of a fatal error.
    for (entry, direction) in acls.acl_mirror_users(mirror.name()) {
        let _ = mirror.apply_acl_mirror_action(entry, MirrorAction::Stop, direction, cache);
    }
    for (port, direction, sample_dest) in ports.mirrored_ports(mirror.name()) {
        let _ = mirror.apply_port_mirror_action(port, MirrorAction::Stop, direction, sample_dest, cache);
    }
}

impl MirrorTableAccess for MirrorTable {
    fn mirror_handle(&self, name: &str) -> Option<MirrorHandle> {
        self.mirrors.get(name).and_then(Mirror::handle)
    }

    fn apply_acl_mirror_action(
        &self,
        name: &str,
        entry: AclEntryHandle,
        action: MirrorAction,
        direction: MirrorDirection,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        match self.mirrors.get(name) {
            Some(mirror) => mirror.apply_acl_mirror_action(entry, action, direction, cache),
            None => {
                debug_log!(SOURCE, "mirror {} not present, skipping acl action", name);
                Ok(())
            }
        }
    }

    fn apply_port_mirror_action(
        &mut self,
        name: &str,
        port: PortId,
        action: MirrorAction,
        direction: MirrorDirection,
        sample_dest: Option<SampleDestination>,
        cache: &mut WarmBootCache,
    ) -> HalResult<()> {
        match self.mirrors.get_mut(name) {
            Some(mirror) => {
                mirror.apply_port_mirror_action(port, action, direction, sample_dest, cache)
            }
            None => {
                debug_log!(SOURCE, port, "mirror {} not present, skipping port action", name);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HalConfig;
    use bcm_sdk::api::mirror::{MIRROR_PORT_INGRESS, MIRROR_PORT_SFLOW, PORT_INVALID};
    use bcm_sdk::api::{FieldAction, FieldApi, TunnelConfig};
    use bcm_sdk::{port_gport, FakeSdk};
    use std::net::{IpAddr, Ipv4Addr};

    #[derive(Default)]
    struct Ports(Vec<(PortId, MirrorDirection, Option<SampleDestination>)>);

    impl PortTableAccess for Ports {
        fn mirrored_ports(
            &self,
            _mirror: &str,
        ) -> Vec<(PortId, MirrorDirection, Option<SampleDestination>)> {
            self.0.clone()
        }
    }

    #[derive(Default)]
    struct Acls(Vec<(AclEntryHandle, MirrorDirection)>);

    impl AclMirrorAccess for Acls {
        fn acl_mirror_users(&self, _mirror: &str) -> Vec<(AclEntryHandle, MirrorDirection)> {
            self.0.clone()
        }
    }

    fn sflow_tunnel() -> TunnelConfig {
        TunnelConfig {
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_mac: [2, 0, 0, 0, 0, 1],
            dst_mac: [2, 0, 0, 0, 0, 2],
            ttl: 255,
            gre_protocol: 0,
            udp_ports: Some((6343, 6343)),
        }
    }

    fn setup(config: HalConfig) -> (Arc<FakeSdk>, MirrorTable, WarmBootCache) {
        let sdk = Arc::new(FakeSdk::new());
        let ctx = HwContext::new(sdk.clone(), config);
        let mut cache = WarmBootCache::new(ctx.clone());
        cache.populate(None).unwrap();
        (sdk, MirrorTable::new(ctx), cache)
    }

    #[test]
    fn test_added_mirror_starts_existing_users() {
        let (sdk, mut table, mut cache) = setup(HalConfig::default());
        let entry = sdk.entry_create(1).unwrap();
        let ports = Ports(vec![(3, MirrorDirection::Ingress, None)]);
        let acls = Acls(vec![(entry, MirrorDirection::Egress)]);

        let state = Arc::new(MirrorState::span("span", 1));
        table.process_added(&state, &ports, &acls, &mut cache).unwrap();

        let handle = table.mirror_handle("span").unwrap();
        assert_eq!(sdk.mirror_count(), 1);
        assert!(sdk
            .port_mirrors()
            .contains(&(port_gport(3), MIRROR_PORT_INGRESS, handle)));
        assert_eq!(
            sdk.actions_get(entry).unwrap(),
            vec![FieldAction::MirrorEgress(handle)]
        );

        table.process_removed(&state, &ports, &acls, &mut cache).unwrap();
        assert_eq!(sdk.mirror_count(), 0);
        assert!(sdk.port_mirrors().is_empty());
        assert!(sdk.actions_get(entry).unwrap().is_empty());
    }

    #[test]
    fn test_unresolved_mirror_is_software_only() {
        let (sdk, mut table, mut cache) = setup(HalConfig::default());
        let state = Arc::new(MirrorState {
            destination_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2))),
            ..MirrorState::span("erspan", 1)
        });
        let ports = Ports(vec![(3, MirrorDirection::Ingress, None)]);
        table
            .process_added(&state, &ports, &Acls::default(), &mut cache)
            .unwrap();

        assert!(table.mirror("erspan").is_some());
        assert_eq!(table.mirror_handle("erspan"), None);
        assert_eq!(sdk.mirror_count(), 0);
        table
            .apply_port_mirror_action("erspan", 4, MirrorAction::Start, MirrorDirection::Ingress, None, &mut cache)
            .unwrap();
        assert!(sdk.port_mirrors().is_empty());
    }

    #[test]
    fn test_sflow_mirror_binds_once() {
        let (sdk, mut table, mut cache) = setup(HalConfig::default());
        let state = Arc::new(MirrorState::tunneled("sflow", 1, sflow_tunnel()));
        table
            .process_added(&state, &Ports::default(), &Acls::default(), &mut cache)
            .unwrap();
        let handle = table.mirror_handle("sflow").unwrap();
        let sample = Some(SampleDestination::Mirror);
        let flags = MIRROR_PORT_INGRESS | MIRROR_PORT_SFLOW;

        for port in [3, 4] {
            table
                .apply_port_mirror_action("sflow", port, MirrorAction::Start, MirrorDirection::Ingress, sample, &mut cache)
                .unwrap();
        }
        assert_eq!(sdk.port_mirrors(), vec![(PORT_INVALID, flags, handle)]);
        assert_eq!(table.mirror("sflow").unwrap().mirrored_ports(), 2);

        table
            .apply_port_mirror_action("sflow", 3, MirrorAction::Stop, MirrorDirection::Ingress, sample, &mut cache)
            .unwrap();
        assert_eq!(sdk.port_mirrors().len(), 1);
        table
            .apply_port_mirror_action("sflow", 4, MirrorAction::Stop, MirrorDirection::Ingress, sample, &mut cache)
            .unwrap();
        assert!(sdk.port_mirrors().is_empty());
    }

    #[test]
    fn test_too_many_mirrors_is_resource_exhausted() {
        let (sdk, mut table, mut cache) = setup(HalConfig {
            max_mirrors: 1,
            ..HalConfig::default()
        });
        let none = (Ports::default(), Acls::default());
        table
            .process_added(&Arc::new(MirrorState::span("a", 1)), &none.0, &none.1, &mut cache)
            .unwrap();
        let err = table
            .process_added(&Arc::new(MirrorState::span("b", 2)), &none.0, &none.1, &mut cache)
            .unwrap_err();
        assert!(err.is_resource_exhausted());
        assert_eq!(sdk.mirror_count(), 1);
    }

    #[test]
    fn test_failed_start_releases_mirror() {
        let (sdk, mut table, mut cache) = setup(HalConfig::default());
        let ports = Ports(vec![(3, MirrorDirection::Ingress, None)]);
        let acls = Acls(vec![(AclEntryHandle::from_raw_unchecked(999), MirrorDirection::Ingress)]);

        let state = Arc::new(MirrorState::span("span", 1));
        assert!(table
            .process_added(&state, &ports, &acls, &mut cache)
            .is_err());
        assert!(table.is_empty());
        assert_eq!(sdk.mirror_count(), 0);
        assert!(sdk.port_mirrors().is_empty());
    }
}
