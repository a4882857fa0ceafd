//! Mirror destination and port-mirror adapter surface.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::BcmResult;
use crate::types::{Gport, MirrorHandle};

/// Destination is an ERSPAN (IP/GRE) tunnel.
pub const MIRROR_DEST_TUNNEL_IP_GRE: u32 = 0x0000_0001;
/// Destination is an sFlow (UDP) tunnel.
pub const MIRROR_DEST_TUNNEL_SFLOW: u32 = 0x0000_0002;

/// Port mirror on ingress traffic.
pub const MIRROR_PORT_INGRESS: u32 = 0x0000_0001;
/// Port mirror on egress traffic.
pub const MIRROR_PORT_EGRESS: u32 = 0x0000_0002;
/// Port mirror sampled through the sFlow engine.
pub const MIRROR_PORT_SFLOW: u32 = 0x0000_0004;

/// Gport used to bind an sFlow destination to all sampled ports at once.
pub const PORT_INVALID: Gport = Gport::INVALID;

/// Tunnel encapsulation of a mirror destination.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TunnelConfig {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_mac: [u8; 6],
    pub dst_mac: [u8; 6],
    pub ttl: u8,
    pub gre_protocol: u16,
    /// UDP source/destination ports, set for sFlow tunnels only.
    pub udp_ports: Option<(u16, u16)>,
}

/// `bcm_mirror_destination_t` as far as the agent cares.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorDestination {
    pub gport: Gport,
    pub tunnel: Option<TunnelConfig>,
    pub dscp: u8,
    pub truncate: bool,
}

impl MirrorDestination {
    /// Destination flags derived from the tunnel type.
    pub fn flags(&self) -> u32 {
        match &self.tunnel {
            None => 0,
            Some(tunnel) if tunnel.udp_ports.is_some() => MIRROR_DEST_TUNNEL_SFLOW,
            Some(_) => MIRROR_DEST_TUNNEL_IP_GRE,
        }
    }
}

/// Mirror calls.
pub trait MirrorApi: Send + Sync {
    fn mirror_destination_create(&self, dest: &MirrorDestination) -> BcmResult<MirrorHandle>;
    fn mirror_destination_destroy(&self, handle: MirrorHandle) -> BcmResult<()>;
    fn mirror_destination_get(&self, handle: MirrorHandle) -> BcmResult<MirrorDestination>;
    fn mirror_port_dest_add(&self, gport: Gport, flags: u32, dest: MirrorHandle) -> BcmResult<()>;
    fn mirror_port_dest_delete(
        &self,
        gport: Gport,
        flags: u32,
        dest: MirrorHandle,
    ) -> BcmResult<()>;

    /// Invokes `visitor` for every mirror destination.
    fn mirror_destination_traverse(
        &self,
        visitor: &mut dyn FnMut(MirrorHandle, &MirrorDestination),
    ) -> BcmResult<()>;

    /// Invokes `visitor(gport, flags, destination)` for every port mirror
    /// association.
    fn mirror_port_traverse(
        &self,
        visitor: &mut dyn FnMut(Gport, u32, MirrorHandle),
    ) -> BcmResult<()>;
}
