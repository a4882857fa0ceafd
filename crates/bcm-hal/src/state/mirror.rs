//! Mirror state.

use std::fmt;
use std::net::IpAddr;

use bcm_sdk::api::TunnelConfig;
use bcm_sdk::PortId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MirrorDirection {
    Ingress,
    Egress,
}

impl fmt::Display for MirrorDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ingress => write!(f, "ingress"),
            Self::Egress => write!(f, "egress"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MirrorAction {
    Start,
    Stop,
}

/// A mirror session.
///
/// SPAN mirrors name only an egress port. ERSPAN and sFlow mirrors also name
/// a destination IP, and are resolved once the state layer has filled in the
/// tunnel toward it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MirrorState {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_port: Option<PortId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_ip: Option<IpAddr>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tunnel: Option<TunnelConfig>,
    #[serde(default)]
    pub dscp: u8,
    #[serde(default)]
    pub truncate: bool,
}

impl MirrorState {
    /// A SPAN mirror out of `egress_port`.
    pub fn span(name: impl Into<String>, egress_port: PortId) -> Self {
        Self {
            name: name.into(),
            egress_port: Some(egress_port),
            destination_ip: None,
            tunnel: None,
            dscp: 0,
            truncate: false,
        }
    }

    /// A tunneled mirror resolved to `tunnel` out of `egress_port`.
    pub fn tunneled(name: impl Into<String>, egress_port: PortId, tunnel: TunnelConfig) -> Self {
        Self {
            name: name.into(),
            egress_port: Some(egress_port),
            destination_ip: Some(tunnel.dst_ip),
            tunnel: Some(tunnel),
            dscp: 0,
            truncate: false,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.egress_port.is_some() && (self.destination_ip.is_none() || self.tunnel.is_some())
    }

    pub fn is_sflow(&self) -> bool {
        matches!(&self.tunnel, Some(tunnel) if tunnel.udp_ports.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn tunnel(udp_ports: Option<(u16, u16)>) -> TunnelConfig {
        TunnelConfig {
            src_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
            dst_ip: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
            src_mac: [2, 0, 0, 0, 0, 1],
            dst_mac: [2, 0, 0, 0, 0, 2],
            ttl: 255,
            gre_protocol: 0x88be,
            udp_ports,
        }
    }

    #[test]
    fn test_resolution() {
        assert!(MirrorState::span("span", 1).is_resolved());

        let mut erspan = MirrorState::tunneled("erspan", 1, tunnel(None));
        assert!(erspan.is_resolved());
        assert!(!erspan.is_sflow());

        erspan.tunnel = None;
        assert!(!erspan.is_resolved());
    }

    #[test]
    fn test_sflow_detection() {
        let sflow = MirrorState::tunneled("sflow", 1, tunnel(Some((6343, 6343))));
        assert!(sflow.is_sflow());
    }
}
