//! ACL entry state.
//!
//! An ACL entry is identified by its name in the switch state and by its
//! priority in hardware. Priorities are unique within the ACL group.

use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

use bcm_sdk::api::StatType;
use bcm_sdk::PortId;
use serde::{Deserialize, Serialize};

use super::NextHop;

/// Whether matching traffic is dropped or forwarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AclActionType {
    Deny,
    #[default]
    Permit,
}

impl fmt::Display for AclActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deny => write!(f, "DENY"),
            Self::Permit => write!(f, "PERMIT"),
        }
    }
}

/// An address prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IpPrefix {
    pub ip: IpAddr,
    pub len: u8,
}

impl IpPrefix {
    pub fn new(ip: IpAddr, len: u8) -> Self {
        Self { ip, len }
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.ip, self.len)
    }
}

/// IP fragment match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IpFragMatch {
    NotFragmented,
    FirstFragment,
    NotFragmentedOrFirstFragment,
    NotFirstFragment,
    AnyFragment,
}

impl IpFragMatch {
    /// Hardware encoding of the fragment qualifier.
    pub fn hw_code(&self) -> u128 {
        match self {
            Self::NotFragmented => 0,
            Self::FirstFragment => 1,
            Self::NotFragmentedOrFirstFragment => 2,
            Self::NotFirstFragment => 3,
            Self::AnyFragment => 4,
        }
    }
}

/// Layer 3 packet type match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IpType {
    Any,
    Ip,
    Ip4,
    Ip6,
}

impl IpType {
    pub fn hw_code(&self) -> u128 {
        match self {
            Self::Any => 0,
            Self::Ip => 1,
            Self::Ip4 => 2,
            Self::Ip6 => 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TtlMatch {
    pub value: u8,
    pub mask: u8,
}

/// An inclusive L4 port or packet length range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: u32,
    pub max: u32,
}

impl ValueRange {
    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }
}

/// Queue matching traffic is sent to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SendToQueue {
    pub queue_id: u32,
    /// Queue is a CPU queue; the packet is also copied to the CPU.
    #[serde(default)]
    pub to_cpu: bool,
}

/// A named counter attached to the entry. Entries naming the same counter
/// share one hardware stat.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TrafficCounter {
    pub name: String,
    #[serde(default = "default_counter_types")]
    pub types: Vec<StatType>,
}

fn default_counter_types() -> Vec<StatType> {
    vec![StatType::Packets]
}

impl TrafficCounter {
    pub fn new(name: impl Into<String>, types: Vec<StatType>) -> Self {
        Self {
            name: name.into(),
            types,
        }
    }
}

/// Redirect to a set of next hops. An empty set drops the traffic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct RedirectToNextHop {
    #[serde(default)]
    pub next_hops: BTreeSet<NextHop>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct MatchAction {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub send_to_queue: Option<SendToQueue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub set_dscp: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub traffic_counter: Option<TrafficCounter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_mirror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_mirror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_to_next_hop: Option<RedirectToNextHop>,
}

/// An ACL entry as the switch state describes it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AclEntryState {
    pub name: String,
    pub priority: i32,
    #[serde(default)]
    pub action_type: AclActionType,
    /// Entries are enabled unless explicitly disabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_ip: Option<IpPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_ip: Option<IpPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proto: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tcp_flags_bitmap: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_port: Option<PortId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_port: Option<PortId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_frag: Option<IpFragMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_type: Option<u8>,
    /// Only valid together with `icmp_type`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icmp_code: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dscp: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_type: Option<IpType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ether_type: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<TtlMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_mac: Option<[u8; 6]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_class_l2: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_class_neighbor: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lookup_class_route: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_src_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub l4_dst_port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub src_l4_port_range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dst_l4_port_range: Option<ValueRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkt_len_range: Option<ValueRange>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<MatchAction>,
}

impl AclEntryState {
    /// A permit entry with no qualifiers and no actions.
    pub fn new(name: impl Into<String>, priority: i32) -> Self {
        Self {
            name: name.into(),
            priority,
            action_type: AclActionType::Permit,
            enabled: None,
            src_ip: None,
            dst_ip: None,
            proto: None,
            tcp_flags_bitmap: None,
            src_port: None,
            dst_port: None,
            ip_frag: None,
            icmp_type: None,
            icmp_code: None,
            dscp: None,
            ip_type: None,
            ether_type: None,
            ttl: None,
            dst_mac: None,
            lookup_class_l2: None,
            lookup_class_neighbor: None,
            lookup_class_route: None,
            l4_src_port: None,
            l4_dst_port: None,
            src_l4_port_range: None,
            dst_l4_port_range: None,
            pkt_len_range: None,
            action: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.unwrap_or(true)
    }

    pub fn traffic_counter(&self) -> Option<&TrafficCounter> {
        self.action.as_ref()?.traffic_counter.as_ref()
    }

    pub fn ingress_mirror(&self) -> Option<&str> {
        self.action.as_ref()?.ingress_mirror.as_deref()
    }

    pub fn egress_mirror(&self) -> Option<&str> {
        self.action.as_ref()?.egress_mirror.as_deref()
    }

    pub fn redirect(&self) -> Option<&RedirectToNextHop> {
        self.action.as_ref()?.redirect_to_next_hop.as_ref()
    }

    /// Rejects combinations the hardware cannot express.
    pub fn validate(&self) -> Result<(), String> {
        if self.icmp_code.is_some() && self.icmp_type.is_none() {
            return Err(format!("acl {}: icmp code requires icmp type", self.name));
        }
        if self.icmp_type.is_some() && self.l4_src_port.is_some() {
            return Err(format!(
                "acl {}: icmp type/code and l4 src port share one qualifier",
                self.name
            ));
        }
        if self.lookup_class_neighbor.is_some() && self.lookup_class_route.is_some() {
            return Err(format!(
                "acl {}: neighbor and route lookup classes share one qualifier",
                self.name
            ));
        }
        for (what, prefix) in [("src", self.src_ip), ("dst", self.dst_ip)] {
            if let Some(prefix) = prefix {
                let max = if prefix.ip.is_ipv4() { 32 } else { 128 };
                if prefix.len > max {
                    return Err(format!(
                        "acl {}: {} prefix {} is too long",
                        self.name, what, prefix
                    ));
                }
            }
        }
        for range in [
            self.src_l4_port_range,
            self.dst_l4_port_range,
            self.pkt_len_range,
        ]
        .into_iter()
        .flatten()
        {
            if range.min > range.max {
                return Err(format!(
                    "acl {}: invalid range {}-{}",
                    self.name, range.min, range.max
                ));
            }
        }
        Ok(())
    }
}
