//! Qualifier encoding of ACL entry state, and the comparison used to verify
//! warm-booted entries.

use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv6Addr};

use bcm_sdk::api::{QualifierData, QualifierField, RangeKind, RangeSpec};
use bcm_sdk::AclRangeHandle;

use crate::state::{AclEntryState, IpPrefix};

/// IPv4 addresses are matched as v4-mapped IPv6 addresses.
const V4_MAPPED_PREFIX_LEN: u8 = 96;

pub fn ip_prefix_qualifier(prefix: &IpPrefix) -> QualifierData {
    match prefix.ip {
        IpAddr::V4(ip) => QualifierData::prefix(
            u128::from(ip.to_ipv6_mapped()),
            prefix.len.saturating_add(V4_MAPPED_PREFIX_LEN),
            128,
        ),
        IpAddr::V6(ip) => QualifierData::prefix(u128::from(ip), prefix.len, 128),
    }
}

/// Decodes an address qualifier read back from hardware. `None` for the
/// unset sentinel or a non-contiguous mask.
pub fn ip_prefix_from_qualifier(value: QualifierData) -> Option<IpPrefix> {
    if value.is_unset() {
        return None;
    }
    let len = value.mask.leading_ones() as u8;
    if QualifierData::prefix(value.data, len, 128) != value {
        return None;
    }
    let ip = Ipv6Addr::from(value.data);
    match ip.to_ipv4_mapped() {
        Some(v4) if len >= V4_MAPPED_PREFIX_LEN => Some(IpPrefix::new(
            IpAddr::V4(v4),
            len - V4_MAPPED_PREFIX_LEN,
        )),
        _ => Some(IpPrefix::new(IpAddr::V6(ip), len)),
    }
}

/// ICMP type and code share the L4 source port qualifier: type in the high
/// byte, code in the low byte.
pub fn icmp_qualifier(icmp_type: u8, icmp_code: Option<u8>) -> QualifierData {
    let data = (u128::from(icmp_type) << 8) | u128::from(icmp_code.unwrap_or(0));
    let mask = if icmp_code.is_some() { 0xffff } else { 0xff00 };
    QualifierData::new(data, mask)
}

pub fn range_field(kind: RangeKind) -> QualifierField {
    match kind {
        RangeKind::SrcL4Port => QualifierField::SrcL4PortRange,
        RangeKind::DstL4Port => QualifierField::DstL4PortRange,
        RangeKind::PacketLength => QualifierField::PacketLengthRange,
    }
}

pub fn range_qualifier(range: AclRangeHandle) -> QualifierData {
    QualifierData::exact(range.as_raw() as u128, 32)
}

/// Range checkers an entry needs.
pub fn range_specs(acl: &AclEntryState) -> Vec<RangeSpec> {
    [
        (RangeKind::SrcL4Port, acl.src_l4_port_range),
        (RangeKind::DstL4Port, acl.dst_l4_port_range),
        (RangeKind::PacketLength, acl.pkt_len_range),
    ]
    .into_iter()
    .filter_map(|(kind, range)| {
        range.map(|r| RangeSpec {
            kind,
            min: r.min,
            max: r.max,
        })
    })
    .collect()
}

fn mac_to_u128(mac: &[u8; 6]) -> u128 {
    mac.iter().fold(0u128, |acc, b| (acc << 8) | u128::from(*b))
}

/// Every qualifier `acl` programs, keyed by field.
///
/// Fields absent from the map must read back unset.
pub fn expected_qualifiers(
    acl: &AclEntryState,
    ranges: &BTreeMap<RangeKind, AclRangeHandle>,
) -> BTreeMap<QualifierField, QualifierData> {
    let mut expected = BTreeMap::new();
    let mut set = |field, value| {
        expected.insert(field, value);
    };

    if let Some(prefix) = &acl.src_ip {
        set(QualifierField::SrcIp6, ip_prefix_qualifier(prefix));
    }
    if let Some(prefix) = &acl.dst_ip {
        set(QualifierField::DstIp6, ip_prefix_qualifier(prefix));
    }
    if let Some(proto) = acl.proto {
        set(QualifierField::IpProtocol, QualifierData::exact(proto.into(), 8));
    }
    if let Some(port) = acl.l4_src_port {
        set(QualifierField::L4SrcPort, QualifierData::exact(port.into(), 16));
    }
    if let Some(icmp_type) = acl.icmp_type {
        set(QualifierField::L4SrcPort, icmp_qualifier(icmp_type, acl.icmp_code));
    }
    if let Some(port) = acl.l4_dst_port {
        set(QualifierField::L4DstPort, QualifierData::exact(port.into(), 16));
    }
    if let Some(flags) = acl.tcp_flags_bitmap {
        set(QualifierField::TcpControl, QualifierData::exact(flags.into(), 8));
    }
    if let Some(port) = acl.src_port {
        set(QualifierField::SrcPort, QualifierData::exact(port.into(), 32));
    }
    if let Some(port) = acl.dst_port {
        set(QualifierField::DstPort, QualifierData::exact(port.into(), 32));
    }
    if let Some(mac) = &acl.dst_mac {
        set(QualifierField::DstMac, QualifierData::exact(mac_to_u128(mac), 48));
    }
    if let Some(frag) = acl.ip_frag {
        set(QualifierField::IpFrag, QualifierData::exact(frag.hw_code(), 8));
    }
    if let Some(dscp) = acl.dscp {
        set(QualifierField::Dscp, QualifierData::exact(dscp.into(), 6));
    }
    if let Some(ip_type) = acl.ip_type {
        set(QualifierField::IpType, QualifierData::exact(ip_type.hw_code(), 8));
    }
    if let Some(ether_type) = acl.ether_type {
        set(QualifierField::EtherType, QualifierData::exact(ether_type.into(), 16));
    }
    if let Some(ttl) = acl.ttl {
        set(
            QualifierField::Ttl,
            QualifierData::new(u128::from(ttl.value & ttl.mask), ttl.mask.into()),
        );
    }
    if let Some(class) = acl.lookup_class_l2 {
        set(QualifierField::DstClassL2, QualifierData::exact(class.into(), 32));
    }
    if let Some(class) = acl.lookup_class_neighbor.or(acl.lookup_class_route) {
        set(QualifierField::DstClassL3, QualifierData::exact(class.into(), 32));
    }
    for (kind, range) in ranges {
        set(range_field(*kind), range_qualifier(*range));
    }
    expected
}

/// Whether a qualifier read back from hardware matches what software would
/// have programmed.
///
/// Absent in software requires unset in hardware. For fields where the SDK
/// reports a programmed zero as unset, that sentinel matches a zero value.
pub fn qualifier_matches(
    field: QualifierField,
    hw: QualifierData,
    sw: Option<&QualifierData>,
) -> bool {
    match sw {
        None => hw.is_unset(),
        Some(sw) => *sw == hw || (hw.is_unset() && field.zero_means_unset() && sw.data == 0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{IpFragMatch, ValueRange};
    use std::net::Ipv4Addr;

    #[test]
    fn test_v4_prefix_is_v4_mapped() {
        let prefix = IpPrefix::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 0)), 24);
        let q = ip_prefix_qualifier(&prefix);
        assert_eq!(q.mask.leading_ones(), 120);
        assert_eq!(ip_prefix_from_qualifier(q), Some(prefix));
    }

    #[test]
    fn test_v6_prefix_decodes() {
        let prefix = IpPrefix::new(
            IpAddr::V6("2401:db00::".parse::<Ipv6Addr>().unwrap()),
            64,
        );
        assert_eq!(
            ip_prefix_from_qualifier(ip_prefix_qualifier(&prefix)),
            Some(prefix)
        );
        assert_eq!(ip_prefix_from_qualifier(QualifierData::UNSET), None);
        assert_eq!(
            ip_prefix_from_qualifier(QualifierData::new(0xff, 0x0f0f)),
            None
        );
    }

    #[test]
    fn test_icmp_aliases_l4_src_port() {
        let acl = AclEntryState {
            icmp_type: Some(8),
            icmp_code: Some(0),
            ..AclEntryState::new("acl0", 1)
        };
        let expected = expected_qualifiers(&acl, &BTreeMap::new());
        assert_eq!(
            expected.get(&QualifierField::L4SrcPort),
            Some(&QualifierData::new(0x800, 0xffff))
        );
        assert_eq!(expected.len(), 1);
    }

    #[test]
    fn test_lookup_classes_share_dst_class_l3() {
        let acl = AclEntryState {
            lookup_class_route: Some(10),
            lookup_class_l2: Some(11),
            ..AclEntryState::new("acl0", 1)
        };
        let expected = expected_qualifiers(&acl, &BTreeMap::new());
        assert_eq!(
            expected.get(&QualifierField::DstClassL3),
            Some(&QualifierData::exact(10, 32))
        );
        assert_eq!(
            expected.get(&QualifierField::DstClassL2),
            Some(&QualifierData::exact(11, 32))
        );
    }

    #[test]
    fn test_range_specs_and_qualifiers() {
        let acl = AclEntryState {
            dst_l4_port_range: Some(ValueRange::new(100, 200)),
            ..AclEntryState::new("acl0", 1)
        };
        let specs = range_specs(&acl);
        assert_eq!(
            specs,
            vec![RangeSpec {
                kind: RangeKind::DstL4Port,
                min: 100,
                max: 200
            }]
        );

        let mut ranges = BTreeMap::new();
        ranges.insert(RangeKind::DstL4Port, AclRangeHandle::from_raw_unchecked(3));
        let expected = expected_qualifiers(&acl, &ranges);
        assert_eq!(
            expected.get(&QualifierField::DstL4PortRange),
            Some(&QualifierData::exact(3, 32))
        );
    }

    #[test]
    fn test_qualifier_rule() {
        let field = QualifierField::Dscp;
        assert!(qualifier_matches(field, QualifierData::UNSET, None));
        assert!(!qualifier_matches(field, QualifierData::exact(1, 6), None));
        assert!(qualifier_matches(
            field,
            QualifierData::exact(1, 6),
            Some(&QualifierData::exact(1, 6))
        ));
        // zero reads back unset only for the fields the SDK defines that way
        let zero = QualifierData::exact(0, 6);
        assert!(!qualifier_matches(field, QualifierData::UNSET, Some(&zero)));

        let frag = QualifierData::exact(IpFragMatch::NotFragmented.hw_code(), 8);
        assert!(qualifier_matches(
            QualifierField::IpFrag,
            QualifierData::UNSET,
            Some(&frag)
        ));
        let first = QualifierData::exact(IpFragMatch::FirstFragment.hw_code(), 8);
        assert!(!qualifier_matches(
            QualifierField::IpFrag,
            QualifierData::UNSET,
            Some(&first)
        ));
    }
}
