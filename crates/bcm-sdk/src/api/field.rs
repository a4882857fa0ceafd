//! Field processor (ACL / exact-match) adapter surface.
//!
//! Field entries, the stats attached to them and the L4/packet length ranges
//! they qualify on. Exact-match (TeFlow) entries live in their own field
//! group and use the same entry calls.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BcmResult;
use crate::types::{
    AclRangeHandle, AclStatHandle, EgressId, FieldEntryHandle, GroupId, MirrorHandle,
};

/// Qualifier fields the agent programs and reads back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QualifierField {
    SrcIp6,
    DstIp6,
    L4SrcPort,
    L4DstPort,
    IpProtocol,
    TcpControl,
    SrcPort,
    DstPort,
    IpFrag,
    Dscp,
    IpType,
    EtherType,
    Ttl,
    DstMac,
    DstClassL2,
    DstClassL3,
    SrcL4PortRange,
    DstL4PortRange,
    PacketLengthRange,
}

impl QualifierField {
    /// Every field, in the order entries are qualified and verified.
    pub const ALL: [QualifierField; 19] = [
        QualifierField::SrcIp6,
        QualifierField::DstIp6,
        QualifierField::IpProtocol,
        QualifierField::L4SrcPort,
        QualifierField::L4DstPort,
        QualifierField::TcpControl,
        QualifierField::SrcPort,
        QualifierField::DstPort,
        QualifierField::DstMac,
        QualifierField::IpFrag,
        QualifierField::Dscp,
        QualifierField::IpType,
        QualifierField::EtherType,
        QualifierField::Ttl,
        QualifierField::DstClassL2,
        QualifierField::DstClassL3,
        QualifierField::SrcL4PortRange,
        QualifierField::DstL4PortRange,
        QualifierField::PacketLengthRange,
    ];

    /// Fields for which the SDK reports `0` both for "unset" and for a
    /// programmed zero value.
    pub fn zero_means_unset(&self) -> bool {
        matches!(
            self,
            QualifierField::DstClassL2 | QualifierField::DstClassL3 | QualifierField::IpFrag
        )
    }
}

impl fmt::Display for QualifierField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Data/mask pair as returned by `bcm_field_qualify_X_get`.
///
/// The SDK returns the all-zero pair for qualifiers that were never set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QualifierData {
    pub data: u128,
    pub mask: u128,
}

impl QualifierData {
    /// The zero sentinel returned for unset qualifiers.
    pub const UNSET: Self = Self { data: 0, mask: 0 };

    /// Creates a qualifier value with an explicit mask.
    pub const fn new(data: u128, mask: u128) -> Self {
        Self { data, mask }
    }

    /// Creates an exact-match qualifier on the low `width` bits.
    pub fn exact(data: u128, width: u32) -> Self {
        let mask = if width >= 128 {
            u128::MAX
        } else {
            (1u128 << width) - 1
        };
        Self {
            data: data & mask,
            mask,
        }
    }

    /// Creates a prefix qualifier over a `width`-bit address.
    pub fn prefix(data: u128, prefix_len: u8, width: u32) -> Self {
        let prefix_len = u32::from(prefix_len).min(width);
        let mask = if prefix_len == 0 {
            0
        } else {
            let full = if width >= 128 {
                u128::MAX
            } else {
                (1u128 << width) - 1
            };
            full & !((1u128 << (width - prefix_len)) - 1)
        };
        Self {
            data: data & mask,
            mask,
        }
    }

    /// Returns true if this is the unset sentinel.
    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

/// A qualifier to program on an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Qualifier {
    pub field: QualifierField,
    pub value: QualifierData,
}

impl Qualifier {
    pub fn new(field: QualifierField, value: QualifierData) -> Self {
        Self { field, value }
    }
}

/// Field actions the agent programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum FieldAction {
    Drop,
    CopyToCpu,
    CosQNew(u32),
    CosQCpuNew(u32),
    DscpNew(u8),
    MirrorIngress(MirrorHandle),
    MirrorEgress(MirrorHandle),
    L3Switch(EgressId),
}

impl FieldAction {
    /// Returns true if both actions are of the same SDK action type,
    /// ignoring parameters.
    pub fn same_type(&self, other: &FieldAction) -> bool {
        std::mem::discriminant(self) == std::mem::discriminant(other)
    }
}

/// Counter types a field stat can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatType {
    Packets,
    Bytes,
}

impl fmt::Display for StatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatType::Packets => write!(f, "packets"),
            StatType::Bytes => write!(f, "bytes"),
        }
    }
}

/// Kinds of hardware range checkers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RangeKind {
    SrcL4Port,
    DstL4Port,
    PacketLength,
}

/// A hardware range checker specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RangeSpec {
    pub kind: RangeKind,
    pub min: u32,
    pub max: u32,
}

/// What entry traversal reports for each field entry of a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldEntrySnapshot {
    pub handle: FieldEntryHandle,
    pub priority: i32,
    pub enabled: bool,
}

/// Field processor calls used by ACL and TeFlow entries.
pub trait FieldApi: Send + Sync {
    fn entry_create(&self, group: GroupId) -> BcmResult<FieldEntryHandle>;
    fn entry_destroy(&self, entry: FieldEntryHandle) -> BcmResult<()>;
    fn entry_install(&self, entry: FieldEntryHandle) -> BcmResult<()>;
    fn entry_prio_set(&self, entry: FieldEntryHandle, priority: i32) -> BcmResult<()>;
    fn entry_prio_get(&self, entry: FieldEntryHandle) -> BcmResult<i32>;
    fn entry_enable_set(&self, entry: FieldEntryHandle, enable: bool) -> BcmResult<()>;
    fn entry_enable_get(&self, entry: FieldEntryHandle) -> BcmResult<bool>;

    fn qualify(&self, entry: FieldEntryHandle, qualifier: Qualifier) -> BcmResult<()>;
    /// Reads a qualifier back, [`QualifierData::UNSET`] if never set.
    fn qualifier_get(
        &self,
        entry: FieldEntryHandle,
        field: QualifierField,
    ) -> BcmResult<QualifierData>;

    fn action_add(&self, entry: FieldEntryHandle, action: FieldAction) -> BcmResult<()>;
    fn action_delete(&self, entry: FieldEntryHandle, action: FieldAction) -> BcmResult<()>;
    fn actions_get(&self, entry: FieldEntryHandle) -> BcmResult<Vec<FieldAction>>;

    fn stat_create(&self, group: GroupId, types: &[StatType]) -> BcmResult<AclStatHandle>;
    fn stat_destroy(&self, stat: AclStatHandle) -> BcmResult<()>;
    fn stat_attach(&self, entry: FieldEntryHandle, stat: AclStatHandle) -> BcmResult<()>;
    fn stat_detach(&self, entry: FieldEntryHandle, stat: AclStatHandle) -> BcmResult<()>;
    /// Returns the stat attached to `entry`, if any.
    fn entry_stat_get(&self, entry: FieldEntryHandle) -> BcmResult<Option<AclStatHandle>>;
    fn stat_config_get(&self, stat: AclStatHandle) -> BcmResult<Vec<StatType>>;
    fn stat_get(&self, stat: AclStatHandle, stat_type: StatType) -> BcmResult<u64>;

    fn range_create(&self, spec: &RangeSpec) -> BcmResult<AclRangeHandle>;
    fn range_destroy(&self, range: AclRangeHandle) -> BcmResult<()>;

    /// Invokes `visitor` for every entry of `group`.
    fn entry_traverse(
        &self,
        group: GroupId,
        visitor: &mut dyn FnMut(&FieldEntrySnapshot),
    ) -> BcmResult<()>;

    /// Invokes `visitor` for every range checker.
    fn range_traverse(
        &self,
        visitor: &mut dyn FnMut(AclRangeHandle, &RangeSpec),
    ) -> BcmResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_qualifier_masks_width() {
        let q = QualifierData::exact(0x1ff, 8);
        assert_eq!(q.data, 0xff);
        assert_eq!(q.mask, 0xff);
    }

    #[test]
    fn test_prefix_qualifier() {
        let q = QualifierData::prefix(0xffff_ffff, 24, 32);
        assert_eq!(q.mask, 0xffff_ff00);
        assert_eq!(q.data, 0xffff_ff00);

        let any = QualifierData::prefix(0x1234, 0, 32);
        assert!(any.is_unset());

        let full = QualifierData::prefix(u128::MAX, 128, 128);
        assert_eq!(full.mask, u128::MAX);
    }

    #[test]
    fn test_action_same_type() {
        let a = FieldAction::CosQNew(1);
        assert!(a.same_type(&FieldAction::CosQNew(7)));
        assert!(!a.same_type(&FieldAction::CosQCpuNew(1)));
    }
}
