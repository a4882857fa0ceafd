//! ACL entries in the ternary field processor group.
//!
//! # Architecture
//!
//! ```text
//! AclEntryState delta
//!        │
//!        ▼
//!    AclTable ──────────> AclEntry (one field entry each)
//!        │                    │
//!        ├──> AclStatTable ◄──┤ named stats, shared by refcount
//!        ├──> AclRangeTable ◄─┤ L4 port / packet length ranges
//!        │                    ├──> MultiPathNextHopTable (redirect)
//!        │                    └──> MirrorTableAccess (ingress/egress mirror)
//!        ▼
//!   WarmBootCache (adopt by priority, verify, claim)
//! ```
//!
//! Hardware priorities grow in the opposite direction to software
//! priorities: the entry with the lowest software priority value wins, so it
//! is programmed with the highest hardware priority.

mod entry;
mod equivalence;
mod qualifiers;
mod range;
mod stat;
mod table;

pub use entry::AclEntry;
pub use equivalence::StatEquivalence;
pub use qualifiers::{
    expected_qualifiers, icmp_qualifier, ip_prefix_from_qualifier, ip_prefix_qualifier,
    qualifier_matches, range_specs,
};
pub use range::{AclRange, AclRangeTable};
pub use stat::{AclStat, AclStatTable};
pub use table::{AclDeps, AclTable};

/// Hardware priority of software priority 0.
pub const ACL_START_PRIORITY: i32 = 100_000;

pub fn sw_priority_to_hw(priority: i32) -> i32 {
    ACL_START_PRIORITY - priority
}

pub fn hw_priority_to_sw(priority: i32) -> i32 {
    ACL_START_PRIORITY - priority
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_mapping_is_inverse() {
        assert_eq!(sw_priority_to_hw(0), ACL_START_PRIORITY);
        assert_eq!(sw_priority_to_hw(10), 99_990);
        assert_eq!(hw_priority_to_sw(sw_priority_to_hw(42)), 42);
        assert!(sw_priority_to_hw(1) > sw_priority_to_hw(2));
    }
}
