//! Counter type comparison for warm-booted stats.

use std::collections::BTreeSet;

use bcm_sdk::api::StatType;
use serde::{Deserialize, Serialize};

/// How the counter types read back from an existing stat are matched against
/// the configured ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatEquivalence {
    /// Hardware and software name exactly the same types.
    Exact,
    /// Hardware may carry types software did not ask for.
    Includes,
}

impl StatEquivalence {
    pub fn matches(&self, hw: &[StatType], sw: &[StatType]) -> bool {
        let hw: BTreeSet<_> = hw.iter().copied().collect();
        let sw: BTreeSet<_> = sw.iter().copied().collect();
        match self {
            StatEquivalence::Exact => hw == sw,
            StatEquivalence::Includes => hw.is_superset(&sw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact() {
        let eq = StatEquivalence::Exact;
        assert!(eq.matches(&[StatType::Packets], &[StatType::Packets]));
        assert!(eq.matches(
            &[StatType::Bytes, StatType::Packets],
            &[StatType::Packets, StatType::Bytes]
        ));
        assert!(!eq.matches(&[StatType::Packets, StatType::Bytes], &[StatType::Packets]));
    }

    #[test]
    fn test_includes() {
        let eq = StatEquivalence::Includes;
        assert!(eq.matches(&[StatType::Packets, StatType::Bytes], &[StatType::Packets]));
        assert!(!eq.matches(&[StatType::Bytes], &[StatType::Packets]));
    }
}
