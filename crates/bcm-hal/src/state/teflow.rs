//! TeFlow (exact-match redirect) state.

use std::collections::BTreeSet;
use std::fmt;

use bcm_sdk::PortId;
use serde::{Deserialize, Serialize};

use super::{IpPrefix, NextHop};
use crate::debug_log;

/// Identity of a TeFlow entry: ingress port plus destination prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TeFlowKey {
    pub src_port: PortId,
    pub dst_prefix: IpPrefix,
}

impl TeFlowKey {
    pub fn new(src_port: PortId, dst_prefix: IpPrefix) -> Self {
        Self {
            src_port,
            dst_prefix,
        }
    }
}

impl fmt::Display for TeFlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "port {} dst {}", self.src_port, self.dst_prefix)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeFlowEntryState {
    pub flow: TeFlowKey,
    /// Resolved next hops traffic is redirected to.
    #[serde(default)]
    pub next_hops: BTreeSet<NextHop>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counter_id: Option<String>,
    #[serde(default)]
    pub enabled: bool,
    /// Explicit stat switch. Older states leave it unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stat_enabled: Option<bool>,
}

impl TeFlowEntryState {
    pub fn new(flow: TeFlowKey) -> Self {
        Self {
            flow,
            next_hops: BTreeSet::new(),
            counter_id: None,
            enabled: false,
            stat_enabled: None,
        }
    }
}

/// Whether the entry carries a stat.
///
/// The explicit `stat_enabled` flag wins. States written before the flag
/// existed fall back to [`legacy_stat_enabled`].
pub fn resolve_stat_enabled(state: &TeFlowEntryState) -> bool {
    match state.stat_enabled {
        Some(enabled) => enabled,
        None => {
            let enabled = legacy_stat_enabled(state);
            debug_log!(
                "TeFlowEntry",
                flow = %state.flow,
                "stat_enabled unset, legacy derivation gives {}",
                enabled
            );
            enabled
        }
    }
}

/// Pre-flag derivation: enabled entries with a counter id had a stat.
// TODO: drop once no persisted state predates `stat_enabled`.
pub fn legacy_stat_enabled(state: &TeFlowEntryState) -> bool {
    state.enabled && state.counter_id.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv6Addr};

    fn entry() -> TeFlowEntryState {
        let prefix = IpPrefix::new(IpAddr::V6(Ipv6Addr::new(0x100, 0, 0, 0, 0, 0, 0, 0)), 64);
        TeFlowEntryState::new(TeFlowKey::new(1, prefix))
    }

    #[test]
    fn test_explicit_flag_wins() {
        let state = TeFlowEntryState {
            enabled: true,
            counter_id: Some("c0".to_string()),
            stat_enabled: Some(false),
            ..entry()
        };
        assert!(!resolve_stat_enabled(&state));

        let state = TeFlowEntryState {
            enabled: false,
            stat_enabled: Some(true),
            counter_id: Some("c0".to_string()),
            ..entry()
        };
        assert!(resolve_stat_enabled(&state));
    }

    #[test]
    fn test_legacy_derivation() {
        let state = TeFlowEntryState {
            enabled: true,
            counter_id: Some("c0".to_string()),
            ..entry()
        };
        assert!(resolve_stat_enabled(&state));

        let state = TeFlowEntryState {
            enabled: false,
            ..state
        };
        assert!(!resolve_stat_enabled(&state));

        let state = TeFlowEntryState {
            enabled: true,
            counter_id: None,
            ..entry()
        };
        assert!(!legacy_stat_enabled(&state));
    }
}
