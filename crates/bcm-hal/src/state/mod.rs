//! Software switch state consumed by the hardware layer.
//!
//! Snapshots are immutable: every object sits behind an `Arc` and a new
//! snapshot shares whatever did not change, so the delta between two
//! snapshots only carries the objects that really differ.
//!
//! [`SwitchStateConfig`] is the on-disk form (plain lists) the agent binary
//! reads with `--state`.

pub mod acl;
pub mod mirror;
pub mod port;
pub mod teflow;

use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;

use bcm_hal_common::StateDelta;
use bcm_sdk::api::EgressPath;
use bcm_sdk::PortId;
use serde::{Deserialize, Serialize};

use crate::error::{HalError, HalResult};

pub use acl::{
    AclActionType, AclEntryState, IpFragMatch, IpPrefix, IpType, MatchAction, RedirectToNextHop,
    SendToQueue, TrafficCounter, TtlMatch, ValueRange,
};
pub use mirror::{MirrorAction, MirrorDirection, MirrorState};
pub use port::{PortState, SampleDestination};
pub use teflow::{resolve_stat_enabled, TeFlowEntryState, TeFlowKey};

/// A resolved next hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NextHop {
    pub port: PortId,
    pub ip: IpAddr,
}

impl NextHop {
    pub fn new(port: PortId, ip: IpAddr) -> Self {
        Self { port, ip }
    }
}

impl From<NextHop> for EgressPath {
    fn from(nh: NextHop) -> Self {
        EgressPath {
            port: nh.port,
            ip: nh.ip,
        }
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.ip, self.port)
    }
}

/// One immutable snapshot of the state the hardware layer programs.
#[derive(Debug, Clone, Default)]
pub struct SwitchState {
    pub acls: BTreeMap<String, Arc<AclEntryState>>,
    pub teflows: BTreeMap<TeFlowKey, Arc<TeFlowEntryState>>,
    pub mirrors: BTreeMap<String, Arc<MirrorState>>,
    pub ports: BTreeMap<PortId, Arc<PortState>>,
}

impl SwitchState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_acl(mut self, acl: AclEntryState) -> Self {
        self.acls.insert(acl.name.clone(), Arc::new(acl));
        self
    }

    pub fn with_teflow(mut self, entry: TeFlowEntryState) -> Self {
        self.teflows.insert(entry.flow, Arc::new(entry));
        self
    }

    pub fn with_mirror(mut self, mirror: MirrorState) -> Self {
        self.mirrors.insert(mirror.name.clone(), Arc::new(mirror));
        self
    }

    pub fn with_port(mut self, port: PortState) -> Self {
        self.ports.insert(port.id, Arc::new(port));
        self
    }

    pub fn without_acl(mut self, name: &str) -> Self {
        self.acls.remove(name);
        self
    }

    pub fn acl(&self, name: &str) -> Option<&Arc<AclEntryState>> {
        self.acls.get(name)
    }

    pub fn mirror(&self, name: &str) -> Option<&Arc<MirrorState>> {
        self.mirrors.get(name)
    }

    /// Checks the cross-object invariants the hardware layer relies on.
    pub fn validate(&self) -> HalResult<()> {
        let mut priorities = BTreeMap::new();
        for acl in self.acls.values() {
            acl.validate().map_err(HalError::InvalidConfig)?;
            if let Some(other) = priorities.insert(acl.priority, &acl.name) {
                return Err(HalError::InvalidConfig(format!(
                    "acls {} and {} share priority {}",
                    other, acl.name, acl.priority
                )));
            }
            for mirror in [acl.ingress_mirror(), acl.egress_mirror()].into_iter().flatten() {
                if !self.mirrors.contains_key(mirror) {
                    return Err(HalError::InvalidConfig(format!(
                        "acl {} references unknown mirror {}",
                        acl.name, mirror
                    )));
                }
            }
        }
        for port in self.ports.values() {
            for mirror in [&port.ingress_mirror, &port.egress_mirror].into_iter().flatten() {
                if !self.mirrors.contains_key(mirror) {
                    return Err(HalError::InvalidConfig(format!(
                        "port {} references unknown mirror {}",
                        port.id, mirror
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Per-feature deltas between two snapshots.
#[derive(Debug, Clone, Default)]
pub struct SwitchStateDelta {
    pub acls: StateDelta<AclEntryState>,
    pub teflows: StateDelta<TeFlowEntryState>,
    pub mirrors: StateDelta<MirrorState>,
    pub ports: StateDelta<PortState>,
}

impl SwitchStateDelta {
    pub fn between(old: &SwitchState, new: &SwitchState) -> Self {
        Self {
            acls: StateDelta::between(&old.acls, &new.acls),
            teflows: StateDelta::between(&old.teflows, &new.teflows),
            mirrors: StateDelta::between(&old.mirrors, &new.mirrors),
            ports: StateDelta::between(&old.ports, &new.ports),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.acls.is_empty()
            && self.teflows.is_empty()
            && self.mirrors.is_empty()
            && self.ports.is_empty()
    }
}

/// File form of a [`SwitchState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchStateConfig {
    #[serde(default)]
    pub acls: Vec<AclEntryState>,
    #[serde(default)]
    pub teflows: Vec<TeFlowEntryState>,
    #[serde(default)]
    pub mirrors: Vec<MirrorState>,
    #[serde(default)]
    pub ports: Vec<PortState>,
}

impl SwitchStateConfig {
    pub fn load(path: impl AsRef<Path>) -> HalResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            HalError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&content).map_err(|e| {
            HalError::InvalidConfig(format!("failed to parse {}: {}", path.display(), e))
        })
    }

    pub fn into_state(self) -> HalResult<SwitchState> {
        let mut state = SwitchState::new();
        for acl in self.acls {
            if state.acls.contains_key(&acl.name) {
                return Err(HalError::exists("acl", &acl.name));
            }
            state = state.with_acl(acl);
        }
        for entry in self.teflows {
            if state.teflows.contains_key(&entry.flow) {
                return Err(HalError::exists("teflow entry", entry.flow));
            }
            state = state.with_teflow(entry);
        }
        for mirror in self.mirrors {
            if state.mirrors.contains_key(&mirror.name) {
                return Err(HalError::exists("mirror", &mirror.name));
            }
            state = state.with_mirror(mirror);
        }
        for port in self.ports {
            if state.ports.contains_key(&port.id) {
                return Err(HalError::exists("port", port.id));
            }
            state = state.with_port(port);
        }
        state.validate()?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bcm_hal_common::DeltaEvent;

    #[test]
    fn test_delta_shares_unchanged_objects() {
        let old = SwitchState::new()
            .with_acl(AclEntryState::new("acl0", 1))
            .with_acl(AclEntryState::new("acl1", 2));
        let new = old.clone().without_acl("acl0").with_acl(AclEntryState {
            dscp: Some(10),
            ..AclEntryState::new("acl1", 2)
        });

        let delta = SwitchStateDelta::between(&old, &new);
        let events: Vec<_> = delta.acls.iter().collect();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], DeltaEvent::Removed(acl) if acl.name == "acl0"));
        assert!(matches!(events[1], DeltaEvent::Changed { new, .. } if new.dscp == Some(10)));
        assert!(delta.mirrors.is_empty());
    }

    #[test]
    fn test_validate_rejects_duplicate_priority() {
        let state = SwitchState::new()
            .with_acl(AclEntryState::new("acl0", 1))
            .with_acl(AclEntryState::new("acl1", 1));
        assert!(matches!(state.validate(), Err(HalError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_unknown_mirror() {
        let port = PortState {
            ingress_mirror: Some("missing".to_string()),
            ..PortState::new(1, "eth1/1/1")
        };
        let state = SwitchState::new().with_port(port);
        assert!(state.validate().is_err());

        let state = state.with_mirror(MirrorState::span("missing", 2));
        assert!(state.validate().is_ok());
    }

    #[test]
    fn test_state_config_rejects_duplicate_names() {
        let config = SwitchStateConfig {
            acls: vec![AclEntryState::new("acl0", 1), AclEntryState::new("acl0", 2)],
            ..Default::default()
        };
        assert!(matches!(
            config.into_state(),
            Err(HalError::ObjectExists { .. })
        ));
    }
}
