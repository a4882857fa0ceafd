//! Port state, as far as mirroring is concerned.

use bcm_sdk::PortId;
use serde::{Deserialize, Serialize};

/// Where sampled packets of a port go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleDestination {
    Cpu,
    /// Samples leave through the port's (sFlow) ingress mirror.
    Mirror,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortState {
    pub id: PortId,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ingress_mirror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub egress_mirror: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_dest: Option<SampleDestination>,
}

impl PortState {
    pub fn new(id: PortId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            ingress_mirror: None,
            egress_mirror: None,
            sample_dest: None,
        }
    }

    pub fn samples_to_mirror(&self) -> bool {
        self.sample_dest == Some(SampleDestination::Mirror)
    }
}
