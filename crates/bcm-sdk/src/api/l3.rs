//! L3 egress adapter surface used for redirect actions.

use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::BcmResult;
use crate::types::{EgressId, PortId};

/// One resolved path of a (multipath) egress object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EgressPath {
    pub port: PortId,
    pub ip: IpAddr,
}

/// L3 egress calls.
pub trait L3Api: Send + Sync {
    /// Creates an (ECMP) egress object over `paths`.
    fn egress_create(&self, paths: &[EgressPath]) -> BcmResult<EgressId>;
    fn egress_destroy(&self, egress: EgressId) -> BcmResult<()>;
    /// The egress that drops traffic, owned by the SDK.
    fn drop_egress_id(&self) -> EgressId;

    /// Invokes `visitor` for every egress object created by the agent.
    fn egress_traverse(&self, visitor: &mut dyn FnMut(EgressId, &[EgressPath]))
        -> BcmResult<()>;
}
