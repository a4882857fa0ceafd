//! Narrow interfaces tables use to reach each other.
//!
//! Tables never hold references to one another. The switch passes the
//! capability a table needs into each call, so the coupling between features
//! is visible in the signatures.

use bcm_sdk::api::StatType;
use bcm_sdk::{AclEntryHandle, AclStatHandle, MirrorHandle, PortId, TeFlowStatHandle};

use crate::error::HalResult;
use crate::state::{MirrorAction, MirrorDirection, SampleDestination};
use crate::warm_boot::WarmBootCache;

/// Intake side of the stat updater. Calls only queue the change; nothing is
/// visible to the poller before the next refresh.
pub trait StatTableAccess {
    fn to_be_added_acl_stat(&mut self, handle: AclStatHandle, name: &str, types: &[StatType]);
    fn to_be_removed_acl_stat(&mut self, handle: AclStatHandle);
    fn to_be_added_teflow_stat(&mut self, handle: TeFlowStatHandle, name: &str, types: &[StatType]);
    fn to_be_removed_teflow_stat(&mut self, handle: TeFlowStatHandle);
}

/// Mirror lookups and mirror actions on behalf of ports and ACL entries.
///
/// Actions against a mirror that does not exist or is not programmed are
/// skipped; the mirror applies them to its users once it is programmed.
pub trait MirrorTableAccess {
    /// Destination handle of a programmed mirror.
    fn mirror_handle(&self, name: &str) -> Option<MirrorHandle>;

    fn apply_acl_mirror_action(
        &self,
        name: &str,
        entry: AclEntryHandle,
        action: MirrorAction,
        direction: MirrorDirection,
        cache: &mut WarmBootCache,
    ) -> HalResult<()>;

    fn apply_port_mirror_action(
        &mut self,
        name: &str,
        port: PortId,
        action: MirrorAction,
        direction: MirrorDirection,
        sample_dest: Option<SampleDestination>,
        cache: &mut WarmBootCache,
    ) -> HalResult<()>;
}

/// Ports that mirror through a given mirror.
pub trait PortTableAccess {
    fn mirrored_ports(
        &self,
        mirror: &str,
    ) -> Vec<(PortId, MirrorDirection, Option<SampleDestination>)>;
}

/// ACL entries that mirror through a given mirror.
pub trait AclMirrorAccess {
    fn acl_mirror_users(&self, mirror: &str) -> Vec<(AclEntryHandle, MirrorDirection)>;
}
