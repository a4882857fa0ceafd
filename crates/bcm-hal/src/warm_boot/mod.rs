//! Warm boot: the hardware snapshot cache and the persisted state blob.

mod cache;
mod state;

pub use cache::{AclStatStatus, SweepReport, TeFlowStatStatus, WarmBootCache};
pub use state::{AclStatRecord, TeFlowGroupState, WarmBootState, WARM_BOOT_STATE_VERSION};
