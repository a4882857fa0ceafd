//! Typed adapter over the Broadcom switch SDK.
//!
//! The SDK allocates every hardware object behind a plain integer handle and
//! reports failures as negative return codes. This crate keeps that surface
//! thin but safe:
//!
//! - [`types`]: typed handles so a stat handle is never used as an entry
//! - [`error`]: `BCM_E_*` status codes and the [`BcmError`] type
//! - [`api`]: the per-subsystem adapter traits, combined into [`BcmSdk`]
//! - [`fake`]: an in-memory SDK used by tests and by the agent when no
//!   vendor SDK is linked
//!
//! # Example
//!
//! ```ignore
//! use bcm_sdk::{BcmResult, BcmSdk, FieldEntryHandle};
//!
//! fn remove_entry(sdk: &dyn BcmSdk, entry: FieldEntryHandle) -> BcmResult<()> {
//!     if let Some(stat) = sdk.entry_stat_get(entry)? {
//!         sdk.stat_detach(entry, stat)?;
//!     }
//!     sdk.entry_destroy(entry)
//! }
//! ```

pub mod api;
pub mod error;
pub mod fake;
pub mod types;

pub use api::BcmSdk;
pub use error::{BcmError, BcmResult, BcmStatus, BcmStatusExt};
pub use fake::{FakeDump, FakeLimits, FakeSdk, SdkCall};
pub use types::{
    port_gport, AclEntryHandle, AclRangeHandle, AclStatHandle, EgressId, EgressKind,
    FieldEntryHandle, FieldEntryKind, FieldRangeKind, FieldStatKind, FlexCounterKind, GportKind,
    GroupId, Gport, Handle, HandleKind, MirrorDestKind, MirrorHandle, PortId, RawHandle,
    TeFlowEntryHandle, TeFlowStatHandle,
};
