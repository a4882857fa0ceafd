//! Narrow adapter traits over the vendor SDK.
//!
//! Each submodule covers one SDK subsystem. Handles are typed, return codes
//! are translated into [`BcmError`](crate::error::BcmError) and hardware
//! enumeration is exposed as visitor callbacks instead of the C traversal
//! ABI.
//!
//! - [`field`]: field processor entries, stats and range checkers
//! - [`flex_counter`]: flex counters used by exact-match entries
//! - [`mirror`]: mirror destinations and port mirror associations
//! - [`l3`]: L3 egress objects used by redirect actions

pub mod field;
pub mod flex_counter;
pub mod l3;
pub mod mirror;

pub use field::{
    FieldAction, FieldApi, FieldEntrySnapshot, Qualifier, QualifierData, QualifierField,
    RangeKind, RangeSpec, StatType,
};
pub use flex_counter::{
    CounterActionIndex, FlexCounterApi, FlexCounterAttachment, DEFAULT_COUNTER_ACTION_INDEX,
};
pub use l3::{EgressPath, L3Api};
pub use mirror::{MirrorApi, MirrorDestination, TunnelConfig};

/// The full SDK surface of one hardware unit.
pub trait BcmSdk: FieldApi + FlexCounterApi + MirrorApi + L3Api {}

impl<T> BcmSdk for T where T: FieldApi + FlexCounterApi + MirrorApi + L3Api {}
