//! Shared abstractions for the Bcm hardware layer.
//!
//! - [`RefCountMap`]: keyed shared-resource table that never creates entries
//!   implicitly and treats refcount misuse as an error
//! - [`StateDelta`] / [`DeltaEvent`]: added/removed/changed events computed
//!   between two immutable state snapshots
//!
//! # Example
//!
//! ```
//! use bcm_hal_common::RefCountMap;
//!
//! let mut stats: RefCountMap<String, u32> = RefCountMap::new();
//! let (_, refs) = stats
//!     .inc_ref_or_create("stat0".to_string(), || Ok::<_, ()>(7))
//!     .unwrap();
//! assert_eq!(refs, 1);
//! assert_eq!(stats.deref(&"stat0".to_string()).unwrap(), Some(7));
//! ```

mod delta;
mod refcount;

pub use delta::{DeltaEvent, StateDelta};
pub use refcount::{HasRefCount, RefCountError, RefCountMap, RefCounted};
