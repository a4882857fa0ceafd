//! Type-safe SDK handle wrappers.
//!
//! The SDK hands out plain integers for every object it allocates. This
//! module wraps them in [`Handle`], tagged with the kind of object the
//! integer refers to, so a stat handle can never be passed where a field
//! entry handle is expected.

use std::cmp::Ordering;
use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Raw SDK handle type (matches the `int` handles of the C API).
pub type RawHandle = i32;

/// Front panel port number as seen by the SDK.
pub type PortId = u32;

/// Field processor group id.
pub type GroupId = i32;

/// Marker trait for SDK object kinds.
pub trait HandleKind: Send + Sync + 'static {
    /// Returns the SDK object type name for debugging.
    fn type_name() -> &'static str;
}

/// A type-safe SDK handle.
///
/// The SDK uses negative values as "no object"; [`Handle::from_raw`] rejects
/// them so a constructed handle always names an allocated object.
pub struct Handle<T: HandleKind> {
    raw: RawHandle,
    _marker: PhantomData<T>,
}

impl<T: HandleKind> Handle<T> {
    /// The invalid handle (`-1`).
    pub const INVALID: Self = Self {
        raw: -1,
        _marker: PhantomData,
    };

    /// Creates a handle from a raw value.
    ///
    /// Returns `None` for negative values.
    pub fn from_raw(raw: RawHandle) -> Option<Self> {
        if raw < 0 {
            None
        } else {
            Some(Self {
                raw,
                _marker: PhantomData,
            })
        }
    }

    /// Creates a handle from a raw value without validation.
    pub const fn from_raw_unchecked(raw: RawHandle) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Returns the raw handle value.
    pub const fn as_raw(&self) -> RawHandle {
        self.raw
    }

    /// Returns true if this handle names an object.
    pub const fn is_valid(&self) -> bool {
        self.raw >= 0
    }
}

impl<T: HandleKind> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: HandleKind> Copy for Handle<T> {}

impl<T: HandleKind> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", T::type_name(), self.raw)
    }
}

impl<T: HandleKind> fmt::Display for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}

impl<T: HandleKind> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.raw == other.raw
    }
}

impl<T: HandleKind> Eq for Handle<T> {}

impl<T: HandleKind> PartialOrd for Handle<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T: HandleKind> Ord for Handle<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.raw.cmp(&other.raw)
    }
}

impl<T: HandleKind> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.raw.hash(state);
    }
}

impl<T: HandleKind> Default for Handle<T> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<T: HandleKind> Serialize for Handle<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i32(self.raw)
    }
}

impl<'de, T: HandleKind> Deserialize<'de> for Handle<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        RawHandle::deserialize(deserializer).map(Self::from_raw_unchecked)
    }
}

// ============================================================================
// Handle Kind Markers
// ============================================================================

macro_rules! define_handle_kind {
    ($name:ident, $type_name:literal, $alias:ident) => {
        #[doc = concat!("Marker type for SDK ", $type_name, " objects.")]
        #[derive(Debug, Clone, Copy)]
        pub struct $name;

        impl HandleKind for $name {
            fn type_name() -> &'static str {
                $type_name
            }
        }

        #[doc = concat!("Handle of an SDK ", $type_name, " object.")]
        pub type $alias = Handle<$name>;
    };
}

define_handle_kind!(FieldEntryKind, "FieldEntry", FieldEntryHandle);
define_handle_kind!(FieldStatKind, "FieldStat", AclStatHandle);
define_handle_kind!(FieldRangeKind, "FieldRange", AclRangeHandle);
define_handle_kind!(FlexCounterKind, "FlexCounter", TeFlowStatHandle);
define_handle_kind!(MirrorDestKind, "MirrorDest", MirrorHandle);
define_handle_kind!(EgressKind, "Egress", EgressId);
define_handle_kind!(GportKind, "Gport", Gport);

/// ACL entries live in the ternary field processor group.
pub type AclEntryHandle = FieldEntryHandle;

/// TeFlow entries are field entries of the exact-match group.
pub type TeFlowEntryHandle = FieldEntryHandle;

/// Encodes the modport gport of a front panel port.
pub fn port_gport(port: PortId) -> Gport {
    // BCM_GPORT_TYPE_MODPORT in the upper bits, port number below
    const GPORT_TYPE_MODPORT: RawHandle = 0x0800_0000;
    Gport::from_raw_unchecked(GPORT_TYPE_MODPORT | (port as RawHandle & 0xff_ffff))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_creation() {
        let entry = AclEntryHandle::from_raw(7).unwrap();
        assert_eq!(entry.as_raw(), 7);
        assert!(entry.is_valid());
    }

    #[test]
    fn test_invalid_handle() {
        assert!(AclStatHandle::from_raw(-1).is_none());
        assert!(!AclStatHandle::INVALID.is_valid());
        assert_eq!(AclStatHandle::default(), AclStatHandle::INVALID);
    }

    #[test]
    fn test_handle_debug() {
        let stat = AclStatHandle::from_raw(12).unwrap();
        assert_eq!(format!("{:?}", stat), "FieldStat(12)");
        assert_eq!(stat.to_string(), "12");
    }

    #[test]
    fn test_handle_ordering() {
        let a = MirrorHandle::from_raw(1).unwrap();
        let b = MirrorHandle::from_raw(2).unwrap();
        assert!(a < b);
        assert_eq!(a.max(b), b);
    }

    struct Opaque;

    impl HandleKind for Opaque {
        fn type_name() -> &'static str {
            "Opaque"
        }
    }

    fn both<T: Copy>(value: T) -> (T, T) {
        (value, value)
    }

    #[test]
    fn test_handle_is_copy_for_any_kind() {
        let handle = Handle::<Opaque>::from_raw(3).unwrap();
        let (a, b) = both(handle);
        assert_eq!(a, b);
        assert_eq!(handle.as_raw(), 3);
    }

    #[test]
    fn test_port_gport_is_stable() {
        assert_eq!(port_gport(1), port_gport(1));
        assert_ne!(port_gport(1), port_gport(2));
        assert!(port_gport(1).is_valid());
    }
}
