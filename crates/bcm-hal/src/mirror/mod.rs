//! Mirror sessions.
//!
//! A mirror owns one hardware destination. Ports and ACL entries start and
//! stop mirroring through the [`MirrorTableAccess`](crate::capabilities::MirrorTableAccess)
//! capability; the mirror only keeps the count of mirrored ports, which
//! sFlow destinations need because every sampled port shares a single
//! port-to-destination binding.
//!
//! Mirrors that are not resolved yet (a tunneled mirror with no tunnel) are
//! kept in software and ignore actions. When they resolve, the state layer
//! sends a changed mirror and the table starts every user on the new
//! destination.

mod destination;
mod entry;
mod table;

pub use destination::MirrorDest;
pub use entry::{acl_mirror_action, port_mirror_flags, Mirror};
pub use table::MirrorTable;
