//! TeFlow: exact-match entries that redirect a (source port, destination
//! prefix) flow to a set of next hops, optionally counted by a flex counter.
//!
//! Entries live in their own field group whose destination prefix length is
//! fixed when the group is created and carried across warm boots.

mod entry;
mod stat;
mod table;

pub use entry::{flow_key_from_hw, src_port_qualifier, TeFlowEntry};
pub use stat::{TeFlowStat, TeFlowStatTable, TEFLOW_STAT_TYPES};
pub use table::{TeFlowDeps, TeFlowTable};
