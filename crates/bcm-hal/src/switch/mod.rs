//! The hardware switch: owns every table and applies state deltas to them.
//!
//! A delta is applied in dependency order so that an object is always torn
//! down before a replacement that may reuse its shared resources is built,
//! and mirrors exist before the ACL entries that point at them:
//!
//! 1. removed ACL entries (and the old side of changed ones), removed TeFlows
//! 2. ports
//! 3. mirrors: removed, changed, added
//! 4. changed and added ACL entries, changed and added TeFlows
//!
//! Stat registrations queued on the way are handed to the [`StatUpdater`]
//! once the whole delta is in. A failed delta is rolled back to the last
//! applied state.
//!
//! [`StatUpdater`]: crate::stats::StatUpdater

mod hw_switch;

pub use hw_switch::HwSwitch;
