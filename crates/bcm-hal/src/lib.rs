//! Bcm hardware layer - warm boot reconciliation and resource lifecycle
//!
//! This crate programs a software switch state (ACL entries, TeFlow
//! exact-match entries, mirrors, port mirroring) into a Broadcom ASIC
//! through the SDK bindings in `bcm-sdk`, and survives a warm boot: a
//! restarted agent adopts the objects already programmed in silicon instead
//! of recreating them, and removes whatever the new state no longer needs.
//!
//! # Architecture
//!
//! ```text
//! [SwitchState] ─delta─> [HwSwitch] ──> AclTable ──┬─> AclStatTable ──┐
//!                            │          TeFlowTable ┼─> AclRangeTable  ├─> [BcmSdk]
//!                            │          MirrorTable ┤   NextHopTable   │
//!                            │          PortTable ──┘                  │
//!                            │                                         │
//!                      [WarmBootCache] <──── populate (traversal) ─────┘
//!                            │
//!                      [StatUpdater] <─ refresh per delta, poll on a timer
//! ```
//!
//! # Key Components
//!
//! - [`switch::HwSwitch`]: applies state deltas in dependency order, rolls
//!   back failed ones, sweeps unclaimed hardware after init
//! - [`warm_boot::WarmBootCache`]: snapshot of programmed hardware that
//!   tables claim objects from; whatever is left is swept
//! - [`acl`], [`teflow`], [`mirror`], [`port`]: per-feature tables and the
//!   entry managers that adopt or create hardware objects
//! - [`stats`]: exported counters, refreshed once per delta and polled in
//!   the background
//!
//! Tables reach each other only through the narrow traits in
//! [`capabilities`].

// ============================================================================
// Infrastructure
// ============================================================================

pub mod audit;
pub mod capabilities;
pub mod config;
pub mod error;
pub mod hw;

// ============================================================================
// State and warm boot
// ============================================================================

pub mod state;
pub mod warm_boot;

// ============================================================================
// Feature tables
// ============================================================================

pub mod acl;
pub mod mirror;
pub mod nexthop;
pub mod port;
pub mod stats;
pub mod teflow;

// ============================================================================
// Coordinator
// ============================================================================

pub mod switch;

// ============================================================================
// Re-exports
// ============================================================================

pub use config::{AsicFamily, HalConfig};
pub use error::{HalError, HalResult};
pub use state::{SwitchState, SwitchStateConfig, SwitchStateDelta};
pub use stats::{spawn_stat_poller, StatUpdater};
pub use switch::HwSwitch;
pub use warm_boot::{SweepReport, WarmBootCache, WarmBootState};
