//! Replication Catch-Up Tracking
//!
//! Measures how far a slave's applied position trails the master's log.
//!
//! ## Responsibilities
//! - Backlog between a reported position and the current segment set
//! - Master operating mode (invalid / normal / slaveless / catchup)
//! - Slave catch-up status, monotonic under a stable master log
//!
//! Shipping segments over the network is not handled here. Both trackers
//! only read archived and active segments, so they need no coordination
//! with the manager's append lock beyond taking a segment snapshot.

mod backlog;
mod status;
mod tracker;

pub use backlog::compute_backlog;
pub use status::{MasterCatchUpStatus, OperatingMode, ReplicationPosition, SlaveCatchUpStatus};
pub use tracker::{MasterTracker, SlaveTracker};
