//! Stage synchronization layer.
//!
//! Implements:
//! - Initiator-driven stage announcements with bounded ack waits
//! - Follower-side bounded waits for announcements
//! - Dropping of stale transitions and retention of early ones
//! - Transition counters for diagnostics

mod stage;

pub use stage::*;
