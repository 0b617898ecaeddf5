//! Transport layer.
//!
//! Moves [`Envelope`](crate::core::Envelope)s between the two peers of a
//! dyad over a fixed pair of UDP addresses. It provides:
//!
//! - **Async socket**: [`Transport`] with a background receive task and a
//!   bounded queue
//! - **Timing**: [`MonotonicClock`] for envelope timestamps and
//!   [`LatencyEstimator`] for diagnostics
//! - **Counters**: [`TransportStats`]
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │     Round controller / aggregator       │
//! ├─────────────────────────────────────────┤
//! │   Stage synchronizer / peer session     │
//! ├─────────────────────────────────────────┤
//! │         Transport Layer                 │  ← This module
//! │   JSON envelopes, queue, counters       │
//! ├─────────────────────────────────────────┤
//! │              UDP                        │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Delivery is best-effort. Nothing here retries, reorders or
//! deduplicates; the layers above tolerate loss and duplicates.

mod socket;
mod stats;
mod timing;

pub use socket::*;
pub use stats::*;
pub use timing::*;
