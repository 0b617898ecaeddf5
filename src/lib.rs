//! # dyad-sync
//!
//! Trial synchronization for two paired machines running the same
//! experiment over UDP.
//!
//! Each side runs one [`RoundController`](round::RoundController). The
//! controllers agree on the round number, start every stage of a round at
//! roughly the same moment, exchange each participant's answer, and
//! resolve a shared score with one rule:
//!
//! - **First responder takes all**: the faster answer decides the round for
//!   both peers. If it is correct, both scores go up by one; otherwise
//!   neither does.
//!
//! The protocol is best-effort throughout. Every wait is bounded, lost
//! acks are warnings, and a missing peer leaves its response slot empty.
//!
//! ## Feature Flags
//!
//! - `transport` (default): JSON envelopes over UDP, receive queue, latency
//! - `sync` (default): handshake, stage synchronizer, round controller
//!
//! ## Modules
//!
//! - [`core`]: Envelope format, configuration, errors and collaborator traits
//!   (always included)
//! - [`round`]: Round state, scoring and result records (always included);
//!   aggregator and controller with `sync`
//! - [`transport`]: UDP transport (requires `transport` feature)
//! - [`session`]: Peer session and handshake (requires `sync` feature)
//! - [`sync`]: Stage synchronizer (requires `sync` feature)
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use dyad_sync::prelude::*;
//! use serde_json::{Value, json};
//!
//! struct Fixed;
//!
//! impl TrialHost for Fixed {
//!     fn generate_round(&mut self, round: u32) -> Value {
//!         json!({ "target": round % 4 })
//!     }
//!
//!     fn ground_truth(&self, spec: &Value) -> Option<String> {
//!         let idx = spec["target"].as_u64()? as usize;
//!         ["house", "car", "face", "limb"].get(idx).map(|s| s.to_string())
//!     }
//!
//!     fn poll_response(&mut self, _round: &RoundState, elapsed: Duration) -> Option<String> {
//!         (elapsed > Duration::from_millis(800)).then(|| "face".to_string())
//!     }
//! }
//!
//! # async fn run() -> Result<(), ProtocolError> {
//! let config = ProtocolConfigBuilder::new()
//!     .role(Role::Initiator)
//!     .peers("A", "B")
//!     .bind_addr("0.0.0.0:5006".parse().unwrap())
//!     .remote_addr("192.168.1.20:5006".parse().unwrap())
//!     .rounds(5)
//!     .build();
//!
//! let mut sink = MemorySink::new();
//! let mut controller = RoundController::bind(config, Fixed, &mut sink).await?;
//! let summary = controller.run().await?;
//! println!("{:?}", summary.termination);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// Core module (always included)
pub mod core;

// Round state and scoring (controller is feature-gated inside)
pub mod round;

// Transport layer (feature-gated)
#[cfg(feature = "transport")]
#[cfg_attr(docsrs, doc(cfg(feature = "transport")))]
pub mod transport;

// Peer session layer (feature-gated)
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod session;

// Stage synchronization layer (feature-gated)
#[cfg(feature = "sync")]
#[cfg_attr(docsrs, doc(cfg(feature = "sync")))]
pub mod sync;

/// Prelude module for convenient imports.
pub mod prelude {
    // Core traits and types
    pub use crate::core::*;

    // Round state, scoring and sinks
    pub use crate::round::{
        MemorySink, JsonLinesSink, RecordOutcome, Response, RoundOutcome, RoundRecord,
        RoundState, ScoreState, score_round,
    };

    // Transport types (when enabled)
    #[cfg(feature = "transport")]
    pub use crate::transport::{
        LatencyEstimator, MonotonicClock, Received, Transport, TransportBuilder,
        TransportStatsSnapshot,
    };

    // Session driver (when enabled)
    #[cfg(feature = "sync")]
    pub use crate::round::{RoundController, SessionSummary, Termination};
    #[cfg(feature = "sync")]
    pub use crate::session::CancelHandle;
}

// Re-export commonly used items at crate root
pub use crate::core::{Envelope, MessageType, PeerId, PeerMode, ProtocolConfig, Role, Stage};

#[cfg(feature = "sync")]
pub use crate::round::{RoundController, SessionSummary, Termination};
