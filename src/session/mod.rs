//! Peer session layer.
//!
//! - [`PeerSession`]: handshake phase, liveness and latency of the peer
//! - [`PeerLink`]: bounded waits over a transport, with control traffic
//!   (ping, pong, `end_experiment`) handled on every tick
//! - [`handshake`]: the readiness exchange run before the first round

mod handshake;
mod link;
mod peer;

pub use handshake::{Handshake, handshake};
pub use link::{CancelHandle, Filter, Interrupt, PeerLink, WaitOutcome};
pub use peer::{HandshakePhase, PeerSession};
