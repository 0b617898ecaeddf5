//! Peer session state.

use std::time::Duration;

use crate::transport::LatencyEstimator;

/// Handshake lifecycle of the remote peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakePhase {
    /// No handshake yet, or the handshake timed out.
    Disconnected,
    /// Pings are going out, no pong yet.
    AwaitingPong,
    /// A pong has been received.
    Connected,
}

/// What the local side knows about its counterpart.
///
/// Single writer: only the foreground task touches it.
#[derive(Debug, Clone)]
pub struct PeerSession {
    phase: HandshakePhase,
    /// Local time of the last envelope from the peer.
    last_seen: Option<f64>,
    latency: LatencyEstimator,
    pings_sent: u64,
}

impl Default for PeerSession {
    fn default() -> Self {
        Self::new()
    }
}

impl PeerSession {
    /// Create a disconnected session.
    pub fn new() -> Self {
        Self {
            phase: HandshakePhase::Disconnected,
            last_seen: None,
            latency: LatencyEstimator::new(),
            pings_sent: 0,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> HandshakePhase {
        self.phase
    }

    /// Whether the handshake has completed.
    pub fn is_connected(&self) -> bool {
        self.phase == HandshakePhase::Connected
    }

    /// Record an outgoing handshake ping.
    pub fn on_ping_sent(&mut self) {
        self.pings_sent += 1;
        if self.phase == HandshakePhase::Disconnected {
            self.phase = HandshakePhase::AwaitingPong;
        }
    }

    /// Number of handshake pings sent.
    pub fn pings_sent(&self) -> u64 {
        self.pings_sent
    }

    /// Record a pong. `rtt` is the round-trip sample in seconds.
    pub fn on_pong(&mut self, rtt: f64) {
        self.latency.update_secs(rtt);
        if self.phase != HandshakePhase::Connected {
            tracing::debug!(rtt_ms = rtt * 1000.0, "peer answered ping");
        }
        self.phase = HandshakePhase::Connected;
    }

    /// The handshake gave up.
    pub fn on_handshake_timeout(&mut self) {
        if self.phase != HandshakePhase::Connected {
            self.phase = HandshakePhase::Disconnected;
        }
    }

    /// Add a latency sample from an acknowledgment.
    pub fn on_latency_sample(&mut self, rtt: f64) {
        self.latency.update_secs(rtt);
    }

    /// Note that the peer was heard from at local time `at`.
    pub fn touch(&mut self, at: f64) {
        self.last_seen = Some(self.last_seen.map_or(at, |seen| seen.max(at)));
    }

    /// Local time of the last envelope from the peer.
    pub fn last_seen(&self) -> Option<f64> {
        self.last_seen
    }

    /// Whether the peer has been heard from within `dead_interval` of `now`.
    pub fn is_alive(&self, now: f64, dead_interval: Duration) -> bool {
        self.last_seen
            .is_some_and(|seen| now - seen <= dead_interval.as_secs_f64())
    }

    /// Latency estimate.
    pub fn latency(&self) -> &LatencyEstimator {
        &self.latency
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_transitions() {
        let mut session = PeerSession::new();
        assert_eq!(session.phase(), HandshakePhase::Disconnected);

        session.on_ping_sent();
        assert_eq!(session.phase(), HandshakePhase::AwaitingPong);
        session.on_ping_sent();
        assert_eq!(session.pings_sent(), 2);

        session.on_pong(0.004);
        assert!(session.is_connected());
        assert_eq!(session.latency().samples(), 1);

        // A late timeout does not undo a completed handshake.
        session.on_handshake_timeout();
        assert!(session.is_connected());
    }

    #[test]
    fn test_timeout_without_pong() {
        let mut session = PeerSession::new();
        session.on_ping_sent();
        session.on_handshake_timeout();
        assert_eq!(session.phase(), HandshakePhase::Disconnected);
    }

    #[test]
    fn test_liveness() {
        let mut session = PeerSession::new();
        let dead = Duration::from_secs(10);
        assert!(!session.is_alive(0.0, dead));

        session.touch(5.0);
        assert!(session.is_alive(12.0, dead));
        assert!(!session.is_alive(15.5, dead));

        // Out of order touches never move last_seen backwards.
        session.touch(3.0);
        assert_eq!(session.last_seen(), Some(5.0));
    }
}
