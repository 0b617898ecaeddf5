//! Session configuration.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use super::constants::*;
use super::error::ProtocolError;
use super::types::{PeerId, Role};

/// What to do when the handshake times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HandshakeFailurePolicy {
    /// Report the peer as unreachable and stop.
    #[default]
    Abort,
    /// Continue in single-peer mode, scoring on the local response only.
    SinglePeerFallback,
}

/// Configuration of one side of a dyad.
#[derive(Debug, Clone)]
pub struct ProtocolConfig {
    /// Local role.
    pub role: Role,
    /// Local peer id (the `responder` of local answers).
    pub local_id: PeerId,
    /// Remote peer id.
    pub remote_id: PeerId,
    /// Local address of the stage-sync socket.
    pub bind_addr: SocketAddr,
    /// Remote address of the counterpart's stage-sync socket.
    pub remote_addr: SocketAddr,
    /// Number of rounds in the session.
    pub rounds: u32,

    /// Interval between readiness pings.
    pub ping_interval: Duration,
    /// Handshake timeout.
    pub connect_timeout: Duration,
    /// Handshake failure policy.
    pub on_handshake_failure: HandshakeFailurePolicy,
    /// Peer is considered dead after this much silence.
    pub dead_interval: Duration,

    /// Initiator's bound on each stage ack.
    pub ack_timeout: Duration,
    /// Follower's bound on each stage announcement.
    pub stage_wait_timeout: Duration,
    /// Follower's bound on each `round_start`.
    pub round_start_timeout: Duration,

    /// Presentation window.
    pub presentation_duration: Duration,
    /// Upper bound on the local response window.
    pub collect_timeout: Duration,
    /// Wait for the other response once the local one is recorded.
    pub response_wait: Duration,
    /// Feedback window.
    pub feedback_duration: Duration,

    /// Foreground poll slice.
    pub poll_interval: Duration,
    /// Receive queue capacity.
    pub queue_capacity: usize,
    /// Held-back envelope capacity.
    pub backlog_capacity: usize,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        let localhost = IpAddr::V4(Ipv4Addr::LOCALHOST);
        Self {
            role: Role::Initiator,
            local_id: PeerId::new("A"),
            remote_id: PeerId::new("B"),
            bind_addr: SocketAddr::new(localhost, DEFAULT_SYNC_PORT),
            remote_addr: SocketAddr::new(localhost, DEFAULT_SYNC_PORT + 1),
            rounds: DEFAULT_ROUNDS,

            ping_interval: DEFAULT_PING_INTERVAL,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            on_handshake_failure: HandshakeFailurePolicy::default(),
            dead_interval: DEFAULT_DEAD_INTERVAL,

            ack_timeout: DEFAULT_ACK_TIMEOUT,
            stage_wait_timeout: DEFAULT_STAGE_WAIT_TIMEOUT,
            round_start_timeout: DEFAULT_ROUND_START_TIMEOUT,

            presentation_duration: DEFAULT_PRESENTATION_DURATION,
            collect_timeout: DEFAULT_COLLECT_TIMEOUT,
            response_wait: DEFAULT_RESPONSE_WAIT,
            feedback_duration: DEFAULT_FEEDBACK_DURATION,

            poll_interval: DEFAULT_POLL_INTERVAL,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            backlog_capacity: DEFAULT_BACKLOG_CAPACITY,
        }
    }
}

impl ProtocolConfig {
    /// Check the configuration for values the protocol cannot run with.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.rounds == 0 {
            return Err(ProtocolError::Config("rounds must be at least 1".into()));
        }
        if self.local_id == self.remote_id {
            return Err(ProtocolError::Config(format!(
                "local and remote peer ids are both {:?}",
                self.local_id.as_str()
            )));
        }
        if self.poll_interval.is_zero() || self.ping_interval.is_zero() {
            return Err(ProtocolError::Config(
                "poll and ping intervals must be non-zero".into(),
            ));
        }
        if self.queue_capacity == 0 {
            return Err(ProtocolError::Config("queue capacity must be non-zero".into()));
        }
        Ok(())
    }
}

/// Builder for [`ProtocolConfig`].
#[derive(Debug)]
pub struct ProtocolConfigBuilder {
    config: ProtocolConfig,
}

impl ProtocolConfigBuilder {
    /// Create a builder with default values.
    pub fn new() -> Self {
        Self {
            config: ProtocolConfig::default(),
        }
    }

    /// Set the local role.
    pub fn role(mut self, role: Role) -> Self {
        self.config.role = role;
        self
    }

    /// Set the local and remote peer ids.
    pub fn peers(mut self, local: impl Into<String>, remote: impl Into<String>) -> Self {
        self.config.local_id = PeerId::new(local);
        self.config.remote_id = PeerId::new(remote);
        self
    }

    /// Set the local bind address.
    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.config.bind_addr = addr;
        self
    }

    /// Set the remote address.
    pub fn remote_addr(mut self, addr: SocketAddr) -> Self {
        self.config.remote_addr = addr;
        self
    }

    /// Set the number of rounds.
    pub fn rounds(mut self, rounds: u32) -> Self {
        self.config.rounds = rounds;
        self
    }

    /// Set the ping interval.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.config.ping_interval = interval;
        self
    }

    /// Set the handshake timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = timeout;
        self
    }

    /// Set the handshake failure policy.
    pub fn on_handshake_failure(mut self, policy: HandshakeFailurePolicy) -> Self {
        self.config.on_handshake_failure = policy;
        self
    }

    /// Set the ack timeout.
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.config.ack_timeout = timeout;
        self
    }

    /// Set the follower's stage wait timeout.
    pub fn stage_wait_timeout(mut self, timeout: Duration) -> Self {
        self.config.stage_wait_timeout = timeout;
        self
    }

    /// Set the follower's round start timeout.
    pub fn round_start_timeout(mut self, timeout: Duration) -> Self {
        self.config.round_start_timeout = timeout;
        self
    }

    /// Set the stage windows.
    pub fn stage_windows(mut self, presentation: Duration, feedback: Duration) -> Self {
        self.config.presentation_duration = presentation;
        self.config.feedback_duration = feedback;
        self
    }

    /// Set the local response window.
    pub fn collect_timeout(mut self, timeout: Duration) -> Self {
        self.config.collect_timeout = timeout;
        self
    }

    /// Set how long to wait for the other response.
    pub fn response_wait(mut self, wait: Duration) -> Self {
        self.config.response_wait = wait;
        self
    }

    /// Set the poll interval.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Set the receive queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.config.queue_capacity = capacity;
        self
    }

    /// Build the configuration.
    pub fn build(self) -> ProtocolConfig {
        self.config
    }
}

impl Default for ProtocolConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = ProtocolConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.ack_timeout, Duration::from_secs(1));
        assert_eq!(config.ping_interval, Duration::from_millis(100));
        assert_eq!(config.on_handshake_failure, HandshakeFailurePolicy::Abort);
    }

    #[test]
    fn test_builder() {
        let config = ProtocolConfigBuilder::new()
            .role(Role::Follower)
            .peers("B", "A")
            .rounds(3)
            .ack_timeout(Duration::from_millis(250))
            .on_handshake_failure(HandshakeFailurePolicy::SinglePeerFallback)
            .build();

        assert_eq!(config.role, Role::Follower);
        assert_eq!(config.local_id, PeerId::new("B"));
        assert_eq!(config.rounds, 3);
        assert_eq!(config.ack_timeout, Duration::from_millis(250));
        assert_eq!(
            config.on_handshake_failure,
            HandshakeFailurePolicy::SinglePeerFallback
        );
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = ProtocolConfigBuilder::new().rounds(0).build();
        assert!(matches!(config.validate(), Err(ProtocolError::Config(_))));

        let config = ProtocolConfigBuilder::new().peers("A", "A").build();
        assert!(matches!(config.validate(), Err(ProtocolError::Config(_))));

        let config = ProtocolConfigBuilder::new()
            .poll_interval(Duration::ZERO)
            .build();
        assert!(config.validate().is_err());
    }
}
