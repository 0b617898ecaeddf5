//! Protocol constants and configuration defaults.
//!
//! Wire names are fixed by the protocol and MUST NOT be changed. Timing
//! values are defaults only; every one of them can be overridden through
//! [`ProtocolConfig`](super::ProtocolConfig).

use std::time::Duration;

// =============================================================================
// PORTS
// =============================================================================

/// Default UDP port of the gaze telemetry channel.
///
/// The telemetry channel is fire-and-forget and carries no synchronization
/// semantics. It is kept on its own port so its datagrams never reach the
/// stage-sync socket.
pub const DEFAULT_GAZE_PORT: u16 = 5005;

/// Default UDP port of the stage-sync channel.
pub const DEFAULT_SYNC_PORT: u16 = 5006;

// =============================================================================
// MESSAGE TYPES
// =============================================================================

/// Readiness / liveness probe.
pub const TYPE_PING: &str = "ping";

/// Unconditional reply to a ping.
pub const TYPE_PONG: &str = "pong";

/// Round parameters (initiator -> follower).
pub const TYPE_ROUND_START: &str = "round_start";

/// Prefix of stage transition messages (`stage_presenting`, ...).
pub const TYPE_STAGE_PREFIX: &str = "stage_";

/// Acknowledgment of a stage transition.
pub const TYPE_STAGE_SYNC_ACK: &str = "stage_sync_ack";

/// A peer's answer for the current round.
pub const TYPE_RESPONSE_UPDATE: &str = "response_update";

/// Terminal message, valid from any stage.
pub const TYPE_END_EXPERIMENT: &str = "end_experiment";

// =============================================================================
// TRANSPORT
// =============================================================================

/// Receive buffer size. One envelope per datagram, JSON encoded.
pub const RECV_BUFFER_SIZE: usize = 4096;

/// Largest envelope we are willing to send in one datagram.
pub const MAX_DATAGRAM_SIZE: usize = 4096;

/// Capacity of the receive queue between the socket task and the foreground.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Maximum number of envelopes held back for later consumption.
pub const DEFAULT_BACKLOG_CAPACITY: usize = 64;

/// Foreground poll slice used inside every bounded wait.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Interval between readiness pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(100);

/// How long to keep pinging before the peer is declared unreachable.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A peer silent for this long is no longer considered alive.
pub const DEFAULT_DEAD_INTERVAL: Duration = Duration::from_secs(10);

// =============================================================================
// STAGES
// =============================================================================

/// Initiator's bound on waiting for a `stage_sync_ack`.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Follower's bound on waiting for the next stage announcement.
pub const DEFAULT_STAGE_WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Follower's bound on waiting for the next `round_start`.
pub const DEFAULT_ROUND_START_TIMEOUT: Duration = Duration::from_secs(300);

/// Length of the presentation window.
pub const DEFAULT_PRESENTATION_DURATION: Duration = Duration::from_secs(2);

/// Upper bound on the local response window.
pub const DEFAULT_COLLECT_TIMEOUT: Duration = Duration::from_secs(60);

/// How long to wait for the other peer once the local response is in.
pub const DEFAULT_RESPONSE_WAIT: Duration = Duration::from_secs(3);

/// Length of the feedback window.
pub const DEFAULT_FEEDBACK_DURATION: Duration = Duration::from_secs(3);

/// Default number of rounds in a session.
pub const DEFAULT_ROUNDS: u32 = 10;

// =============================================================================
// LATENCY
// =============================================================================

/// Smoothing factor of the rolling latency estimate (1/8, as for SRTT).
pub const LATENCY_ALPHA: f64 = 0.125;
