//! Stage transitions.
//!
//! The initiator announces each stage and waits a bounded time for the
//! follower's ack; the follower waits a bounded time for the announcement
//! and acks it. Neither side ever blocks past its timeout: a missing
//! announcement or ack is a warning and the stage starts locally.

use std::cmp::Ordering;
use std::time::Duration;

use serde::Serialize;

use crate::core::{
    Envelope, MessageType, PeerMode, ProtocolConfig, Role, Stage, StageAck, StageAnnounce,
    TransportError,
};
use crate::session::{Filter, Interrupt, PeerLink, WaitOutcome};
use crate::transport::Received;

/// How a stage transition went.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StageSync {
    /// Both sides agreed on the transition. `rtt` is the ack round trip,
    /// measured on the initiator only.
    Synced {
        /// Round trip of the announcement in seconds.
        rtt: Option<f64>,
    },
    /// No ack or announcement in time; the stage starts anyway.
    TimedOut,
    /// Single-peer mode; nothing was exchanged.
    Local,
    /// The session is ending.
    Interrupted(Interrupt),
}

/// Transition counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    /// Transitions both sides agreed on.
    pub synced: u64,
    /// Transitions that timed out.
    pub timed_out: u64,
    /// Transitions taken without a peer.
    pub local: u64,
}

/// Position of a transition within the session.
fn position(trial: u32, stage: Stage) -> (u32, usize) {
    let index = Stage::SYNCED
        .iter()
        .position(|s| *s == stage)
        .unwrap_or(0);
    (trial, index)
}

/// Compare an announced transition to the one being waited for.
fn classify(announced: (u32, Stage), expected: (u32, Stage)) -> Ordering {
    position(announced.0, announced.1).cmp(&position(expected.0, expected.1))
}

/// Drives stage transitions for one side of the dyad.
#[derive(Debug, Clone)]
pub struct StageSynchronizer {
    role: Role,
    ack_timeout: Duration,
    stage_wait_timeout: Duration,
    stats: SyncStats,
}

impl StageSynchronizer {
    /// Create a synchronizer.
    pub fn new(role: Role, ack_timeout: Duration, stage_wait_timeout: Duration) -> Self {
        Self {
            role,
            ack_timeout,
            stage_wait_timeout,
            stats: SyncStats::default(),
        }
    }

    /// Create a synchronizer from a session configuration.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(config.role, config.ack_timeout, config.stage_wait_timeout)
    }

    /// Local role.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Transition counters.
    pub fn stats(&self) -> SyncStats {
        self.stats
    }

    /// Negotiate the start of `stage` in `trial`.
    pub async fn enter(
        &mut self,
        link: &mut PeerLink,
        mode: PeerMode,
        trial: u32,
        stage: Stage,
    ) -> Result<StageSync, TransportError> {
        let result = match (mode, self.role) {
            (PeerMode::SinglePeer, _) => match link.interrupted() {
                Some(interrupt) => StageSync::Interrupted(interrupt),
                None => StageSync::Local,
            },
            (PeerMode::TwoPeer, Role::Initiator) => self.announce(link, trial, stage).await?,
            (PeerMode::TwoPeer, Role::Follower) => self.follow(link, trial, stage).await?,
        };

        match result {
            StageSync::Synced { .. } => self.stats.synced += 1,
            StageSync::TimedOut => self.stats.timed_out += 1,
            StageSync::Local => self.stats.local += 1,
            StageSync::Interrupted(_) => {}
        }
        Ok(result)
    }

    /// Initiator side: announce, then wait for the ack.
    async fn announce(
        &mut self,
        link: &mut PeerLink,
        trial: u32,
        stage: Stage,
    ) -> Result<StageSync, TransportError> {
        let sent_at = link.now();
        link.send(&Envelope::stage(sent_at, trial, stage)?).await?;

        let outcome = link
            .wait_for(self.ack_timeout, |received| ack_filter(received, trial, stage))
            .await?;

        Ok(match outcome {
            WaitOutcome::Ready((echo, received_at)) => {
                let rtt = received_at - echo.unwrap_or(sent_at);
                link.session_mut().on_latency_sample(rtt);
                tracing::debug!(trial, %stage, rtt_ms = rtt * 1000.0, "stage acked");
                StageSync::Synced { rtt: Some(rtt) }
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(trial, %stage, timeout = ?self.ack_timeout, "no stage ack, proceeding");
                StageSync::TimedOut
            }
            WaitOutcome::Interrupted(interrupt) => StageSync::Interrupted(interrupt),
        })
    }

    /// Follower side: wait for the announcement, then ack it.
    async fn follow(
        &mut self,
        link: &mut PeerLink,
        trial: u32,
        stage: Stage,
    ) -> Result<StageSync, TransportError> {
        let outcome = link
            .wait_for(self.stage_wait_timeout, |received| {
                announce_filter(received, trial, stage)
            })
            .await?;

        Ok(match outcome {
            WaitOutcome::Ready(timestamp) => {
                let ack = StageAck {
                    stage_name: stage.as_str().to_string(),
                    trial_number: Some(trial),
                    echo: Some(timestamp),
                };
                link.send(&Envelope::stage_ack(link.now(), &ack)?).await?;
                tracing::debug!(trial, %stage, "stage announced");
                StageSync::Synced { rtt: None }
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(
                    trial,
                    %stage,
                    timeout = ?self.stage_wait_timeout,
                    "no stage announcement, proceeding locally"
                );
                StageSync::TimedOut
            }
            WaitOutcome::Interrupted(interrupt) => StageSync::Interrupted(interrupt),
        })
    }
}

/// Accept the ack for `(trial, stage)`. Yields the echo and arrival time.
fn ack_filter(received: &Received, trial: u32, stage: Stage) -> Filter<(Option<f64>, f64)> {
    if received.envelope.kind != MessageType::StageSyncAck {
        return Filter::Defer;
    }
    let Ok(ack) = received.envelope.payload::<StageAck>() else {
        tracing::debug!("dropping unreadable stage ack");
        return Filter::Discard;
    };
    let acked_stage = Stage::from_name(&ack.stage_name);
    // Acks without a trial number are taken to be for the live trial.
    let acked_trial = ack.trial_number.unwrap_or(trial);
    if acked_stage == Some(stage) && acked_trial == trial {
        Filter::Take((ack.echo, received.received_at))
    } else {
        Filter::Discard
    }
}

/// Accept the announcement of `(trial, stage)`. Yields its timestamp.
fn announce_filter(received: &Received, trial: u32, stage: Stage) -> Filter<f64> {
    let MessageType::Stage(announced) = received.envelope.kind else {
        return Filter::Defer;
    };
    let Ok(payload) = received.envelope.payload::<StageAnnounce>() else {
        tracing::debug!("dropping unreadable stage announcement");
        return Filter::Discard;
    };
    match classify((payload.trial_number, announced), (trial, stage)) {
        Ordering::Equal => Filter::Take(received.envelope.timestamp),
        Ordering::Less => {
            tracing::debug!(trial = payload.trial_number, stage = %announced, "dropping stale announcement");
            Filter::Discard
        }
        Ordering::Greater => Filter::Defer,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::TransportBuilder;
    use std::net::SocketAddr;
    use std::time::Instant;
    use tokio::net::UdpSocket;

    fn any_local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn link_pair() -> (PeerLink, PeerLink) {
        let a_sock = UdpSocket::bind(any_local()).await.unwrap();
        let b_sock = UdpSocket::bind(any_local()).await.unwrap();
        let a_addr = a_sock.local_addr().unwrap();
        let b_addr = b_sock.local_addr().unwrap();
        let poll = Duration::from_millis(5);
        (
            PeerLink::with_options(
                TransportBuilder::new().attach(a_sock, b_addr).unwrap(),
                poll,
                16,
            ),
            PeerLink::with_options(
                TransportBuilder::new().attach(b_sock, a_addr).unwrap(),
                poll,
                16,
            ),
        )
    }

    #[test]
    fn test_classify_orders_by_trial_then_stage() {
        let expected = (3, Stage::Collecting);
        assert_eq!(classify((3, Stage::Collecting), expected), Ordering::Equal);
        assert_eq!(classify((3, Stage::Presenting), expected), Ordering::Less);
        assert_eq!(classify((2, Stage::Feedback), expected), Ordering::Less);
        assert_eq!(classify((3, Stage::Feedback), expected), Ordering::Greater);
        assert_eq!(classify((4, Stage::Presenting), expected), Ordering::Greater);
    }

    #[tokio::test]
    async fn test_initiator_and_follower_agree() {
        let (mut a, mut b) = link_pair().await;
        let mut initiator =
            StageSynchronizer::new(Role::Initiator, Duration::from_secs(2), Duration::from_secs(2));
        let mut follower =
            StageSynchronizer::new(Role::Follower, Duration::from_secs(2), Duration::from_secs(2));

        for stage in Stage::SYNCED {
            let (ra, rb) = tokio::join!(
                initiator.enter(&mut a, PeerMode::TwoPeer, 1, stage),
                follower.enter(&mut b, PeerMode::TwoPeer, 1, stage),
            );
            assert!(matches!(ra.unwrap(), StageSync::Synced { rtt: Some(_) }));
            assert_eq!(rb.unwrap(), StageSync::Synced { rtt: None });
        }
        assert_eq!(initiator.stats().synced, 3);
        assert_eq!(follower.stats().synced, 3);
        assert!(a.session().latency().samples() >= 3);
    }

    #[tokio::test]
    async fn test_ack_wait_is_bounded() {
        let (mut a, _b) = link_pair().await;
        let timeout = Duration::from_millis(80);
        let mut initiator = StageSynchronizer::new(Role::Initiator, timeout, timeout);

        let started = Instant::now();
        let result = initiator
            .enter(&mut a, PeerMode::TwoPeer, 1, Stage::Presenting)
            .await
            .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result, StageSync::TimedOut);
        assert!(elapsed >= timeout);
        assert!(elapsed < timeout + Duration::from_millis(400));
        assert_eq!(initiator.stats().timed_out, 1);
    }

    #[tokio::test]
    async fn test_follower_skips_stale_announcements() {
        let (a, mut b) = link_pair().await;
        a.send(&Envelope::stage(0.0, 1, Stage::Feedback).unwrap())
            .await
            .unwrap();
        a.send(&Envelope::stage(0.0, 2, Stage::Collecting).unwrap())
            .await
            .unwrap();
        a.send(&Envelope::stage(0.5, 2, Stage::Presenting).unwrap())
            .await
            .unwrap();

        let mut follower =
            StageSynchronizer::new(Role::Follower, Duration::from_secs(1), Duration::from_secs(1));
        let result = follower
            .enter(&mut b, PeerMode::TwoPeer, 2, Stage::Presenting)
            .await
            .unwrap();
        assert_eq!(result, StageSync::Synced { rtt: None });

        // The later Collecting announcement was held back, not lost.
        let result = follower
            .enter(&mut b, PeerMode::TwoPeer, 2, Stage::Collecting)
            .await
            .unwrap();
        assert_eq!(result, StageSync::Synced { rtt: None });
    }

    #[tokio::test]
    async fn test_single_peer_is_local() {
        let (mut a, _b) = link_pair().await;
        let mut sync =
            StageSynchronizer::new(Role::Initiator, Duration::from_secs(1), Duration::from_secs(1));
        let result = sync
            .enter(&mut a, PeerMode::SinglePeer, 1, Stage::Presenting)
            .await
            .unwrap();
        assert_eq!(result, StageSync::Local);
        assert_eq!(a.transport_stats().sent, 0);
    }

    #[tokio::test]
    async fn test_announce_survives_send_failure() {
        let any = any_local();
        let sock = UdpSocket::bind(any).await.unwrap();
        let mut link = PeerLink::with_options(
            TransportBuilder::new().attach(sock, any).unwrap(),
            Duration::from_millis(5),
            16,
        );
        let timeout = Duration::from_millis(50);
        let mut initiator = StageSynchronizer::new(Role::Initiator, timeout, timeout);

        let result = initiator
            .enter(&mut link, PeerMode::TwoPeer, 1, Stage::Presenting)
            .await
            .unwrap();
        assert_eq!(result, StageSync::TimedOut);
        assert_eq!(link.transport_stats().send_errors, 1);
    }
}
