//! The foreground side of a transport.
//!
//! [`PeerLink`] wraps a [`Transport`] with the bookkeeping every bounded
//! wait needs: it answers pings, tracks the peer session, notices
//! `end_experiment` and local cancellation, and holds back envelopes that
//! arrive while the caller is waiting for something else.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use super::peer::PeerSession;
use crate::core::constants::{DEFAULT_BACKLOG_CAPACITY, DEFAULT_POLL_INTERVAL};
use crate::core::{Envelope, MessageType, Readiness, TransportError};
use crate::transport::{Received, Transport, TransportStatsSnapshot};

/// Why a wait stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interrupt {
    /// The local side asked to stop.
    LocalCancel,
    /// The peer sent `end_experiment`.
    RemoteEnded,
}

/// Result of a bounded wait.
#[derive(Debug, Clone, PartialEq)]
pub enum WaitOutcome<T> {
    /// A matching envelope arrived.
    Ready(T),
    /// The timeout elapsed.
    TimedOut,
    /// The wait was interrupted.
    Interrupted(Interrupt),
}

/// Verdict of a wait filter on one envelope.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter<T> {
    /// The envelope is what the caller waits for.
    Take(T),
    /// Keep the envelope for a later wait.
    Defer,
    /// Drop the envelope.
    Discard,
}

/// Cloneable handle that cancels a running session.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Create an untriggered handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Takes effect at the next poll tick.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

/// Foreground view of the channel to the peer.
#[derive(Debug)]
pub struct PeerLink {
    transport: Transport,
    session: PeerSession,
    backlog: VecDeque<Received>,
    backlog_capacity: usize,
    poll_interval: Duration,
    cancel: CancelHandle,
    remote_ended: bool,
}

impl PeerLink {
    /// Wrap a transport with default poll interval and backlog capacity.
    pub fn new(transport: Transport) -> Self {
        Self::with_options(transport, DEFAULT_POLL_INTERVAL, DEFAULT_BACKLOG_CAPACITY)
    }

    /// Wrap a transport.
    pub fn with_options(
        transport: Transport,
        poll_interval: Duration,
        backlog_capacity: usize,
    ) -> Self {
        Self {
            transport,
            session: PeerSession::new(),
            backlog: VecDeque::with_capacity(backlog_capacity),
            backlog_capacity: backlog_capacity.max(1),
            poll_interval: poll_interval.max(Duration::from_millis(1)),
            cancel: CancelHandle::new(),
            remote_ended: false,
        }
    }

    /// Handle that cancels waits on this link.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Peer session state.
    pub fn session(&self) -> &PeerSession {
        &self.session
    }

    /// Mutable peer session state.
    pub fn session_mut(&mut self) -> &mut PeerSession {
        &mut self.session
    }

    /// Current monotonic time.
    pub fn now(&self) -> f64 {
        self.transport.now()
    }

    /// Foreground poll slice.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Transport counters.
    pub fn transport_stats(&self) -> TransportStatsSnapshot {
        self.transport.stats()
    }

    /// Number of held-back envelopes.
    pub fn backlog_len(&self) -> usize {
        self.backlog.len()
    }

    /// Send an envelope.
    ///
    /// Socket errors are counted by the transport, logged and swallowed: a
    /// lost message is handled by the receiver's timeouts. Only encoding
    /// failures and a closed transport are returned.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        match self.transport.send(envelope).await {
            Err(e @ TransportError::Io(_)) => {
                tracing::warn!(
                    kind = %envelope.kind,
                    error = %e,
                    transient = e.is_transient(),
                    "send failed, continuing"
                );
                Ok(())
            }
            other => other,
        }
    }

    /// Why waits should stop now, if they should.
    pub fn interrupted(&self) -> Option<Interrupt> {
        if self.cancel.is_cancelled() {
            Some(Interrupt::LocalCancel)
        } else if self.remote_ended {
            Some(Interrupt::RemoteEnded)
        } else {
            None
        }
    }

    /// Receive at most one envelope within `slice`, handling control
    /// traffic on the way. Returns envelopes the caller has to look at.
    pub(crate) async fn poll_once(
        &mut self,
        slice: Duration,
    ) -> Result<Option<Received>, TransportError> {
        let Some(received) = self.transport.recv_timeout(slice).await? else {
            return Ok(None);
        };
        self.session.touch(received.received_at);

        match received.envelope.kind {
            MessageType::Ping => {
                let pong = Envelope::pong(self.now(), received.envelope.timestamp);
                self.send(&pong).await?;
                Ok(None)
            }
            MessageType::Pong => {
                let echo = received
                    .envelope
                    .payload::<Readiness>()
                    .ok()
                    .and_then(|ready| ready.echo);
                // Without an echo the sample mixes both clocks; still
                // useful as a rough figure.
                let rtt = received.received_at - echo.unwrap_or(received.envelope.timestamp);
                self.session.on_pong(rtt);
                Ok(None)
            }
            MessageType::EndExperiment => {
                if !self.remote_ended {
                    tracing::info!("peer ended the experiment");
                }
                self.remote_ended = true;
                Ok(None)
            }
            _ => Ok(Some(received)),
        }
    }

    /// Hold an envelope back for a later wait. The oldest held envelope is
    /// dropped when the backlog is full.
    pub(crate) fn defer(&mut self, received: Received) {
        if self.backlog.len() >= self.backlog_capacity {
            if let Some(evicted) = self.backlog.pop_front() {
                tracing::debug!(kind = %evicted.envelope.kind, "backlog full, evicting oldest envelope");
            }
        }
        self.backlog.push_back(received);
    }

    /// Wait up to `timeout` for an envelope accepted by `filter`.
    ///
    /// Held-back envelopes are offered first, in arrival order. Envelopes
    /// the filter defers are held back; discarded ones are dropped. Control
    /// traffic is handled and never reaches the filter.
    pub async fn wait_for<T, F>(
        &mut self,
        timeout: Duration,
        mut filter: F,
    ) -> Result<WaitOutcome<T>, TransportError>
    where
        F: FnMut(&Received) -> Filter<T>,
    {
        if let Some(interrupt) = self.interrupted() {
            return Ok(WaitOutcome::Interrupted(interrupt));
        }

        let mut kept = VecDeque::with_capacity(self.backlog.len());
        let mut taken = None;
        while let Some(received) = self.backlog.pop_front() {
            match filter(&received) {
                Filter::Take(value) => {
                    taken = Some(value);
                    break;
                }
                Filter::Defer => kept.push_back(received),
                Filter::Discard => {}
            }
        }
        kept.append(&mut self.backlog);
        self.backlog = kept;
        if let Some(value) = taken {
            return Ok(WaitOutcome::Ready(value));
        }

        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let slice = remaining.min(self.poll_interval);

            if let Some(received) = self.poll_once(slice).await? {
                match filter(&received) {
                    Filter::Take(value) => return Ok(WaitOutcome::Ready(value)),
                    Filter::Defer => self.defer(received),
                    Filter::Discard => {}
                }
            }

            if let Some(interrupt) = self.interrupted() {
                return Ok(WaitOutcome::Interrupted(interrupt));
            }
            if remaining.is_zero() || Instant::now() >= deadline {
                return Ok(WaitOutcome::TimedOut);
            }
        }
    }

    /// Let `duration` pass while keeping the link serviced.
    ///
    /// Returns early only when interrupted.
    pub async fn idle(&mut self, duration: Duration) -> Result<Option<Interrupt>, TransportError> {
        match self.wait_for(duration, |_| Filter::<()>::Defer).await? {
            WaitOutcome::Interrupted(interrupt) => Ok(Some(interrupt)),
            _ => Ok(None),
        }
    }

    /// Tell the peer the experiment is over.
    pub async fn send_end(&self) -> Result<(), TransportError> {
        self.send(&Envelope::end_experiment(self.now())).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{RoundStart, Stage};
    use crate::transport::TransportBuilder;
    use serde_json::json;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    /// A link and a raw socket playing the peer.
    async fn link_and_peer() -> (PeerLink, UdpSocket) {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let peer = UdpSocket::bind(any).await.unwrap();
        let sock = UdpSocket::bind(any).await.unwrap();
        let transport = TransportBuilder::new()
            .attach(sock, peer.local_addr().unwrap())
            .unwrap();
        let link = PeerLink::with_options(transport, Duration::from_millis(5), 4);
        peer.connect(link.transport.local_addr()).await.unwrap();
        (link, peer)
    }

    async fn send_raw(peer: &UdpSocket, envelope: &Envelope) {
        peer.send(&envelope.encode().unwrap()).await.unwrap();
    }

    #[tokio::test]
    async fn test_ping_is_answered_during_wait() {
        let (mut link, peer) = link_and_peer().await;
        send_raw(&peer, &Envelope::ping(7.5)).await;

        let outcome = link
            .wait_for(Duration::from_millis(100), |_| Filter::<()>::Defer)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);

        let mut buf = [0u8; 512];
        let n = tokio::time::timeout(Duration::from_secs(1), peer.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();
        let pong = Envelope::decode(&buf[..n]).unwrap();
        assert_eq!(pong.kind, MessageType::Pong);
        let ready: Readiness = pong.payload().unwrap();
        assert_eq!(ready.echo, Some(7.5));
        assert!(link.session().last_seen().is_some());
    }

    #[tokio::test]
    async fn test_deferred_envelopes_are_offered_later() {
        let (mut link, peer) = link_and_peer().await;
        let start = RoundStart {
            round_number: 1,
            target_spec: json!({}),
        };
        send_raw(&peer, &Envelope::round_start(0.0, &start).unwrap()).await;
        send_raw(&peer, &Envelope::stage(0.0, 1, Stage::Presenting).unwrap()).await;

        // Wait for the stage first; the round start is held back.
        let outcome = link
            .wait_for(Duration::from_secs(1), |r| match r.envelope.kind {
                MessageType::Stage(stage) => Filter::Take(stage),
                _ => Filter::Defer,
            })
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready(Stage::Presenting));
        assert_eq!(link.backlog_len(), 1);

        let outcome = link
            .wait_for(Duration::ZERO, |r| match r.envelope.kind {
                MessageType::RoundStart => Filter::Take(()),
                _ => Filter::Discard,
            })
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready(()));
        assert_eq!(link.backlog_len(), 0);
    }

    #[tokio::test]
    async fn test_backlog_is_bounded() {
        let (mut link, peer) = link_and_peer().await;
        for round_number in 1..=6 {
            let start = RoundStart {
                round_number,
                target_spec: json!({}),
            };
            send_raw(&peer, &Envelope::round_start(0.0, &start).unwrap()).await;
        }
        link.idle(Duration::from_millis(150)).await.unwrap();
        assert_eq!(link.backlog_len(), 4);

        // The two oldest were evicted.
        let outcome = link
            .wait_for(Duration::ZERO, |r| {
                match r.envelope.payload::<RoundStart>() {
                    Ok(start) => Filter::Take(start.round_number),
                    Err(_) => Filter::Discard,
                }
            })
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready(3));
    }

    #[tokio::test]
    async fn test_end_experiment_interrupts() {
        let (mut link, peer) = link_and_peer().await;
        send_raw(&peer, &Envelope::end_experiment(1.0)).await;

        let started = Instant::now();
        let interrupt = link.idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(interrupt, Some(Interrupt::RemoteEnded));
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_local_cancel_interrupts() {
        let (mut link, _peer) = link_and_peer().await;
        let cancel = link.cancel_handle();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancel.cancel();
        });

        let interrupt = link.idle(Duration::from_secs(5)).await.unwrap();
        assert_eq!(interrupt, Some(Interrupt::LocalCancel));
    }

    #[tokio::test]
    async fn test_wait_is_bounded() {
        let (mut link, _peer) = link_and_peer().await;
        let started = Instant::now();
        let outcome = link
            .wait_for(Duration::from_millis(60), |_| Filter::<()>::Discard)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(60));
        assert!(elapsed < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_absurd_pong_echo_is_ignored() {
        let (mut link, peer) = link_and_peer().await;
        send_raw(&peer, &Envelope::pong(0.0, -1e20)).await;
        send_raw(&peer, &Envelope::pong(0.0, f64::MAX)).await;

        let interrupt = link.idle(Duration::from_millis(100)).await.unwrap();
        assert_eq!(interrupt, None);
        assert_eq!(link.session().latency().samples(), 0);
        assert!(link.session().last_seen().is_some());
    }

    #[tokio::test]
    async fn test_send_failure_is_not_fatal() {
        let any: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let sock = UdpSocket::bind(any).await.unwrap();
        // Port zero is never a valid destination.
        let transport = TransportBuilder::new().attach(sock, any).unwrap();
        let mut link = PeerLink::with_options(transport, Duration::from_millis(5), 4);

        link.send(&Envelope::ping(0.0)).await.unwrap();
        link.send(&Envelope::end_experiment(0.0)).await.unwrap();

        let stats = link.transport_stats();
        assert_eq!(stats.sent, 0);
        assert_eq!(stats.send_errors, 2);

        // The link keeps serving waits afterwards.
        let outcome = link
            .wait_for(Duration::from_millis(30), |_| Filter::<()>::Discard)
            .await
            .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
    }
}
