//! Readiness handshake.
//!
//! Both roles run the same exchange: send `ping{ready:true}` every
//! `ping_interval` until a `pong` comes back or `connect_timeout` elapses.
//! Pings are answered by [`PeerLink`] at all times, so the two sides
//! converge whichever starts first.

use std::time::{Duration, Instant};

use super::link::{Interrupt, PeerLink};
use crate::core::{Envelope, TransportError};

/// How a handshake ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handshake {
    /// The peer answered.
    Connected {
        /// Time until the first pong.
        elapsed: Duration,
    },
    /// No pong within the timeout.
    Disconnected,
    /// Stopped by cancellation or `end_experiment`.
    Interrupted(Interrupt),
}

/// Run the handshake on `link`.
pub async fn handshake(
    link: &mut PeerLink,
    ping_interval: Duration,
    connect_timeout: Duration,
) -> Result<Handshake, TransportError> {
    let started = Instant::now();
    let deadline = started + connect_timeout;
    let mut next_ping = started;

    tracing::info!(timeout = ?connect_timeout, "waiting for peer");

    loop {
        if let Some(interrupt) = link.interrupted() {
            return Ok(Handshake::Interrupted(interrupt));
        }
        if link.session().is_connected() {
            let elapsed = started.elapsed();
            tracing::info!(
                elapsed_ms = elapsed.as_millis() as u64,
                pings = link.session().pings_sent(),
                "peer connected"
            );
            return Ok(Handshake::Connected { elapsed });
        }

        let now = Instant::now();
        if now >= deadline {
            link.session_mut().on_handshake_timeout();
            tracing::warn!(
                pings = link.session().pings_sent(),
                "no pong from peer before handshake timeout"
            );
            return Ok(Handshake::Disconnected);
        }

        if now >= next_ping {
            link.send(&Envelope::ping(link.now())).await?;
            link.session_mut().on_ping_sent();
            next_ping = now + ping_interval;
        }

        let slice = link
            .poll_interval()
            .min(next_ping.saturating_duration_since(Instant::now()))
            .min(deadline.saturating_duration_since(Instant::now()));
        if let Some(received) = link.poll_once(slice).await? {
            link.defer(received);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MessageType;
    use crate::session::HandshakePhase;
    use crate::transport::TransportBuilder;
    use std::net::SocketAddr;
    use tokio::net::UdpSocket;

    fn any_local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn link_to(remote: SocketAddr) -> PeerLink {
        let sock = UdpSocket::bind(any_local()).await.unwrap();
        let transport = TransportBuilder::new().attach(sock, remote).unwrap();
        PeerLink::with_options(transport, Duration::from_millis(5), 16)
    }

    #[tokio::test]
    async fn test_handshake_times_out_without_pong() {
        let silent = UdpSocket::bind(any_local()).await.unwrap();
        let mut link = link_to(silent.local_addr().unwrap()).await;

        let started = Instant::now();
        let result = handshake(
            &mut link,
            Duration::from_millis(20),
            Duration::from_millis(200),
        )
        .await
        .unwrap();
        let elapsed = started.elapsed();

        assert_eq!(result, Handshake::Disconnected);
        assert_eq!(link.session().phase(), HandshakePhase::Disconnected);
        assert!(elapsed >= Duration::from_millis(200));
        assert!(elapsed < Duration::from_millis(1000));

        // The silent peer saw a ping roughly every interval.
        let mut pings = 0;
        let mut buf = [0u8; 512];
        while let Ok(Ok(n)) =
            tokio::time::timeout(Duration::from_millis(20), silent.recv(&mut buf)).await
        {
            let env = Envelope::decode(&buf[..n]).unwrap();
            assert_eq!(env.kind, MessageType::Ping);
            pings += 1;
        }
        assert!(pings >= 5, "expected repeated pings, got {pings}");
        assert_eq!(pings as u64, link.session().pings_sent());
    }

    #[tokio::test]
    async fn test_two_links_converge() {
        let a_sock = UdpSocket::bind(any_local()).await.unwrap();
        let b_sock = UdpSocket::bind(any_local()).await.unwrap();
        let a_addr = a_sock.local_addr().unwrap();
        let b_addr = b_sock.local_addr().unwrap();

        let mut a = PeerLink::with_options(
            TransportBuilder::new().attach(a_sock, b_addr).unwrap(),
            Duration::from_millis(5),
            16,
        );
        let mut b = PeerLink::with_options(
            TransportBuilder::new().attach(b_sock, a_addr).unwrap(),
            Duration::from_millis(5),
            16,
        );

        let interval = Duration::from_millis(20);
        let timeout = Duration::from_secs(5);
        let (ra, rb) = tokio::join!(
            async {
                let result = handshake(&mut a, interval, timeout).await;
                // Keep answering pings, as the controller would.
                a.idle(Duration::from_millis(300)).await.unwrap();
                result
            },
            async {
                // Late start on one side.
                tokio::time::sleep(Duration::from_millis(100)).await;
                handshake(&mut b, interval, timeout).await
            }
        );

        assert!(matches!(ra.unwrap(), Handshake::Connected { .. }));
        assert!(matches!(rb.unwrap(), Handshake::Connected { .. }));
        assert!(a.session().latency().samples() >= 1);
    }
}
