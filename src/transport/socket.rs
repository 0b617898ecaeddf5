//! UDP transport for envelopes.
//!
//! A [`Transport`] owns one socket bound to a fixed local address and talks
//! to one fixed remote address. A background task drains the socket into a
//! bounded queue so nothing is missed while the foreground is busy; the
//! foreground consumes the queue with [`Transport::recv_timeout`].

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;

use super::stats::{TransportStats, TransportStatsSnapshot};
use super::timing::MonotonicClock;
use crate::core::constants::{DEFAULT_QUEUE_CAPACITY, RECV_BUFFER_SIZE};
use crate::core::{Envelope, TransportError};

/// Pause after a socket receive error before reading again.
const RECV_ERROR_BACKOFF: Duration = Duration::from_millis(1);

/// A decoded envelope with its arrival time.
#[derive(Debug, Clone)]
pub struct Received {
    /// The envelope.
    pub envelope: Envelope,
    /// Source address.
    pub from: SocketAddr,
    /// Local monotonic time of arrival.
    pub received_at: f64,
}

/// One directed envelope channel over UDP.
#[derive(Debug)]
pub struct Transport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    inbox: mpsc::Receiver<Received>,
    stats: Arc<TransportStats>,
    clock: MonotonicClock,
    recv_task: JoinHandle<()>,
}

impl Transport {
    /// Address the socket is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Remote address envelopes are sent to.
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Current monotonic time.
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    /// Counter snapshot.
    pub fn stats(&self) -> TransportStatsSnapshot {
        self.stats.snapshot()
    }

    /// Send an envelope to the remote. Best-effort: a failed send is
    /// counted and returned, never retried here.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), TransportError> {
        let bytes = match envelope.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.stats.on_send_error();
                return Err(e.into());
            }
        };
        match self.socket.send_to(&bytes, self.remote_addr).await {
            Ok(_) => {
                self.stats.on_sent();
                tracing::trace!(kind = %envelope.kind, to = %self.remote_addr, "sent envelope");
                Ok(())
            }
            Err(e) => {
                self.stats.on_send_error();
                tracing::debug!(kind = %envelope.kind, error = %e, "send failed");
                Err(e.into())
            }
        }
    }

    /// Wait up to `timeout` for the next envelope.
    ///
    /// Returns `Ok(None)` when the timeout elapses with nothing queued.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Received>, TransportError> {
        match tokio::time::timeout(timeout, self.inbox.recv()).await {
            Ok(Some(received)) => Ok(Some(received)),
            Ok(None) => Err(TransportError::Closed),
            Err(_) => Ok(None),
        }
    }

    /// Take the next queued envelope without waiting.
    pub fn try_recv(&mut self) -> Result<Option<Received>, TransportError> {
        match self.inbox.try_recv() {
            Ok(received) => Ok(Some(received)),
            Err(mpsc::error::TryRecvError::Empty) => Ok(None),
            Err(mpsc::error::TryRecvError::Disconnected) => Err(TransportError::Closed),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.recv_task.abort();
    }
}

/// Builder for [`Transport`] with custom options.
#[derive(Debug, Clone)]
pub struct TransportBuilder {
    queue_capacity: usize,
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportBuilder {
    /// Create a builder with default options.
    pub fn new() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the receive queue capacity.
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Bind the socket and start the receive task.
    pub async fn bind(self, local: SocketAddr, remote: SocketAddr) -> io::Result<Transport> {
        let socket = UdpSocket::bind(local).await?;
        self.attach(socket, remote)
    }

    /// Start a transport on an already bound socket. Must be called from
    /// within a tokio runtime.
    pub fn attach(self, socket: UdpSocket, remote: SocketAddr) -> io::Result<Transport> {
        let local_addr = socket.local_addr()?;
        let socket = Arc::new(socket);
        let stats = Arc::new(TransportStats::default());
        let clock = MonotonicClock::new();
        let (tx, inbox) = mpsc::channel(self.queue_capacity);

        let recv_task = tokio::spawn(receive_loop(
            Arc::clone(&socket),
            remote,
            tx,
            Arc::clone(&stats),
            clock,
        ));

        tracing::debug!(local = %local_addr, remote = %remote, "transport started");

        Ok(Transport {
            socket,
            local_addr,
            remote_addr: remote,
            inbox,
            stats,
            clock,
            recv_task,
        })
    }
}

/// Whether a datagram source is the configured remote.
fn is_from_remote(from: SocketAddr, remote: SocketAddr) -> bool {
    if remote.ip().is_unspecified() {
        from.port() == remote.port()
    } else {
        from == remote
    }
}

async fn receive_loop(
    socket: Arc<UdpSocket>,
    remote: SocketAddr,
    tx: mpsc::Sender<Received>,
    stats: Arc<TransportStats>,
    clock: MonotonicClock,
) {
    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, from) = match socket.recv_from(&mut buf).await {
            Ok(r) => r,
            Err(e) => {
                stats.on_recv_error();
                tracing::debug!(error = %e, "receive error");
                if tx.is_closed() {
                    break;
                }
                tokio::time::sleep(RECV_ERROR_BACKOFF).await;
                continue;
            }
        };
        let received_at = clock.now();

        if !is_from_remote(from, remote) {
            stats.on_foreign();
            tracing::trace!(%from, "ignoring datagram from unexpected address");
            continue;
        }

        let envelope = match Envelope::decode(&buf[..len]) {
            Ok(envelope) => envelope,
            Err(e) => {
                stats.on_malformed();
                tracing::debug!(%from, len, error = %e, "dropping malformed datagram");
                continue;
            }
        };

        stats.on_received();
        match tx.try_send(Received {
            envelope,
            from,
            received_at,
        }) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                stats.on_dropped();
                tracing::warn!(kind = %dropped.envelope.kind, "receive queue full, dropping envelope");
            }
            Err(TrySendError::Closed(_)) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::MessageType;

    fn any_local() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    async fn pair() -> (Transport, Transport) {
        let a_sock = UdpSocket::bind(any_local()).await.unwrap();
        let b_sock = UdpSocket::bind(any_local()).await.unwrap();
        let a_addr = a_sock.local_addr().unwrap();
        let b_addr = b_sock.local_addr().unwrap();

        let a = TransportBuilder::new().attach(a_sock, b_addr).unwrap();
        let b = TransportBuilder::new().attach(b_sock, a_addr).unwrap();
        (a, b)
    }

    #[tokio::test]
    async fn test_send_recv() {
        let (a, mut b) = pair().await;

        a.send(&Envelope::ping(a.now())).await.unwrap();

        let received = b
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("ping should arrive");
        assert_eq!(received.envelope.kind, MessageType::Ping);
        assert_eq!(received.from, a.local_addr());
        assert_eq!(a.stats().sent, 1);
        assert_eq!(b.stats().received, 1);
    }

    #[tokio::test]
    async fn test_recv_timeout_is_bounded() {
        let (_a, mut b) = pair().await;

        let start = std::time::Instant::now();
        let received = b.recv_timeout(Duration::from_millis(50)).await.unwrap();
        assert!(received.is_none());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_malformed_datagram_is_dropped() {
        let (a, mut b) = pair().await;
        let raw = UdpSocket::bind(any_local()).await.unwrap();

        // Garbage from the configured remote address is counted as malformed.
        a.socket
            .send_to(b"not json", b.local_addr())
            .await
            .unwrap();
        a.send(&Envelope::end_experiment(a.now())).await.unwrap();

        let received = b
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.envelope.kind, MessageType::EndExperiment);
        assert_eq!(b.stats().malformed, 1);

        // Valid envelope from a stranger is ignored.
        let bytes = Envelope::ping(0.0).encode().unwrap();
        raw.send_to(&bytes, b.local_addr()).await.unwrap();
        assert!(
            b.recv_timeout(Duration::from_millis(100))
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(b.stats().foreign, 1);
    }

    #[tokio::test]
    async fn test_full_queue_drops_newest() {
        let a_sock = UdpSocket::bind(any_local()).await.unwrap();
        let b_sock = UdpSocket::bind(any_local()).await.unwrap();
        let a_addr = a_sock.local_addr().unwrap();
        let b_addr = b_sock.local_addr().unwrap();
        let a = TransportBuilder::new().attach(a_sock, b_addr).unwrap();
        let mut b = TransportBuilder::new()
            .queue_capacity(2)
            .attach(b_sock, a_addr)
            .unwrap();

        for _ in 0..5 {
            a.send(&Envelope::ping(a.now())).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(200)).await;

        let mut count = 0;
        while b.try_recv().unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 2);
        assert_eq!(b.stats().dropped, 3);
    }

    #[test]
    fn test_remote_matching() {
        let remote: SocketAddr = "10.0.0.2:5006".parse().unwrap();
        assert!(is_from_remote(remote, remote));
        assert!(!is_from_remote("10.0.0.3:5006".parse().unwrap(), remote));

        let wildcard: SocketAddr = "0.0.0.0:5006".parse().unwrap();
        assert!(is_from_remote("10.0.0.3:5006".parse().unwrap(), wildcard));
        assert!(!is_from_remote("10.0.0.3:5007".parse().unwrap(), wildcard));
    }
}
