//! Transport counters.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Counters shared between the receive task and the foreground.
#[derive(Debug, Default)]
pub struct TransportStats {
    sent: AtomicU64,
    send_errors: AtomicU64,
    received: AtomicU64,
    recv_errors: AtomicU64,
    malformed: AtomicU64,
    foreign: AtomicU64,
    dropped: AtomicU64,
}

/// Point-in-time copy of [`TransportStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransportStatsSnapshot {
    /// Envelopes sent.
    pub sent: u64,
    /// Failed sends.
    pub send_errors: u64,
    /// Envelopes decoded and queued.
    pub received: u64,
    /// Socket receive errors.
    pub recv_errors: u64,
    /// Datagrams that did not decode.
    pub malformed: u64,
    /// Datagrams from an address other than the configured remote.
    pub foreign: u64,
    /// Envelopes dropped because the queue was full.
    pub dropped: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        pub(crate) fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl TransportStats {
    counter!(on_sent, sent);
    counter!(on_send_error, send_errors);
    counter!(on_received, received);
    counter!(on_recv_error, recv_errors);
    counter!(on_malformed, malformed);
    counter!(on_foreign, foreign);
    counter!(on_dropped, dropped);

    /// Read all counters.
    pub fn snapshot(&self) -> TransportStatsSnapshot {
        TransportStatsSnapshot {
            sent: self.sent.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            recv_errors: self.recv_errors.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            foreign: self.foreign.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
