//! Response collection.
//!
//! During Collecting each side captures at most one local answer, sends it
//! to the peer and keeps the round open until the peer's answer is in or
//! `response_wait` has passed since the local answer (or since the local
//! window closed without one).

use std::time::{Duration, Instant};

use super::state::{RecordOutcome, RoundState};
use crate::core::{
    Envelope, MessageType, PeerId, PeerMode, ProtocolConfig, ResponseUpdate, TransportError,
    TrialHost,
};
use crate::session::{Filter, Interrupt, PeerLink, WaitOutcome};
use crate::transport::Received;

/// How collection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Collected {
    /// The round can be scored.
    Complete {
        /// Whether the local side answered.
        local: bool,
        /// Whether the remote answer arrived.
        remote: bool,
    },
    /// The session is ending.
    Interrupted(Interrupt),
}

/// Gathers the local and remote responses of a round.
#[derive(Debug, Clone)]
pub struct ResponseAggregator {
    local_id: PeerId,
    remote_id: PeerId,
    collect_timeout: Duration,
    response_wait: Duration,
}

impl ResponseAggregator {
    /// Create an aggregator.
    pub fn new(
        local_id: PeerId,
        remote_id: PeerId,
        collect_timeout: Duration,
        response_wait: Duration,
    ) -> Self {
        Self {
            local_id,
            remote_id,
            collect_timeout,
            response_wait,
        }
    }

    /// Create an aggregator from a session configuration.
    pub fn from_config(config: &ProtocolConfig) -> Self {
        Self::new(
            config.local_id.clone(),
            config.remote_id.clone(),
            config.collect_timeout,
            config.response_wait,
        )
    }

    /// Offer a remote `response_update` to the round.
    pub fn ingest(
        &self,
        round: &mut RoundState,
        update: ResponseUpdate,
        received_at: f64,
    ) -> RecordOutcome {
        if update.responder != self.remote_id {
            tracing::warn!(
                responder = %update.responder,
                expected = %self.remote_id,
                "response from unexpected responder"
            );
            return RecordOutcome::Invalid;
        }
        let outcome = round.record(
            update.responder,
            update.answer,
            update.elapsed_seconds,
            received_at,
            update.round_number,
        );
        match outcome {
            RecordOutcome::Recorded => {
                tracing::debug!(round = round.round_number(), "remote response recorded")
            }
            RecordOutcome::Duplicate => {
                tracing::debug!(round = round.round_number(), "duplicate remote response ignored")
            }
            other => tracing::debug!(round = round.round_number(), ?other, "remote response dropped"),
        }
        outcome
    }

    /// Record the local answer and send it to the peer.
    pub async fn submit_local(
        &self,
        link: &PeerLink,
        round: &mut RoundState,
        mode: PeerMode,
        answer: String,
        elapsed: Duration,
    ) -> Result<RecordOutcome, TransportError> {
        let elapsed_seconds = elapsed.as_secs_f64();
        let outcome = round.record(
            self.local_id.clone(),
            answer.clone(),
            elapsed_seconds,
            link.now(),
            Some(round.round_number()),
        );
        if outcome != RecordOutcome::Recorded {
            return Ok(outcome);
        }
        tracing::info!(round = round.round_number(), elapsed_seconds, "local response");

        if mode == PeerMode::TwoPeer {
            let update = ResponseUpdate {
                responder: self.local_id.clone(),
                answer,
                elapsed_seconds,
                round_number: Some(round.round_number()),
            };
            link.send(&Envelope::response_update(link.now(), &update)?)
                .await?;
        }
        Ok(outcome)
    }

    /// Run the Collecting stage.
    pub async fn collect<H: TrialHost>(
        &self,
        link: &mut PeerLink,
        round: &mut RoundState,
        host: &mut H,
        mode: PeerMode,
    ) -> Result<Collected, TransportError> {
        let started = Instant::now();
        let collect_deadline = started + self.collect_timeout;
        let mut local_done: Option<Instant> = None;
        let round_number = round.round_number();

        loop {
            let slice = link.poll_interval();
            match link
                .wait_for(slice, |received| update_filter(received, round_number))
                .await?
            {
                WaitOutcome::Ready((update, received_at)) => {
                    self.ingest(round, update, received_at);
                }
                WaitOutcome::TimedOut => {}
                WaitOutcome::Interrupted(interrupt) => {
                    return Ok(Collected::Interrupted(interrupt));
                }
            }

            if local_done.is_none() {
                let elapsed = started.elapsed();
                if let Some(answer) = host.poll_response(round, elapsed) {
                    self.submit_local(link, round, mode, answer, elapsed).await?;
                    local_done = Some(Instant::now());
                } else if Instant::now() >= collect_deadline {
                    tracing::info!(round = round_number, "no local response before collect timeout");
                    local_done = Some(Instant::now());
                }
            }

            if let Some(done) = local_done {
                let remote = round.has_response(&self.remote_id);
                if mode == PeerMode::SinglePeer || remote || done.elapsed() >= self.response_wait {
                    if mode == PeerMode::TwoPeer && !remote {
                        tracing::info!(round = round_number, "no remote response");
                    }
                    return Ok(Collected::Complete {
                        local: round.has_response(&self.local_id),
                        remote,
                    });
                }
            }
        }
    }
}

/// Accept `response_update`s for the live round, hold back later ones.
fn update_filter(received: &Received, round_number: u32) -> Filter<(ResponseUpdate, f64)> {
    if received.envelope.kind != MessageType::ResponseUpdate {
        return Filter::Defer;
    }
    let update = match received.envelope.payload::<ResponseUpdate>() {
        Ok(update) => update,
        Err(e) => {
            tracing::debug!(error = %e, "dropping unreadable response update");
            return Filter::Discard;
        }
    };
    match update.round_number {
        Some(n) if n < round_number => Filter::Discard,
        Some(n) if n > round_number => Filter::Defer,
        _ => Filter::Take((update, received.received_at)),
    }
}
