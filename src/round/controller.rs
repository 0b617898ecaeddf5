//! Session driver.
//!
//! [`RoundController`] owns the round number, the live [`RoundState`] and
//! the scores. It runs the handshake, then one round after another:
//!
//! ```text
//! initiator: generate -> round_start -> Presenting -> Collecting -> score -> Feedback
//! follower:  await round_start ------> Presenting -> Collecting -> score -> Feedback
//! ```
//!
//! and stops after the configured number of rounds, on `end_experiment`
//! from the peer, on local cancellation, or when a follower hears no
//! `round_start` within its timeout.

use serde::Serialize;

use super::aggregator::{Collected, ResponseAggregator};
use super::record::RoundRecord;
use super::scoring::{ScoreState, score_round};
use super::state::RoundState;
use crate::core::{
    Envelope, HandshakeFailurePolicy, MessageType, PeerMode, ProtocolConfig, ProtocolError,
    ResultSink, Role, RoundStart, Stage, TransportError, TrialHost,
};
use crate::session::{
    CancelHandle, Filter, Handshake, Interrupt, PeerLink, WaitOutcome, handshake,
};
use crate::sync::{StageSync, StageSynchronizer, SyncStats};
use crate::transport::{Transport, TransportBuilder, TransportStatsSnapshot};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// All rounds were played.
    Completed,
    /// The local side cancelled.
    LocalCancel,
    /// The peer sent `end_experiment`.
    RemoteEnded,
    /// The follower heard no `round_start` in time.
    PeerSilent,
}

impl From<Interrupt> for Termination {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::LocalCancel => Termination::LocalCancel,
            Interrupt::RemoteEnded => Termination::RemoteEnded,
        }
    }
}

/// End-of-session report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    /// Rounds that reached Feedback.
    pub rounds_played: u32,
    /// Final scores.
    pub scores: ScoreState,
    /// Why the session ended.
    pub termination: Termination,
    /// Peer mode the session ran in.
    pub mode: PeerMode,
    /// Smoothed latency to the peer, if measured.
    pub latency_ms: Option<f64>,
    /// Transport counters.
    pub transport: TransportStatsSnapshot,
    /// Stage transition counters.
    pub sync: SyncStats,
}

/// Whether to keep playing.
enum Flow {
    Continue,
    Stop(Termination),
}

/// Runs a dyadic session for one side.
#[derive(Debug)]
pub struct RoundController<H, S> {
    config: ProtocolConfig,
    link: PeerLink,
    synchronizer: StageSynchronizer,
    aggregator: ResponseAggregator,
    scores: ScoreState,
    mode: PeerMode,
    current_round: u32,
    rounds_played: u32,
    host: H,
    sink: S,
}

impl<H: TrialHost, S: ResultSink> RoundController<H, S> {
    /// Bind the configured address and build a controller.
    pub async fn bind(config: ProtocolConfig, host: H, sink: S) -> Result<Self, ProtocolError> {
        config.validate()?;
        let transport = TransportBuilder::new()
            .queue_capacity(config.queue_capacity)
            .bind(config.bind_addr, config.remote_addr)
            .await
            .map_err(TransportError::from)?;
        Self::with_transport(config, transport, host, sink)
    }

    /// Build a controller on an existing transport. The transport's
    /// addresses take precedence over the configured ones.
    pub fn with_transport(
        config: ProtocolConfig,
        transport: Transport,
        host: H,
        sink: S,
    ) -> Result<Self, ProtocolError> {
        config.validate()?;
        let link = PeerLink::with_options(transport, config.poll_interval, config.backlog_capacity);
        let scores = ScoreState::new([config.local_id.clone(), config.remote_id.clone()]);
        Ok(Self {
            synchronizer: StageSynchronizer::from_config(&config),
            aggregator: ResponseAggregator::from_config(&config),
            link,
            scores,
            mode: PeerMode::TwoPeer,
            current_round: 0,
            rounds_played: 0,
            host,
            sink,
            config,
        })
    }

    /// Handle that stops the session at the next poll tick.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.link.cancel_handle()
    }

    /// Scores so far.
    pub fn scores(&self) -> &ScoreState {
        &self.scores
    }

    /// Number of the last round started.
    pub fn current_round(&self) -> u32 {
        self.current_round
    }

    /// Peer mode.
    pub fn mode(&self) -> PeerMode {
        self.mode
    }

    /// The trial host.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// The result sink.
    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Take the host and sink back.
    pub fn into_parts(self) -> (H, S) {
        (self.host, self.sink)
    }

    /// Run the session to the end.
    pub async fn run(&mut self) -> Result<SessionSummary, ProtocolError> {
        tracing::info!(
            role = %self.config.role,
            local = %self.config.local_id,
            remote = %self.config.remote_id,
            rounds = self.config.rounds,
            "starting session"
        );

        let termination = match self.connect().await? {
            Some(termination) => termination,
            None => self.play().await?,
        };

        if termination == Termination::LocalCancel
            || (termination == Termination::Completed
                && self.config.role == Role::Initiator
                && self.mode == PeerMode::TwoPeer)
        {
            self.link.send_end().await?;
        }

        let summary = self.summary(termination);
        tracing::info!(
            rounds = summary.rounds_played,
            termination = ?summary.termination,
            "session finished"
        );
        Ok(summary)
    }

    /// Handshake and pick the peer mode. Returns a termination if the
    /// session ended during the handshake.
    async fn connect(&mut self) -> Result<Option<Termination>, ProtocolError> {
        let result = handshake(
            &mut self.link,
            self.config.ping_interval,
            self.config.connect_timeout,
        )
        .await?;

        match result {
            Handshake::Connected { .. } => {
                self.mode = PeerMode::TwoPeer;
                Ok(None)
            }
            Handshake::Interrupted(interrupt) => Ok(Some(interrupt.into())),
            Handshake::Disconnected => match self.config.on_handshake_failure {
                HandshakeFailurePolicy::Abort => Err(ProtocolError::PeerUnreachable {
                    waited: self.config.connect_timeout,
                }),
                HandshakeFailurePolicy::SinglePeerFallback => {
                    tracing::warn!("peer unreachable, continuing in single-peer mode");
                    self.mode = PeerMode::SinglePeer;
                    Ok(None)
                }
            },
        }
    }

    async fn play(&mut self) -> Result<Termination, ProtocolError> {
        while self.rounds_played < self.config.rounds {
            if self.mode == PeerMode::TwoPeer
                && !self
                    .link
                    .session()
                    .is_alive(self.link.now(), self.config.dead_interval)
            {
                tracing::warn!(
                    silent_for = ?self.config.dead_interval,
                    "nothing heard from peer recently"
                );
            }

            let round = match self.config.role {
                Role::Initiator => self.start_round().await?,
                Role::Follower => match self.await_round().await? {
                    Ok(round) => round,
                    Err(termination) => return Ok(termination),
                },
            };

            if let Flow::Stop(termination) = self.play_round(round).await? {
                // The peer may finish first and end the session while the
                // last Feedback window is still open here.
                if termination == Termination::RemoteEnded
                    && self.rounds_played >= self.config.rounds
                {
                    return Ok(Termination::Completed);
                }
                return Ok(termination);
            }
        }
        Ok(Termination::Completed)
    }

    /// Initiator: generate the next round and announce it.
    async fn start_round(&mut self) -> Result<RoundState, ProtocolError> {
        let round_number = self.current_round + 1;
        let target_spec = self.host.generate_round(round_number);
        let ground_truth = self.host.ground_truth(&target_spec);

        if self.mode == PeerMode::TwoPeer {
            let start = RoundStart {
                round_number,
                target_spec: target_spec.clone(),
            };
            let envelope = Envelope::round_start(self.link.now(), &start)
                .map_err(TransportError::from)?;
            self.link.send(&envelope).await?;
        }

        self.current_round = round_number;
        tracing::info!(round = round_number, "round started");
        Ok(RoundState::new(round_number, target_spec, ground_truth))
    }

    /// Follower: wait for a `round_start` newer than the current round.
    async fn await_round(&mut self) -> Result<Result<RoundState, Termination>, ProtocolError> {
        if self.mode == PeerMode::SinglePeer {
            // Nobody will announce rounds; generate them locally.
            return Ok(Ok(self.start_round().await?));
        }

        let current = self.current_round;
        let outcome = self
            .link
            .wait_for(self.config.round_start_timeout, |received| {
                if received.envelope.kind != MessageType::RoundStart {
                    return Filter::Defer;
                }
                match received.envelope.payload::<RoundStart>() {
                    Ok(start) if start.round_number > current => Filter::Take(start),
                    Ok(start) => {
                        tracing::debug!(round = start.round_number, current, "ignoring stale round start");
                        Filter::Discard
                    }
                    Err(e) => {
                        tracing::debug!(error = %e, "dropping unreadable round start");
                        Filter::Discard
                    }
                }
            })
            .await?;

        match outcome {
            WaitOutcome::Ready(start) => {
                let ground_truth = self.host.ground_truth(&start.target_spec);
                self.current_round = start.round_number;
                tracing::info!(round = start.round_number, "round started by peer");
                Ok(Ok(RoundState::new(
                    start.round_number,
                    start.target_spec,
                    ground_truth,
                )))
            }
            WaitOutcome::TimedOut => {
                tracing::warn!(timeout = ?self.config.round_start_timeout, "no round start from peer");
                Ok(Err(Termination::PeerSilent))
            }
            WaitOutcome::Interrupted(interrupt) => Ok(Err(interrupt.into())),
        }
    }

    /// Walk one round through its stages.
    async fn play_round(&mut self, mut round: RoundState) -> Result<Flow, ProtocolError> {
        let trial = round.round_number();

        for stage in Stage::SYNCED {
            let sync = self
                .synchronizer
                .enter(&mut self.link, self.mode, trial, stage)
                .await?;
            if let StageSync::Interrupted(interrupt) = sync {
                return Ok(Flow::Stop(interrupt.into()));
            }

            round.set_stage(stage);
            self.host.on_stage(&round, stage);
            tracing::debug!(round = trial, %stage, "entered stage");

            let interrupt = match stage {
                Stage::Presenting => self.link.idle(self.config.presentation_duration).await?,
                Stage::Collecting => self.collect_and_score(&mut round).await?,
                Stage::Feedback => {
                    self.rounds_played += 1;
                    self.link.idle(self.config.feedback_duration).await?
                }
                Stage::Idle => None,
            };
            if let Some(interrupt) = interrupt {
                return Ok(Flow::Stop(interrupt.into()));
            }
        }

        round.clear_responses();
        round.set_stage(Stage::Idle);
        self.host.on_stage(&round, Stage::Idle);
        Ok(Flow::Continue)
    }

    /// Collecting stage followed by scoring and recording.
    async fn collect_and_score(
        &mut self,
        round: &mut RoundState,
    ) -> Result<Option<Interrupt>, ProtocolError> {
        let collected = self
            .aggregator
            .collect(&mut self.link, round, &mut self.host, self.mode)
            .await?;
        if let Collected::Interrupted(interrupt) = collected {
            return Ok(Some(interrupt));
        }

        let outcome = score_round(
            round.response(&self.config.local_id),
            round.response(&self.config.remote_id),
            round.ground_truth(),
        );
        self.scores.apply(&outcome);
        tracing::info!(
            round = round.round_number(),
            first = ?outcome.first_responder,
            correct = outcome.correct,
            points = outcome.points_awarded,
            "round scored"
        );

        self.sink
            .record(&RoundRecord::new(round, &outcome, self.mode))?;
        self.host.on_outcome(round, &outcome);
        Ok(None)
    }

    fn summary(&self, termination: Termination) -> SessionSummary {
        SessionSummary {
            rounds_played: self.rounds_played,
            scores: self.scores.clone(),
            termination,
            mode: self.mode,
            latency_ms: self.link.session().latency().smoothed_ms(),
            transport: self.link.transport_stats(),
            sync: self.synchronizer.stats(),
        }
    }
}
