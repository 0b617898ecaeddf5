//! Round records handed to the result sink.

use std::io::Write;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::scoring::RoundOutcome;
use super::state::{Response, RoundState};
use crate::core::{PeerId, PeerMode, ResultSink, SinkError};

/// Plain record of one resolved round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// Round number.
    pub trial: u32,
    /// Round parameters.
    pub target_spec: Value,
    /// Correct answer.
    pub ground_truth: Option<String>,
    /// Responses recorded this round, in arrival order.
    pub responses: Vec<Response>,
    /// Peer whose answer decided the round.
    pub first_responder: Option<PeerId>,
    /// Points awarded to each peer.
    pub points_awarded: u32,
    /// Whether the round ran with both peers.
    pub mode: PeerMode,
}

impl RoundRecord {
    /// Build a record from a scored round.
    pub fn new(round: &RoundState, outcome: &RoundOutcome, mode: PeerMode) -> Self {
        let mut responses: Vec<Response> = round.responses().cloned().collect();
        responses.sort_by_key(|r| r.arrival);
        Self {
            trial: round.round_number(),
            target_spec: round.target_spec().clone(),
            ground_truth: round.ground_truth().map(str::to_string),
            responses,
            first_responder: outcome.first_responder.clone(),
            points_awarded: outcome.points_awarded,
            mode,
        }
    }
}

/// Keeps records in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Vec<RoundRecord>,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records received so far.
    pub fn records(&self) -> &[RoundRecord] {
        &self.records
    }

    /// Take the records out of the sink.
    pub fn into_records(self) -> Vec<RoundRecord> {
        self.records
    }
}

impl ResultSink for MemorySink {
    fn record(&mut self, record: &RoundRecord) -> Result<(), SinkError> {
        self.records.push(record.clone());
        Ok(())
    }
}

/// Writes one JSON object per line.
#[derive(Debug)]
pub struct JsonLinesSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesSink<W> {
    /// Wrap a writer.
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// Unwrap the writer.
    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write> ResultSink for JsonLinesSink<W> {
    fn record(&mut self, record: &RoundRecord) -> Result<(), SinkError> {
        serde_json::to_writer(&mut self.writer, record)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;
        Ok(())
    }
}
