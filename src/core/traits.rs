//! Collaborator traits.
//!
//! The protocol core does not render stimuli, read keyboards or write result
//! files. It reaches those collaborators through the traits below.

use std::time::Duration;

use serde_json::Value;

use super::error::SinkError;
use super::types::Stage;
use crate::round::{RoundOutcome, RoundRecord, RoundState};

/// The experiment running on top of the protocol.
///
/// # Example
///
/// ```ignore
/// struct Categories { answers: Vec<&'static str> }
///
/// impl TrialHost for Categories {
///     fn generate_round(&mut self, round: u32) -> Value {
///         json!({ "target": (round as usize) % 4 })
///     }
///
///     fn ground_truth(&self, spec: &Value) -> Option<String> {
///         let idx = spec["target"].as_u64()? as usize;
///         Some(["house", "car", "face", "limb"][idx].to_string())
///     }
///
///     fn poll_response(&mut self, _: &RoundState, _: Duration) -> Option<String> {
///         self.answers.pop().map(str::to_string)
///     }
/// }
/// ```
pub trait TrialHost {
    /// Produce the parameters of a new round. Called on the initiator, and
    /// on a follower that runs without a peer.
    fn generate_round(&mut self, round_number: u32) -> Value;

    /// Correct answer for a round, derived from its parameters.
    ///
    /// `None` means no answer can score.
    fn ground_truth(&self, target_spec: &Value) -> Option<String>;

    /// Called when the local peer enters a stage.
    fn on_stage(&mut self, round: &RoundState, stage: Stage) {
        let _ = (round, stage);
    }

    /// Poll for the local answer. Called once per tick during Collecting
    /// until it returns `Some`; `elapsed` is measured from the start of
    /// the stage.
    fn poll_response(&mut self, round: &RoundState, elapsed: Duration) -> Option<String>;

    /// Called once the round has been scored, before Feedback begins.
    fn on_outcome(&mut self, round: &RoundState, outcome: &RoundOutcome) {
        let _ = (round, outcome);
    }
}

/// Receives one record per resolved round.
pub trait ResultSink {
    /// Persist a round record.
    fn record(&mut self, record: &RoundRecord) -> Result<(), SinkError>;
}

impl<T: ResultSink + ?Sized> ResultSink for &mut T {
    fn record(&mut self, record: &RoundRecord) -> Result<(), SinkError> {
        (**self).record(record)
    }
}

impl<T: ResultSink + ?Sized> ResultSink for Box<T> {
    fn record(&mut self, record: &RoundRecord) -> Result<(), SinkError> {
        (**self).record(record)
    }
}
