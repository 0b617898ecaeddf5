//! Per-round state.
//!
//! One [`RoundState`] is live at a time. It is owned by the round controller
//! and passed by reference to everything else.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{PeerId, Stage};

/// One peer's answer for a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Peer that answered.
    pub peer_id: PeerId,
    /// The answer.
    pub answer: String,
    /// Seconds from the start of Collecting to the answer, on the
    /// responder's own clock.
    pub elapsed_seconds: f64,
    /// Local monotonic time at which the response was recorded.
    pub received_at: f64,
    /// Order in which responses were recorded this round, starting at 0.
    pub arrival: u64,
}

/// Result of offering a response to a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First response from this peer; stored.
    Recorded,
    /// The peer already has a response; the new one is dropped.
    Duplicate,
    /// Response belongs to an earlier round; dropped.
    Stale,
    /// Response belongs to a later round; not attributed to this one.
    Early,
    /// Elapsed time is negative or not finite; dropped.
    Invalid,
}

/// State of the live round.
#[derive(Debug, Clone)]
pub struct RoundState {
    round_number: u32,
    target_spec: Value,
    ground_truth: Option<String>,
    stage: Stage,
    responses: BTreeMap<PeerId, Response>,
    next_arrival: u64,
}

impl RoundState {
    /// Start a round in the `Idle` stage.
    pub fn new(round_number: u32, target_spec: Value, ground_truth: Option<String>) -> Self {
        Self {
            round_number,
            target_spec,
            ground_truth,
            stage: Stage::Idle,
            responses: BTreeMap::new(),
            next_arrival: 0,
        }
    }

    /// Round number.
    pub fn round_number(&self) -> u32 {
        self.round_number
    }

    /// Round parameters.
    pub fn target_spec(&self) -> &Value {
        &self.target_spec
    }

    /// Correct answer, if the host could derive one.
    pub fn ground_truth(&self) -> Option<&str> {
        self.ground_truth.as_deref()
    }

    /// Current stage.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Move to a stage.
    pub fn set_stage(&mut self, stage: Stage) {
        self.stage = stage;
    }

    /// Offer a response.
    ///
    /// `round` is the round number carried by the message; `None` (peers
    /// that do not send it) is taken to mean the live round. A peer's first
    /// response wins, later ones are dropped.
    pub fn record(
        &mut self,
        peer_id: PeerId,
        answer: String,
        elapsed_seconds: f64,
        received_at: f64,
        round: Option<u32>,
    ) -> RecordOutcome {
        match round {
            Some(r) if r < self.round_number => return RecordOutcome::Stale,
            Some(r) if r > self.round_number => return RecordOutcome::Early,
            _ => {}
        }
        if !elapsed_seconds.is_finite() || elapsed_seconds < 0.0 {
            return RecordOutcome::Invalid;
        }
        if self.responses.contains_key(&peer_id) {
            return RecordOutcome::Duplicate;
        }

        let arrival = self.next_arrival;
        self.next_arrival += 1;
        self.responses.insert(
            peer_id.clone(),
            Response {
                peer_id,
                answer,
                elapsed_seconds,
                received_at,
                arrival,
            },
        );
        RecordOutcome::Recorded
    }

    /// Response of a peer, if any.
    pub fn response(&self, peer_id: &PeerId) -> Option<&Response> {
        self.responses.get(peer_id)
    }

    /// Whether a peer has answered.
    pub fn has_response(&self, peer_id: &PeerId) -> bool {
        self.responses.contains_key(peer_id)
    }

    /// All responses, in peer id order.
    pub fn responses(&self) -> impl Iterator<Item = &Response> {
        self.responses.values()
    }

    /// Number of responses.
    pub fn response_count(&self) -> usize {
        self.responses.len()
    }

    /// Drop all responses. Called once Feedback has completed.
    pub fn clear_responses(&mut self) {
        self.responses.clear();
        self.next_arrival = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn round(n: u32) -> RoundState {
        RoundState::new(n, json!({ "target": 7 }), Some("cat".into()))
    }

    #[test]
    fn test_new_round_is_idle() {
        let state = round(1);
        assert_eq!(state.stage(), Stage::Idle);
        assert_eq!(state.response_count(), 0);
        assert_eq!(state.ground_truth(), Some("cat"));
    }

    #[test]
    fn test_duplicate_response_does_not_overwrite() {
        let mut state = round(2);
        let a = PeerId::new("A");

        assert_eq!(
            state.record(a.clone(), "cat".into(), 0.8, 10.0, Some(2)),
            RecordOutcome::Recorded
        );
        assert_eq!(
            state.record(a.clone(), "dog".into(), 0.1, 10.5, Some(2)),
            RecordOutcome::Duplicate
        );

        let stored = state.response(&a).unwrap();
        assert_eq!(stored.answer, "cat");
        assert_eq!(stored.elapsed_seconds, 0.8);
        assert_eq!(state.response_count(), 1);
    }

    #[test]
    fn test_round_number_filtering() {
        let mut state = round(5);
        let b = PeerId::new("B");

        assert_eq!(
            state.record(b.clone(), "cat".into(), 0.5, 1.0, Some(4)),
            RecordOutcome::Stale
        );
        assert_eq!(
            state.record(b.clone(), "cat".into(), 0.5, 1.0, Some(6)),
            RecordOutcome::Early
        );
        assert!(!state.has_response(&b));

        // No round number means the live round.
        assert_eq!(
            state.record(b.clone(), "cat".into(), 0.5, 1.0, None),
            RecordOutcome::Recorded
        );
    }

    #[test]
    fn test_invalid_elapsed_rejected() {
        let mut state = round(1);
        assert_eq!(
            state.record("A".into(), "cat".into(), f64::NAN, 0.0, None),
            RecordOutcome::Invalid
        );
        assert_eq!(
            state.record("A".into(), "cat".into(), -0.1, 0.0, None),
            RecordOutcome::Invalid
        );
        assert_eq!(state.response_count(), 0);
    }

    #[test]
    fn test_arrival_order_and_clear() {
        let mut state = round(1);
        state.record("B".into(), "dog".into(), 0.4, 1.0, Some(1));
        state.record("A".into(), "cat".into(), 0.4, 1.1, Some(1));

        assert_eq!(state.response(&"B".into()).unwrap().arrival, 0);
        assert_eq!(state.response(&"A".into()).unwrap().arrival, 1);

        state.clear_responses();
        assert_eq!(state.response_count(), 0);
        assert_eq!(
            state.record("A".into(), "cat".into(), 0.4, 2.0, Some(1)),
            RecordOutcome::Recorded
        );
        assert_eq!(state.response(&"A".into()).unwrap().arrival, 0);
    }
}
