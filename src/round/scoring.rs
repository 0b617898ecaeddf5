//! First-responder-takes-all scoring.
//!
//! The faster of the two answers decides the round for both peers: if it is
//! correct, both score counters go up by one; otherwise neither does. A peer
//! that did not answer is absent, not wrong.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::state::Response;
use crate::core::PeerId;

/// Which side of the dyad a response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResponderRole {
    /// This machine.
    Local,
    /// The counterpart.
    Remote,
}

impl ResponderRole {
    /// The other side.
    pub fn swapped(self) -> Self {
        match self {
            ResponderRole::Local => ResponderRole::Remote,
            ResponderRole::Remote => ResponderRole::Local,
        }
    }
}

/// Resolved outcome of a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoundOutcome {
    /// Peer whose answer decided the round.
    pub first_responder: Option<PeerId>,
    /// Side of the deciding answer.
    pub first_role: Option<ResponderRole>,
    /// The deciding answer.
    pub answer: Option<String>,
    /// Whether the deciding answer matched the ground truth.
    pub correct: bool,
    /// Points awarded to each peer (0 or 1).
    pub points_awarded: u32,
}

/// Order two responses: smaller elapsed time first, exact ties by arrival.
fn response_order(a: &Response, b: &Response) -> Ordering {
    a.elapsed_seconds
        .total_cmp(&b.elapsed_seconds)
        .then(a.arrival.cmp(&b.arrival))
}

/// Score a round from the local and remote responses.
pub fn score_round(
    local: Option<&Response>,
    remote: Option<&Response>,
    ground_truth: Option<&str>,
) -> RoundOutcome {
    let first = match (local, remote) {
        (Some(l), Some(r)) => {
            if response_order(l, r) == Ordering::Greater {
                Some((r, ResponderRole::Remote))
            } else {
                Some((l, ResponderRole::Local))
            }
        }
        (Some(l), None) => Some((l, ResponderRole::Local)),
        (None, Some(r)) => Some((r, ResponderRole::Remote)),
        (None, None) => None,
    };

    match first {
        Some((response, role)) => {
            let correct = ground_truth.is_some_and(|truth| response.answer == truth);
            RoundOutcome {
                first_responder: Some(response.peer_id.clone()),
                first_role: Some(role),
                answer: Some(response.answer.clone()),
                correct,
                points_awarded: u32::from(correct),
            }
        }
        None => RoundOutcome {
            first_responder: None,
            first_role: None,
            answer: None,
            correct: false,
            points_awarded: 0,
        },
    }
}

/// Cumulative score per peer.
///
/// Counters only ever grow, and only through [`ScoreState::apply`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreState {
    scores: BTreeMap<PeerId, u32>,
}

impl ScoreState {
    /// Start every listed peer at zero.
    pub fn new<I: IntoIterator<Item = PeerId>>(peers: I) -> Self {
        Self {
            scores: peers.into_iter().map(|peer| (peer, 0)).collect(),
        }
    }

    /// Apply a resolved outcome: every tracked peer gets the awarded points.
    pub fn apply(&mut self, outcome: &RoundOutcome) {
        for score in self.scores.values_mut() {
            *score = score.saturating_add(outcome.points_awarded);
        }
    }

    /// Score of a peer (0 for untracked peers).
    pub fn score(&self, peer: &PeerId) -> u32 {
        self.scores.get(peer).copied().unwrap_or(0)
    }

    /// All scores in peer id order.
    pub fn iter(&self) -> impl Iterator<Item = (&PeerId, u32)> {
        self.scores.iter().map(|(peer, score)| (peer, *score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resp(peer: &str, answer: &str, elapsed: f64, arrival: u64) -> Response {
        Response {
            peer_id: PeerId::new(peer),
            answer: answer.to_string(),
            elapsed_seconds: elapsed,
            received_at: 0.0,
            arrival,
        }
    }

    #[test]
    fn test_both_answer_local_first() {
        let local = resp("A", "cat", 0.8, 0);
        let remote = resp("B", "cat", 1.2, 1);

        let outcome = score_round(Some(&local), Some(&remote), Some("cat"));
        assert_eq!(outcome.first_role, Some(ResponderRole::Local));
        assert_eq!(outcome.first_responder, Some(PeerId::new("A")));
        assert_eq!(outcome.points_awarded, 1);

        let mut scores = ScoreState::new([PeerId::new("A"), PeerId::new("B")]);
        scores.apply(&outcome);
        assert_eq!(scores.score(&PeerId::new("A")), 1);
        assert_eq!(scores.score(&PeerId::new("B")), 1);
    }

    #[test]
    fn test_only_remote_answers() {
        let remote = resp("B", "dog", 2.0, 0);
        let outcome = score_round(None, Some(&remote), Some("dog"));
        assert_eq!(outcome.first_role, Some(ResponderRole::Remote));
        assert_eq!(outcome.points_awarded, 1);
    }

    #[test]
    fn test_faster_wrong_answer_decides() {
        let local = resp("A", "cat", 0.3, 0);
        let remote = resp("B", "dog", 0.1, 1);

        let outcome = score_round(Some(&local), Some(&remote), Some("cat"));
        assert_eq!(outcome.first_role, Some(ResponderRole::Remote));
        assert_eq!(outcome.answer.as_deref(), Some("dog"));
        assert!(!outcome.correct);
        assert_eq!(outcome.points_awarded, 0);
    }

    #[test]
    fn test_nobody_answers() {
        let outcome = score_round(None, None, Some("cat"));
        assert_eq!(outcome.first_responder, None);
        assert_eq!(outcome.points_awarded, 0);
    }

    #[test]
    fn test_missing_ground_truth_never_scores() {
        let local = resp("A", "cat", 0.3, 0);
        let outcome = score_round(Some(&local), None, None);
        assert_eq!(outcome.first_role, Some(ResponderRole::Local));
        assert_eq!(outcome.points_awarded, 0);
    }

    #[test]
    fn test_exact_tie_goes_to_first_recorded() {
        let early = resp("B", "dog", 0.5, 0);
        let late = resp("A", "cat", 0.5, 1);

        let outcome = score_round(Some(&late), Some(&early), Some("dog"));
        assert_eq!(outcome.first_responder, Some(PeerId::new("B")));
        assert_eq!(outcome.points_awarded, 1);
    }

    #[test]
    fn test_symmetry_under_label_swap() {
        let answers = ["cat", "dog"];
        let times = [0.1, 0.5, 0.5, 1.2];
        let truths = [Some("cat"), Some("dog"), None];

        for &a_ans in &answers {
            for &b_ans in &answers {
                for (i, &a_t) in times.iter().enumerate() {
                    for (j, &b_t) in times.iter().enumerate() {
                        let a = resp("A", a_ans, a_t, i as u64);
                        let b = resp("B", b_ans, b_t, (j + times.len()) as u64);
                        for truth in truths {
                            for (x, y) in [(Some(&a), Some(&b)), (Some(&a), None), (None, Some(&b))]
                            {
                                let forward = score_round(x, y, truth);
                                let swapped = score_round(y, x, truth);
                                assert_eq!(forward.points_awarded, swapped.points_awarded);
                                assert_eq!(forward.first_responder, swapped.first_responder);
                                assert_eq!(
                                    forward.first_role.map(ResponderRole::swapped),
                                    swapped.first_role
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn test_scores_are_monotonic() {
        let mut scores = ScoreState::new([PeerId::new("A")]);
        let miss = score_round(None, None, Some("cat"));
        let hit = score_round(Some(&resp("A", "cat", 0.1, 0)), None, Some("cat"));

        let mut last = 0;
        for outcome in [&hit, &miss, &hit, &miss] {
            scores.apply(outcome);
            let now = scores.score(&PeerId::new("A"));
            assert!(now >= last);
            last = now;
        }
        assert_eq!(last, 2);
    }
}
