//! Simulated participant.
//!
//! Rounds show one of four image categories. The participant either
//! follows a script (`delay_ms:answer` per round, `-` to stay silent) or
//! answers at random after a random delay.

use std::collections::VecDeque;
use std::time::Duration;

use dyad_sync::core::{Stage, TrialHost};
use dyad_sync::round::{RoundOutcome, RoundState};
use rand::Rng;
use serde_json::{Value, json};
use thiserror::Error;

/// Image categories shown to the dyad.
pub const CATEGORIES: [&str; 4] = ["house", "car", "face", "limb"];

/// Errors parsing an answer script.
#[derive(Debug, Error)]
pub enum ScriptError {
    /// Entry is not `delay_ms:answer` or `-`.
    #[error("bad script entry {0:?}, expected <delay_ms>:<answer> or -")]
    BadEntry(String),

    /// Delay is not a whole number of milliseconds.
    #[error("bad delay in {entry:?}: {source}")]
    BadDelay {
        /// The offending entry.
        entry: String,
        /// Parse failure.
        source: std::num::ParseIntError,
    },
}

/// Invalid `--accuracy` value.
#[derive(Debug, Error)]
pub enum AccuracyError {
    /// Not a number at all.
    #[error("accuracy is not a number: {0}")]
    Parse(#[from] std::num::ParseFloatError),

    /// NaN or outside `0..=1`.
    #[error("accuracy must be between 0 and 1, got {0}")]
    OutOfRange(f64),
}

/// Parse a probability for `--accuracy`.
pub fn parse_accuracy(value: &str) -> Result<f64, AccuracyError> {
    let accuracy: f64 = value.trim().parse()?;
    if (0.0..=1.0).contains(&accuracy) {
        Ok(accuracy)
    } else {
        Err(AccuracyError::OutOfRange(accuracy))
    }
}

/// When and what the participant answers in one round.
#[derive(Debug, Clone, PartialEq)]
pub enum Planned {
    /// Answer after a delay.
    Answer(Duration, String),
    /// Stay silent.
    Silent,
}

/// Parse `300:face,800:car,-`.
pub fn parse_script(script: &str) -> Result<Vec<Planned>, ScriptError> {
    script
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            if entry == "-" {
                return Ok(Planned::Silent);
            }
            let (delay, answer) = entry
                .split_once(':')
                .ok_or_else(|| ScriptError::BadEntry(entry.to_string()))?;
            let delay = delay.parse::<u64>().map_err(|source| ScriptError::BadDelay {
                entry: entry.to_string(),
                source,
            })?;
            if answer.is_empty() {
                return Err(ScriptError::BadEntry(entry.to_string()));
            }
            Ok(Planned::Answer(
                Duration::from_millis(delay),
                answer.to_string(),
            ))
        })
        .collect()
}

/// Participant running in the terminal.
pub struct ConsoleHost {
    script: VecDeque<Planned>,
    scripted: bool,
    accuracy: f64,
    current: Option<Planned>,
}

impl ConsoleHost {
    /// Scripted participant. Rounds past the end of the script are silent.
    pub fn scripted(script: Vec<Planned>) -> Self {
        Self {
            script: script.into(),
            scripted: true,
            accuracy: 0.0,
            current: None,
        }
    }

    /// Random participant answering correctly with probability `accuracy`.
    pub fn random(accuracy: f64) -> Self {
        Self {
            script: VecDeque::new(),
            scripted: false,
            accuracy: if accuracy.is_nan() {
                0.0
            } else {
                accuracy.clamp(0.0, 1.0)
            },
            current: None,
        }
    }

    fn plan(&mut self, round: &RoundState) -> Planned {
        if self.scripted {
            return self.script.pop_front().unwrap_or(Planned::Silent);
        }
        let mut rng = rand::thread_rng();
        let delay = Duration::from_millis(rng.gen_range(300..2500));
        let answer = match round.ground_truth() {
            Some(truth) if rng.gen_bool(self.accuracy) => truth.to_string(),
            _ => CATEGORIES[rng.gen_range(0..CATEGORIES.len())].to_string(),
        };
        Planned::Answer(delay, answer)
    }
}

impl TrialHost for ConsoleHost {
    fn generate_round(&mut self, round_number: u32) -> Value {
        let index = rand::thread_rng().gen_range(0..CATEGORIES.len());
        json!({
            "round": round_number,
            "category": index,
            "image": format!("{}_{:03}.png", CATEGORIES[index], round_number),
        })
    }

    fn ground_truth(&self, target_spec: &Value) -> Option<String> {
        let index = usize::try_from(target_spec.get("category")?.as_u64()?).ok()?;
        CATEGORIES.get(index).map(|c| c.to_string())
    }

    fn on_stage(&mut self, round: &RoundState, stage: Stage) {
        match stage {
            Stage::Presenting => {
                let image = round.target_spec()["image"].as_str().unwrap_or("?");
                println!("round {:>3}  showing {image}", round.round_number());
            }
            Stage::Collecting => self.current = Some(self.plan(round)),
            Stage::Feedback | Stage::Idle => {}
        }
    }

    fn poll_response(&mut self, _round: &RoundState, elapsed: Duration) -> Option<String> {
        match self.current.take() {
            Some(Planned::Answer(after, answer)) if elapsed >= after => {
                println!("           answered {answer} after {:.2}s", elapsed.as_secs_f64());
                Some(answer)
            }
            other => {
                self.current = other;
                None
            }
        }
    }

    fn on_outcome(&mut self, _round: &RoundState, outcome: &RoundOutcome) {
        match (&outcome.first_responder, &outcome.answer) {
            (Some(peer), Some(answer)) => println!(
                "           first: {peer} with {answer} -> {}",
                if outcome.correct { "+1 each" } else { "no points" }
            ),
            _ => println!("           nobody answered"),
        }
    }
}
