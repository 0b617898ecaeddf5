//! Small shared types: stages, roles and peer identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of a round.
///
/// Rounds walk `Idle -> Presenting -> Collecting -> Feedback -> Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// No round in progress.
    Idle,
    /// Stimulus is shown.
    Presenting,
    /// Responses are being collected.
    Collecting,
    /// Outcome is shown.
    Feedback,
}

impl Stage {
    /// The stages announced over the wire, in order.
    pub const SYNCED: [Stage; 3] = [Stage::Presenting, Stage::Collecting, Stage::Feedback];

    /// Wire name of the stage (`stageName`).
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Idle => "idle",
            Stage::Presenting => "presenting",
            Stage::Collecting => "collecting",
            Stage::Feedback => "feedback",
        }
    }

    /// Parse a wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "idle" => Some(Stage::Idle),
            "presenting" => Some(Stage::Presenting),
            "collecting" => Some(Stage::Collecting),
            "feedback" => Some(Stage::Feedback),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol role of the local peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Generates round parameters and drives stage transitions.
    Initiator,
    /// Consumes round parameters and follows stage transitions.
    Follower,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Follower => f.write_str("follower"),
        }
    }
}

/// Identifier of a peer (the `responder` field on the wire).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Create a peer id.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Whether the session runs with a live counterpart.
///
/// Selected once, after the handshake, and never inferred again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeerMode {
    /// Both peers are connected.
    TwoPeer,
    /// Handshake failed and the session continues locally; every round
    /// resolves on the local response alone.
    SinglePeer,
}
