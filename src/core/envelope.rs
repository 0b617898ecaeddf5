//! Envelope wire format.
//!
//! One envelope per UDP datagram, UTF-8 JSON:
//!
//! ```text
//! { "type": "<message type>", "timestamp": <f64>, "data": { ... } }
//! ```
//!
//! `timestamp` is the sender's monotonic clock in seconds. It is only ever
//! compared against the same sender's clock (through echo fields) and is
//! never used to order messages across peers.

use std::fmt;
use std::str::FromStr;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::constants::{
    MAX_DATAGRAM_SIZE, TYPE_END_EXPERIMENT, TYPE_PING, TYPE_PONG, TYPE_RESPONSE_UPDATE,
    TYPE_ROUND_START, TYPE_STAGE_PREFIX, TYPE_STAGE_SYNC_ACK,
};
use super::error::EnvelopeError;
use super::types::{PeerId, Stage};

/// Closed set of message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum MessageType {
    /// Readiness / liveness probe.
    Ping,
    /// Reply to a ping.
    Pong,
    /// Round parameters.
    RoundStart,
    /// Stage transition (`stage_<name>`).
    Stage(Stage),
    /// Acknowledgment of a stage transition.
    StageSyncAck,
    /// A peer's answer.
    ResponseUpdate,
    /// Terminal message.
    EndExperiment,
}

impl MessageType {
    /// Wire name of the type.
    pub fn name(&self) -> String {
        match self {
            MessageType::Ping => TYPE_PING.to_string(),
            MessageType::Pong => TYPE_PONG.to_string(),
            MessageType::RoundStart => TYPE_ROUND_START.to_string(),
            MessageType::Stage(stage) => format!("{TYPE_STAGE_PREFIX}{}", stage.as_str()),
            MessageType::StageSyncAck => TYPE_STAGE_SYNC_ACK.to_string(),
            MessageType::ResponseUpdate => TYPE_RESPONSE_UPDATE.to_string(),
            MessageType::EndExperiment => TYPE_END_EXPERIMENT.to_string(),
        }
    }
}

impl FromStr for MessageType {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            TYPE_PING => Ok(MessageType::Ping),
            TYPE_PONG => Ok(MessageType::Pong),
            TYPE_ROUND_START => Ok(MessageType::RoundStart),
            TYPE_STAGE_SYNC_ACK => Ok(MessageType::StageSyncAck),
            TYPE_RESPONSE_UPDATE => Ok(MessageType::ResponseUpdate),
            TYPE_END_EXPERIMENT => Ok(MessageType::EndExperiment),
            other => other
                .strip_prefix(TYPE_STAGE_PREFIX)
                .and_then(Stage::from_name)
                .filter(|stage| Stage::SYNCED.contains(stage))
                .map(MessageType::Stage)
                .ok_or_else(|| EnvelopeError::UnknownType(other.to_string())),
        }
    }
}

impl TryFrom<String> for MessageType {
    type Error = EnvelopeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<MessageType> for String {
    fn from(kind: MessageType) -> Self {
        kind.name()
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// `ping` / `pong` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Readiness {
    /// Sender is ready.
    pub ready: bool,
    /// Timestamp of the ping this pong answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<f64>,
}

/// `round_start` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundStart {
    /// Round number, strictly increasing.
    pub round_number: u32,
    /// Round parameters. Opaque to the protocol.
    pub target_spec: Value,
}

/// `stage_<name>` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageAnnounce {
    /// Trial (round) the transition belongs to.
    pub trial_number: u32,
    /// Stage being entered.
    pub stage_name: String,
}

/// `stage_sync_ack` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageAck {
    /// Stage being acknowledged.
    pub stage_name: String,
    /// Trial of the acknowledged transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trial_number: Option<u32>,
    /// Timestamp of the announcement being acknowledged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub echo: Option<f64>,
}

/// `response_update` payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseUpdate {
    /// Peer that answered.
    pub responder: PeerId,
    /// The answer.
    pub answer: String,
    /// Seconds between the start of Collecting and the answer, on the
    /// responder's clock.
    pub elapsed_seconds: f64,
    /// Round the answer belongs to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_number: Option<u32>,
}

/// A typed, timestamped message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Sender's monotonic clock at send time, in seconds.
    pub timestamp: f64,
    /// Type-specific payload.
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Envelope {
    fn with_payload<T: Serialize>(
        kind: MessageType,
        timestamp: f64,
        payload: &T,
    ) -> Result<Self, EnvelopeError> {
        let data = match serde_json::to_value(payload)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        Ok(Self {
            kind,
            timestamp,
            data,
        })
    }

    /// `ping{ready:true}`.
    pub fn ping(timestamp: f64) -> Self {
        Self::readiness(MessageType::Ping, timestamp, None)
    }

    /// `pong{ready:true, echo}`.
    pub fn pong(timestamp: f64, echo: f64) -> Self {
        Self::readiness(MessageType::Pong, timestamp, Some(echo))
    }

    fn readiness(kind: MessageType, timestamp: f64, echo: Option<f64>) -> Self {
        let mut data = Map::new();
        data.insert("ready".to_string(), Value::Bool(true));
        if let Some(echo) = echo {
            data.insert("echo".to_string(), Value::from(echo));
        }
        Self {
            kind,
            timestamp,
            data,
        }
    }

    /// `round_start{roundNumber, targetSpec}`.
    pub fn round_start(timestamp: f64, payload: &RoundStart) -> Result<Self, EnvelopeError> {
        Self::with_payload(MessageType::RoundStart, timestamp, payload)
    }

    /// `stage_<name>{trialNumber, stageName}`.
    pub fn stage(timestamp: f64, trial_number: u32, stage: Stage) -> Result<Self, EnvelopeError> {
        let payload = StageAnnounce {
            trial_number,
            stage_name: stage.as_str().to_string(),
        };
        Self::with_payload(MessageType::Stage(stage), timestamp, &payload)
    }

    /// `stage_sync_ack{stageName, trialNumber, echo}`.
    pub fn stage_ack(timestamp: f64, payload: &StageAck) -> Result<Self, EnvelopeError> {
        Self::with_payload(MessageType::StageSyncAck, timestamp, payload)
    }

    /// `response_update{responder, answer, elapsedSeconds, roundNumber}`.
    pub fn response_update(
        timestamp: f64,
        payload: &ResponseUpdate,
    ) -> Result<Self, EnvelopeError> {
        Self::with_payload(MessageType::ResponseUpdate, timestamp, payload)
    }

    /// `end_experiment{}`.
    pub fn end_experiment(timestamp: f64) -> Self {
        Self {
            kind: MessageType::EndExperiment,
            timestamp,
            data: Map::new(),
        }
    }

    /// Decode the payload as `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, EnvelopeError> {
        Ok(serde_json::from_value(Value::Object(self.data.clone()))?)
    }

    /// Decode the payload as `T`, checking the message type first.
    pub fn expect_payload<T: DeserializeOwned>(
        &self,
        kind: MessageType,
        expected: &'static str,
    ) -> Result<T, EnvelopeError> {
        if self.kind != kind {
            return Err(EnvelopeError::PayloadMismatch {
                expected,
                actual: self.kind.name(),
            });
        }
        self.payload()
    }

    /// Encode to a datagram.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        let bytes = serde_json::to_vec(self)?;
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(EnvelopeError::TooLarge {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        Ok(bytes)
    }

    /// Decode a datagram.
    pub fn decode(data: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(data)?)
    }
}
