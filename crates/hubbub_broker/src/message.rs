//! Wire frame definitions.
//!
//! `Event` is the unit of fan-out and replay: the published `message`
//! (client-supplied id plus opaque payload) wrapped with its topic and a
//! publish-time timestamp. `ServerFrame` is every frame the server can emit
//! onto a session transport; frames are internally tagged JSON objects
//! (`{"type": "event", ...}`).
//!
//! Notes on fields:
//! - `ts`: ISO-8601 UTC (RFC 3339, millisecond precision), assigned by the
//!   broker at publish time, or at emit time for control frames
//! - `request_id`: echoed verbatim from the client frame that triggered a
//!   reply; `null` when the client supplied none or the frame was unparsable

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp string for outgoing frames, e.g. `2026-08-02T12:34:56.789Z`.
pub fn now_ts() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// The client-supplied portion of a published event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EventMessage {
    pub id: String,
    pub payload: Value,
}

/// A publish record; what topics store for replay and subscribers receive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub topic: String,
    pub message: EventMessage,
    pub ts: String,
}

impl Event {
    pub fn new(topic: &str, message: EventMessage) -> Self {
        Self {
            topic: topic.to_string(),
            message,
            ts: now_ts(),
        }
    }
}

/// Error codes surfaced to clients.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCode {
    #[serde(rename = "BAD_REQUEST")]
    BadRequest,
    #[serde(rename = "TOPIC_NOT_FOUND")]
    TopicNotFound,
    #[serde(rename = "SLOW_CONSUMER")]
    SlowConsumer,
    #[serde(rename = "INTERNAL_ERROR")]
    InternalError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: ErrorCode,
    pub message: String,
}

/// Payload discriminator for `info` frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum InfoMsg {
    #[serde(rename = "connected")]
    Connected,
    #[serde(rename = "topic_deleted")]
    TopicDeleted,
}

/// Frames the server emits onto a session transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    #[serde(rename = "info")]
    Info {
        msg: InfoMsg,
        #[serde(skip_serializing_if = "Option::is_none")]
        client_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
        ts: String,
    },
    #[serde(rename = "ack")]
    Ack {
        request_id: Option<Value>,
        topic: String,
        status: String,
        ts: String,
    },
    #[serde(rename = "event")]
    Event(Event),
    #[serde(rename = "error")]
    Error {
        request_id: Option<Value>,
        error: ErrorBody,
        ts: String,
    },
    #[serde(rename = "pong")]
    Pong {
        request_id: Option<Value>,
        ts: String,
    },
}

impl ServerFrame {
    /// Welcome frame carrying the server-assigned session identity.
    pub fn connected(client_id: &str) -> Self {
        ServerFrame::Info {
            msg: InfoMsg::Connected,
            client_id: Some(client_id.to_string()),
            topic: None,
            ts: now_ts(),
        }
    }

    /// Notification that a topic this subscriber had joined was deleted.
    pub fn topic_deleted(topic: &str) -> Self {
        ServerFrame::Info {
            msg: InfoMsg::TopicDeleted,
            client_id: None,
            topic: Some(topic.to_string()),
            ts: now_ts(),
        }
    }

    pub fn ack(request_id: Option<Value>, topic: &str) -> Self {
        ServerFrame::Ack {
            request_id,
            topic: topic.to_string(),
            status: "ok".to_string(),
            ts: now_ts(),
        }
    }

    pub fn error(request_id: Option<Value>, code: ErrorCode, message: &str) -> Self {
        ServerFrame::Error {
            request_id,
            error: ErrorBody {
                code,
                message: message.to_string(),
            },
            ts: now_ts(),
        }
    }

    pub fn pong(request_id: Option<Value>) -> Self {
        ServerFrame::Pong {
            request_id,
            ts: now_ts(),
        }
    }
}
