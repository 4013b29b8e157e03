//! Inbound frame schema and validation.
//!
//! Clients send one JSON object per frame. Parsing is deliberately
//! permissive (every field lands as an optional `Value`) so that validation
//! can report the exact offending field and still echo the client's
//! `request_id`; a strict serde enum would collapse everything into one
//! opaque parse error. Unknown extra fields are ignored.
//!
//! Validation order, applied before any registry call:
//! 1. the frame must be a JSON object,
//! 2. `type` must name one of the known frame types,
//! 3. the per-type required fields must be present non-empty strings,
//! 4. a supplied `message.id` must be an RFC 4122 UUID.
//!
//! A frame that fails validation produces a `FrameError` and must not
//! mutate any registry state; the caller replies with the mapped `error`
//! frame and carries on.

use serde::Deserialize;
use serde_json::Value;
use uuid::{Uuid, Variant};

use hubbub_broker::message::ErrorCode;

/// An inbound frame before validation. All fields optional; unknown fields
/// are dropped by serde.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(rename = "type")]
    frame_type: Option<Value>,
    topic: Option<Value>,
    client_id: Option<Value>,
    last_n: Option<Value>,
    message: Option<Value>,
    request_id: Option<Value>,
}

/// The `message` object of a publish frame after validation. A missing id
/// is filled with a fresh UUIDv4.
#[derive(Debug, Clone, PartialEq)]
pub struct PublishMessage {
    pub id: String,
    pub payload: Value,
}

/// A validated client request, ready for dispatch to the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientRequest {
    Subscribe {
        topic: String,
        client_id: String,
        last_n: usize,
        request_id: Option<Value>,
    },
    Unsubscribe {
        topic: String,
        client_id: String,
        request_id: Option<Value>,
    },
    Publish {
        topic: String,
        message: PublishMessage,
        request_id: Option<Value>,
    },
    Ping {
        request_id: Option<Value>,
    },
}

/// A validation failure, carrying whatever `request_id` could be recovered.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameError {
    pub code: ErrorCode,
    pub message: String,
    pub request_id: Option<Value>,
}

impl FrameError {
    fn bad_request(message: impl Into<String>, request_id: Option<Value>) -> Self {
        Self {
            code: ErrorCode::BadRequest,
            message: message.into(),
            request_id,
        }
    }
}

/// Hyphenated RFC 4122 textual form: `8-4-4-4-12` hex groups, version 1-5,
/// variant bits `8`/`9`/`a`/`b`.
pub fn is_valid_uuid(s: &str) -> bool {
    let b = s.as_bytes();
    if b.len() != 36 || b[8] != b'-' || b[13] != b'-' || b[18] != b'-' || b[23] != b'-' {
        return false;
    }
    match Uuid::parse_str(s) {
        Ok(u) => matches!(u.get_version_num(), 1..=5) && u.get_variant() == Variant::RFC4122,
        Err(_) => false,
    }
}

fn require_string(
    field: &Option<Value>,
    name: &str,
    request_id: &Option<Value>,
) -> Result<String, FrameError> {
    match field {
        Some(Value::String(s)) if !s.is_empty() => Ok(s.clone()),
        _ => Err(FrameError::bad_request(
            format!("{name} must be a non-empty string"),
            request_id.clone(),
        )),
    }
}

fn validate_publish_message(
    message: &Option<Value>,
    request_id: &Option<Value>,
) -> Result<PublishMessage, FrameError> {
    let Some(Value::Object(fields)) = message else {
        return Err(FrameError::bad_request(
            "message must be an object",
            request_id.clone(),
        ));
    };

    // Field presence is checked before the id's format, so a frame that is
    // wrong in both ways reports the missing field first.
    let Some(payload) = fields.get("payload") else {
        return Err(FrameError::bad_request(
            "message.payload is required",
            request_id.clone(),
        ));
    };

    let id = match fields.get("id") {
        None | Some(Value::Null) => Uuid::new_v4().to_string(),
        Some(Value::String(s)) if is_valid_uuid(s) => s.clone(),
        Some(_) => {
            return Err(FrameError::bad_request(
                "message.id must be a valid UUID",
                request_id.clone(),
            ));
        }
    };

    Ok(PublishMessage {
        id,
        payload: payload.clone(),
    })
}

/// Parse and validate one inbound frame.
pub fn parse_frame(text: &str) -> Result<ClientRequest, FrameError> {
    let value: Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => {
            return Err(FrameError::bad_request("Invalid JSON format", None));
        }
    };
    if !value.is_object() {
        return Err(FrameError::bad_request("Invalid JSON format", None));
    }
    // Cannot fail: every field is optional and unknown keys are ignored.
    let raw: RawFrame = serde_json::from_value(value)
        .map_err(|_| FrameError::bad_request("Invalid JSON format", None))?;

    let request_id = raw.request_id.clone();

    let frame_type = match &raw.frame_type {
        Some(Value::String(s)) => s.clone(),
        _ => {
            return Err(FrameError::bad_request(
                "type is required",
                request_id,
            ));
        }
    };

    match frame_type.as_str() {
        "subscribe" => {
            let topic = require_string(&raw.topic, "topic", &request_id)?;
            let client_id = require_string(&raw.client_id, "client_id", &request_id)?;
            let last_n = match &raw.last_n {
                None | Some(Value::Null) => 0,
                Some(v) => match v.as_u64() {
                    Some(n) => n as usize,
                    None => {
                        return Err(FrameError::bad_request(
                            "last_n must be a non-negative integer",
                            request_id,
                        ));
                    }
                },
            };
            Ok(ClientRequest::Subscribe {
                topic,
                client_id,
                last_n,
                request_id,
            })
        }
        "unsubscribe" => {
            let topic = require_string(&raw.topic, "topic", &request_id)?;
            let client_id = require_string(&raw.client_id, "client_id", &request_id)?;
            Ok(ClientRequest::Unsubscribe {
                topic,
                client_id,
                request_id,
            })
        }
        "publish" => {
            let topic = require_string(&raw.topic, "topic", &request_id)?;
            let message = validate_publish_message(&raw.message, &request_id)?;
            Ok(ClientRequest::Publish {
                topic,
                message,
                request_id,
            })
        }
        "ping" => Ok(ClientRequest::Ping { request_id }),
        other => Err(FrameError::bad_request(
            format!("Unknown message type: {other}"),
            request_id,
        )),
    }
}
