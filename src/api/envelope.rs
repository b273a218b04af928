//! JSON envelope of the reader protocol.
//!
//! ```text
//!  outbound  {"event":"EVENT"|"RESPONSE","data":{"type":T,"payload":{..}}}
//!            {"event":"HEARTBEAT"}
//!  inbound   {"data":{"type":T,"payload":{..}}}   (other keys ignored)
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::ProtocolError;
use crate::bus::{Frame, MAX_FRAME_LEN};

/// Top-level `event` field of an outbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// Reader-initiated.
    Event,
    /// Reply to something the backend sent.
    Response,
    Heartbeat,
}

#[derive(Serialize)]
struct Outbound<'a> {
    event: Direction,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<OutboundData<'a>>,
}

#[derive(Serialize)]
struct OutboundData<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    payload: &'a Value,
}

#[derive(Deserialize)]
struct Inbound {
    data: InboundData,
}

/// Body of a frame received from the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InboundData {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

fn into_frame(json: &str) -> Result<Frame, ProtocolError> {
    if json.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(json.len()));
    }
    let mut frame = Frame::new();
    frame
        .push_str(json)
        .map_err(|_| ProtocolError::FrameTooLarge(json.len()))?;
    Ok(frame)
}

/// Serialize an EVENT or RESPONSE.  A non-object payload is sent as `{}`.
pub fn encode(direction: Direction, kind: &str, payload: &Value) -> Result<Frame, ProtocolError> {
    let empty = Value::Object(Map::new());
    let payload = if payload.is_object() { payload } else { &empty };
    let json = serde_json::to_string(&Outbound {
        event: direction,
        data: Some(OutboundData { kind, payload }),
    })
    .map_err(|_| ProtocolError::Encode)?;
    into_frame(&json)
}

pub fn heartbeat() -> Result<Frame, ProtocolError> {
    let json = serde_json::to_string(&Outbound {
        event: Direction::Heartbeat,
        data: None,
    })
    .map_err(|_| ProtocolError::Encode)?;
    into_frame(&json)
}

/// Parse an inbound frame.  A missing or non-object payload becomes `{}`.
pub fn decode(text: &str) -> Result<InboundData, ProtocolError> {
    let Inbound { mut data } =
        serde_json::from_str(text).map_err(|e| ProtocolError::Malformed(e.line(), e.column()))?;
    if data.kind.is_empty() {
        return Err(ProtocolError::MissingType);
    }
    if !data.payload.is_object() {
        data.payload = Value::Object(Map::new());
    }
    Ok(data)
}
