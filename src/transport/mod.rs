//! Transport Adapters (§4.7): SSE and WebSocket framing over the same
//! Session Manager / Stream Resolver / Visibility Filter pipeline.

pub mod sse;
pub mod websocket;

use serde::Serialize;
use serde_json::Value;

/// Outbound frame shared by both transports. Over SSE this becomes
/// `event: <event>\ndata: <payload>\n\n`; over WebSocket it is serialized
/// whole, with `stream` set to the `[name]` or `[name, param]` pair the
/// client subscribed with.
#[derive(Debug, Serialize)]
pub struct OutboundFrame<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream: Option<Vec<&'a str>>,
    pub event: &'a str,
    pub payload: Value,
}

/// Builds the `stream` tuple for a resolved stream name, per §4.7: the
/// `list` id or the `tag` is carried alongside the name for streams that
/// were parameterized.
pub fn stream_tuple<'a>(stream_name: &'a str, param: Option<&'a str>) -> Vec<&'a str> {
    match param {
        Some(p) => vec![stream_name, p],
        None => vec![stream_name],
    }
}
