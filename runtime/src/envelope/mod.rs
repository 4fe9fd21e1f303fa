use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde_json::Value;

use strato_core::http::{BodyStream, Response};

pub mod httpv2;
pub mod proxy;
pub mod websocket;

/// Envelope-level failure. The dispatcher prefixes these with the adapter
/// family; at the HTTP boundary they surface as `bad_request`.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    #[error("invalid envelope: {0}")]
    Parse(String),
    #[error("invalid body encoding: {0}")]
    Body(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Parse(err.to_string())
    }
}

/// An encoded outbound envelope. Streaming is selected when the response is
/// `text/event-stream` and not base64; the prelude carries status and
/// headers, the stream carries the frames.
#[derive(Debug)]
pub enum EncodedResponse {
    Json(Value),
    Stream { prelude: Value, body: BodyStream },
}

impl EncodedResponse {
    pub fn into_json(self) -> Option<Value> {
        match self {
            EncodedResponse::Json(value) => Some(value),
            EncodedResponse::Stream { .. } => None,
        }
    }
}

pub(crate) fn decode_body(body: Option<&str>, is_base64: bool) -> Result<Vec<u8>, EnvelopeError> {
    let Some(body) = body else {
        return Ok(Vec::new());
    };
    if is_base64 {
        BASE64
            .decode(body.trim())
            .map_err(|e| EnvelopeError::Body(e.to_string()))
    } else {
        Ok(body.as_bytes().to_vec())
    }
}

pub(crate) fn encode_body(response: &Response) -> String {
    if response.is_base64 {
        BASE64.encode(&response.body)
    } else {
        String::from_utf8_lossy(&response.body).into_owned()
    }
}

/// Streaming applies only to event streams; binary bodies always buffer.
pub(crate) fn wants_stream(response: &Response) -> bool {
    response.is_streaming()
        && !response.is_base64
        && response
            .headers
            .get("content-type")
            .is_some_and(|ct| ct.starts_with("text/event-stream"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_body_handles_missing_plain_and_base64() {
        assert!(decode_body(None, false).unwrap().is_empty());
        assert_eq!(decode_body(Some("hi"), false).unwrap(), b"hi");
        assert_eq!(decode_body(Some("aGk="), true).unwrap(), b"hi");
    }

    #[test]
    fn malformed_base64_is_a_body_error() {
        assert!(matches!(
            decode_body(Some("%%%"), true),
            Err(EnvelopeError::Body(_))
        ));
    }

    #[test]
    fn encode_body_base64_encodes_binary_responses() {
        let mut response = Response::new(200).with_body(vec![0xff, 0x00]);
        response.is_base64 = true;
        assert_eq!(encode_body(&response), "/wA=");
    }

    #[test]
    fn stream_selection_requires_event_stream_content_type() {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let mut response = Response::new(200).with_header("content-type", "text/event-stream");
        response.body_stream = Some(rx);
        assert!(wants_stream(&response));

        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let mut buffered = Response::new(200).with_header("content-type", "application/json");
        buffered.body_stream = Some(rx);
        assert!(!wants_stream(&buffered));
    }
}
