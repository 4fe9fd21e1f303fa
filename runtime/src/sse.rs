use serde_json::Value;
use tokio::sync::mpsc;

use strato_core::http::Response;

/// Payload of a single SSE event. Non-string values are JSON-encoded by the
/// framer.
#[derive(Debug, Clone)]
pub enum SseData {
    Text(String),
    Bytes(Vec<u8>),
    Json(Value),
}

impl From<&str> for SseData {
    fn from(s: &str) -> Self {
        SseData::Text(s.to_string())
    }
}

impl From<String> for SseData {
    fn from(s: String) -> Self {
        SseData::Text(s)
    }
}

impl From<Value> for SseData {
    fn from(v: Value) -> Self {
        SseData::Json(v)
    }
}

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub id: Option<String>,
    pub event: Option<String>,
    pub data: SseData,
}

impl SseEvent {
    pub fn new(data: impl Into<SseData>) -> Self {
        Self {
            id: None,
            event: None,
            data: data.into(),
        }
    }

    pub fn named(event: &str, data: impl Into<SseData>) -> Self {
        Self {
            id: None,
            event: Some(event.to_string()),
            data: data.into(),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = Some(id.to_string());
        self
    }

    /// Encode one frame:
    ///
    /// ```text
    /// [id: <id>\n][event: <name>\n]data: <line>\n...\n
    /// ```
    ///
    /// CR and CRLF in the payload normalize to LF before line splitting; an
    /// empty payload still emits one empty `data:` line so the terminating
    /// blank line stays well-formed.
    pub fn frame(&self) -> Vec<u8> {
        let mut out = Vec::new();
        if let Some(id) = &self.id {
            out.extend_from_slice(format!("id: {id}\n").as_bytes());
        }
        if let Some(event) = &self.event {
            out.extend_from_slice(format!("event: {event}\n").as_bytes());
        }

        let payload = match &self.data {
            SseData::Text(text) => text.clone(),
            SseData::Bytes(bytes) => String::from_utf8_lossy(bytes).into_owned(),
            SseData::Json(value) => serde_json::to_string(value).unwrap_or_default(),
        };
        let normalized = payload.replace("\r\n", "\n").replace('\r', "\n");
        for line in normalized.split('\n') {
            out.extend_from_slice(format!("data: {line}\n").as_bytes());
        }
        out.push(b'\n');
        out
    }
}

/// The fixed headers every SSE response carries.
pub fn apply_sse_headers(response: &mut Response) {
    response.headers.set("content-type", "text/event-stream");
    response.headers.set("cache-control", "no-cache");
    response.headers.set("connection", "keep-alive");
}

/// Collect all frames into a buffered response body.
pub fn buffered_response(events: &[SseEvent]) -> Response {
    let mut response = Response::new(200);
    apply_sse_headers(&mut response);
    for event in events {
        response.body.extend_from_slice(&event.frame());
    }
    response
}

/// Sender half of a streaming SSE response. Dropping it closes the stream.
#[derive(Clone)]
pub struct SseSender {
    tx: mpsc::Sender<Vec<u8>>,
}

impl SseSender {
    /// Frame and send one event. Returns false when the receiving transport
    /// has gone away; the caller should stop emitting.
    pub async fn send(&self, event: &SseEvent) -> bool {
        self.tx.send(event.frame()).await.is_ok()
    }
}

/// Build a streaming SSE response plus the sender that feeds it.
pub fn streaming_response() -> (SseSender, Response) {
    let (tx, rx) = mpsc::channel(16);
    let mut response = Response::new(200);
    apply_sse_headers(&mut response);
    response.body_stream = Some(rx);
    (SseSender { tx }, response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn frame_includes_id_event_and_data_lines_in_order() {
        let event = SseEvent::named("x", "a\r\nb").with_id("7");
        assert_eq!(event.frame(), b"id: 7\nevent: x\ndata: a\ndata: b\n\n");
    }

    #[test]
    fn bare_cr_normalizes_to_lf() {
        let event = SseEvent::new("a\rb");
        assert_eq!(event.frame(), b"data: a\ndata: b\n\n");
    }

    #[test]
    fn empty_payload_still_emits_one_data_line() {
        let event = SseEvent::new("");
        assert_eq!(event.frame(), b"data: \n\n");
    }

    #[test]
    fn json_payload_is_encoded_on_one_line() {
        let event = SseEvent::named("progress", json!({"seq": 1}));
        assert_eq!(event.frame(), b"event: progress\ndata: {\"seq\":1}\n\n");
    }

    #[test]
    fn every_frame_ends_with_exactly_one_blank_line() {
        for event in [
            SseEvent::new("x"),
            SseEvent::new(""),
            SseEvent::named("e", "a\nb"),
        ] {
            let frame = event.frame();
            assert!(frame.ends_with(b"\n\n"));
            assert!(!frame.ends_with(b"\n\n\n"));
        }
    }

    #[test]
    fn buffered_response_concatenates_frames_and_sets_headers() {
        let response = buffered_response(&[SseEvent::new("a"), SseEvent::new("b")]);
        assert_eq!(response.headers.get("content-type"), Some("text/event-stream"));
        assert_eq!(response.headers.get("cache-control"), Some("no-cache"));
        assert_eq!(response.headers.get("connection"), Some("keep-alive"));
        assert_eq!(response.body, b"data: a\n\ndata: b\n\n");
    }

    #[tokio::test]
    async fn streaming_response_delivers_frames_in_order() {
        let (sender, mut response) = streaming_response();
        assert!(response.is_streaming());
        assert!(sender.send(&SseEvent::new("one")).await);
        assert!(sender.send(&SseEvent::new("two")).await);
        drop(sender);

        let mut rx = response.body_stream.take().unwrap();
        let mut collected = Vec::new();
        while let Some(chunk) = rx.recv().await {
            collected.extend_from_slice(&chunk);
        }
        assert_eq!(collected, b"data: one\n\ndata: two\n\n");
    }

    #[tokio::test]
    async fn send_reports_closed_transport() {
        let (sender, response) = streaming_response();
        drop(response);
        assert!(!sender.send(&SseEvent::new("x")).await);
    }
}
