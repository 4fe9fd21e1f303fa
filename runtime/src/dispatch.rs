//! Untyped event dispatcher. Probes a minimal envelope to decide which
//! family a raw event belongs to, then hands it to the matching adapter.

use serde::Deserialize;
use serde_json::Value;

use strato_core::error::AppError;
use strato_core::http::Request;

use crate::batch::BatchRouter;
use crate::envelope::{self, EncodedResponse, EnvelopeError};
use crate::pipeline::Pipeline;

/// The outcome of dispatching one raw event.
#[derive(Debug)]
pub enum Dispatched {
    /// An HTTP-family event, encoded back into its envelope.
    Http(EncodedResponse),
    /// A queue or change-stream batch: the partial-failure report.
    Batch(Value),
    /// A bus event; `None` means no selector matched.
    Bus(Option<Value>),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Probe {
    #[serde(rename = "Records")]
    records: Vec<ProbeRecord>,
    #[serde(rename = "requestContext")]
    request_context: Option<ProbeContext>,
    #[serde(rename = "routeKey")]
    route_key: Option<String>,
    #[serde(rename = "detail-type")]
    detail_type: Option<String>,
    #[serde(rename = "httpMethod")]
    http_method: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProbeRecord {
    #[serde(rename = "eventSource")]
    event_source: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ProbeContext {
    http: Option<Value>,
    #[serde(rename = "connectionId")]
    connection_id: Option<String>,
    elb: Option<Value>,
}

const QUEUE_SOURCE: &str = "aws:sqs";
const STREAM_SOURCE: &str = "aws:dynamodb";

/// Routes raw events to the HTTP pipeline, the batch adapters, or the bus
/// adapter based on envelope shape alone.
pub struct Dispatcher {
    pipeline: Pipeline,
    batch: BatchRouter,
    websocket_enabled: bool,
}

impl Dispatcher {
    pub fn new(pipeline: Pipeline) -> Self {
        Self {
            pipeline,
            batch: BatchRouter::new(),
            websocket_enabled: false,
        }
    }

    pub fn pipeline(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    pub fn batch(&mut self) -> &mut BatchRouter {
        &mut self.batch
    }

    /// WebSocket envelopes are only recognised once the application opts in.
    pub fn enable_websocket(&mut self) -> &mut Self {
        self.websocket_enabled = true;
        self
    }

    pub async fn dispatch(&self, raw: &Value) -> Result<Dispatched, AppError> {
        self.dispatch_hinted(raw, 0).await
    }

    /// `remaining_ms` is the outer scheduler's remaining-time hint.
    pub async fn dispatch_hinted(
        &self,
        raw: &Value,
        remaining_ms: i64,
    ) -> Result<Dispatched, AppError> {
        let probe: Probe = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::bad_request(format!("dispatch: invalid event: {e}")))?;

        if let Some(first) = probe.records.first() {
            return match first.event_source.as_str() {
                QUEUE_SOURCE => Ok(Dispatched::Batch(self.batch.handle_queue(raw).await?)),
                STREAM_SOURCE => Ok(Dispatched::Batch(self.batch.handle_stream(raw).await?)),
                other => Err(AppError::bad_request(format!(
                    "dispatch: unknown record source: {other}"
                ))),
            };
        }

        if probe.detail_type.is_some() {
            return Ok(Dispatched::Bus(self.batch.handle_bus(raw).await?));
        }

        if let Some(ctx) = &probe.request_context {
            if ctx.http.is_some() {
                // Route key distinguishes the v2 gateway from function URLs;
                // both normalize identically.
                let family = if probe.route_key.is_some() {
                    "httpv2"
                } else {
                    "function-url"
                };
                return Ok(Dispatched::Http(
                    self.serve(family, envelope::httpv2::to_request(raw), remaining_ms, envelope::httpv2::from_response)
                        .await,
                ));
            }
            if ctx.connection_id.is_some() && self.websocket_enabled {
                return Ok(Dispatched::Http(
                    self.serve(
                        "websocket",
                        envelope::websocket::to_request(raw),
                        remaining_ms,
                        envelope::websocket::from_response,
                    )
                    .await,
                ));
            }
            if ctx.elb.is_some() && probe.http_method.as_deref().is_some_and(|m| !m.is_empty()) {
                return Ok(Dispatched::Http(
                    self.serve("alb", envelope::proxy::to_request(raw), remaining_ms, envelope::proxy::from_response)
                        .await,
                ));
            }
        }

        if probe.http_method.is_some() {
            return Ok(Dispatched::Http(
                self.serve("proxy", envelope::proxy::to_request(raw), remaining_ms, envelope::proxy::from_response)
                    .await,
            ));
        }

        Err(AppError::internal("unknown event type"))
    }

    async fn serve(
        &self,
        family: &str,
        parsed: Result<Request, EnvelopeError>,
        remaining_ms: i64,
        encode: fn(strato_core::http::Response) -> EncodedResponse,
    ) -> EncodedResponse {
        let response = match parsed {
            Ok(request) => self.pipeline.handle_hinted(request, remaining_ms).await,
            Err(err) => {
                let error = AppError::bad_request(format!("{family}: {err}"));
                self.pipeline.error_response(&error)
            }
        };
        encode(response)
    }
}
