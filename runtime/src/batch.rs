//! Batch-event adapters for queue and change-stream envelopes, plus the
//! pattern-matched bus family. Record handlers are registered per logical
//! source; partial failures are reported back to the outer scheduler, which
//! owns redelivery.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use strato_core::error::AppError;

/// Handles a single record from a batch envelope.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, record: &Value) -> Result<(), AppError>;
}

pub type DynEventHandler = Arc<dyn EventHandler>;

/// Wraps record handling, mirroring the HTTP middleware onion.
#[async_trait]
pub trait EventMiddleware: Send + Sync {
    async fn call(&self, record: &Value, next: DynEventHandler) -> Result<(), AppError>;
}

struct FnEventHandler<F>(F);

#[async_trait]
impl<F, Fut> EventHandler for FnEventHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send,
{
    async fn handle(&self, record: &Value) -> Result<(), AppError> {
        (self.0)(record.clone()).await
    }
}

/// Adapts an async closure into an [`EventHandler`].
pub fn event_handler_fn<F, Fut>(f: F) -> DynEventHandler
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<(), AppError>> + Send + 'static,
{
    Arc::new(FnEventHandler(f))
}

struct WrappedEvent {
    middleware: Arc<dyn EventMiddleware>,
    next: DynEventHandler,
}

#[async_trait]
impl EventHandler for WrappedEvent {
    async fn handle(&self, record: &Value) -> Result<(), AppError> {
        self.middleware.call(record, self.next.clone()).await
    }
}

fn wrap(middlewares: &[Arc<dyn EventMiddleware>], terminal: DynEventHandler) -> DynEventHandler {
    let mut handler = terminal;
    for middleware in middlewares.iter().rev() {
        handler = Arc::new(WrappedEvent {
            middleware: middleware.clone(),
            next: handler,
        });
    }
    handler
}

/// Selects bus events for a registered route.
#[derive(Debug, Clone)]
pub enum BusSelector {
    /// Matches when any resource ARN in the event ends in `:rule/<name>`.
    RuleName(String),
    /// Matches on exact `source` and `detail-type`.
    Pattern { source: String, detail_type: String },
}

#[derive(Debug, Deserialize)]
struct QueueRecord {
    #[serde(rename = "messageId")]
    message_id: String,
    #[serde(rename = "eventSourceARN", default)]
    event_source_arn: String,
}

#[derive(Debug, Deserialize)]
struct StreamRecord {
    #[serde(rename = "eventID")]
    event_id: String,
    #[serde(rename = "eventSourceARN", default)]
    event_source_arn: String,
}

#[derive(Debug, Deserialize)]
struct BatchEnvelope {
    #[serde(rename = "Records", default)]
    records: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct BusEnvelope {
    #[serde(default)]
    source: String,
    #[serde(rename = "detail-type", default)]
    detail_type: String,
    #[serde(default)]
    resources: Vec<String>,
}

/// Queue ARNs carry the source name as the final `:`-separated token.
fn queue_source_name(arn: &str) -> Option<&str> {
    arn.rsplit(':').next().filter(|name| !name.is_empty())
}

/// Change-stream ARNs look like `…:table/<name>/stream/<ts>`.
fn stream_table_name(arn: &str) -> Option<&str> {
    let after_table = arn.split(":table/").nth(1)?;
    let name = after_table.split("/stream/").next()?;
    if name.is_empty() { None } else { Some(name) }
}

fn rule_name(arn: &str) -> Option<&str> {
    arn.split(":rule/").nth(1).filter(|name| !name.is_empty())
}

/// Registry of record-level handlers keyed by logical source, plus
/// pattern-matched bus routes in registration order.
#[derive(Default)]
pub struct BatchRouter {
    queue_handlers: HashMap<String, DynEventHandler>,
    stream_handlers: HashMap<String, DynEventHandler>,
    bus_routes: Vec<(BusSelector, DynEventHandler)>,
    middlewares: Vec<Arc<dyn EventMiddleware>>,
}

impl BatchRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_queue(&mut self, source: &str, handler: DynEventHandler) {
        self.queue_handlers.insert(source.to_string(), handler);
    }

    pub fn on_stream(&mut self, table: &str, handler: DynEventHandler) {
        self.stream_handlers.insert(table.to_string(), handler);
    }

    pub fn on_bus(&mut self, selector: BusSelector, handler: DynEventHandler) {
        self.bus_routes.push((selector, handler));
    }

    pub fn middleware(&mut self, middleware: Arc<dyn EventMiddleware>) {
        self.middlewares.push(middleware);
    }

    /// Handle a queue-style batch, returning the partial-failure report.
    pub async fn handle_queue(&self, raw: &Value) -> Result<Value, AppError> {
        self.handle_batch(raw, "queue", |record| {
            let parsed: QueueRecord = serde_json::from_value(record.clone())
                .map_err(|e| AppError::bad_request(format!("queue: invalid record: {e}")))?;
            let source = queue_source_name(&parsed.event_source_arn)
                .map(str::to_string)
                .ok_or_else(|| AppError::bad_request("queue: record has no source"))?;
            Ok((parsed.message_id, source))
        })
        .await
    }

    /// Handle a change-stream batch, returning the partial-failure report.
    pub async fn handle_stream(&self, raw: &Value) -> Result<Value, AppError> {
        self.handle_batch(raw, "stream", |record| {
            let parsed: StreamRecord = serde_json::from_value(record.clone())
                .map_err(|e| AppError::bad_request(format!("stream: invalid record: {e}")))?;
            let table = stream_table_name(&parsed.event_source_arn)
                .map(str::to_string)
                .ok_or_else(|| AppError::bad_request("stream: record has no table"))?;
            Ok((parsed.event_id, table))
        })
        .await
    }

    async fn handle_batch<F>(&self, raw: &Value, family: &str, identify: F) -> Result<Value, AppError>
    where
        F: Fn(&Value) -> Result<(String, String), AppError>,
    {
        let envelope: BatchEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::bad_request(format!("{family}: invalid envelope: {e}")))?;

        let handlers = match family {
            "queue" => &self.queue_handlers,
            _ => &self.stream_handlers,
        };

        let mut failures: Vec<Value> = Vec::new();
        for record in &envelope.records {
            let (item_id, source) = identify(record)?;
            let Some(handler) = handlers.get(&source) else {
                // Unknown source fails closed so the whole batch redelivers.
                tracing::warn!(family, source = %source, "no handler registered, failing batch");
                return Ok(failure_report(envelope.records.iter().map(|r| {
                    identify(r).map(|(id, _)| id)
                })));
            };
            let chain = wrap(&self.middlewares, handler.clone());
            if let Err(error) = chain.handle(record).await {
                tracing::warn!(family, item = %item_id, %error, "record handler failed");
                failures.push(json!({"itemIdentifier": item_id}));
            }
        }
        Ok(json!({ "batchItemFailures": failures }))
    }

    /// Handle a pattern-matched bus event. Returns `Ok(None)` when no
    /// registered selector matches.
    pub async fn handle_bus(&self, raw: &Value) -> Result<Option<Value>, AppError> {
        let envelope: BusEnvelope = serde_json::from_value(raw.clone())
            .map_err(|e| AppError::bad_request(format!("bus: invalid envelope: {e}")))?;

        for (selector, handler) in &self.bus_routes {
            let matched = match selector {
                BusSelector::RuleName(name) => envelope
                    .resources
                    .iter()
                    .any(|arn| rule_name(arn) == Some(name.as_str())),
                BusSelector::Pattern {
                    source,
                    detail_type,
                } => *source == envelope.source && *detail_type == envelope.detail_type,
            };
            if matched {
                let chain = wrap(&self.middlewares, handler.clone());
                chain.handle(raw).await?;
                return Ok(Some(Value::Null));
            }
        }
        Ok(None)
    }
}

fn failure_report(ids: impl Iterator<Item = Result<String, AppError>>) -> Value {
    let failures: Vec<Value> = ids
        .filter_map(|id| id.ok())
        .map(|id| json!({"itemIdentifier": id}))
        .collect();
    json!({ "batchItemFailures": failures })
}
