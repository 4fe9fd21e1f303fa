//! Demo application wiring: a small pipeline with health, echo, and event
//! routes plus an MCP endpoint backed by in-memory stores.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};

use strato_core::error::AppError;
use strato_core::http::Response;
use strato_core::id::{IdGenerator, UuidIds};
use strato_core::sanitize::sanitize_log;
use strato_core::time::{Clock, SystemClock};
use strato_journal::{DurableEvent, EventQuery, Journal, JournalError, MemoryJournalStore};
use strato_mcp_runtime::registry::{
    ProgressSink, Registries, StreamingToolHandler, ToolDef, ToolFailure, ToolHandler,
};
use strato_mcp_runtime::{McpServer, MemorySessionStore};
use strato_runtime::{Context, DynHandler, Middleware, Pipeline, handler_fn};

/// Logs one line per request, after the inner handler ran.
struct AccessLog;

#[async_trait]
impl Middleware for AccessLog {
    async fn call(&self, ctx: Context, next: DynHandler) -> Result<Response, AppError> {
        let method = ctx.request.method.clone();
        let path = sanitize_log(&ctx.request.path);
        let request_id = ctx.request_id.clone();
        let result = next.handle(ctx).await;
        match &result {
            Ok(response) => {
                tracing::info!(%method, %path, %request_id, status = response.status, "request")
            }
            Err(error) => {
                tracing::warn!(%method, %path, %request_id, %error, "request failed")
            }
        }
        result
    }
}

pub fn build_pipeline() -> Pipeline {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let ids: Arc<dyn IdGenerator> = Arc::new(UuidIds);
    let journal = Arc::new(Journal::new(
        Arc::new(MemoryJournalStore::new()),
        ids.clone(),
    ));

    let mut pipeline = Pipeline::new();
    pipeline.middleware(Arc::new(AccessLog));

    pipeline.route(
        "GET",
        "/health",
        handler_fn(|_ctx| async {
            Ok(Response::json(
                200,
                &json!({"status": "ok", "version": env!("CARGO_PKG_VERSION")}),
            ))
        }),
    );

    pipeline.route(
        "GET",
        "/echo/{name}",
        handler_fn(|ctx: Context| async move {
            Ok(Response::json(
                200,
                &json!({"name": ctx.param("name"), "tenant": ctx.tenant_id}),
            ))
        }),
    );

    event_routes(&mut pipeline, journal);

    let sessions = Arc::new(MemorySessionStore::new(clock));
    let server = McpServer::new(demo_registries(), sessions).with_server_info(
        "strato-local",
        env!("CARGO_PKG_VERSION"),
    );
    pipeline.route("POST", "/mcp", Arc::new(server));

    pipeline
}

fn event_routes(pipeline: &mut Pipeline, journal: Arc<Journal>) {
    let publish = journal.clone();
    pipeline.route(
        "POST",
        "/events",
        handler_fn(move |ctx: Context| {
            let journal = publish.clone();
            async move {
                if ctx.tenant_id.is_empty() {
                    return Err(AppError::validation("x-tenant-id header is required"));
                }
                let body = ctx
                    .json_body()
                    .map_err(|err| AppError::bad_request(err.to_string()))?;
                let event_type = body["type"].as_str().unwrap_or_default();

                let mut event = DurableEvent::new(event_type, &ctx.tenant_id, ctx.clock.now());
                event.payload = serde_json::to_vec(&body["payload"]).unwrap_or_default();
                if let Some(tags) = body["tags"].as_array() {
                    event.tags = tags
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect();
                }

                let id = journal.publish(event).await.map_err(journal_error)?;
                Ok(Response::json(201, &json!({"id": id})))
            }
        }),
    );

    pipeline.route(
        "GET",
        "/events",
        handler_fn(move |ctx: Context| {
            let journal = journal.clone();
            async move {
                if ctx.tenant_id.is_empty() {
                    return Err(AppError::validation("x-tenant-id header is required"));
                }
                let mut query = EventQuery {
                    tenant_id: ctx.tenant_id.clone(),
                    event_type: ctx
                        .request
                        .query
                        .get("type")
                        .and_then(|values| values.first())
                        .cloned(),
                    limit: ctx
                        .request
                        .query
                        .get("limit")
                        .and_then(|values| values.first())
                        .and_then(|value| value.parse().ok()),
                    cursor: ctx
                        .request
                        .query
                        .get("cursor")
                        .and_then(|values| values.first())
                        .cloned(),
                    ..EventQuery::default()
                };
                let events = journal.query(&mut query).await.map_err(journal_error)?;
                let events: Vec<Value> = events
                    .iter()
                    .map(|event| {
                        json!({
                            "id": event.id,
                            "type": event.event_type,
                            "publishedAt": event.published_at,
                            "tags": event.tags,
                        })
                    })
                    .collect();
                Ok(Response::json(
                    200,
                    &json!({"events": events, "nextKey": query.next_key}),
                ))
            }
        }),
    );
}

fn journal_error(err: JournalError) -> AppError {
    match err {
        JournalError::Validation(message) => AppError::validation(message),
        JournalError::NotFound => AppError::not_found("event not found"),
        JournalError::Store(message) => AppError::internal(message),
    }
}

struct EchoTool;

#[async_trait]
impl ToolHandler for EchoTool {
    async fn call(&self, _ctx: &Context, args: Value) -> Result<Value, ToolFailure> {
        let text = args["text"].as_str().unwrap_or_default();
        Ok(json!({"content": [{"type": "text", "text": text}]}))
    }
}

/// Streams one progress value per step, then reports completion. The
/// buffered path returns only the final result.
struct CountdownTool;

#[async_trait]
impl ToolHandler for CountdownTool {
    async fn call(&self, _ctx: &Context, args: Value) -> Result<Value, ToolFailure> {
        let from = args["from"].as_u64().unwrap_or(3);
        Ok(json!({"content": [{"type": "text", "text": format!("counted down from {from}")}]}))
    }
}

#[async_trait]
impl StreamingToolHandler for CountdownTool {
    async fn call(
        &self,
        _ctx: &Context,
        args: Value,
        progress: ProgressSink,
    ) -> Result<Value, ToolFailure> {
        let from = args["from"].as_u64().unwrap_or(3);
        for remaining in (1..=from).rev() {
            if progress.send(json!({"remaining": remaining})).await.is_err() {
                break;
            }
        }
        Ok(json!({"content": [{"type": "text", "text": format!("counted down from {from}")}]}))
    }
}

fn demo_registries() -> Registries {
    let mut registries = Registries::new();

    let echo = ToolDef {
        name: "echo".to_string(),
        description: Some("Echo the provided text back".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {"text": {"type": "string"}},
            "required": ["text"],
        }),
    };
    let countdown = ToolDef {
        name: "countdown".to_string(),
        description: Some("Count down from a number, streaming progress".to_string()),
        input_schema: json!({
            "type": "object",
            "properties": {"from": {"type": "integer", "minimum": 1}},
        }),
    };

    // Registration happens once at startup with unique names.
    let result = registries
        .tools
        .register(echo, Arc::new(EchoTool))
        .and_then(|_| {
            registries
                .tools
                .register_streaming(countdown, Arc::new(CountdownTool), Arc::new(CountdownTool))
        });
    if let Err(err) = result {
        tracing::error!(%err, "tool registration failed");
    }

    registries
}
