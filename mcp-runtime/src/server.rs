//! The MCP endpoint: session affinity, JSON-RPC parsing and dispatch, and
//! SSE streaming for tool calls. Mounts as an ordinary pipeline handler,
//! conventionally at `POST /mcp`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::Duration;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use strato_core::error::AppError;
use strato_core::http::Response;
use strato_runtime::sse::{SseEvent, streaming_response};
use strato_runtime::{Context, Handler};

use crate::protocol::{self, PROTOCOL_VERSION, RpcCall, RpcError};
use crate::registry::{Registries, ToolFailure};
use crate::session::{Session, SessionError, SessionStore, session_ttl};

pub const SESSION_HEADER: &str = "mcp-session-id";

pub struct McpServer {
    registries: Arc<Registries>,
    sessions: Arc<dyn SessionStore>,
    ttl: Duration,
    server_name: String,
    server_version: String,
}

impl McpServer {
    pub fn new(registries: Registries, sessions: Arc<dyn SessionStore>) -> Self {
        Self {
            registries: Arc::new(registries),
            sessions,
            ttl: session_ttl(),
            server_name: "strato".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_server_info(mut self, name: &str, version: &str) -> Self {
        self.server_name = name.to_string();
        self.server_version = version.to_string();
        self
    }

    /// Sliding session resolution: a valid inbound id has its expiry moved
    /// to now + TTL and is reused; a missing or expired id yields a fresh
    /// session.
    async fn resolve_session(&self, ctx: &Context) -> Result<String, AppError> {
        let now = ctx.clock.now();
        if let Some(id) = ctx.header(SESSION_HEADER) {
            match self.sessions.get(id).await {
                // A store with provider-managed expiry can still return a
                // row past its `expires_at`; clear it and fall through to a
                // fresh session.
                Ok(session) if session.expires_at <= now => {
                    self.sessions
                        .delete(id)
                        .await
                        .map_err(|e| AppError::internal(e.to_string()))?;
                }
                Ok(mut session) => {
                    session.expires_at = now + self.ttl;
                    self.sessions
                        .put(&session)
                        .await
                        .map_err(|e| AppError::internal(e.to_string()))?;
                    return Ok(session.id);
                }
                Err(SessionError::NotFound) => {}
                Err(other) => return Err(AppError::internal(other.to_string())),
            }
        }

        let session = Session {
            id: ctx.ids.new_id(),
            created_at: now,
            expires_at: now + self.ttl,
            bag: BTreeMap::new(),
        };
        self.sessions
            .put(&session)
            .await
            .map_err(|e| AppError::internal(e.to_string()))?;
        tracing::debug!(session_id = %session.id, "created mcp session");
        Ok(session.id)
    }

    fn initialize_payload(&self) -> Value {
        let mut capabilities = json!({
            "tools": {"listChanged": false}
        });
        if !self.registries.resources.is_empty() {
            capabilities["resources"] = json!({"listChanged": false});
        }
        if !self.registries.prompts.is_empty() {
            capabilities["prompts"] = json!({"listChanged": false});
        }
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "capabilities": capabilities,
            "serverInfo": {
                "name": self.server_name,
                "version": self.server_version
            }
        })
    }

    async fn dispatch(&self, ctx: &Context, call: RpcCall) -> Value {
        match self.handle_method(ctx, &call).await {
            Ok(result) => protocol::success_response(call.id, result),
            Err(err) => protocol::error_response(call.id, err),
        }
    }

    async fn handle_method(&self, ctx: &Context, call: &RpcCall) -> Result<Value, RpcError> {
        match call.method.as_str() {
            "initialize" => Ok(self.initialize_payload()),
            "tools/list" => Ok(json!({"tools": self.registries.tools.list()})),
            "tools/call" => self.tools_call_buffered(ctx, &call.params).await,
            "resources/list" => Ok(json!({"resources": self.registries.resources.list()})),
            "resources/read" => self.resources_read(ctx, &call.params).await,
            "prompts/list" => Ok(json!({"prompts": self.registries.prompts.list()})),
            "prompts/get" => self.prompts_get(ctx, &call.params).await,
            other => Err(RpcError::method_not_found(other)),
        }
    }

    /// Buffered mode: progress is discarded, only the final result counts.
    async fn tools_call_buffered(&self, ctx: &Context, params: &Value) -> Result<Value, RpcError> {
        let (name, args) = tool_call_params(params)?;
        let entry = self
            .registries
            .tools
            .get(name)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown tool: {name}")))?;
        let handler = entry.handler.clone();
        let call_ctx = ctx.clone();
        let worker = tokio::spawn(async move { handler.call(&call_ctx, args).await });
        let aborter = worker.abort_handle();
        let outcome = with_deadline(ctx.remaining_ms, join_tool(worker)).await;
        if matches!(outcome, Err(ToolFailure::Timeout)) {
            aborter.abort();
        }
        outcome.map_err(map_tool_failure)
    }

    /// Streaming mode: progress events become `event: progress` frames and
    /// the final JSON-RPC response arrives as one `event: message` frame.
    fn tools_call_streaming(&self, ctx: Context, session_id: &str, call: RpcCall) -> Response {
        let (sender, mut response) = streaming_response();
        response.headers.set(SESSION_HEADER, session_id);

        let resolved = tool_call_params(&call.params).and_then(|(name, args)| {
            self.registries
                .tools
                .get(name)
                .map(|entry| (entry.handler.clone(), entry.streaming.clone(), args))
                .ok_or_else(|| RpcError::invalid_params(format!("unknown tool: {name}")))
        });
        let id = call.id;

        match resolved {
            Err(err) => {
                tokio::spawn(async move {
                    let _ = sender
                        .send(&SseEvent::named("message", protocol::error_response(id, err)))
                        .await;
                });
            }
            Ok((handler, streaming, args)) => {
                let remaining_ms = ctx.remaining_ms;
                tokio::spawn(async move {
                    let (progress_tx, mut progress_rx) = mpsc::channel::<Value>(16);
                    // The handler runs on its own task so a panic inside it
                    // surfaces as a `message` frame instead of closing the
                    // stream with no response.
                    let worker = tokio::spawn(async move {
                        match streaming {
                            Some(streaming) => streaming.call(&ctx, args, progress_tx).await,
                            None => {
                                drop(progress_tx);
                                handler.call(&ctx, args).await
                            }
                        }
                    });
                    let aborter = worker.abort_handle();
                    let fut = with_deadline(remaining_ms, join_tool(worker));
                    tokio::pin!(fut);

                    let mut progress_open = true;
                    let result = loop {
                        tokio::select! {
                            maybe = progress_rx.recv(), if progress_open => {
                                match maybe {
                                    Some(progress) => {
                                        let _ = sender
                                            .send(&SseEvent::named("progress", progress))
                                            .await;
                                    }
                                    None => progress_open = false,
                                }
                            }
                            result = &mut fut => break result,
                        }
                    };
                    if matches!(result, Err(ToolFailure::Timeout)) {
                        aborter.abort();
                    }
                    // Frames emitted just before completion are still owed.
                    while let Ok(progress) = progress_rx.try_recv() {
                        let _ = sender.send(&SseEvent::named("progress", progress)).await;
                    }

                    let payload = match result {
                        Ok(value) => protocol::success_response(id, value),
                        Err(failure) => protocol::error_response(id, map_tool_failure(failure)),
                    };
                    let _ = sender.send(&SseEvent::named("message", payload)).await;
                });
            }
        }
        response
    }

    async fn resources_read(&self, ctx: &Context, params: &Value) -> Result<Value, RpcError> {
        let uri = params
            .get("uri")
            .and_then(Value::as_str)
            .filter(|uri| !uri.is_empty())
            .ok_or_else(|| RpcError::invalid_params("resources/read requires string field 'uri'"))?;
        let entry = self
            .registries
            .resources
            .get(uri)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown resource: {uri}")))?;
        let contents = with_deadline(ctx.remaining_ms, entry.handler.read(ctx, uri))
            .await
            .map_err(map_tool_failure)?;
        Ok(json!({ "contents": contents }))
    }

    async fn prompts_get(&self, ctx: &Context, params: &Value) -> Result<Value, RpcError> {
        let name = params
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| RpcError::invalid_params("prompts/get requires string field 'name'"))?;
        let entry = self
            .registries
            .prompts
            .get(name)
            .ok_or_else(|| RpcError::invalid_params(format!("unknown prompt: {name}")))?;
        let args = params.get("arguments").cloned().unwrap_or(Value::Null);
        with_deadline(ctx.remaining_ms, entry.handler.get(ctx, args))
            .await
            .map_err(map_tool_failure)
    }
}

fn tool_call_params(params: &Value) -> Result<(&str, Value), RpcError> {
    let obj = params
        .as_object()
        .ok_or_else(|| RpcError::invalid_params("tools/call params must be an object"))?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .filter(|name| !name.is_empty())
        .ok_or_else(|| RpcError::invalid_params("tools/call requires string field 'name'"))?;
    let args = match obj.get("arguments") {
        Some(Value::Null) | None => json!({}),
        Some(args) => args.clone(),
    };
    Ok((name, args))
}

fn map_tool_failure(failure: ToolFailure) -> RpcError {
    match failure {
        ToolFailure::Timeout => {
            tracing::warn!("tool call hit the remaining-time deadline");
            RpcError::timeout()
        }
        ToolFailure::Panicked => {
            tracing::error!("tool handler panicked");
            RpcError::internal("tool handler panicked")
        }
        ToolFailure::Failed(message) => RpcError::server_error(message),
    }
}

/// Converts a worker task's outcome, turning a panic into an error value.
async fn join_tool(worker: JoinHandle<Result<Value, ToolFailure>>) -> Result<Value, ToolFailure> {
    match worker.await {
        Ok(outcome) => outcome,
        Err(err) if err.is_panic() => Err(ToolFailure::Panicked),
        Err(err) => Err(ToolFailure::Failed(err.to_string())),
    }
}

/// Applies the outer scheduler's remaining-time hint as a deadline; zero
/// means unbounded.
async fn with_deadline<F>(remaining_ms: i64, fut: F) -> Result<Value, ToolFailure>
where
    F: Future<Output = Result<Value, ToolFailure>>,
{
    if remaining_ms > 0 {
        tokio::time::timeout(StdDuration::from_millis(remaining_ms as u64), fut)
            .await
            .unwrap_or(Err(ToolFailure::Timeout))
    } else {
        fut.await
    }
}

#[async_trait]
impl Handler for McpServer {
    async fn handle(&self, ctx: Context) -> Result<Response, AppError> {
        let session_id = self.resolve_session(&ctx).await?;

        let body = String::from_utf8_lossy(&ctx.request.body).into_owned();
        let trimmed = body.trim();
        let wants_sse = ctx
            .header("accept")
            .is_some_and(|accept| accept.contains("text/event-stream"));

        // A leading bracket marks a batch; everything else parses as one
        // request.
        if trimmed.starts_with('[') {
            let payload = match serde_json::from_str::<Value>(trimmed) {
                Ok(Value::Array(elements)) if elements.is_empty() => protocol::error_response(
                    Value::Null,
                    RpcError::invalid_request("Batch request must not be empty"),
                ),
                Ok(Value::Array(elements)) => {
                    let mut responses = Vec::with_capacity(elements.len());
                    for element in &elements {
                        let response = match protocol::validate_single(element) {
                            Ok(call) => self.dispatch(&ctx, call).await,
                            Err(error) => error,
                        };
                        responses.push(response);
                    }
                    Value::Array(responses)
                }
                Ok(_) | Err(_) => protocol::error_response(
                    Value::Null,
                    RpcError::parse_error("Request body is not valid JSON"),
                ),
            };
            return Ok(rpc_response(payload, &session_id));
        }

        let parsed = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(err) => {
                let payload = protocol::error_response(
                    Value::Null,
                    RpcError::parse_error(format!("Request body is not valid JSON: {err}")),
                );
                return Ok(rpc_response(payload, &session_id));
            }
        };

        let call = match protocol::validate_single(&parsed) {
            Ok(call) => call,
            Err(error) => return Ok(rpc_response(error, &session_id)),
        };

        if call.method == "tools/call" && wants_sse {
            return Ok(self.tools_call_streaming(ctx, &session_id, call));
        }

        let payload = self.dispatch(&ctx, call).await;
        Ok(rpc_response(payload, &session_id))
    }
}

fn rpc_response(payload: Value, session_id: &str) -> Response {
    let mut response = Response::json(200, &payload);
    response.headers.set(SESSION_HEADER, session_id);
    response
}
