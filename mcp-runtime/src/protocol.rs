//! JSON-RPC 2.0 message shapes and validation.

use serde_json::{Value, json};

pub const PROTOCOL_VERSION: &str = "2025-06-18";

#[derive(Debug)]
pub struct RpcError {
    pub code: i64,
    pub message: String,
    pub data: Option<Value>,
}

impl RpcError {
    pub fn parse_error(message: impl Into<String>) -> Self {
        Self {
            code: -32700,
            message: message.into(),
            data: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            code: -32600,
            message: message.into(),
            data: None,
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self {
            code: -32601,
            message: format!("Method not found: {method}"),
            data: None,
        }
    }

    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self {
            code: -32602,
            message: message.into(),
            data: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: -32603,
            message: message.into(),
            data: None,
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self {
            code: -32000,
            message: message.into(),
            data: None,
        }
    }

    pub fn timeout() -> Self {
        Self::server_error("timed out")
    }
}

pub fn success_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result
    })
}

pub fn error_response(id: Value, error: RpcError) -> Value {
    let mut payload = json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": error.code,
            "message": error.message
        }
    });
    if let Some(data) = error.data {
        payload["error"]["data"] = data;
    }
    payload
}

/// A validated single request.
#[derive(Debug, Clone)]
pub struct RpcCall {
    pub id: Value,
    pub method: String,
    pub params: Value,
}

/// Validate one element: `jsonrpc` must be `"2.0"`, `method` a non-empty
/// string, `id` present. Violations yield a ready error response carrying
/// whatever id the element had.
pub fn validate_single(value: &Value) -> Result<RpcCall, Value> {
    let Some(obj) = value.as_object() else {
        return Err(error_response(
            Value::Null,
            RpcError::invalid_request("Request must be a JSON object"),
        ));
    };

    let id = obj.get("id").cloned().unwrap_or(Value::Null);
    if obj.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
        return Err(error_response(
            id,
            RpcError::invalid_request("jsonrpc must be '2.0'"),
        ));
    }

    let method = obj
        .get("method")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if method.is_empty() {
        return Err(error_response(
            id,
            RpcError::invalid_request("method must be a non-empty string"),
        ));
    }

    if !obj.contains_key("id") {
        return Err(error_response(
            Value::Null,
            RpcError::invalid_request("id is required"),
        ));
    }

    Ok(RpcCall {
        id,
        method: method.to_string(),
        params: obj.get("params").cloned().unwrap_or(Value::Null),
    })
}
