//! WebSocket proxy envelope family. Messages are normalized onto the route
//! key as a path so they flow through the same router as HTTP traffic, and
//! the connection id travels as a header.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use strato_core::http::{Request, Response};

use super::{EncodedResponse, EnvelopeError, decode_body};

pub const CONNECTION_ID_HEADER: &str = "x-connection-id";
pub const ROUTE_KEY_HEADER: &str = "x-route-key";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WebSocketRequest {
    request_context: WsRequestContext,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WsRequestContext {
    route_key: String,
    connection_id: String,
}

/// Normalize a WebSocket proxy envelope. The route key becomes the request
/// path (`$connect` → `/$connect`) and the method is fixed to `POST`.
pub fn to_request(raw: &Value) -> Result<Request, EnvelopeError> {
    let envelope: WebSocketRequest = serde_json::from_value(raw.clone())?;

    let mut request = Request::new("POST", &envelope.request_context.route_key);
    for (name, value) in &envelope.headers {
        request.headers.set(name, value.clone());
    }
    request
        .headers
        .set(CONNECTION_ID_HEADER, envelope.request_context.connection_id);
    request
        .headers
        .set(ROUTE_KEY_HEADER, envelope.request_context.route_key);

    if let Some(single) = &envelope.query_string_parameters {
        for (name, value) in single {
            request.query.insert(name.clone(), vec![value.clone()]);
        }
    }

    request.body = decode_body(envelope.body.as_deref(), envelope.is_base64_encoded)?;
    request.is_base64 = envelope.is_base64_encoded;
    request.normalize();
    Ok(request)
}

/// WebSocket responses carry only a status and a body; streaming and header
/// maps do not apply to this family.
pub fn from_response(response: Response) -> EncodedResponse {
    EncodedResponse::Json(json!({
        "statusCode": response.status,
        "body": String::from_utf8_lossy(&response.body),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn connect_event() -> Value {
        json!({
            "requestContext": {"routeKey": "$connect", "connectionId": "c-123"},
            "headers": {"Sec-WebSocket-Protocol": "json"},
        })
    }

    #[test]
    fn route_key_becomes_the_request_path() {
        let request = to_request(&connect_event()).unwrap();
        assert_eq!(request.method, "POST");
        assert_eq!(request.path, "/$connect");
    }

    #[test]
    fn connection_id_and_route_key_travel_as_headers() {
        let request = to_request(&connect_event()).unwrap();
        assert_eq!(request.headers.get(CONNECTION_ID_HEADER), Some("c-123"));
        assert_eq!(request.headers.get(ROUTE_KEY_HEADER), Some("$connect"));
        assert_eq!(request.headers.get("sec-websocket-protocol"), Some("json"));
    }

    #[test]
    fn message_body_is_decoded() {
        let raw = json!({
            "requestContext": {"routeKey": "$default", "connectionId": "c-9"},
            "body": "aGk=",
            "isBase64Encoded": true,
        });
        let request = to_request(&raw).unwrap();
        assert_eq!(request.body, b"hi");
    }

    #[test]
    fn missing_connection_id_is_a_parse_error() {
        let raw = json!({"requestContext": {"routeKey": "$default"}});
        assert!(matches!(to_request(&raw), Err(EnvelopeError::Parse(_))));
    }

    #[test]
    fn response_shape_has_only_status_and_body() {
        let response = Response::new(200).with_body(b"ack".to_vec());
        let encoded = from_response(response).into_json().unwrap();
        assert_eq!(encoded, json!({"statusCode": 200, "body": "ack"}));
    }
}
