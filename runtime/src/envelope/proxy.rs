//! Proxy v1 envelope family: API-Gateway-style proxy requests and
//! load-balancer target-group requests share this shape.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use strato_core::http::{Request, Response};

use super::{EncodedResponse, EnvelopeError, decode_body, encode_body, wants_stream};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProxyRequest {
    #[serde(default)]
    path: String,
    http_method: String,
    #[serde(default)]
    headers: Option<BTreeMap<String, String>>,
    #[serde(default)]
    multi_value_headers: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    query_string_parameters: Option<BTreeMap<String, String>>,
    #[serde(default)]
    multi_value_query_string_parameters: Option<BTreeMap<String, Vec<String>>>,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
}

/// Normalize a Proxy v1 (or load-balancer) envelope into a canonical
/// request. The multi-valued maps win over the single-valued ones per key.
pub fn to_request(raw: &Value) -> Result<Request, EnvelopeError> {
    let envelope: ProxyRequest = serde_json::from_value(raw.clone())?;

    let mut request = Request::new(&envelope.http_method, &envelope.path);

    if let Some(single) = &envelope.query_string_parameters {
        for (name, value) in single {
            request.query.insert(name.clone(), vec![value.clone()]);
        }
    }
    if let Some(multi) = &envelope.multi_value_query_string_parameters {
        for (name, values) in multi {
            request.query.insert(name.clone(), values.clone());
        }
    }

    if let Some(single) = &envelope.headers {
        for (name, value) in single {
            request.headers.set(name, value.clone());
        }
    }
    if let Some(multi) = &envelope.multi_value_headers {
        for (name, values) in multi {
            request.headers.remove(name);
            for value in values {
                request.headers.append(name, value.clone());
            }
        }
    }

    request.body = decode_body(envelope.body.as_deref(), envelope.is_base64_encoded)?;
    request.is_base64 = envelope.is_base64_encoded;
    request.normalize();
    Ok(request)
}

/// Encode a canonical response into the Proxy v1 shape. `set-cookie` values
/// fold into the multi-valued header map; this family has no cookies field.
pub fn from_response(mut response: Response) -> EncodedResponse {
    let streaming = wants_stream(&response);

    let mut single: BTreeMap<String, String> = BTreeMap::new();
    let mut multi: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (name, values) in response.headers.iter() {
        if let Some(first) = values.first() {
            single.insert(name.to_string(), first.clone());
        }
        multi.insert(name.to_string(), values.to_vec());
    }
    if !response.cookies.is_empty() {
        multi.insert("set-cookie".to_string(), response.cookies.clone());
    }

    let prelude = json!({
        "statusCode": response.status,
        "headers": single,
        "multiValueHeaders": multi,
        "isBase64Encoded": response.is_base64,
    });

    if streaming {
        if let Some(body) = response.body_stream.take() {
            return EncodedResponse::Stream { prelude, body };
        }
    }

    let mut envelope = prelude;
    envelope["body"] = Value::String(encode_body(&response));
    EncodedResponse::Json(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn multi_value_query_wins_over_single() {
        let raw = json!({
            "path": "/items",
            "httpMethod": "get",
            "queryStringParameters": {"tag": "only", "page": "2"},
            "multiValueQueryStringParameters": {"tag": ["a", "b"]},
        });
        let request = to_request(&raw).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.query["tag"], ["a", "b"]);
        assert_eq!(request.query["page"], ["2"]);
    }

    #[test]
    fn multi_value_headers_win_and_keys_lowercase() {
        let raw = json!({
            "path": "/",
            "httpMethod": "GET",
            "headers": {"Accept": "text/html"},
            "multiValueHeaders": {"Accept": ["application/json", "text/plain"]},
        });
        let request = to_request(&raw).unwrap();
        assert_eq!(request.headers.get_all("accept"), ["application/json", "text/plain"]);
    }

    #[test]
    fn base64_body_is_decoded_and_flag_preserved() {
        let raw = json!({
            "path": "/upload",
            "httpMethod": "POST",
            "body": "aGVsbG8=",
            "isBase64Encoded": true,
        });
        let request = to_request(&raw).unwrap();
        assert_eq!(request.body, b"hello");
        assert!(request.is_base64);
    }

    #[test]
    fn malformed_base64_body_is_rejected() {
        let raw = json!({
            "path": "/",
            "httpMethod": "POST",
            "body": "!!not-base64!!",
            "isBase64Encoded": true,
        });
        assert!(matches!(to_request(&raw), Err(EnvelopeError::Body(_))));
    }

    #[test]
    fn missing_method_is_a_parse_error() {
        let raw = json!({"path": "/x"});
        assert!(matches!(to_request(&raw), Err(EnvelopeError::Parse(_))));
    }

    #[test]
    fn response_populates_both_header_maps_consistently() {
        let mut response = Response::new(201).with_body(b"done".to_vec());
        response.headers.append("x-multi", "a");
        response.headers.append("x-multi", "b");
        let encoded = from_response(response).into_json().unwrap();
        assert_eq!(encoded["statusCode"], 201);
        assert_eq!(encoded["headers"]["x-multi"], "a");
        assert_eq!(encoded["multiValueHeaders"]["x-multi"], json!(["a", "b"]));
        assert_eq!(encoded["body"], "done");
        assert_eq!(encoded["isBase64Encoded"], false);
    }

    #[test]
    fn cookies_fold_into_multi_value_headers() {
        let mut response = Response::new(200);
        response.cookies = vec!["a=1".to_string(), "b=2".to_string()];
        let encoded = from_response(response).into_json().unwrap();
        assert_eq!(
            encoded["multiValueHeaders"]["set-cookie"],
            json!(["a=1", "b=2"])
        );
    }

    #[test]
    fn binary_response_is_base64_encoded() {
        let mut response = Response::new(200).with_body(vec![0xde, 0xad]);
        response.is_base64 = true;
        let encoded = from_response(response).into_json().unwrap();
        assert_eq!(encoded["body"], "3q0=");
        assert_eq!(encoded["isBase64Encoded"], true);
    }

    #[test]
    fn event_stream_response_selects_streaming_variant() {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let mut response = Response::new(200).with_header("content-type", "text/event-stream");
        response.body_stream = Some(rx);
        match from_response(response) {
            EncodedResponse::Stream { prelude, .. } => {
                assert_eq!(prelude["statusCode"], 200);
                assert_eq!(prelude["headers"]["content-type"], "text/event-stream");
            }
            EncodedResponse::Json(_) => panic!("expected streaming variant"),
        }
    }
}
