//! HTTP v2 envelope family: API-Gateway HTTP API payloads and function-URL
//! invocations normalize identically.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::{Value, json};

use strato_core::http::{Request, Response};

use super::{EncodedResponse, EnvelopeError, decode_body, encode_body, wants_stream};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpV2Request {
    #[serde(default)]
    raw_path: String,
    #[serde(default)]
    raw_query_string: String,
    #[serde(default)]
    cookies: Vec<String>,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    query_string_parameters: Option<BTreeMap<String, String>>,
    request_context: V2RequestContext,
    #[serde(default)]
    body: Option<String>,
    #[serde(default)]
    is_base64_encoded: bool,
}

#[derive(Debug, Deserialize)]
struct V2RequestContext {
    http: V2Http,
}

#[derive(Debug, Deserialize)]
struct V2Http {
    method: String,
    #[serde(default)]
    path: String,
}

/// Normalize an HTTP v2 (or function-URL) envelope into a canonical
/// request.
pub fn to_request(raw: &Value) -> Result<Request, EnvelopeError> {
    let envelope: HttpV2Request = serde_json::from_value(raw.clone())?;

    let path = if envelope.raw_path.is_empty() {
        envelope.request_context.http.path.clone()
    } else {
        envelope.raw_path.clone()
    };
    let mut request = Request::new(&envelope.request_context.http.method, &path);

    // Prefer the raw query string; the single-valued map is a lossy
    // fallback.
    if !envelope.raw_query_string.is_empty() {
        for (name, value) in url::form_urlencoded::parse(envelope.raw_query_string.as_bytes()) {
            request.append_query(&name, value.into_owned());
        }
    } else if let Some(single) = &envelope.query_string_parameters {
        for (name, value) in single {
            request.query.insert(name.clone(), vec![value.clone()]);
        }
    }

    for (name, value) in &envelope.headers {
        request.headers.set(name, value.clone());
    }
    // The explicit cookies list is authoritative; drop any single-valued
    // cookie header so the value is not duplicated.
    request.headers.remove("cookie");
    if !envelope.cookies.is_empty() {
        request.headers.set("cookie", envelope.cookies.join("; "));
    }

    request.body = decode_body(envelope.body.as_deref(), envelope.is_base64_encoded)?;
    request.is_base64 = envelope.is_base64_encoded;
    request.normalize();
    Ok(request)
}

/// Encode a canonical response into the HTTP v2 shape: single-valued
/// headers (multi-values joined with commas) and a dedicated cookies field.
pub fn from_response(mut response: Response) -> EncodedResponse {
    let streaming = wants_stream(&response);

    let mut cookies = response.cookies.clone();
    for value in response.headers.get_all("set-cookie") {
        cookies.push(value.clone());
    }

    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    for (name, values) in response.headers.iter() {
        if name == "set-cookie" {
            continue;
        }
        headers.insert(name.to_string(), values.join(","));
    }

    let prelude = json!({
        "statusCode": response.status,
        "headers": headers,
        "cookies": cookies,
        "isBase64Encoded": response.is_base64,
    });

    if streaming
        && let Some(body) = response.body_stream.take()
    {
        return EncodedResponse::Stream { prelude, body };
    }

    let mut envelope = prelude;
    envelope["body"] = Value::String(encode_body(&response));
    EncodedResponse::Json(envelope)
}
