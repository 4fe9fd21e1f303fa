//! Bridges axum requests to the canonical model and back.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::{Body, to_bytes};
use axum::extract::State;
use axum::http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
use futures_util::stream;

use strato_core::http::{Request, Response};
use strato_runtime::Pipeline;

const MAX_BODY_BYTES: usize = 6 * 1024 * 1024;

pub async fn serve(
    State(pipeline): State<Arc<Pipeline>>,
    request: HttpRequest<Body>,
) -> HttpResponse<Body> {
    let canonical = match to_canonical(request).await {
        Ok(canonical) => canonical,
        Err(status) => {
            let mut response = HttpResponse::new(Body::empty());
            *response.status_mut() = status;
            return response;
        }
    };
    to_http(pipeline.handle(canonical).await)
}

async fn to_canonical(request: HttpRequest<Body>) -> Result<Request, StatusCode> {
    let (parts, body) = request.into_parts();
    let bytes = to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|_| StatusCode::PAYLOAD_TOO_LARGE)?;

    let mut canonical = Request::new(parts.method.as_str(), parts.uri.path());
    if let Some(query) = parts.uri.query() {
        for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
            canonical.append_query(&name, value.into_owned());
        }
    }
    for (name, value) in &parts.headers {
        if let Ok(value) = value.to_str() {
            canonical.headers.append(name.as_str(), value);
        }
    }
    canonical.body = bytes.to_vec();
    Ok(canonical)
}

fn to_http(mut response: Response) -> HttpResponse<Body> {
    let mut builder = HttpResponse::builder().status(response.status);
    for (name, values) in response.headers.iter() {
        for value in values {
            builder = builder.header(name, value);
        }
    }
    for cookie in &response.cookies {
        builder = builder.header("set-cookie", cookie);
    }

    let body = match response.body_stream.take() {
        Some(receiver) => Body::from_stream(stream::unfold(receiver, |mut receiver| async move {
            receiver
                .recv()
                .await
                .map(|chunk| (Ok::<_, Infallible>(chunk), receiver))
        })),
        None => Body::from(response.body),
    };

    builder
        .body(body)
        .unwrap_or_else(|_| HttpResponse::new(Body::empty()))
}
