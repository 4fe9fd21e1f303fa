use serde::Serialize;
use serde_json::json;

use crate::http::Response;

/// Closed error taxonomy. Every kind maps to exactly one status code and one
/// stable string code; errors are values, never unwinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    BadRequest,
    ValidationFailed,
    Unauthorized,
    Forbidden,
    NotFound,
    MethodNotAllowed,
    Conflict,
    TooLarge,
    RateLimited,
    Overloaded,
    Internal,
}

impl ErrorKind {
    pub fn status(self) -> u16 {
        match self {
            ErrorKind::BadRequest | ErrorKind::ValidationFailed => 400,
            ErrorKind::Unauthorized => 401,
            ErrorKind::Forbidden => 403,
            ErrorKind::NotFound => 404,
            ErrorKind::MethodNotAllowed => 405,
            ErrorKind::Conflict => 409,
            ErrorKind::TooLarge => 413,
            ErrorKind::RateLimited => 429,
            ErrorKind::Overloaded => 503,
            ErrorKind::Internal => 500,
        }
    }

    /// Stable machine-readable code emitted in error bodies.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::BadRequest => "app.bad_request",
            ErrorKind::ValidationFailed => "app.validation_failed",
            ErrorKind::Unauthorized => "app.unauthorized",
            ErrorKind::Forbidden => "app.forbidden",
            ErrorKind::NotFound => "app.not_found",
            ErrorKind::MethodNotAllowed => "app.method_not_allowed",
            ErrorKind::Conflict => "app.conflict",
            ErrorKind::TooLarge => "app.too_large",
            ErrorKind::RateLimited => "app.rate_limited",
            ErrorKind::Overloaded => "app.overloaded",
            ErrorKind::Internal => "app.internal",
        }
    }
}

/// Typed application error returned by handlers and middleware.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppError {
    pub kind: ErrorKind,
    pub message: String,
}

impl AppError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BadRequest, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationFailed, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Render the canonical JSON error response, embedding the request id so
    /// clients can report it.
    pub fn to_response(&self, request_id: &str) -> Response {
        let body = json!({
            "error": {
                "code": self.kind.code(),
                "message": self.message,
                "request_id": request_id,
            }
        });
        Response::json(self.kind.status(), &body)
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind.code(), self.message)
    }
}

impl std::error::Error for AppError {}

/// Serialized shape of the error body, for callers that build or assert on
/// error documents directly.
#[derive(Debug, Serialize)]
pub struct ErrorBody<'a> {
    pub code: &'a str,
    pub message: &'a str,
    pub request_id: &'a str,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_has_the_documented_status_and_code() {
        let table = [
            (ErrorKind::BadRequest, 400, "app.bad_request"),
            (ErrorKind::ValidationFailed, 400, "app.validation_failed"),
            (ErrorKind::Unauthorized, 401, "app.unauthorized"),
            (ErrorKind::Forbidden, 403, "app.forbidden"),
            (ErrorKind::NotFound, 404, "app.not_found"),
            (ErrorKind::MethodNotAllowed, 405, "app.method_not_allowed"),
            (ErrorKind::Conflict, 409, "app.conflict"),
            (ErrorKind::TooLarge, 413, "app.too_large"),
            (ErrorKind::RateLimited, 429, "app.rate_limited"),
            (ErrorKind::Overloaded, 503, "app.overloaded"),
            (ErrorKind::Internal, 500, "app.internal"),
        ];
        for (kind, status, code) in table {
            assert_eq!(kind.status(), status);
            assert_eq!(kind.code(), code);
        }
    }

    #[test]
    fn error_response_embeds_request_id() {
        let err = AppError::not_found("not found");
        let response = err.to_response("req-7");
        assert_eq!(response.status, 404);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["error"]["code"], "app.not_found");
        assert_eq!(body["error"]["message"], "not found");
        assert_eq!(body["error"]["request_id"], "req-7");
    }

    #[test]
    fn error_response_has_json_content_type() {
        let response = AppError::bad_request("bad").to_response("req-1");
        assert_eq!(
            response.headers.get("content-type"),
            Some("application/json; charset=utf-8")
        );
    }
}
