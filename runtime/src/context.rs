use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use strato_core::http::Request;
use strato_core::id::IdGenerator;
use strato_core::time::Clock;

/// Per-request handler context. Created when a request enters the pipeline
/// and dropped when the response is emitted; immutable except for the bag.
#[derive(Clone)]
pub struct Context {
    pub request: Request,
    /// Captured `{name}` path parameters.
    pub params: BTreeMap<String, String>,
    /// Non-empty, assigned by the pipeline.
    pub request_id: String,
    /// Possibly empty.
    pub tenant_id: String,
    /// Remaining-time hint from the outer scheduler, in milliseconds.
    /// Zero means "no hint".
    pub remaining_ms: i64,
    pub clock: Arc<dyn Clock>,
    pub ids: Arc<dyn IdGenerator>,
    /// Free-form key/value bag for middleware to pass values inward.
    pub bag: BTreeMap<String, Value>,
}

impl Context {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name)
    }

    /// Parse the request body as JSON.
    pub fn json_body(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.request.body)
    }
}
