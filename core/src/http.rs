use std::collections::BTreeMap;

/// Header multimap with lowercased keys. Value order is preserved per key,
/// which matters for multi-valued `cookie` and `set-cookie`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    map: BTreeMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, keeping any existing values for the key.
    pub fn append(&mut self, name: &str, value: impl Into<String>) {
        self.map
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
    }

    /// Replace all values for the key with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.map.insert(name.to_ascii_lowercase(), vec![value.into()]);
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.map
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    pub fn get_all(&self, name: &str) -> &[String] {
        self.map
            .get(&name.to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.map.contains_key(&name.to_ascii_lowercase())
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.map.remove(&name.to_ascii_lowercase())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.map
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, S)> for Headers {
    fn from_iter<T: IntoIterator<Item = (S, S)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.append(&name.into(), value);
        }
        headers
    }
}

/// Canonical request shared by every envelope adapter and handler.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Uppercased HTTP verb.
    pub method: String,
    /// Path with a leading `/`, no query string.
    pub path: String,
    /// Query parameters; value order is preserved per name.
    pub query: BTreeMap<String, Vec<String>>,
    pub headers: Headers,
    /// Never nil; empty when the envelope carried no body.
    pub body: Vec<u8>,
    /// Body is binary-encoded at the envelope boundary.
    pub is_base64: bool,
}

impl Request {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            ..Default::default()
        }
    }

    /// Uppercase the method and ensure a leading `/` on the path.
    /// Header keys are lowercased by construction in [`Headers`].
    pub fn normalize(&mut self) {
        self.method = self.method.to_ascii_uppercase();
        if !self.path.starts_with('/') {
            self.path = format!("/{}", self.path);
        }
    }

    pub fn append_query(&mut self, name: &str, value: impl Into<String>) {
        self.query
            .entry(name.to_string())
            .or_default()
            .push(value.into());
    }

    /// First query value for a name, if any.
    pub fn query_value(&self, name: &str) -> Option<&str> {
        self.query
            .get(name)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}

/// A streaming response body: the transport adapter reads chunks as the
/// handler produces them.
pub type BodyStream = tokio::sync::mpsc::Receiver<Vec<u8>>;

/// Canonical response. `set-cookie` values live in `cookies`, outside the
/// header map, so they survive adapters that split or fold cookie headers.
#[derive(Debug, Default)]
pub struct Response {
    /// 0 means "unset"; normalized to 200.
    pub status: u16,
    pub headers: Headers,
    pub cookies: Vec<String>,
    pub body: Vec<u8>,
    /// When present the body field is empty and the transport reads chunks
    /// from here instead.
    pub body_stream: Option<BodyStream>,
    /// Forces base64 transport at the envelope boundary.
    pub is_base64: bool,
}

impl Response {
    pub fn new(status: u16) -> Self {
        Self {
            status,
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = body.into();
        self
    }

    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Response::new(status);
        response
            .headers
            .set("content-type", "application/json; charset=utf-8");
        response.body = serde_json::to_vec(value).unwrap_or_default();
        response
    }

    /// Default the status and drop an empty buffered body when a stream is
    /// attached, so exactly one body representation remains.
    pub fn normalize(&mut self) {
        if self.status == 0 {
            self.status = 200;
        }
        if self.body_stream.is_some() {
            self.body.clear();
        }
    }

    pub fn is_streaming(&self) -> bool {
        self.body_stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_keys_are_lowercased_on_insert_and_lookup() {
        let mut headers = Headers::new();
        headers.append("Content-Type", "application/json");
        assert_eq!(headers.get("content-type"), Some("application/json"));
        assert_eq!(headers.get("CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn header_value_order_is_preserved_per_key() {
        let mut headers = Headers::new();
        headers.append("set-cookie", "a=1");
        headers.append("Set-Cookie", "b=2");
        assert_eq!(headers.get_all("set-cookie"), ["a=1", "b=2"]);
    }

    #[test]
    fn set_replaces_all_values() {
        let mut headers = Headers::new();
        headers.append("accept", "text/html");
        headers.append("accept", "application/json");
        headers.set("accept", "text/event-stream");
        assert_eq!(headers.get_all("accept"), ["text/event-stream"]);
    }

    #[test]
    fn request_normalize_uppercases_method_and_adds_leading_slash() {
        let mut request = Request::new("get", "users/u_1");
        request.normalize();
        assert_eq!(request.method, "GET");
        assert_eq!(request.path, "/users/u_1");
    }

    #[test]
    fn request_query_values_keep_order() {
        let mut request = Request::new("GET", "/");
        request.append_query("tag", "a");
        request.append_query("tag", "b");
        assert_eq!(request.query["tag"], ["a", "b"]);
        assert_eq!(request.query_value("tag"), Some("a"));
    }

    #[test]
    fn response_normalize_defaults_status_to_200() {
        let mut response = Response::default();
        response.normalize();
        assert_eq!(response.status, 200);
    }

    #[test]
    fn response_normalize_keeps_explicit_status() {
        let mut response = Response::new(204);
        response.normalize();
        assert_eq!(response.status, 204);
    }

    #[test]
    fn streaming_response_clears_buffered_body() {
        let (_tx, rx) = tokio::sync::mpsc::channel(1);
        let mut response = Response::new(200).with_body(b"stale".to_vec());
        response.body_stream = Some(rx);
        response.normalize();
        assert!(response.body.is_empty());
        assert!(response.is_streaming());
    }

    #[test]
    fn json_response_sets_content_type() {
        let response = Response::json(200, &serde_json::json!({"ok": true}));
        assert_eq!(
            response.headers.get("content-type"),
            Some("application/json; charset=utf-8")
        );
        assert_eq!(response.body, br#"{"ok":true}"#);
    }
}
