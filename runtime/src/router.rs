use std::collections::BTreeMap;

use crate::middleware::DynHandler;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Param(String),
}

/// A registered route. Registration order is preserved and duplicates are
/// allowed on purpose: a specific route registered first shadows a
/// catch-all registered later.
pub struct Route {
    pub method: String,
    pub pattern: String,
    segments: Vec<Segment>,
    pub handler: DynHandler,
}

/// Outcome of a router lookup.
pub enum RouteMatch<'a> {
    Found {
        handler: &'a DynHandler,
        params: BTreeMap<String, String>,
    },
    /// At least one route matched the path but none matched the method.
    /// `allowed` is sorted and deduplicated.
    MethodNotAllowed { allowed: Vec<String> },
    NotFound,
}

#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, method: &str, pattern: &str, handler: DynHandler) {
        self.routes.push(Route {
            method: method.to_ascii_uppercase(),
            pattern: pattern.to_string(),
            segments: parse_pattern(pattern),
            handler,
        });
    }

    /// First match in registration order wins. Literals compare
    /// case-sensitively; `/x` and `/x/` are distinct patterns.
    pub fn matches(&self, method: &str, path: &str) -> RouteMatch<'_> {
        let path_segments = split_path(path);
        let mut allowed: Vec<String> = Vec::new();

        for route in &self.routes {
            let Some(params) = match_segments(&route.segments, &path_segments) else {
                continue;
            };
            if route.method == method {
                return RouteMatch::Found {
                    handler: &route.handler,
                    params,
                };
            }
            allowed.push(route.method.clone());
        }

        if allowed.is_empty() {
            return RouteMatch::NotFound;
        }
        allowed.sort();
        allowed.dedup();
        RouteMatch::MethodNotAllowed { allowed }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

fn parse_pattern(pattern: &str) -> Vec<Segment> {
    pattern
        .trim_start_matches('/')
        .split('/')
        .map(|segment| {
            if let Some(name) = segment
                .strip_prefix('{')
                .and_then(|rest| rest.strip_suffix('}'))
            {
                Segment::Param(name.to_string())
            } else {
                Segment::Literal(segment.to_string())
            }
        })
        .collect()
}

fn split_path(path: &str) -> Vec<&str> {
    path.trim_start_matches('/').split('/').collect()
}

fn match_segments(
    pattern: &[Segment],
    path: &[&str],
) -> Option<BTreeMap<String, String>> {
    if pattern.len() != path.len() {
        return None;
    }
    let mut params = BTreeMap::new();
    for (segment, actual) in pattern.iter().zip(path) {
        match segment {
            Segment::Literal(literal) => {
                if literal != actual {
                    return None;
                }
            }
            Segment::Param(name) => {
                // Placeholders never bind an empty segment.
                if actual.is_empty() {
                    return None;
                }
                params.insert(name.clone(), (*actual).to_string());
            }
        }
    }
    Some(params)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::handler_fn;
    use strato_core::http::Response;

    fn noop() -> DynHandler {
        handler_fn(|_ctx| async move { Ok(Response::new(200)) })
    }

    #[test]
    fn literal_route_matches_exact_path() {
        let mut router = Router::new();
        router.add("GET", "/health", noop());
        assert!(matches!(
            router.matches("GET", "/health"),
            RouteMatch::Found { .. }
        ));
        assert!(matches!(router.matches("GET", "/nope"), RouteMatch::NotFound));
    }

    #[test]
    fn placeholder_captures_segment_text() {
        let mut router = Router::new();
        router.add("GET", "/users/{userId}", noop());
        match router.matches("GET", "/users/u_42") {
            RouteMatch::Found { params, .. } => {
                assert_eq!(params["userId"], "u_42");
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn placeholder_rejects_empty_segment() {
        let mut router = Router::new();
        router.add("GET", "/users/{userId}", noop());
        assert!(matches!(
            router.matches("GET", "/users/"),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn path_match_without_method_reports_sorted_deduped_allow_set() {
        let mut router = Router::new();
        router.add("PUT", "/x", noop());
        router.add("POST", "/x", noop());
        router.add("POST", "/x", noop());
        match router.matches("GET", "/x") {
            RouteMatch::MethodNotAllowed { allowed } => {
                assert_eq!(allowed, ["POST", "PUT"]);
            }
            _ => panic!("expected method-not-allowed"),
        }
    }

    #[tokio::test]
    async fn earlier_registration_wins_among_duplicates() {
        let mut router = Router::new();
        let first = handler_fn(|_ctx| async move { Ok(Response::new(201)) });
        router.add("GET", "/x", first);
        router.add("GET", "/x", noop());
        match router.matches("GET", "/x") {
            RouteMatch::Found { handler, .. } => {
                let ctx = crate::context::Context {
                    request: strato_core::http::Request::new("GET", "/x"),
                    params: BTreeMap::new(),
                    request_id: "id-1".to_string(),
                    tenant_id: String::new(),
                    remaining_ms: 0,
                    clock: std::sync::Arc::new(strato_core::time::SystemClock),
                    ids: std::sync::Arc::new(strato_core::id::SequenceIds::new()),
                    bag: BTreeMap::new(),
                };
                let response = handler.handle(ctx).await.unwrap();
                assert_eq!(response.status, 201);
            }
            _ => panic!("expected a match"),
        }
    }

    #[test]
    fn literals_are_case_sensitive() {
        let mut router = Router::new();
        router.add("GET", "/Users", noop());
        assert!(matches!(
            router.matches("GET", "/users"),
            RouteMatch::NotFound
        ));
    }

    #[test]
    fn trailing_slash_is_a_distinct_pattern() {
        let mut router = Router::new();
        router.add("GET", "/x", noop());
        assert!(matches!(router.matches("GET", "/x/"), RouteMatch::NotFound));
        router.add("GET", "/x/", noop());
        assert!(matches!(
            router.matches("GET", "/x/"),
            RouteMatch::Found { .. }
        ));
    }

    #[test]
    fn segment_count_must_match_exactly() {
        let mut router = Router::new();
        router.add("GET", "/a/{b}", noop());
        assert!(matches!(
            router.matches("GET", "/a/b/c"),
            RouteMatch::NotFound
        ));
        assert!(matches!(router.matches("GET", "/a"), RouteMatch::NotFound));
    }
}
