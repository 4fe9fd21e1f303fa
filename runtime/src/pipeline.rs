use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use strato_core::error::{AppError, ErrorKind};
use strato_core::http::{Request, Response};
use strato_core::id::{IdGenerator, UuidIds};
use strato_core::time::{Clock, SystemClock};

use crate::context::Context;
use crate::middleware::{DynHandler, Handler, Middleware, compose};
use crate::router::{RouteMatch, Router};

pub const REQUEST_ID_HEADER: &str = "x-request-id";
pub const TENANT_ID_HEADER: &str = "x-tenant-id";

/// The request/response pipeline: normalization, middleware onion, route
/// match, handler invocation, and response normalization. Built once at
/// startup; read-only at serve time.
pub struct Pipeline {
    router: Arc<Router>,
    middlewares: Vec<Arc<dyn Middleware>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with_sources(Arc::new(SystemClock), Arc::new(UuidIds))
    }

    /// Inject clock and id sources; tests substitute deterministic ones.
    pub fn with_sources(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            router: Arc::new(Router::new()),
            middlewares: Vec::new(),
            clock,
            ids,
        }
    }

    pub fn route(&mut self, method: &str, pattern: &str, handler: DynHandler) -> &mut Self {
        Arc::get_mut(&mut self.router)
            .expect("routes must be registered before serving")
            .add(method, pattern, handler);
        self
    }

    pub fn middleware(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Builds an error response outside of handler execution, shaped the
    /// same way a handler error would be.
    pub fn error_response(&self, error: &AppError) -> Response {
        let request_id = self.ids.new_id();
        let mut response = error.to_response(&request_id);
        response.normalize();
        response.headers.set(REQUEST_ID_HEADER, request_id);
        response
    }

    pub async fn handle(&self, request: Request) -> Response {
        self.handle_hinted(request, 0).await
    }

    /// `remaining_ms` is the outer scheduler's remaining-time hint; zero
    /// means no hint.
    pub async fn handle_hinted(&self, mut request: Request, remaining_ms: i64) -> Response {
        request.normalize();
        let request_id = self.ids.new_id();
        let tenant_id = request
            .headers
            .get(TENANT_ID_HEADER)
            .unwrap_or_default()
            .to_string();

        let ctx = Context {
            request,
            params: BTreeMap::new(),
            request_id: request_id.clone(),
            tenant_id,
            remaining_ms,
            clock: self.clock.clone(),
            ids: self.ids.clone(),
            bag: BTreeMap::new(),
        };

        let terminal: DynHandler = Arc::new(RouteTerminal {
            router: self.router.clone(),
        });
        let chain = compose(&self.middlewares, terminal);

        // Run the chain in its own task so a panicking handler surfaces as
        // an internal error with the original request id preserved.
        let outcome = tokio::spawn(async move { chain.handle(ctx).await }).await;

        let mut response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => err.to_response(&request_id),
            Err(join_err) => {
                if join_err.is_panic() {
                    tracing::error!(
                        event = "handler_panic",
                        request_id = %request_id,
                        "handler panicked"
                    );
                }
                AppError::internal("internal error").to_response(&request_id)
            }
        };

        response.normalize();
        response.headers.set(REQUEST_ID_HEADER, request_id);
        response
    }
}

/// Terminal handler: matches the route and invokes it, or synthesizes the
/// 404/405 error responses.
struct RouteTerminal {
    router: Arc<Router>,
}

#[async_trait]
impl Handler for RouteTerminal {
    async fn handle(&self, mut ctx: Context) -> Result<Response, AppError> {
        match self.router.matches(&ctx.request.method, &ctx.request.path) {
            RouteMatch::Found { handler, params } => {
                ctx.params = params;
                handler.handle(ctx).await
            }
            RouteMatch::MethodNotAllowed { allowed } => {
                let mut response = AppError::new(ErrorKind::MethodNotAllowed, "method not allowed")
                    .to_response(&ctx.request_id);
                response.headers.set("allow", allowed.join(", "));
                Ok(response)
            }
            RouteMatch::NotFound => {
                Ok(AppError::not_found("not found").to_response(&ctx.request_id))
            }
        }
    }
}
