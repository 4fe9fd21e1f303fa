use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;

use strato_core::error::AppError;
use strato_core::http::Response;

use crate::context::Context;

/// A request handler. Handlers short-circuit only by returning a response
/// or an error; nothing unwinds across the pipeline boundary.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, ctx: Context) -> Result<Response, AppError>;
}

pub type DynHandler = Arc<dyn Handler>;

/// Middleware wraps the next handler and may short-circuit by returning its
/// own response. The first registered middleware runs outermost.
#[async_trait]
pub trait Middleware: Send + Sync {
    async fn call(&self, ctx: Context, next: DynHandler) -> Result<Response, AppError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Response, AppError>> + Send,
{
    async fn handle(&self, ctx: Context) -> Result<Response, AppError> {
        (self.0)(ctx).await
    }
}

/// Wrap an async function or closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> DynHandler
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Response, AppError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct Wrapped {
    middleware: Arc<dyn Middleware>,
    next: DynHandler,
}

#[async_trait]
impl Handler for Wrapped {
    async fn handle(&self, ctx: Context) -> Result<Response, AppError> {
        self.middleware.call(ctx, self.next.clone()).await
    }
}

/// Assemble the onion right-to-left: the first middleware in the slice ends
/// up outermost and therefore runs first.
pub fn compose(middlewares: &[Arc<dyn Middleware>], terminal: DynHandler) -> DynHandler {
    let mut handler = terminal;
    for middleware in middlewares.iter().rev() {
        handler = Arc::new(Wrapped {
            middleware: middleware.clone(),
            next: handler,
        });
    }
    handler
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use strato_core::http::Request;
    use strato_core::id::SequenceIds;
    use strato_core::time::SystemClock;

    fn test_ctx() -> Context {
        Context {
            request: Request::new("GET", "/"),
            params: BTreeMap::new(),
            request_id: "id-1".to_string(),
            tenant_id: String::new(),
            remaining_ms: 0,
            clock: Arc::new(SystemClock),
            ids: Arc::new(SequenceIds::new()),
            bag: BTreeMap::new(),
        }
    }

    struct Tag(&'static str);

    #[async_trait]
    impl Middleware for Tag {
        async fn call(&self, mut ctx: Context, next: DynHandler) -> Result<Response, AppError> {
            let order = ctx
                .bag
                .entry("order".to_string())
                .or_insert_with(|| serde_json::json!([]));
            order.as_array_mut().unwrap().push(self.0.into());
            next.handle(ctx).await
        }
    }

    #[tokio::test]
    async fn first_registered_middleware_runs_outermost() {
        let middlewares: Vec<Arc<dyn Middleware>> = vec![Arc::new(Tag("a")), Arc::new(Tag("b"))];
        let terminal = handler_fn(|ctx: Context| async move {
            let order = serde_json::to_vec(&ctx.bag["order"]).unwrap();
            Ok(Response::new(200).with_body(order))
        });
        let chain = compose(&middlewares, terminal);
        let response = chain.handle(test_ctx()).await.unwrap();
        assert_eq!(response.body, br#"["a","b"]"#);
    }

    #[tokio::test]
    async fn middleware_can_short_circuit() {
        struct Block;

        #[async_trait]
        impl Middleware for Block {
            async fn call(&self, _ctx: Context, _next: DynHandler) -> Result<Response, AppError> {
                Ok(Response::new(403))
            }
        }

        let middlewares: Vec<Arc<dyn Middleware>> = vec![Arc::new(Block)];
        let terminal = handler_fn(|_ctx| async move { Ok(Response::new(200)) });
        let chain = compose(&middlewares, terminal);
        let response = chain.handle(test_ctx()).await.unwrap();
        assert_eq!(response.status, 403);
    }
}
