//! Middleware pipeline — composable before/after request handler logic.
//!
//! Each middleware wraps the next layer, enabling request inspection,
//! short-circuit responses, and response decoration without coupling handlers
//! to infrastructure concerns. A [`Stack`] ties an ordered list of layers to a
//! terminal endpoint (typically [`PatternRouter::endpoint`]).
//!
//! ## Core types
//!
//! - [`Middleware`] — trait implemented by all middleware.
//! - [`Next`] — cursor into the remaining middleware chain; call [`Next::run`] to
//!   advance to the next layer.
//! - [`MiddlewareHandler`] — type-erased, cheaply-cloneable middleware function.
//! - [`from_middleware`] — converts a [`Middleware`] into a [`MiddlewareHandler`].
//! - [`Stack`] — layers plus endpoint, ready to serve a [`Request`].
//!
//! ## Built-in middleware
//!
//! - [`AccessLog`] — Apache Common Log access logging, optional `X-Real-IP` /
//!   `X-Forwarded-For` trust.
//! - [`Gzip`] — on-the-fly gzip encoding of buffered responses.
//!
//! [`PatternRouter::endpoint`]: crate::router::PatternRouter::endpoint

use std::{future::Future, pin::Pin, sync::Arc};

use crate::router::IntoHandler;
use crate::{Request, Response, context::Context};

mod access_log;
mod gzip;

pub use access_log::{AccessLog, AccessRecord, AccessSink};
pub use gzip::Gzip;

/// A cursor into the remaining middleware chain for a single request.
///
/// `Next` is passed to each middleware's [`Middleware::handle`] implementation.
/// Calling [`Next::run`] advances the cursor by one position and invokes the next
/// middleware (or returns a fallback `500` response when the chain is exhausted
/// without any middleware generating a response).
///
/// `Next` is consumed on each call to [`run`](Self::run), so it cannot be called
/// more than once per middleware invocation.
pub struct Next {
    middlewares: Vec<MiddlewareHandler>,
    // Tracks which middleware to invoke on the next `run` call.
    index: usize,
}

/// A type-erased, reference-counted middleware function.
///
/// Every entry in the middleware stack is stored as a `MiddlewareHandler`.
/// The [`Arc`] wrapper makes handlers cheap to clone so that [`Next`] can
/// advance through the chain without copying closures.
pub type MiddlewareHandler = Arc<
    dyn Fn(Context, Next) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static,
>;

/// Converts a [`Middleware`] implementation into a [`MiddlewareHandler`].
pub fn from_middleware<M>(middleware: Arc<M>) -> MiddlewareHandler
where
    M: Middleware + 'static,
{
    Arc::new(move |ctx: Context, next: Next| middleware.handle(ctx, next))
}

impl Next {
    /// Creates a new `Next` positioned at the start of the given middleware stack.
    pub fn new(middlewares: Vec<MiddlewareHandler>) -> Self {
        Self {
            middlewares,
            index: 0,
        }
    }

    /// Invokes the next middleware in the chain and returns its response.
    ///
    /// If no handler remains (i.e. the chain is exhausted without producing a
    /// response), a `500 Internal Server Error` response is returned.
    pub async fn run(mut self, ctx: Context) -> Response {
        if self.index < self.middlewares.len() {
            let handler = self.middlewares[self.index].clone();
            self.index += 1;
            handler(ctx, self).await
        } else {
            Response::new(crate::StatusCode::InternalServerError)
                .body("No response generated by middleware pipeline")
        }
    }
}

/// The core trait for all remux middleware.
///
/// Implementors receive a [`Context`] and a [`Next`] cursor. They may:
///
/// - **Pass through** — call `next.run(ctx).await` without modification.
/// - **Short-circuit** — return a [`Response`] directly without calling `next`.
/// - **Decorate** — call `next.run(ctx).await`, inspect the response, and return
///   a modified copy.
///
/// Implementations must be `Send + Sync` because middleware is shared across
/// Tokio tasks, and `handle` must return a `Send` future that does not borrow
/// `self` (clone what you need out of `self` before the `async move` block).
pub trait Middleware: Send + Sync {
    /// Handle the request and optionally delegate to the next middleware.
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

/// An ordered set of middleware in front of one endpoint.
///
/// The first layer added is the outermost: it sees the request first and the
/// response last.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use remux::PatternRouter;
/// use remux::middleware::{AccessLog, Gzip, Stack};
///
/// let router = Arc::new(PatternRouter::new());
/// let stack = Stack::new()
///     .layer(AccessLog::new().x_headers(true))
///     .layer(Gzip::new())
///     .endpoint(router.endpoint());
/// ```
#[derive(Clone, Default)]
pub struct Stack {
    layers: Vec<MiddlewareHandler>,
    endpoint: Option<MiddlewareHandler>,
}

impl Stack {
    /// An empty stack. Without an endpoint every request gets a `500`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a middleware layer inside the ones already added.
    #[must_use]
    pub fn layer<M>(mut self, middleware: M) -> Self
    where
        M: Middleware + 'static,
    {
        self.layers.push(from_middleware(Arc::new(middleware)));
        self
    }

    /// Set the terminal handler, replacing any previous one.
    #[must_use]
    pub fn endpoint(mut self, endpoint: MiddlewareHandler) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Set a plain handler as the terminal layer.
    #[must_use]
    pub fn handler(self, handler: impl IntoHandler) -> Self {
        self.endpoint(Arc::new(move |ctx: Context, _next: Next| handler.call(ctx)))
    }

    /// Run `request` through every layer and the endpoint.
    pub async fn serve(&self, request: Request) -> Response {
        let mut chain = Vec::with_capacity(self.layers.len() + 1);
        chain.extend(self.layers.iter().cloned());
        chain.extend(self.endpoint.iter().cloned());
        Next::new(chain).run(Context::new(request)).await
    }
}
