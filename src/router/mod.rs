//! Request routing by regular expression.
//!
//! [`PatternRouter`] keeps an ordered table of `(regex, handler)` pairs. For
//! every request it:
//!
//! 1. canonicalizes the percent-decoded path (`.`/`..` segments and repeated slashes) and, if
//!    that changed anything, answers `301 Moved Permanently` pointing at the
//!    canonical path;
//! 2. tries every pattern, in registration order, against `host + path`
//!    (so `"^example\.com/admin"` only matches on that host);
//! 3. failing that, tries every pattern against the bare path;
//! 4. invokes the first matching handler with a [`Context`] whose
//!    [`vars`](Context::vars) are the pattern's capture groups, or answers
//!    `404 Not Found`.
//!
//! | Pattern                        | Request                   | `vars()`                   |
//! |--------------------------------|---------------------------|----------------------------|
//! | `^/(foo\|bar)?$`               | `/foo`                    | `[Some("foo")]`            |
//! | `^/users/(?P<id>\d+)$`         | `/users/42`               | `[Some("42")]`, `id → 42`  |
//! | `^api\.local/v1/(.*)$`         | `Host: api.local`, `/v1/x`| `[Some("x")]`              |

use std::pin::Pin;
use std::sync::{Arc, PoisonError, RwLock};

use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use crate::context::{Captures, Context};
use crate::middleware::{MiddlewareHandler, Next};
use crate::{Request, Response, StatusCode};

/// Type-erased, heap-allocated async handler that processes a [`Context`] and returns a
/// [`Response`].
///
/// Handlers are stored behind `Arc<dyn Fn(…)>` so they can be cloned out of the
/// routing table and awaited after the table lock has been released. In practice
/// you never construct this type directly — pass a closure to
/// [`PatternRouter::handle`].
pub type Handler =
    Arc<dyn Fn(Context) -> Pin<Box<dyn Future<Output = Response> + Send>> + Send + Sync + 'static>;

/// Conversion trait for async handler functions.
///
/// Any `Fn(Context) -> impl Future<Output = Response> + Send` that is also
/// `Send + Sync + 'static` implements this trait automatically via the blanket impl
/// below.
pub trait IntoHandler: Send + Sync + 'static {
    /// Call the handler with the given context, boxing the returned future.
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>>;
}

impl<T, F> IntoHandler for T
where
    T: Fn(Context) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: Context) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        Box::pin((self)(ctx))
    }
}

/// Route registration failures. These are configuration mistakes;
/// [`PatternRouter::handle`] panics with them.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("remux: empty pattern")]
    EmptyPattern,

    #[error("remux: invalid pattern {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("remux: multiple registrations for {0}")]
    DuplicatePattern(String),
}

// Bytes re-escaped when a decoded path goes back out in a `Location` header.
const PATH_ESCAPE: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

// A registered pattern and its handler. Never mutated after registration.
struct Route {
    pattern: String,
    regex: Regex,
    handler: Handler,
}

/// Regular-expression request multiplexer.
///
/// **The first registered pattern that matches wins.** There is no
/// longest-match or most-specific-match logic: register `^/users/new$` before
/// `^/users/(.+)$`, or the latter will swallow both.
///
/// Patterns are plain [`regex`] syntax and are not implicitly anchored; use
/// `^` and `$` to match whole paths.
///
/// # Examples
///
/// ```rust,no_run
/// use remux::{Context, PatternRouter, Response, StatusCode};
///
/// let router = PatternRouter::new();
///
/// router.handle("^/(foo|bar)?$", |ctx: Context| async move {
///     let which = ctx.vars().get(0).unwrap_or("index").to_owned();
///     Response::new(StatusCode::Ok).body(format!("Hello, {which}"))
/// });
///
/// router.handle(r"^/users/(?P<id>\d+)$", |ctx: Context| async move {
///     let id = ctx.vars().name("id").unwrap_or_default().to_owned();
///     Response::new(StatusCode::Ok).body(id)
/// });
/// ```
pub struct PatternRouter {
    routes: RwLock<Vec<Route>>,
}

impl Default for PatternRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl PatternRouter {
    /// Create a new, empty router.
    pub fn new() -> Self {
        Self {
            routes: RwLock::new(Vec::new()),
        }
    }

    /// Register `handler` for `pattern`, after every pattern registered so far.
    ///
    /// # Panics
    ///
    /// If `pattern` is empty, is not a valid regular expression, or has
    /// already been registered verbatim. See [`try_handle`](Self::try_handle)
    /// for the non-panicking form.
    pub fn handle(&self, pattern: &str, handler: impl IntoHandler) {
        if let Err(e) = self.try_handle(pattern, handler) {
            panic!("{e}");
        }
    }

    /// Register `handler` for `pattern`, returning an error instead of panicking.
    ///
    /// # Errors
    ///
    /// - [`RouterError::EmptyPattern`] — `pattern` is `""`.
    /// - [`RouterError::InvalidPattern`] — `pattern` does not compile.
    /// - [`RouterError::DuplicatePattern`] — the same pattern string is
    ///   already in the table.
    pub fn try_handle(&self, pattern: &str, handler: impl IntoHandler) -> Result<(), RouterError> {
        if pattern.is_empty() {
            return Err(RouterError::EmptyPattern);
        }

        let regex = Regex::new(pattern).map_err(|source| RouterError::InvalidPattern {
            pattern: pattern.to_owned(),
            source,
        })?;

        let handler: Handler = Arc::new(move |ctx| handler.call(ctx));

        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        if routes.iter().any(|r| r.pattern == pattern) {
            return Err(RouterError::DuplicatePattern(pattern.to_owned()));
        }
        routes.push(Route {
            pattern: pattern.to_owned(),
            regex,
            handler,
        });

        debug!(pattern, position = routes.len() - 1, "route registered");
        Ok(())
    }

    /// Return the number of registered patterns.
    pub fn len(&self) -> usize {
        self.read_routes().len()
    }

    /// Return `true` if no patterns have been registered.
    pub fn is_empty(&self) -> bool {
        self.read_routes().is_empty()
    }

    /// The registered pattern strings, in priority order.
    pub fn patterns(&self) -> Vec<String> {
        self.read_routes().iter().map(|r| r.pattern.clone()).collect()
    }

    /// Dispatch `request` and return the response.
    ///
    /// Non-canonical paths get a `301` to their canonical form (except for
    /// `CONNECT`), unmatched paths get a `404`, everything else goes to the
    /// first matching handler.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// use remux::{PatternRouter, Response, StatusCode};
    ///
    /// # async fn example(request: remux::Request) {
    /// let router = PatternRouter::new();
    /// router.handle("^/ping$", |_ctx| async { Response::new(StatusCode::Ok) });
    ///
    /// let response = router.dispatch(request).await;
    /// # }
    /// ```
    pub async fn dispatch(&self, request: Request) -> Response {
        self.route(Context::new(request)).await
    }

    /// Like [`dispatch`](Self::dispatch), for a context built further up a
    /// middleware stack. Extensions already in `ctx` reach the handler.
    pub async fn route(&self, mut ctx: Context) -> Response {
        let request = ctx.request();

        if !request.method().is_connect() {
            let canonical = clean_path(request.path());
            if canonical != request.path() {
                let encoded = utf8_percent_encode(&canonical, PATH_ESCAPE);
                let location = match request.query_string() {
                    Some(query) => format!("{encoded}?{query}"),
                    None => encoded.to_string(),
                };
                debug!(path = %request.path(), %location, "redirecting to canonical path");
                return Response::redirect(location, StatusCode::MovedPermanently);
            }
        }

        // The table lock is released here, before the handler runs.
        let Some((handler, vars)) = self.lookup(request) else {
            debug!(path = %request.path(), "no route matched");
            return Response::not_found();
        };

        ctx.set_vars(vars);
        handler(ctx).await
    }

    /// Adapt this router into the terminal layer of a middleware
    /// [`Stack`](crate::middleware::Stack).
    pub fn endpoint(self: Arc<Self>) -> MiddlewareHandler {
        Arc::new(
            move |ctx: Context, _next: Next| -> Pin<Box<dyn Future<Output = Response> + Send>> {
                let router = Arc::clone(&self);
                Box::pin(async move { router.route(ctx).await })
            },
        )
    }

    // Host-qualified pass first, then the bare path.
    fn lookup(&self, request: &Request) -> Option<(Handler, Captures)> {
        let routes = self.read_routes();
        let path = request.path();

        if let Some(host) = request.host().filter(|h| !h.is_empty()) {
            let qualified = format!("{host}{path}");
            if let Some(found) = first_match(&routes, &qualified) {
                return Some(found);
            }
        }

        first_match(&routes, path)
    }

    fn read_routes(&self) -> std::sync::RwLockReadGuard<'_, Vec<Route>> {
        self.routes.read().unwrap_or_else(PoisonError::into_inner)
    }
}

fn first_match(routes: &[Route], haystack: &str) -> Option<(Handler, Captures)> {
    routes.iter().find_map(|route| {
        Captures::from_match(&route.regex, haystack).map(|caps| (Arc::clone(&route.handler), caps))
    })
}

/// Return the canonical form of `path`.
///
/// An empty path becomes `/`, a leading `/` is added if missing, repeated
/// slashes collapse, `.` segments are dropped and `..` removes the previous
/// segment (never climbing above the root). A trailing slash on the input is
/// preserved.
///
/// ```
/// use remux::router::clean_path;
///
/// assert_eq!(clean_path("/a/../b"), "/b");
/// assert_eq!(clean_path("/a/./b/"), "/a/b/");
/// assert_eq!(clean_path("/../.."), "/");
/// assert_eq!(clean_path(""), "/");
/// ```
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    let mut clean = String::with_capacity(path.len() + 1);
    for segment in &segments {
        clean.push('/');
        clean.push_str(segment);
    }

    if clean.is_empty() {
        clean.push('/');
    } else if path.ends_with('/') {
        clean.push('/');
    }

    clean
}
