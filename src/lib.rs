//! # remux
//!
//! A regular-expression request multiplexer on a small async HTTP/1.1 server,
//! with the odds and ends that usually sit next to one: access logging, gzip,
//! Server-Sent Events and `:name` URL templates.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use remux::middleware::{AccessLog, Stack};
//! use remux::{PatternRouter, Response, Server, StatusCode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let router = Arc::new(PatternRouter::new());
//!     // Supports GET /, /foo and /bar
//!     router.handle("^/(foo|bar)?$", |ctx: remux::Context| async move {
//!         let vars: Vec<_> = ctx.vars().iter().map(|v| v.unwrap_or("")).collect();
//!         Response::new(StatusCode::Ok).body(format!("Hello, world {vars:?}\n"))
//!     });
//!
//!     let stack = Arc::new(Stack::new().layer(AccessLog::new()).endpoint(router.endpoint()));
//!
//!     let server = Server::bind("127.0.0.1:8080").await?;
//!     server
//!         .run(move |req| {
//!             let stack = Arc::clone(&stack);
//!             async move { stack.serve(req).await }
//!         })
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! Patterns are tried in registration order and **the first match wins**;
//! see [`PatternRouter`].

pub mod config;
pub mod context;
pub mod http;
pub mod middleware;
pub mod realtime;
pub mod router;
pub mod server;
pub mod urlparams;

// ── Convenience re-exports ────────────────────────────────────────────────────
pub use config::{ConfigError, ServerConfig};
pub use context::{Captures, Context};
pub use http::{Headers, Method, Request, Response, StatusCode};
pub use router::{PatternRouter, RouterError};
pub use server::{ListenAddr, Server, ServerError};
