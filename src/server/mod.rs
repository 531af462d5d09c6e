//! Async HTTP/1.1 server using Tokio.
//!
//! Accepts connections on a TCP port or a UNIX domain socket and dispatches
//! HTTP/1.1 requests to a handler function. Supports persistent connections
//! (keep-alive) and streaming response bodies.

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::BytesMut;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tracing::{debug, error, info, warn};

use crate::http::{
    StatusCode,
    request::{Request, RequestError},
    response::Response,
};

/// Errors produced by the server.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Maximum size of a complete HTTP request we will buffer before rejecting it (8 MiB).
const MAX_REQUEST_SIZE: usize = 8 * 1024 * 1024;

/// Initial read buffer capacity per connection.
const INITIAL_BUF_SIZE: usize = 4096;

/// Where a [`Server`] is listening.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "http://{addr}"),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

enum Listener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// The remux HTTP server.
///
/// # Examples
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use remux::{PatternRouter, Response, Server, StatusCode};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let router = Arc::new(PatternRouter::new());
///     router.handle("^/$", |_ctx| async { Response::new(StatusCode::Ok).body("Hello!") });
///
///     let server = Server::bind("127.0.0.1:8080").await?;
///     server
///         .run(move |req| {
///             let router = Arc::clone(&router);
///             async move { router.dispatch(req).await }
///         })
///         .await?;
///     Ok(())
/// }
/// ```
pub struct Server {
    listener: Listener,
    local_addr: ListenAddr,
}

impl Server {
    /// Binds the server.
    ///
    /// An address containing `/` is taken as the path of a UNIX domain socket
    /// (the file must not already exist); anything else is a TCP address.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Bind`] if the address cannot be bound
    /// (e.g. port already in use, insufficient permissions, UNIX sockets on a
    /// platform without them).
    pub async fn bind(addr: impl AsRef<str>) -> Result<Self, ServerError> {
        let addr = addr.as_ref();
        if addr.contains('/') {
            return Self::bind_unix(addr);
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::Bind {
                addr: addr.to_owned(),
                source: e,
            })?;
        let local_addr = ListenAddr::Tcp(listener.local_addr()?);
        Ok(Self {
            listener: Listener::Tcp(listener),
            local_addr,
        })
    }

    #[cfg(unix)]
    fn bind_unix(path: &str) -> Result<Self, ServerError> {
        let listener = UnixListener::bind(path).map_err(|e| ServerError::Bind {
            addr: path.to_owned(),
            source: e,
        })?;
        Ok(Self {
            listener: Listener::Unix(listener),
            local_addr: ListenAddr::Unix(PathBuf::from(path)),
        })
    }

    #[cfg(not(unix))]
    fn bind_unix(path: &str) -> Result<Self, ServerError> {
        Err(ServerError::Bind {
            addr: path.to_owned(),
            source: std::io::Error::new(
                std::io::ErrorKind::Unsupported,
                "UNIX domain sockets are not available on this platform",
            ),
        })
    }

    /// Returns the address the server is bound to.
    pub fn local_addr(&self) -> &ListenAddr {
        &self.local_addr
    }

    /// Starts accepting connections and dispatching requests to `handler`.
    ///
    /// The handler receives a [`Request`] (with its
    /// [`remote_addr`](Request::remote_addr) filled in) and must return a
    /// [`Future`] that resolves to a [`Response`]. The handler is wrapped in
    /// an [`Arc`] and shared across all spawned Tokio tasks.
    ///
    /// This method runs until the process is terminated.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Io`] if the listener itself fails.
    pub async fn run<H, F>(self, handler: H) -> Result<(), ServerError>
    where
        H: Fn(Request) -> F + Send + Sync + 'static,
        F: Future<Output = Response> + Send + 'static,
    {
        let handler = Arc::new(handler);
        info!(address = %self.local_addr, "remux listening");

        match self.listener {
            Listener::Tcp(listener) => loop {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        spawn_connection(stream, peer_addr.to_string(), Arc::clone(&handler))
                    }
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            },
            #[cfg(unix)]
            Listener::Unix(listener) => loop {
                match listener.accept().await {
                    // Unnamed client sockets have no address worth logging.
                    Ok((stream, _)) => spawn_connection(stream, "@".to_owned(), Arc::clone(&handler)),
                    Err(e) => error!(error = %e, "failed to accept connection"),
                }
            },
        }
    }
}

fn spawn_connection<S, H, F>(stream: S, peer: String, handler: Arc<H>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    debug!(peer = %peer, "connection accepted");
    tokio::spawn(async move {
        if let Err(e) = handle_connection(stream, &peer, handler).await {
            warn!(peer = %peer, error = %e, "connection closed with error");
        }
    });
}

/// Handles a single connection over its lifetime.
///
/// HTTP/1.1 connections are persistent by default: we loop, reading one
/// request per iteration, until the peer closes the connection, signals
/// `Connection: close`, or a streaming response finishes.
async fn handle_connection<S, H, F>(
    mut stream: S,
    peer: &str,
    handler: Arc<H>,
) -> Result<(), std::io::Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: Fn(Request) -> F + Send + Sync + 'static,
    F: Future<Output = Response> + Send + 'static,
{
    let mut buf = BytesMut::with_capacity(INITIAL_BUF_SIZE);
    // Pipelined requests may already be sitting in `buf`.
    let mut need_read = true;

    loop {
        if need_read {
            let bytes_read = stream.read_buf(&mut buf).await?;
            if bytes_read == 0 {
                debug!(peer, "connection closed by peer");
                break;
            }
        }

        if buf.len() > MAX_REQUEST_SIZE {
            warn!(peer, "request too large — sending 413");
            let response = Response::new(StatusCode::PayloadTooLarge)
                .body("Request entity too large")
                .keep_alive(false);
            stream.write_all(&response.into_bytes()).await?;
            break;
        }

        let (mut request, body_offset) = match Request::parse(&buf) {
            Ok(pair) => pair,
            Err(RequestError::Incomplete) => {
                need_read = true;
                continue;
            }
            Err(e) => {
                warn!(peer, error = %e, "bad request — sending 400");
                let response = Response::new(StatusCode::BadRequest)
                    .body(format!("Bad Request: {e}"))
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };

        // Wait for the full body to arrive if Content-Length is set.
        let content_length = request.content_length().unwrap_or(0);
        let total_needed = match body_offset.checked_add(content_length) {
            Some(total) if total <= MAX_REQUEST_SIZE => total,
            _ => {
                warn!(peer, content_length, "declared body too large — sending 413");
                let response = Response::new(StatusCode::PayloadTooLarge)
                    .body("Request entity too large")
                    .keep_alive(false);
                stream.write_all(&response.into_bytes()).await?;
                break;
            }
        };
        if buf.len() < total_needed {
            need_read = true;
            continue;
        }
        // Anything past Content-Length belongs to the next request.
        request.truncate_body(content_length);
        request.set_remote_addr(peer);

        let keep_alive = request.is_keep_alive();

        debug!(
            peer,
            method = %request.method(),
            path = %request.path(),
            "dispatching request"
        );

        let response = handler(request).await.keep_alive(keep_alive);
        let (head, body_stream) = response.into_parts();
        stream.write_all(&head).await?;
        stream.flush().await?;

        let _ = buf.split_to(total_needed);
        need_read = buf.is_empty();

        if let Some(mut chunks) = body_stream {
            while let Some(chunk) = chunks.recv().await {
                stream.write_all(&chunk).await?;
                stream.flush().await?;
            }
            debug!(peer, "streaming response finished — closing");
            break;
        }

        if !keep_alive {
            debug!(peer, "Connection: close — shutting down");
            break;
        }
    }

    stream.shutdown().await.ok();
    Ok(())
}
