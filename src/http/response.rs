//! HTTP/1.1 response builder.
//!
//! Provides a fluent builder API for constructing HTTP responses and
//! serializing them to a byte buffer for transmission over TCP.
//!
//! A response body is either fully buffered or a stream of chunks fed through
//! a Tokio channel. Streamed responses carry no `Content-Length`; the server
//! ends the connection once the sending half is dropped.

use bytes::{BufMut, Bytes, BytesMut};
use tokio::sync::mpsc;

use super::{Headers, StatusCode};

/// The payload of a [`Response`].
#[derive(Debug)]
pub enum Body {
    /// A fully buffered body, written with a `Content-Length` header.
    Full(Vec<u8>),
    /// Chunks written to the connection as they arrive.
    Stream(mpsc::Receiver<Bytes>),
}

impl Default for Body {
    fn default() -> Self {
        Body::Full(Vec::new())
    }
}

/// An HTTP/1.1 response, ready to be serialized and sent.
///
/// # Examples
///
/// ```
/// use remux::http::{Response, StatusCode};
///
/// let response = Response::new(StatusCode::Ok)
///     .header("Content-Type", "application/json")
///     .body(r#"{"status":"ok"}"#);
///
/// let bytes = response.into_bytes();
/// let text = std::str::from_utf8(&bytes).unwrap();
/// assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
/// assert!(text.contains("Content-Length: 15\r\n"));
/// ```
#[derive(Debug)]
pub struct Response {
    status: StatusCode,
    headers: Headers,
    body: Body,
    keep_alive: bool,
}

impl Response {
    /// Creates a new response with the given status and an empty body.
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: Headers::new(),
            body: Body::default(),
            keep_alive: true,
        }
    }

    /// A redirect to `location` with the given (3xx) status.
    pub fn redirect(location: impl Into<String>, status: StatusCode) -> Self {
        Self::new(status).header("Location", location)
    }

    /// A plain-text `404 Not Found`.
    pub fn not_found() -> Self {
        Self::new(StatusCode::NotFound).body("404 page not found\n")
    }

    /// A plain-text error response carrying `message`.
    pub fn error(status: StatusCode, message: impl Into<String>) -> Self {
        let mut message = message.into();
        message.push('\n');
        Self::new(status).body(message)
    }

    /// Appends a response header. Multiple calls with the same name are additive.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Appends a header in-place. Intended for middleware pipelines that receive
    /// a `Response` from downstream and need to decorate it without consuming it.
    pub fn add_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.headers.insert(name, value);
    }

    /// Sets the response body from a string.
    ///
    /// The `Content-Length` header is written automatically by [`into_bytes`](Self::into_bytes).
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Body::Full(body.into().into_bytes());
        self
    }

    /// Sets the response body from raw bytes.
    #[must_use]
    pub fn body_bytes(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Body::Full(body.into());
        self
    }

    /// Makes this a streaming response fed by `chunks`.
    #[must_use]
    pub fn stream(mut self, chunks: mpsc::Receiver<Bytes>) -> Self {
        self.body = Body::Stream(chunks);
        self
    }

    /// Controls whether the `Connection: keep-alive` or `Connection: close` header is written.
    #[must_use]
    pub fn keep_alive(mut self, keep_alive: bool) -> Self {
        self.keep_alive = keep_alive;
        self
    }

    /// Returns the status code of this response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the response headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the response headers for in-place modification.
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }

    /// Returns the buffered body, or an empty slice for streaming responses.
    pub fn content(&self) -> &[u8] {
        match &self.body {
            Body::Full(bytes) => bytes,
            Body::Stream(_) => &[],
        }
    }

    /// Number of buffered body bytes (0 for streaming responses).
    pub fn content_len(&self) -> usize {
        self.content().len()
    }

    /// Returns `true` if the body is a stream.
    pub fn is_streaming(&self) -> bool {
        matches!(self.body, Body::Stream(_))
    }

    /// Takes the buffered body out of the response, leaving it empty.
    ///
    /// Returns `None` (and leaves the response untouched) for streaming bodies.
    pub fn take_content(&mut self) -> Option<Vec<u8>> {
        match &mut self.body {
            Body::Full(bytes) => Some(std::mem::take(bytes)),
            Body::Stream(_) => None,
        }
    }

    /// Replaces the body with a buffered one.
    pub fn set_content(&mut self, content: Vec<u8>) {
        self.body = Body::Full(content);
    }

    /// Serializes the response into a `BytesMut` buffer using HTTP/1.1 wire format.
    ///
    /// Automatically adds:
    /// - `Content-Type: text/plain; charset=utf-8` if the body is non-empty and no
    ///   `Content-Type` header was set.
    /// - `Content-Length: <n>` (always written for buffered bodies).
    /// - `Connection: keep-alive` or `Connection: close` unless already set.
    ///
    /// For a streaming body only the head is returned; use
    /// [`into_parts`](Self::into_parts) to get at the chunk receiver.
    pub fn into_bytes(self) -> BytesMut {
        self.into_parts().0
    }

    /// Serializes the head (and buffered body, if any) and hands back the
    /// chunk receiver of a streaming body.
    pub fn into_parts(mut self) -> (BytesMut, Option<mpsc::Receiver<Bytes>>) {
        let (content, stream) = match std::mem::take(&mut self.body) {
            Body::Full(bytes) => (bytes, None),
            Body::Stream(rx) => (Vec::new(), Some(rx)),
        };

        if !content.is_empty() && !self.headers.contains("content-type") {
            self.headers
                .insert("Content-Type", "text/plain; charset=utf-8");
        }

        if !self.headers.contains("connection") {
            let connection = if self.keep_alive && stream.is_none() {
                "keep-alive"
            } else {
                "close"
            };
            self.headers.insert("Connection", connection);
        }

        let estimated_size = 128 + self.headers.len() * 64 + content.len();
        let mut buf = BytesMut::with_capacity(estimated_size);

        // Status line
        buf.put(
            format!(
                "HTTP/1.1 {} {}\r\n",
                self.status.as_u16(),
                self.status.canonical_reason()
            )
            .as_bytes(),
        );

        // Headers
        for (name, value) in self.headers.iter() {
            buf.put(format!("{name}: {value}\r\n").as_bytes());
        }

        // Content-Length is always the last header before the blank line
        if stream.is_none() {
            buf.put(format!("Content-Length: {}\r\n", content.len()).as_bytes());
        }

        // Header/body separator
        buf.put(&b"\r\n"[..]);

        // Body
        if !content.is_empty() {
            buf.put(content.as_slice());
        }

        (buf, stream)
    }
}

impl Default for Response {
    fn default() -> Self {
        Self::new(StatusCode::Ok)
    }
}
