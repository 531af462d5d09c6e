//! HTTP/1.1 request parsing using the [`httparse`] crate.

use std::borrow::Cow;
use std::collections::HashMap;

use bytes::Bytes;
use percent_encoding::percent_decode_str;
use thiserror::Error;

use super::{Headers, Method};

/// Errors that can occur while parsing an HTTP/1.1 request.
#[derive(Debug, Error)]
pub enum RequestError {
    #[error("request is incomplete — more data needed")]
    Incomplete,

    #[error("HTTP parse error: {0}")]
    Parse(#[from] httparse::Error),

    #[error("missing required field: {field}")]
    MissingField { field: &'static str },

    #[error("request path {path:?} is not valid UTF-8 once decoded")]
    InvalidPath { path: String },
}

/// A fully parsed HTTP/1.1 request.
///
/// Created by [`Request::parse`] from a raw byte buffer. The body is stored
/// as a [`Bytes`] buffer.
///
/// # Examples
///
/// ```
/// use remux::http::request::Request;
///
/// let raw = b"GET /hello?name=world HTTP/1.1\r\nHost: localhost\r\n\r\n";
/// let (request, _offset) = Request::parse(raw).unwrap();
///
/// assert_eq!(request.method().as_str(), "GET");
/// assert_eq!(request.path(), "/hello");
/// assert_eq!(request.request_uri(), "/hello?name=world");
/// assert_eq!(request.query_param("name"), Some("world"));
/// assert_eq!(request.host(), Some("localhost"));
/// ```
#[derive(Debug)]
pub struct Request {
    method: Method,
    /// Request target exactly as received.
    target: String,
    /// Percent-decoded path.
    path: String,
    /// Authority from an absolute-form target (`GET http://host/path`).
    authority: Option<String>,
    /// HTTP minor version: 0 for HTTP/1.0, 1 for HTTP/1.1.
    version: u8,
    headers: Headers,
    query: Option<String>,
    body: Bytes,
    params: HashMap<String, String>,
    remote_addr: Option<String>,
}

impl Request {
    /// Maximum number of headers we support per request.
    const MAX_HEADERS: usize = 64;

    /// Parse a raw HTTP/1.1 request from a byte slice.
    ///
    /// Returns the parsed `Request` and the byte offset at which the body begins
    /// in `buf` (i.e. immediately after the `\r\n\r\n` header terminator).
    ///
    /// # Errors
    ///
    /// - [`RequestError::Incomplete`] — more data is needed to complete the request headers.
    /// - [`RequestError::Parse`] — the data is malformed and cannot be parsed.
    /// - [`RequestError::MissingField`] — a required field (method, path, version) is absent.
    pub fn parse(buf: &[u8]) -> Result<(Self, usize), RequestError> {
        let mut headers = [httparse::EMPTY_HEADER; Self::MAX_HEADERS];
        let mut raw_req = httparse::Request::new(&mut headers);

        let body_offset = match raw_req.parse(buf)? {
            httparse::Status::Complete(offset) => offset,
            httparse::Status::Partial => return Err(RequestError::Incomplete),
        };

        let method = match raw_req
            .method
            .ok_or(RequestError::MissingField { field: "method" })?
            .parse::<Method>()
        {
            Ok(method) => method,
            Err(never) => match never {},
        };

        let target = raw_req
            .path
            .ok_or(RequestError::MissingField { field: "path" })?;

        let (authority, origin) = split_absolute_form(target);
        let (raw_path, query) = match origin.split_once('?') {
            Some((p, q)) => (p, Some(q.to_owned())),
            None => (origin.as_ref(), None),
        };
        let path = percent_decode_str(raw_path)
            .decode_utf8()
            .map_err(|_| RequestError::InvalidPath {
                path: raw_path.to_owned(),
            })?
            .into_owned();

        let version = raw_req
            .version
            .ok_or(RequestError::MissingField { field: "version" })?;

        let mut header_map = Headers::with_capacity(raw_req.headers.len());
        for header in raw_req.headers.iter() {
            if let Ok(value) = std::str::from_utf8(header.value) {
                header_map.insert(header.name, value);
            }
        }

        let params = query.as_deref().map(parse_query_string).unwrap_or_default();
        let body = Bytes::copy_from_slice(&buf[body_offset..]);

        Ok((
            Self {
                method,
                target: target.to_owned(),
                path,
                authority,
                version,
                headers: header_map,
                query,
                body,
                params,
                remote_addr: None,
            },
            body_offset,
        ))
    }

    /// Returns the HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the percent-decoded request path (without the query string).
    ///
    /// For an absolute-form target such as `http://example.com/b` this is
    /// just `/b`; the authority is reported by [`host`](Self::host).
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the request target exactly as sent by the client, still
    /// percent-encoded and including any query string.
    pub fn request_uri(&self) -> &str {
        &self.target
    }

    /// Returns the HTTP minor version number (0 = HTTP/1.0, 1 = HTTP/1.1).
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Returns the protocol string, e.g. `"HTTP/1.1"`.
    pub fn protocol(&self) -> &'static str {
        if self.version == 0 {
            "HTTP/1.0"
        } else {
            "HTTP/1.1"
        }
    }

    /// Returns the request headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the authority of an absolute-form target, or else the `Host`
    /// header verbatim (port included, if the client sent one).
    pub fn host(&self) -> Option<&str> {
        self.authority
            .as_deref()
            .or_else(|| self.headers.get("host"))
    }

    /// Returns the raw query string (without the leading `?`), if any.
    pub fn query_string(&self) -> Option<&str> {
        self.query.as_deref()
    }

    /// Returns a parsed query parameter value by key.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Returns the request body bytes.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Drops body bytes beyond `len` (pipelined data that belongs to the next request).
    pub(crate) fn truncate_body(&mut self, len: usize) {
        self.body.truncate(len);
    }

    /// Returns the address of the peer that sent this request, as recorded by
    /// the server (or rewritten by [`AccessLog`](crate::middleware::AccessLog)).
    pub fn remote_addr(&self) -> Option<&str> {
        self.remote_addr.as_deref()
    }

    /// Records the peer address for this request.
    pub fn set_remote_addr(&mut self, addr: impl Into<String>) {
        self.remote_addr = Some(addr.into());
    }

    /// Returns `true` if the connection should be kept alive after this request.
    ///
    /// HTTP/1.1 defaults to keep-alive. HTTP/1.0 defaults to close unless
    /// `Connection: keep-alive` is explicitly set.
    pub fn is_keep_alive(&self) -> bool {
        match self.headers.get("connection") {
            Some(conn) => conn.eq_ignore_ascii_case("keep-alive"),
            None => self.version == 1, // HTTP/1.1 default: keep-alive
        }
    }

    /// Returns the value of the `Content-Length` header parsed as a `usize`, if present.
    pub fn content_length(&self) -> Option<usize> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Splits `scheme://authority/path?query` into the authority (userinfo
/// dropped) and the origin-form remainder. Any other target is returned as is.
fn split_absolute_form(target: &str) -> (Option<String>, Cow<'_, str>) {
    if target.starts_with('/') {
        return (None, Cow::Borrowed(target));
    }
    let Some((scheme, rest)) = target.split_once("://") else {
        return (None, Cow::Borrowed(target));
    };
    let valid_scheme = scheme.starts_with(|c: char| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return (None, Cow::Borrowed(target));
    }

    let end = rest.find(['/', '?']).unwrap_or(rest.len());
    let (authority, origin) = rest.split_at(end);
    let authority = authority
        .rsplit_once('@')
        .map_or(authority, |(_, host)| host)
        .to_owned();

    let origin = if origin.starts_with('/') {
        Cow::Borrowed(origin)
    } else {
        Cow::Owned(format!("/{origin}"))
    };
    (Some(authority), origin)
}

/// Parses a URL query string (`key=value&key2=value2`) into a `HashMap`.
///
/// Keys and values have `+` decoded as a space. Percent-decoding is left to
/// the handler.
fn parse_query_string(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter_map(|pair| {
            let mut parts = pair.splitn(2, '=');
            let key = parts.next()?.replace('+', " ");
            let value = parts.next().unwrap_or("").replace('+', " ");
            Some((key, value))
        })
        .collect()
}
