//! Access logging.

use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Local};
use tokio::time::Instant;

use super::{Middleware, Next};
use crate::{Request, Response, context::Context};

/// Receives one [`AccessRecord`] per completed request.
pub type AccessSink = Arc<dyn Fn(&AccessRecord) + Send + Sync + 'static>;

/// What [`AccessLog`] knows about a finished request.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    /// Peer address, possibly rewritten from `X-Real-IP` / `X-Forwarded-For`.
    pub remote_addr: Option<String>,
    pub method: String,
    /// Path plus query string, as requested.
    pub uri: String,
    pub protocol: &'static str,
    pub status: u16,
    /// Buffered body size. Streaming responses count as 0.
    pub bytes: usize,
    /// When the request entered the middleware.
    pub created: DateTime<FixedOffset>,
    pub elapsed: Duration,
}

impl AccessRecord {
    /// Formats the record as an Apache Common Log line:
    ///
    /// ```text
    /// 127.0.0.1 - - [10/Oct/2000:13:55:36 -0700] "GET /index.html HTTP/1.1" 200 2326
    /// ```
    ///
    /// The port is stripped from `ip:port` peers; anything that doesn't parse
    /// as a socket address (UNIX peers, forwarded lists) is logged verbatim.
    pub fn common_log_line(&self) -> String {
        let ip = match self.remote_addr.as_deref() {
            Some(addr) => addr
                .parse::<SocketAddr>()
                .map(|sa| sa.ip().to_string())
                .unwrap_or_else(|_| addr.to_owned()),
            None => "-".to_owned(),
        };

        format!(
            "{} - - [{}] \"{} {} {}\" {} {}",
            ip,
            self.created.format("%d/%b/%Y:%H:%M:%S %z"),
            self.method,
            self.uri,
            self.protocol,
            self.status,
            self.bytes,
        )
    }
}

/// Logs every request once its response is ready.
///
/// By default each record is emitted as a Common Log line through
/// `tracing::info!` with target `remux::access`; [`sink`](Self::sink) swaps
/// that for any callback.
///
/// With [`x_headers`](Self::x_headers) enabled the request's remote address is
/// replaced by `X-Real-IP`, or failing that `X-Forwarded-For` (which may be a
/// comma-separated list), before the rest of the stack sees it. Only enable
/// this behind a proxy you control.
#[derive(Clone, Default)]
pub struct AccessLog {
    x_headers: bool,
    sink: Option<AccessSink>,
}

impl AccessLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trust `X-Real-IP` / `X-Forwarded-For` for the remote address.
    #[must_use]
    pub fn x_headers(mut self, enabled: bool) -> Self {
        self.x_headers = enabled;
        self
    }

    /// Send records to `sink` instead of `tracing`.
    #[must_use]
    pub fn sink(mut self, sink: impl Fn(&AccessRecord) + Send + Sync + 'static) -> Self {
        self.sink = Some(Arc::new(sink));
        self
    }
}

fn forwarded_for(request: &Request) -> Option<String> {
    let headers = request.headers();
    headers
        .get("x-real-ip")
        .filter(|ip| !ip.is_empty())
        .or_else(|| headers.get("x-forwarded-for").filter(|ip| !ip.is_empty()))
        .map(str::to_owned)
}

impl Middleware for AccessLog {
    fn handle(&self, mut ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let created = Local::now().fixed_offset();
        let start = Instant::now();

        if self.x_headers {
            if let Some(ip) = forwarded_for(ctx.request()) {
                ctx.request_mut().set_remote_addr(ip);
            }
        }

        let request = ctx.request();
        let remote_addr = request.remote_addr().map(str::to_owned);
        let method = request.method().as_str().to_owned();
        let uri = request.request_uri().to_owned();
        let protocol = request.protocol();
        let sink = self.sink.clone();

        Box::pin(async move {
            let response = next.run(ctx).await;

            let record = AccessRecord {
                remote_addr,
                method,
                uri,
                protocol,
                status: response.status().as_u16(),
                bytes: response.content_len(),
                created,
                elapsed: start.elapsed(),
            };

            match sink {
                Some(sink) => sink(&record),
                None => tracing::info!(
                    target: "remux::access",
                    elapsed = ?record.elapsed,
                    "{}",
                    record.common_log_line()
                ),
            }

            response
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use chrono::TimeZone;

    use super::*;
    use crate::StatusCode;
    use crate::middleware::Stack;

    fn record(remote_addr: Option<&str>) -> AccessRecord {
        let utc = FixedOffset::east_opt(0).unwrap();
        AccessRecord {
            remote_addr: remote_addr.map(str::to_owned),
            method: "GET".into(),
            uri: "/index.html?x=1".into(),
            protocol: "HTTP/1.1",
            status: 200,
            bytes: 2326,
            created: utc.with_ymd_and_hms(2000, 10, 10, 13, 55, 36).unwrap(),
            elapsed: Duration::from_millis(3),
        }
    }

    fn capture_stack(log: AccessLog) -> (Stack, Arc<Mutex<Vec<AccessRecord>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let log = log.sink(move |r: &AccessRecord| sink_seen.lock().unwrap().push(r.clone()));
        let stack = Stack::new().layer(log).handler(|ctx: Context| async move {
            let who = ctx.request().remote_addr().unwrap_or("?").to_owned();
            Response::new(StatusCode::Ok).body(who)
        });
        (stack, seen)
    }

    fn request_from(raw: &str, peer: &str) -> Request {
        let (mut req, _) = Request::parse(raw.as_bytes()).unwrap();
        req.set_remote_addr(peer);
        req
    }

    #[test]
    fn common_log_line_strips_port() {
        let line = record(Some("127.0.0.1:51234")).common_log_line();
        assert_eq!(
            line,
            "127.0.0.1 - - [10/Oct/2000:13:55:36 +0000] \"GET /index.html?x=1 HTTP/1.1\" 200 2326"
        );
    }

    #[test]
    fn common_log_line_keeps_unparseable_addr() {
        let line = record(Some("10.0.0.1, 10.0.0.2")).common_log_line();
        assert!(line.starts_with("10.0.0.1, 10.0.0.2 - - ["));
        let line = record(Some("[::1]:80")).common_log_line();
        assert!(line.starts_with("::1 - - ["));
    }

    #[test]
    fn common_log_line_without_peer() {
        assert!(record(None).common_log_line().starts_with("- - - ["));
    }

    #[tokio::test]
    async fn records_status_and_bytes() {
        let (stack, seen) = capture_stack(AccessLog::new());
        let res = stack
            .serve(request_from("GET /a?b=c HTTP/1.0\r\n\r\n", "192.0.2.1:4000"))
            .await;
        assert_eq!(res.status(), StatusCode::Ok);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        let r = &seen[0];
        assert_eq!(r.method, "GET");
        assert_eq!(r.uri, "/a?b=c");
        assert_eq!(r.protocol, "HTTP/1.0");
        assert_eq!(r.status, 200);
        assert_eq!(r.bytes, "192.0.2.1:4000".len());
        assert_eq!(r.remote_addr.as_deref(), Some("192.0.2.1:4000"));
    }

    #[tokio::test]
    async fn x_headers_ignored_by_default() {
        let (stack, seen) = capture_stack(AccessLog::new());
        let raw = "GET / HTTP/1.1\r\nX-Real-IP: 203.0.113.9\r\n\r\n";
        let res = stack.serve(request_from(raw, "10.0.0.1:1")).await;
        assert_eq!(res.content(), b"10.0.0.1:1");
        assert_eq!(seen.lock().unwrap()[0].remote_addr.as_deref(), Some("10.0.0.1:1"));
    }

    #[tokio::test]
    async fn x_real_ip_preferred_over_forwarded_for() {
        let (stack, seen) = capture_stack(AccessLog::new().x_headers(true));
        let raw = "GET / HTTP/1.1\r\nX-Forwarded-For: 198.51.100.1\r\nX-Real-IP: 203.0.113.9\r\n\r\n";
        let res = stack.serve(request_from(raw, "10.0.0.1:1")).await;
        assert_eq!(res.content(), b"203.0.113.9");
        assert_eq!(seen.lock().unwrap()[0].remote_addr.as_deref(), Some("203.0.113.9"));
    }

    #[tokio::test]
    async fn forwarded_for_used_when_no_real_ip() {
        let (stack, _seen) = capture_stack(AccessLog::new().x_headers(true));
        let raw = "GET / HTTP/1.1\r\nX-Forwarded-For: 198.51.100.1, 10.0.0.2\r\n\r\n";
        let res = stack.serve(request_from(raw, "10.0.0.1:1")).await;
        assert_eq!(res.content(), b"198.51.100.1, 10.0.0.2");
    }

    #[tokio::test]
    async fn streaming_response_logs_zero_bytes() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let stack = Stack::new()
            .layer(AccessLog::new().sink(move |r: &AccessRecord| {
                sink_seen.lock().unwrap().push(r.bytes)
            }))
            .handler(|_ctx| async {
                let (_tx, rx) = tokio::sync::mpsc::channel(1);
                Response::new(StatusCode::Ok).stream(rx)
            });
        stack.serve(request_from("GET / HTTP/1.1\r\n\r\n", "x")).await;
        assert_eq!(*seen.lock().unwrap(), vec![0]);
    }
}
