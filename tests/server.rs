//! End-to-end tests over real TCP and UNIX sockets.

use std::io::Read;
use std::sync::{Arc, Mutex};

use flate2::read::GzDecoder;
use remux::middleware::{AccessLog, AccessRecord, Gzip, Stack};
use remux::{Context, ListenAddr, PatternRouter, Response, Server, StatusCode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

struct TestServer {
    addr: std::net::SocketAddr,
    records: Arc<Mutex<Vec<String>>>,
}

async fn start() -> TestServer {
    let router = Arc::new(PatternRouter::new());
    router.handle("^/(foo|bar)?$", |ctx: Context| async move {
        let which = ctx.vars().get(0).unwrap_or("root").to_owned();
        Response::new(StatusCode::Ok).body(format!("hello {which}"))
    });
    router.handle(r"^/users/(?P<id>\d+)$", |ctx: Context| async move {
        let id = ctx.vars().name("id").unwrap_or_default().to_owned();
        Response::new(StatusCode::Ok).body(format!("user {id}"))
    });
    router.handle("^/big$", |_ctx: Context| async {
        Response::new(StatusCode::Ok).body("remux ".repeat(200))
    });

    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let stack = Arc::new(
        Stack::new()
            .layer(AccessLog::new().sink(move |rec: &AccessRecord| {
                sink.lock().unwrap().push(rec.common_log_line());
            }))
            .layer(Gzip::new())
            .endpoint(router.endpoint()),
    );

    let server = Server::bind("127.0.0.1:0").await.unwrap();
    let addr = match server.local_addr() {
        ListenAddr::Tcp(addr) => *addr,
        other => panic!("unexpected listen address {other}"),
    };
    tokio::spawn(server.run(move |req| {
        let stack = Arc::clone(&stack);
        async move { stack.serve(req).await }
    }));

    TestServer { addr, records }
}

async fn roundtrip(addr: std::net::SocketAddr, raw: &str) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(raw.as_bytes()).await.unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();
    out
}

fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let pos = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a header terminator");
    (
        String::from_utf8(raw[..pos].to_vec()).unwrap(),
        raw[pos + 4..].to_vec(),
    )
}

#[tokio::test]
async fn routes_with_positional_and_named_captures() {
    let srv = start().await;

    let out = roundtrip(srv.addr, "GET /foo HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n").await;
    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, b"hello foo");

    let out = roundtrip(srv.addr, "GET / HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(split_response(&out).1, b"hello root");

    let out = roundtrip(srv.addr, "GET /users/42 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    assert_eq!(split_response(&out).1, b"user 42");
}

#[tokio::test]
async fn unclean_path_is_redirected_with_query() {
    let srv = start().await;
    let out = roundtrip(srv.addr, "GET /a/../foo?x=1 HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let (head, _) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 301 Moved Permanently"));
    assert!(head.contains("Location: /foo?x=1"));
}

#[tokio::test]
async fn unmatched_path_is_404() {
    let srv = start().await;
    let out = roundtrip(srv.addr, "GET /nope HTTP/1.1\r\nConnection: close\r\n\r\n").await;
    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 404 Not Found"));
    assert_eq!(body, b"404 page not found\n");
}

#[tokio::test]
async fn gzip_when_accepted() {
    let srv = start().await;
    let out = roundtrip(
        srv.addr,
        "GET /big HTTP/1.1\r\nAccept-Encoding: gzip, deflate\r\nConnection: close\r\n\r\n",
    )
    .await;
    let (head, body) = split_response(&out);
    assert!(head.contains("Content-Encoding: gzip"));

    let mut decoded = String::new();
    GzDecoder::new(&body[..]).read_to_string(&mut decoded).unwrap();
    assert_eq!(decoded, "remux ".repeat(200));
}

#[tokio::test]
async fn keep_alive_serves_two_requests() {
    let srv = start().await;
    let raw = "GET /bar HTTP/1.1\r\n\r\nGET /users/7 HTTP/1.1\r\nConnection: close\r\n\r\n";
    let out = String::from_utf8(roundtrip(srv.addr, raw).await).unwrap();
    assert_eq!(out.matches("HTTP/1.1 200 OK").count(), 2);
    assert!(out.contains("hello bar"));
    assert!(out.ends_with("user 7"));
}

#[tokio::test]
async fn access_log_records_each_request() {
    let srv = start().await;
    roundtrip(srv.addr, "GET /users/9?v=1 HTTP/1.1\r\nConnection: close\r\n\r\n").await;

    let records = srv.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    let line = &records[0];
    assert!(line.starts_with("127.0.0.1 - - ["));
    assert!(line.ends_with("\"GET /users/9?v=1 HTTP/1.1\" 200 6"));
}

#[cfg(unix)]
#[tokio::test]
async fn serves_over_unix_socket() {
    use tokio::net::UnixStream;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("remux.sock");

    let router = Arc::new(PatternRouter::new());
    router.handle("^/(foo|bar)?$", |ctx: Context| async move {
        let which = ctx.vars().get(0).unwrap_or("root").to_owned();
        Response::new(StatusCode::Ok).body(format!("hello {which}"))
    });

    let records = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&records);
    let stack = Arc::new(
        Stack::new()
            .layer(AccessLog::new().sink(move |rec: &AccessRecord| {
                sink.lock().unwrap().push(rec.clone());
            }))
            .endpoint(router.endpoint()),
    );

    let server = Server::bind(path.to_str().unwrap()).await.unwrap();
    assert_eq!(server.local_addr(), &ListenAddr::Unix(path.clone()));
    tokio::spawn(server.run(move |req| {
        let stack = Arc::clone(&stack);
        async move { stack.serve(req).await }
    }));

    let mut stream = UnixStream::connect(&path).await.unwrap();
    stream
        .write_all(b"GET /bar HTTP/1.1\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut out = Vec::new();
    stream.read_to_end(&mut out).await.unwrap();

    let (head, body) = split_response(&out);
    assert!(head.starts_with("HTTP/1.1 200 OK"));
    assert_eq!(body, b"hello bar");

    let records = records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].remote_addr.as_deref(), Some("@"));
    assert!(records[0].common_log_line().starts_with("@ - - ["));
}
