//! Demo server for the regular-expression router.
//!
//! ```text
//! cargo run --example regexp -- --config remux.toml
//! curl localhost:8080/foo
//! curl localhost:8080/users/42/posts/7
//! curl -N localhost:8080/clock
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use remux::middleware::{AccessLog, Gzip, Stack};
use remux::realtime::{MessageEvent, event_stream};
use remux::{Context, PatternRouter, Response, Server, ServerConfig, StatusCode, urlparams};
use serde::Deserialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "regexp")]
#[command(about = "Regular-expression router demo", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the listen address (host:port or UNIX socket path)
    #[arg(short, long)]
    listen: Option<String>,
}

#[derive(Deserialize)]
struct Greeting {
    name: String,
}

fn routes(router: &PatternRouter) {
    // Supports GET /, /foo and /bar
    router.handle("^/(foo|bar)?$", |ctx: Context| async move {
        let vars: Vec<_> = ctx.vars().iter().map(|v| v.unwrap_or("")).collect();
        Response::new(StatusCode::Ok).body(format!("Hello, world {vars:?}\n"))
    });

    router.handle(
        r"^/users/(?P<user>\d+)/posts/(?P<post>\d+)$",
        |ctx: Context| async move {
            let vars = ctx.vars();
            Response::new(StatusCode::Ok).body(format!(
                "user {} post {}\n",
                vars.name("user").unwrap_or_default(),
                vars.name("post").unwrap_or_default()
            ))
        },
    );

    router.handle("^/archive/", |ctx: Context| async move {
        let params = urlparams::parse("/archive/:year/:month", ctx.request().path());
        let mut pairs: Vec<_> = params.into_iter().collect();
        pairs.sort();
        Response::new(StatusCode::Ok).body(format!("{pairs:?}\n"))
    });

    router.handle("^/greet$", |ctx: Context| async move {
        match ctx.json::<Greeting>() {
            Ok(greeting) => {
                let reply = serde_json::json!({ "greeting": format!("Hello, {}", greeting.name) });
                match serde_json::to_vec(&reply) {
                    Ok(bytes) => Response::new(StatusCode::Ok)
                        .header("Content-Type", "application/json")
                        .body_bytes(bytes),
                    Err(e) => Response::error(StatusCode::InternalServerError, e.to_string()),
                }
            }
            Err(e) => Response::error(StatusCode::BadRequest, format!("invalid body: {e}")),
        }
    });

    router.handle("^/clock$", |_ctx: Context| async {
        let (events, response) = event_stream(16);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(1));
            for id in 0u64.. {
                ticker.tick().await;
                let now = chrono::Local::now().to_rfc3339();
                let event = MessageEvent::new(now).event("tick").id(id.to_string());
                if events.send(&event).await.is_err() {
                    tracing::debug!("clock subscriber went away");
                    break;
                }
            }
        });
        response
    });
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ServerConfig::load(path)?,
        None => ServerConfig::default(),
    };
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.log_filter.as_str().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let router = Arc::new(PatternRouter::new());
    routes(&router);
    tracing::info!(patterns = ?router.patterns(), "routes registered");

    let mut stack = Stack::new().layer(AccessLog::new().x_headers(config.x_headers));
    if config.gzip {
        stack = stack.layer(Gzip::new());
    }
    let stack = Arc::new(stack.endpoint(router.endpoint()));

    let server = Server::bind(&config.listen).await?;
    server
        .run(move |req| {
            let stack = Arc::clone(&stack);
            async move { stack.serve(req).await }
        })
        .await?;
    Ok(())
}
