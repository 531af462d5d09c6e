//! On-the-fly gzip response encoding.

use std::io::Write;
use std::pin::Pin;

use flate2::{Compression, write::GzEncoder};
use tracing::warn;

use super::{Middleware, Next};
use crate::{Response, context::Context};

/// Gzips buffered response bodies for clients that send
/// `Accept-Encoding: gzip`.
///
/// Responses that are streamed, empty, or already carry a `Content-Encoding`
/// pass through untouched.
#[derive(Debug, Clone)]
pub struct Gzip {
    level: Compression,
}

impl Default for Gzip {
    fn default() -> Self {
        Self::new()
    }
}

impl Gzip {
    /// Gzip at the default compression level (6).
    pub fn new() -> Self {
        Self {
            level: Compression::default(),
        }
    }

    /// Set the compression level, 0 (none) to 9 (best).
    #[must_use]
    pub fn level(mut self, level: u32) -> Self {
        self.level = Compression::new(level.min(9));
        self
    }
}

fn accepts_gzip(ctx: &Context) -> bool {
    ctx.request()
        .headers()
        .get_all("accept-encoding")
        .any(|value| value.contains("gzip"))
}

fn encode(plain: &[u8], level: Compression) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::with_capacity(plain.len() / 2), level);
    encoder.write_all(plain)?;
    encoder.finish()
}

impl Middleware for Gzip {
    fn handle(&self, ctx: Context, next: Next) -> Pin<Box<dyn Future<Output = Response> + Send>> {
        let accepts = accepts_gzip(&ctx);
        let level = self.level;

        Box::pin(async move {
            let mut response = next.run(ctx).await;

            if !accepts
                || response.content_len() == 0
                || response.headers().contains("content-encoding")
            {
                return response;
            }

            let Some(plain) = response.take_content() else {
                return response;
            };

            match encode(&plain, level) {
                Ok(encoded) => {
                    response.set_content(encoded);
                    response.headers_mut().set("Content-Encoding", "gzip");
                    response.add_header("Vary", "Accept-Encoding");
                }
                Err(e) => {
                    warn!(error = %e, "gzip encoding failed — sending identity body");
                    response.set_content(plain);
                }
            }

            response
        })
    }
}
