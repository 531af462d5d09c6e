//! Server-Sent Events (`text/event-stream`).
//!
//! [`event_stream`] returns a streaming [`Response`] for the handler to return
//! and an [`EventSender`] to push [`MessageEvent`]s through, usually from a
//! spawned task:
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use remux::realtime::{MessageEvent, event_stream};
//! use remux::{Response, context::Context};
//!
//! async fn clock(_ctx: Context) -> Response {
//!     let (events, response) = event_stream(16);
//!     tokio::spawn(async move {
//!         for i in 0..10 {
//!             let event = MessageEvent::new(format!("tick {i}"));
//!             if events.send(&event).await.is_err() {
//!                 break; // client went away
//!             }
//!             tokio::time::sleep(Duration::from_secs(1)).await;
//!         }
//!     });
//!     response
//! }
//! ```

use std::fmt::Write;

use bytes::Bytes;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::{Response, StatusCode};

#[derive(Debug, Error)]
pub enum SseError {
    #[error("event stream closed by peer")]
    Closed,
}

/// One server-sent event. Empty fields are not sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageEvent {
    /// Message content. Each line becomes its own `data:` field.
    pub data: String,
    pub id: String,
    /// Event name; browsers dispatch it to `addEventListener(name, ...)`.
    pub event: String,
    /// Client reconnection time in milliseconds. Sent when ≥ 1.
    pub retry: u64,
}

impl MessageEvent {
    /// An unnamed event carrying `data`.
    pub fn new(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn event(mut self, event: impl Into<String>) -> Self {
        self.event = event.into();
        self
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    #[must_use]
    pub fn retry(mut self, millis: u64) -> Self {
        self.retry = millis;
        self
    }

    /// Wire form: `data`, `event`, `id`, `retry` lines, then a blank line.
    ///
    /// ```
    /// use remux::realtime::MessageEvent;
    ///
    /// let ev = MessageEvent::new("hi").event("greeting").id("1");
    /// assert_eq!(ev.encode(), "data: hi\nevent: greeting\nid: 1\n\n");
    /// ```
    pub fn encode(&self) -> String {
        let mut out = String::with_capacity(self.data.len() + 32);

        if !self.data.is_empty() {
            for line in self.data.split('\n') {
                let line = line.strip_suffix('\r').unwrap_or(line);
                let _ = writeln!(out, "data: {line}");
            }
        }
        if !self.event.is_empty() {
            let _ = writeln!(out, "event: {}", self.event);
        }
        if !self.id.is_empty() {
            let _ = writeln!(out, "id: {}", self.id);
        }
        if self.retry >= 1 {
            let _ = writeln!(out, "retry: {}", self.retry);
        }
        out.push('\n');
        out
    }
}

/// Pushes events onto a [`event_stream`] response.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Bytes>,
}

impl EventSender {
    /// Queue `event` for the client, waiting if `capacity` events are
    /// already buffered.
    ///
    /// # Errors
    ///
    /// [`SseError::Closed`] once the connection is gone.
    pub async fn send(&self, event: &MessageEvent) -> Result<(), SseError> {
        self.tx
            .send(Bytes::from(event.encode()))
            .await
            .map_err(|_| SseError::Closed)
    }

    /// `true` once the client side has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A `200 OK` event-stream response plus the sender that feeds it.
///
/// `capacity` bounds how many encoded events may queue up before
/// [`EventSender::send`] waits. The stream ends when every `EventSender`
/// clone is dropped.
pub fn event_stream(capacity: usize) -> (EventSender, Response) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let response = Response::new(StatusCode::Ok)
        .header("Cache-Control", "no-cache")
        .header("Connection", "keep-alive")
        .header("Content-Type", "text/event-stream")
        .stream(rx);
    (EventSender { tx }, response)
}
