//! NDJSON streaming core.
//!
//! The daemon's streaming endpoints speak newline-delimited JSON; so does
//! our downstream edge.  This module owns the path between the two:
//!
//! * [`ndjson`]: chunk-boundary-safe incremental frame decoding,
//! * [`relay`]: the upstream read loop, one event in flight at a time,
//! * [`accumulator`]: assembling an assistant turn for a single durable
//!   write once the stream ends.
//!
//! Nothing in here knows about HTTP framing.  The relay writes into an
//! [`EventSink`]; the HTTP layer wraps the receiving half into a response
//! body (see [`crate::routes`]).

pub mod accumulator;
pub mod ndjson;
pub mod relay;

use serde_json::json;
use tokio::sync::mpsc;

/// One decoded upstream frame, normalized across endpoints.
///
/// `Done` and `Error` are terminal: the stream that produced one of them
/// never yields another event.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Download progress.  Counters are cumulative bytes for the current
    /// layer and may be absent on bookkeeping lines.
    Progress {
        status: String,
        completed: Option<u64>,
        total: Option<u64>,
    },
    /// One chat token fragment.  No word-boundary guarantees.
    Delta { text: String },
    /// Normal end of stream.
    Done,
    /// Upstream-reported failure, or a synthesized one.
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Done | StreamEvent::Error { .. })
    }

    /// Integer progress percentage when both counters are usable.
    ///
    /// `None` when the total is missing or zero; callers must not invent a
    /// number for an indeterminate bar.  Clamped to 100: the daemon has
    /// been seen reporting `completed` slightly past `total`.
    pub fn percent(&self) -> Option<u64> {
        match self {
            StreamEvent::Progress {
                completed: Some(completed),
                total: Some(total),
                ..
            } if *total > 0 => Some((completed.saturating_mul(100) / total).min(100)),
            _ => None,
        }
    }

    /// Encode as one downstream NDJSON line, trailing newline included.
    pub fn to_ndjson_line(&self) -> String {
        let value = match self {
            StreamEvent::Progress {
                status,
                completed,
                total,
            } => {
                let mut value = json!({ "status": status });
                if let Some(completed) = completed {
                    value["completed"] = json!(completed);
                }
                if let Some(total) = total {
                    value["total"] = json!(total);
                }
                if let Some(percent) = self.percent() {
                    value["percent"] = json!(percent);
                }
                value
            }
            StreamEvent::Delta { text } => json!({ "delta": text, "done": false }),
            StreamEvent::Done => json!({ "done": true }),
            StreamEvent::Error { message } => json!({ "error": message, "done": true }),
        };
        let mut line = value.to_string();
        line.push('\n');
        line
    }
}

/// The receiving half of the relay-to-response handoff.
pub type EventReceiver = mpsc::Receiver<StreamEvent>;

/// Returned by [`EventSink::accept`] when the response body was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SinkClosed;

/// Sending half of the relay-to-response handoff.
///
/// Capacity is a single event: the relay cannot read ahead of the browser
/// by more than one undelivered frame, which bounds memory no matter how
/// fast the daemon produces or how slowly the client drains.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSink {
    /// Deliver one event downstream, waiting for the slot to free up.
    pub async fn accept(&self, event: StreamEvent) -> Result<(), SinkClosed> {
        self.tx.send(event).await.map_err(|_| SinkClosed)
    }

    /// Resolves once the receiving half is gone.
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Create the relay-to-response channel pair.
pub fn event_channel() -> (EventSink, EventReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (EventSink { tx }, rx)
}
