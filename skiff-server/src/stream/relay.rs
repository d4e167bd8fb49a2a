//! The streaming relay: one upstream NDJSON response pumped into an
//! [`EventSink`], in lockstep.
//!
//! The loop forwards non-terminal events only.  When it sees a terminal
//! frame (or synthesizes one from a failure) it stops reading and returns
//! the fact as a [`RelayOutcome`]; the caller persists whatever it needs to
//! and then writes the single terminal line itself.  That ordering is what
//! lets "persist the turn" happen strictly before "tell the browser we are
//! done".

use bytes::Bytes;
use futures::{Stream, StreamExt};
use serde::Deserialize;
use tokio::select;
use tracing::{debug, trace};

use crate::ollama::{OllamaError, check_status};
use crate::stream::accumulator::TurnAccumulator;
use crate::stream::ndjson::NdjsonDecoder;
use crate::stream::{EventSink, StreamEvent};

/// How a relay invocation ended.  Exactly one of these per invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum RelayOutcome {
    /// Upstream reported normal completion.
    Completed,
    /// Upstream failed, a frame was malformed, or the stream was cut off
    /// before a terminal frame.
    Failed { reason: String },
    /// The downstream client went away; the upstream read was abandoned.
    Cancelled,
}

/// Which upstream wire shape is being decoded.
///
/// The daemon's endpoints share the NDJSON framing but not the per-line
/// schema, so each endpoint gets its own small mapping into
/// [`StreamEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endpoint {
    /// `/api/pull`: `status` / `completed` / `total` lines, `"success"`
    /// as the happy terminal status.
    Pull,
    /// `/api/chat`: `message.content` fragments plus a `done` flag.
    Chat,
}

#[derive(Debug, Deserialize)]
struct PullLine {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    completed: Option<u64>,
    #[serde(default)]
    total: Option<u64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLine {
    #[serde(default)]
    message: Option<ChatLineMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatLineMessage {
    #[serde(default)]
    content: String,
}

impl Endpoint {
    /// Map one decoded record to zero, one, or two events.
    ///
    /// Two happens when a chat line carries both a final fragment and the
    /// `done` flag.  `Err` means the line was valid JSON but not this
    /// endpoint's shape; the relay treats that exactly like a malformed
    /// frame rather than guessing.
    fn map(self, record: serde_json::Value) -> Result<Vec<StreamEvent>, String> {
        match self {
            Endpoint::Pull => {
                let line: PullLine = serde_json::from_value(record)
                    .map_err(|e| format!("unexpected pull frame: {e}"))?;
                if let Some(message) = line.error {
                    return Ok(vec![StreamEvent::Error { message }]);
                }
                let status = line.status.unwrap_or_default();
                if status == "success" {
                    return Ok(vec![StreamEvent::Done]);
                }
                Ok(vec![StreamEvent::Progress {
                    status,
                    completed: line.completed,
                    total: line.total,
                }])
            }
            Endpoint::Chat => {
                let line: ChatLine = serde_json::from_value(record)
                    .map_err(|e| format!("unexpected chat frame: {e}"))?;
                if let Some(message) = line.error {
                    return Ok(vec![StreamEvent::Error { message }]);
                }
                let mut events = Vec::new();
                if let Some(message) = line.message {
                    if !message.content.is_empty() {
                        events.push(StreamEvent::Delta {
                            text: message.content,
                        });
                    }
                }
                if line.done {
                    events.push(StreamEvent::Done);
                }
                Ok(events)
            }
        }
    }
}

/// Send `request` and relay its streaming response until a terminal
/// condition.
///
/// Every event is shown to `acc` (when given) before anything else; every
/// non-terminal event is then delivered through `sink` before the next
/// upstream chunk is requested, so the relay never runs ahead of the
/// client by more than the sink's capacity.  Terminal frames are *not*
/// delivered; they come back as the outcome.
pub async fn run(
    request: reqwest::RequestBuilder,
    endpoint: Endpoint,
    sink: &EventSink,
    acc: Option<&mut TurnAccumulator>,
) -> RelayOutcome {
    let response = match request.send().await {
        Ok(response) => response,
        Err(e) => {
            return RelayOutcome::Failed {
                reason: OllamaError::from_send(e).to_string(),
            };
        }
    };
    let response = match check_status(response).await {
        Ok(response) => response,
        Err(e) => {
            return RelayOutcome::Failed {
                reason: e.to_string(),
            };
        }
    };
    debug!(?endpoint, "upstream stream opened");
    drive(response.bytes_stream(), endpoint, sink, acc).await
}

/// The relay loop proper, split from [`run`] so it can be fed synthetic
/// byte streams.
async fn drive<S, E>(
    mut body: S,
    endpoint: Endpoint,
    sink: &EventSink,
    mut acc: Option<&mut TurnAccumulator>,
) -> RelayOutcome
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut decoder = NdjsonDecoder::new();

    loop {
        let chunk = select! {
            _ = sink.closed() => {
                debug!(?endpoint, "client went away; dropping upstream stream");
                return RelayOutcome::Cancelled;
            }
            chunk = body.next() => chunk,
        };

        let Some(chunk) = chunk else {
            break;
        };
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                return RelayOutcome::Failed {
                    reason: format!("upstream read failed: {e}"),
                };
            }
        };

        decoder.feed(&chunk);
        loop {
            match decoder.next_record() {
                Ok(Some(record)) => match deliver(endpoint, record, sink, &mut acc).await {
                    Step::Continue => {}
                    Step::Stop(outcome) => return outcome,
                },
                Ok(None) => break,
                Err(e) => {
                    return RelayOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
            }
        }
    }

    // Upstream EOF.  A last record without a trailing newline still counts.
    match decoder.finish() {
        Ok(Some(record)) => {
            if let Step::Stop(outcome) = deliver(endpoint, record, sink, &mut acc).await {
                return outcome;
            }
        }
        Ok(None) => {}
        Err(e) => {
            return RelayOutcome::Failed {
                reason: e.to_string(),
            };
        }
    }

    // EOF with no terminal frame is a truncated stream, not a success.
    RelayOutcome::Failed {
        reason: "stream ended before a terminal event".into(),
    }
}

enum Step {
    Continue,
    Stop(RelayOutcome),
}

async fn deliver(
    endpoint: Endpoint,
    record: serde_json::Value,
    sink: &EventSink,
    acc: &mut Option<&mut TurnAccumulator>,
) -> Step {
    let events = match endpoint.map(record) {
        Ok(events) => events,
        Err(reason) => return Step::Stop(RelayOutcome::Failed { reason }),
    };
    for event in events {
        trace!(?event, "relaying event");
        if let Some(acc) = acc.as_deref_mut() {
            acc.observe(&event);
        }
        match event {
            StreamEvent::Done => return Step::Stop(RelayOutcome::Completed),
            StreamEvent::Error { message } => {
                return Step::Stop(RelayOutcome::Failed { reason: message });
            }
            event => {
                if sink.accept(event).await.is_err() {
                    return Step::Stop(RelayOutcome::Cancelled);
                }
            }
        }
    }
    Step::Continue
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::time::Duration;

    use futures::stream;

    use crate::stream::event_channel;

    use super::*;

    /// Feed `chunks` through the relay loop with a live collector on the
    /// other side of the sink, returning the outcome and delivered events.
    async fn run_drive(
        chunks: Vec<&'static [u8]>,
        endpoint: Endpoint,
        mut acc: Option<&mut TurnAccumulator>,
    ) -> (RelayOutcome, Vec<StreamEvent>) {
        let (sink, mut rx) = event_channel();
        let body = stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok::<_, Infallible>(Bytes::from_static(chunk))),
        );
        let relay = async move { drive(body, endpoint, &sink, acc.as_deref_mut()).await };
        let collect = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        tokio::join!(relay, collect)
    }

    #[tokio::test]
    async fn chat_deltas_are_forwarded_and_terminal_is_withheld() {
        let (outcome, events) = run_drive(
            vec![
                b"{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
                b"{\"message\":{\"content\":\" there\"},\"done\":false}\n",
                b"{\"message\":{\"content\":\"\"},\"done\":true}\n",
            ],
            Endpoint::Chat,
            None,
        )
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta { text: "Hi".into() },
                StreamEvent::Delta {
                    text: " there".into()
                },
            ]
        );
    }

    #[tokio::test]
    async fn events_are_independent_of_chunk_boundaries() {
        let full: &[u8] = b"{\"message\":{\"content\":\"Hi\"},\"done\":false}\n{\"message\":{\"content\":\" there\"},\"done\":false}\n{\"done\":true}\n";
        let (expected_outcome, expected_events) =
            run_drive(vec![full], Endpoint::Chat, None).await;
        assert_eq!(expected_outcome, RelayOutcome::Completed);

        for split in 1..full.len() {
            let (outcome, events) = run_drive(
                vec![&full[..split], &full[split..]],
                Endpoint::Chat,
                None,
            )
            .await;
            assert_eq!(outcome, expected_outcome, "split at byte {split}");
            assert_eq!(events, expected_events, "split at byte {split}");
        }
    }

    #[tokio::test]
    async fn accumulator_sees_the_full_reply() {
        let mut acc = TurnAccumulator::new("s1");
        let (outcome, _) = run_drive(
            vec![
                b"{\"message\":{\"content\":\"Hi\"},\"done\":false}\n",
                b"{\"message\":{\"content\":\" there\"},\"done\":true}\n",
            ],
            Endpoint::Chat,
            Some(&mut acc),
        )
        .await;
        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(acc.text(), "Hi there");
    }

    #[tokio::test]
    async fn truncated_stream_fails_with_partial_accumulated() {
        let mut acc = TurnAccumulator::new("s1");
        let (outcome, events) = run_drive(
            vec![b"{\"message\":{\"content\":\"Hel\"},\"done\":false}\n"],
            Endpoint::Chat,
            Some(&mut acc),
        )
        .await;
        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                reason: "stream ended before a terminal event".into()
            }
        );
        assert_eq!(events.len(), 1);
        assert_eq!(acc.text(), "Hel");
    }

    #[tokio::test]
    async fn malformed_line_fails_fast() {
        let (outcome, events) = run_drive(
            vec![
                b"{\"message\":{\"content\":\"ok\"},\"done\":false}\n",
                b"garbage\n",
                b"{\"done\":true}\n",
            ],
            Endpoint::Chat,
            None,
        )
        .await;
        match outcome {
            RelayOutcome::Failed { reason } => {
                assert!(reason.contains("malformed stream line"), "{reason}");
                assert!(reason.contains("garbage"), "{reason}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
        // The well-formed prefix was still delivered.
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn upstream_error_line_becomes_the_failure_reason() {
        let (outcome, events) = run_drive(
            vec![b"{\"error\":\"model quota exceeded\"}\n"],
            Endpoint::Chat,
            None,
        )
        .await;
        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                reason: "model quota exceeded".into()
            }
        );
        assert!(events.is_empty());
    }

    #[tokio::test]
    async fn upstream_read_error_fails() {
        let (sink, mut rx) = event_channel();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(
                b"{\"message\":{\"content\":\"a\"},\"done\":false}\n",
            )),
            Err("connection reset".to_string()),
        ]);
        let relay = async move { drive(body, Endpoint::Chat, &sink, None).await };
        let collect = async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };
        let (outcome, events) = tokio::join!(relay, collect);
        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                reason: "upstream read failed: connection reset".into()
            }
        );
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_between_events() {
        let (sink, mut rx) = event_channel();
        // Two deltas, then an upstream that stays open forever, so the only
        // way out for the relay is noticing the receiver is gone.
        let body = stream::iter(vec![Ok::<_, Infallible>(Bytes::from_static(
            b"{\"message\":{\"content\":\"one\"},\"done\":false}\n{\"message\":{\"content\":\"two\"},\"done\":false}\n",
        ))])
        .chain(stream::pending());
        let relay = tokio::spawn(async move { drive(body, Endpoint::Chat, &sink, None).await });

        // Take the first event, then walk away.
        let first = rx.recv().await;
        assert!(first.is_some());
        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .expect("relay should notice the drop quickly")
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled);
    }

    #[tokio::test]
    async fn dropped_receiver_cancels_while_awaiting_upstream() {
        let (sink, rx) = event_channel();
        // A body that never produces anything.
        let body = stream::pending::<Result<Bytes, Infallible>>();
        let relay = tokio::spawn(async move {
            drive(body, Endpoint::Chat, &sink, None).await
        });

        drop(rx);

        let outcome = tokio::time::timeout(Duration::from_secs(1), relay)
            .await
            .expect("relay should notice the drop while blocked upstream")
            .unwrap();
        assert_eq!(outcome, RelayOutcome::Cancelled);
    }

    #[tokio::test]
    async fn pull_lines_map_to_progress_with_percent() {
        let (outcome, events) = run_drive(
            vec![
                b"{\"status\":\"pulling manifest\"}\n",
                b"{\"status\":\"downloading\",\"completed\":50,\"total\":100}\n",
                b"{\"status\":\"success\"}\n",
            ],
            Endpoint::Pull,
            None,
        )
        .await;

        assert_eq!(outcome, RelayOutcome::Completed);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].percent(), None);
        assert_eq!(events[1].percent(), Some(50));
    }

    #[tokio::test]
    async fn pull_error_line_fails() {
        let (outcome, _) = run_drive(
            vec![b"{\"error\":\"pull model manifest: file does not exist\"}\n"],
            Endpoint::Pull,
            None,
        )
        .await;
        assert_eq!(
            outcome,
            RelayOutcome::Failed {
                reason: "pull model manifest: file does not exist".into()
            }
        );
    }

    #[test]
    fn chat_line_with_content_and_done_yields_both() {
        let record: serde_json::Value =
            serde_json::from_str("{\"message\":{\"content\":\"tail\"},\"done\":true}").unwrap();
        let events = Endpoint::Chat.map(record).unwrap();
        assert_eq!(
            events,
            vec![
                StreamEvent::Delta {
                    text: "tail".into()
                },
                StreamEvent::Done,
            ]
        );
    }

    #[test]
    fn non_object_line_is_a_shape_error() {
        let record: serde_json::Value = serde_json::from_str("42").unwrap();
        assert!(Endpoint::Chat.map(record.clone()).is_err());
        assert!(Endpoint::Pull.map(record).is_err());
    }
}
