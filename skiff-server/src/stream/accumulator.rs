//! Assembling one assistant turn while its stream is relayed.
//!
//! The accumulator sits on the relay's hot path but never touches the
//! database there; it only grows a string.  The single durable write
//! happens in [`TurnAccumulator::commit`], which consumes the accumulator
//! by value, so a second commit for the same turn cannot be written at all.

use tracing::debug;

use crate::db::{ChatMessage, ChatStore, ROLE_ASSISTANT, STATUS_COMPLETE, STATUS_FAILED};
use crate::stream::StreamEvent;
use crate::stream::relay::RelayOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TurnState {
    Pending,
    Succeeded,
    Failed,
}

/// Buffer for one in-flight assistant reply.
///
/// Owned by exactly one relay invocation; nothing else observes it until
/// commit time.
#[derive(Debug)]
pub struct TurnAccumulator {
    session_id: String,
    buffer: String,
    state: TurnState,
}

impl TurnAccumulator {
    pub fn new(session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            buffer: String::new(),
            state: TurnState::Pending,
        }
    }

    /// Record one relayed event.  No I/O here.
    pub fn observe(&mut self, event: &StreamEvent) {
        match event {
            StreamEvent::Delta { text } => {
                if self.state == TurnState::Pending {
                    self.buffer.push_str(text);
                }
            }
            StreamEvent::Done => self.mark(TurnState::Succeeded),
            StreamEvent::Error { .. } => self.mark(TurnState::Failed),
            StreamEvent::Progress { .. } => {}
        }
    }

    /// Text accumulated so far.
    pub fn text(&self) -> &str {
        &self.buffer
    }

    fn mark(&mut self, state: TurnState) {
        // First terminal signal wins.
        if self.state == TurnState::Pending {
            self.state = state;
        }
    }

    /// Persist the turn, once, according to how the relay ended.
    ///
    /// Returns the status marker written, or `None` when there was nothing
    /// worth writing (no text ever arrived).  Consuming `self` is what
    /// makes the write exactly-once: after commit the accumulator is gone.
    pub async fn commit<S: ChatStore>(
        mut self,
        store: &S,
        outcome: &RelayOutcome,
    ) -> Result<Option<&'static str>, sqlx::Error> {
        // A relay that ended without a terminal event is a failure no
        // matter what the event sequence looked like.
        match outcome {
            RelayOutcome::Completed => self.mark(TurnState::Succeeded),
            RelayOutcome::Failed { .. } | RelayOutcome::Cancelled => {
                self.mark(TurnState::Failed)
            }
        }

        if self.buffer.trim().is_empty() {
            debug!(session_id = %self.session_id, "no assistant text to persist");
            return Ok(None);
        }

        let status = match self.state {
            TurnState::Succeeded => STATUS_COMPLETE,
            TurnState::Failed | TurnState::Pending => STATUS_FAILED,
        };
        let turn = ChatMessage::new(&self.session_id, ROLE_ASSISTANT, self.buffer, status);
        store.append_message(turn).await?;
        Ok(Some(status))
    }
}
