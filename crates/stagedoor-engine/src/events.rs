//! Run event system for observability.
//!
//! Emits [`RunEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers (progress printers, tests) can follow a run without
//! coupling to the engine internals.

use serde::{Deserialize, Serialize};
use stagedoor_types::{AttemptOutcome, ShowStatus};

/// Events emitted during a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunEvent {
    RunStarted {
        show_count: usize,
        dry_run: bool,
    },
    ShowStarted {
        show: String,
        url: String,
    },
    ShowSkipped {
        show: String,
        tripped_by: Option<String>,
    },
    EntriesDiscovered {
        show: String,
        open: usize,
        closed: usize,
    },
    EntryStarted {
        show: String,
        index: usize,
    },
    EntryFinished {
        show: String,
        index: usize,
        outcome: AttemptOutcome,
    },
    ChallengeDetected {
        show: String,
        entry_index: Option<usize>,
        signal: String,
    },
    BreakerTripped {
        show: String,
    },
    ShowFinished {
        show: String,
        status: ShowStatus,
        success_count: usize,
        failure_count: usize,
    },
    RunCompleted {
        shows: usize,
        submitted: usize,
        breaker_tripped: bool,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: RunEvent) {
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();

        emitter.emit(RunEvent::RunStarted {
            show_count: 3,
            dry_run: true,
        });

        match rx.recv().await.unwrap() {
            RunEvent::RunStarted {
                show_count,
                dry_run,
            } => {
                assert_eq!(show_count, 3);
                assert!(dry_run);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(RunEvent::BreakerTripped {
            show: "aladdin".into(),
        });

        let json1 = serde_json::to_string(&rx1.recv().await.unwrap()).unwrap();
        let json2 = serde_json::to_string(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(RunEvent::ShowSkipped {
            show: "wicked".into(),
            tripped_by: Some("aladdin".into()),
        });
    }

    #[test]
    fn entry_outcome_serializes_with_kind_tag() {
        let event = RunEvent::EntryFinished {
            show: "hamilton".into(),
            index: 1,
            outcome: AttemptOutcome::failure("timed out"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["EntryFinished"]["outcome"]["kind"], "failure");
        assert_eq!(json["EntryFinished"]["outcome"]["reason"], "timed out");
    }
}
