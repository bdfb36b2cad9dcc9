//! Lottery entry engine: challenge detection, pacing, retry, the entry state
//! machine, the show processor, and the batch orchestrator with its circuit
//! breaker.
//!
//! The engine talks to pages only through the [`Browser`] and
//! [`BrowsingContext`] traits; a concrete adapter lives in its own crate.

pub mod breaker;
pub mod browser;
pub mod config;
pub mod detector;
pub mod diagnostics;
pub mod engine;
pub mod entry;
pub mod events;
pub mod orchestrator;
pub mod pacing;
pub mod retry;
pub mod show;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use breaker::{CircuitBreaker, CircuitBreakerState};
pub use browser::{
    first_control, wait_for_controls, Browser, BrowsingContext, Control, ControlKind, FormField,
};
pub use config::{DetectorConfig, EngineConfig, PacingConfig, Timeouts};
pub use detector::{ChallengeDetector, ChallengeSignal, Classification, PageSnapshot};
pub use diagnostics::{
    capture, DiagnosticRecord, DiagnosticsSink, DirectorySink, NullSink, TracingSink,
};
pub use engine::{Engine, EngineBuilder};
pub use entry::{EntryMachine, EntryRun, EntryState, FailureReason};
pub use events::{EventEmitter, RunEvent};
pub use orchestrator::BatchOrchestrator;
pub use pacing::{pause, ActionKind, HumanPacer, NoopPacer, Pacer};
pub use retry::{Retried, RetryController, RetryPolicy};
pub use show::ShowProcessor;
