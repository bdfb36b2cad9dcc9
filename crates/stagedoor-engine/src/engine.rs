//! The shared, read-only collaborators of one run.
//!
//! An [`Engine`] bundles the validated configuration, the user profile, and
//! the pluggable pieces (pacer, diagnostics sink, event emitter). Show
//! processors and entry machines borrow it; nothing in it changes during a run.

use std::sync::Arc;

use stagedoor_types::{Result, UserProfile};

use crate::config::EngineConfig;
use crate::detector::ChallengeDetector;
use crate::diagnostics::{DiagnosticsSink, TracingSink};
use crate::events::{EventEmitter, RunEvent};
use crate::pacing::{HumanPacer, Pacer};
use crate::retry::RetryController;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    config: EngineConfig,
    profile: UserProfile,
    detector: ChallengeDetector,
    pacer: Arc<dyn Pacer>,
    retry: RetryController,
    sink: Arc<dyn DiagnosticsSink>,
    events: EventEmitter,
}

impl Engine {
    pub fn builder(config: EngineConfig, profile: UserProfile) -> EngineBuilder {
        EngineBuilder {
            config,
            profile,
            pacer: None,
            sink: None,
            events: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn profile(&self) -> &UserProfile {
        &self.profile
    }

    pub fn detector(&self) -> &ChallengeDetector {
        &self.detector
    }

    pub fn pacer(&self) -> &dyn Pacer {
        self.pacer.as_ref()
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    pub fn sink(&self) -> &dyn DiagnosticsSink {
        self.sink.as_ref()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }

    pub(crate) fn emit(&self, event: RunEvent) {
        self.events.emit(event);
    }
}

// ---------------------------------------------------------------------------
// Builder
// ---------------------------------------------------------------------------

pub struct EngineBuilder {
    config: EngineConfig,
    profile: UserProfile,
    pacer: Option<Arc<dyn Pacer>>,
    sink: Option<Arc<dyn DiagnosticsSink>>,
    events: Option<EventEmitter>,
}

impl EngineBuilder {
    /// Replace the default [`HumanPacer`].
    pub fn pacer(mut self, pacer: Arc<dyn Pacer>) -> Self {
        self.pacer = Some(pacer);
        self
    }

    /// Replace the default [`TracingSink`].
    pub fn sink(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn events(mut self, events: EventEmitter) -> Self {
        self.events = Some(events);
        self
    }

    /// Validate the configuration and profile, then assemble the engine.
    pub fn build(self) -> Result<Engine> {
        self.config.validate()?;
        self.profile.validate()?;

        let detector = ChallengeDetector::new(&self.config.detector)?;
        let pacer = self
            .pacer
            .unwrap_or_else(|| Arc::new(HumanPacer::new(self.config.pacing.clone())));
        let retry = RetryController::new(self.config.retry.clone(), Arc::clone(&pacer));

        Ok(Engine {
            detector,
            retry,
            pacer,
            sink: self.sink.unwrap_or_else(|| Arc::new(TracingSink)),
            events: self.events.unwrap_or_default(),
            config: self.config,
            profile: self.profile,
        })
    }
}
