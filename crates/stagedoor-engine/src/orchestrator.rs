//! Batch orchestrator: runs shows one at a time behind the circuit breaker.
//!
//! Shows are never processed concurrently. The breaker is checked right before
//! each show starts; once tripped, every remaining show is recorded as skipped.

use std::sync::Arc;
use std::time::Instant;

use rand::seq::SliceRandom;
use stagedoor_types::{RunReport, ShowSummary, ShowTask};

use crate::breaker::CircuitBreaker;
use crate::browser::Browser;
use crate::engine::Engine;
use crate::events::RunEvent;
use crate::pacing::{pause, ActionKind};
use crate::show::ShowProcessor;

pub struct BatchOrchestrator {
    engine: Arc<Engine>,
    browser: Arc<dyn Browser>,
}

impl BatchOrchestrator {
    pub fn new(engine: Arc<Engine>, browser: Arc<dyn Browser>) -> Self {
        Self { engine, browser }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    /// Turn configured URLs into tasks, shuffled once when the config says so.
    /// Blank entries are dropped.
    pub fn plan<S: AsRef<str>>(&self, urls: &[S]) -> Vec<ShowTask> {
        let mut tasks: Vec<ShowTask> = urls
            .iter()
            .map(|u| u.as_ref().trim())
            .filter(|u| !u.is_empty())
            .map(ShowTask::from_url)
            .collect();
        if self.engine.config().shuffle {
            tasks.shuffle(&mut rand::thread_rng());
        }
        tasks
    }

    /// Process `tasks` in order and aggregate the report.
    pub async fn run(&self, tasks: &[ShowTask], breaker: &CircuitBreaker) -> RunReport {
        let engine = self.engine.as_ref();
        let started_at = chrono::Utc::now();
        let clock = Instant::now();
        let processor = ShowProcessor::new(engine, self.browser.as_ref());

        tracing::info!(
            shows = tasks.len(),
            dry_run = engine.config().dry_run,
            "Starting lottery run"
        );
        engine.emit(RunEvent::RunStarted {
            show_count: tasks.len(),
            dry_run: engine.config().dry_run,
        });

        let mut shows: Vec<ShowSummary> = Vec::with_capacity(tasks.len());
        let mut started = 0usize;

        for task in tasks {
            if breaker.is_tripped() {
                tracing::info!(
                    show = %task.show_name,
                    tripped_by = ?breaker.tripped_by(),
                    "Circuit breaker tripped, skipping show"
                );
                engine.emit(RunEvent::ShowSkipped {
                    show: task.show_name.clone(),
                    tripped_by: breaker.tripped_by().map(str::to_string),
                });
                shows.push(ShowSummary::skipped(task));
                continue;
            }

            if started > 0 {
                pause(engine.pacer(), ActionKind::InterShow).await;
            }
            started += 1;
            shows.push(processor.process(task, breaker).await);
        }

        let report = RunReport {
            shows,
            breaker_tripped: breaker.is_tripped(),
            tripped_by: breaker.tripped_by().map(str::to_string),
            dry_run: engine.config().dry_run,
            started_at,
            finished_at: chrono::Utc::now(),
        };

        log_banner(&report);
        engine.emit(RunEvent::RunCompleted {
            shows: report.shows.len(),
            submitted: report.total_submitted(),
            breaker_tripped: report.breaker_tripped,
            duration_ms: clock.elapsed().as_millis() as u64,
        });
        report
    }
}

fn log_banner(report: &RunReport) {
    let counts = report.counts();
    tracing::info!(
        available = counts.available,
        closed_or_upcoming = counts.closed_or_upcoming,
        blocked = counts.blocked,
        skipped = counts.skipped,
        failed = counts.failed,
        submitted = report.total_submitted(),
        "Run complete"
    );
    match &report.tripped_by {
        Some(show) => tracing::warn!(show = %show, "Circuit breaker was activated"),
        None => tracing::info!("Circuit breaker was not activated"),
    }
}
