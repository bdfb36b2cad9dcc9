//! Show processor: one show page, one isolated browsing context.
//!
//! Lands on the show page, counts open versus closed/upcoming entry
//! indicators, runs the entry machine for every open entry in order, and
//! always closes the context before returning.

use stagedoor_types::{
    EntryTarget, FormReference, Result, ShowStatus, ShowSummary, ShowTask, StagedoorError,
};

use crate::breaker::CircuitBreaker;
use crate::browser::{find_before, Browser, BrowsingContext, Control, ControlKind, POLL_INTERVAL};
use crate::diagnostics::capture;
use crate::engine::Engine;
use crate::entry::{EntryMachine, EntryState, FailureReason};
use crate::events::RunEvent;
use crate::pacing::{pause, ActionKind};

pub struct ShowProcessor<'a> {
    engine: &'a Engine,
    browser: &'a dyn Browser,
}

impl<'a> ShowProcessor<'a> {
    pub fn new(engine: &'a Engine, browser: &'a dyn Browser) -> Self {
        Self { engine, browser }
    }

    /// Process `task` to a finished summary. Never fails: show-level errors
    /// become a `Failed` summary, and a challenge becomes `Blocked` and trips
    /// `breaker`.
    pub async fn process(&self, task: &ShowTask, breaker: &CircuitBreaker) -> ShowSummary {
        let show = task.show_name.as_str();
        tracing::info!(show = %show, url = %task.url, "Processing show");
        self.engine.emit(RunEvent::ShowStarted {
            show: show.to_string(),
            url: task.url.clone(),
        });

        let summary = match self.browser.new_context().await {
            Ok(ctx) => {
                let summary = self.process_in(ctx.as_ref(), task).await;
                if let Err(e) = ctx.close().await {
                    tracing::warn!(show = %show, error = %e, "Failed to close browsing context");
                }
                summary
            }
            Err(e) => {
                let fatal = StagedoorError::FatalShow {
                    show: show.to_string(),
                    message: e.to_string(),
                };
                tracing::error!(show = %show, error = %fatal, "Could not open browsing context");
                ShowSummary::failed(task, fatal.to_string())
            }
        };

        if summary.status == ShowStatus::Blocked && breaker.trip(show) {
            self.engine.emit(RunEvent::BreakerTripped {
                show: show.to_string(),
            });
        }

        tracing::info!(
            show = %show,
            status = summary.status.label(),
            total = summary.total_entries,
            success = summary.success_count,
            failure = summary.failure_count,
            "Show finished"
        );
        self.engine.emit(RunEvent::ShowFinished {
            show: show.to_string(),
            status: summary.status,
            success_count: summary.success_count,
            failure_count: summary.failure_count,
        });
        summary
    }

    /// Everything that needs the open context. Diagnostics are captured here,
    /// before the caller closes it.
    async fn process_in(&self, ctx: &dyn BrowsingContext, task: &ShowTask) -> ShowSummary {
        let show = task.show_name.as_str();
        match self.run_entries(ctx, task).await {
            Ok(summary) => summary,
            Err(e) if e.is_challenge() => {
                let signal = e.challenge_signal().unwrap_or("unknown").to_string();
                tracing::warn!(show = %show, signal = %signal, "Challenge on show page");
                capture(
                    ctx,
                    self.engine.sink(),
                    show,
                    "landing-challenge",
                    None,
                    serde_json::json!({ "url": task.url, "signal": signal }),
                    self.engine.config().timeouts.probe,
                )
                .await;
                self.engine.emit(RunEvent::ChallengeDetected {
                    show: show.to_string(),
                    entry_index: None,
                    signal,
                });
                ShowSummary::blocked(task, e.to_string())
            }
            Err(e) => {
                let fatal = StagedoorError::FatalShow {
                    show: show.to_string(),
                    message: e.to_string(),
                };
                tracing::error!(show = %show, error = %fatal, "Show failed");
                capture(
                    ctx,
                    self.engine.sink(),
                    show,
                    "show-failure",
                    None,
                    serde_json::json!({ "url": task.url, "error": e.to_string() }),
                    self.engine.config().timeouts.probe,
                )
                .await;
                ShowSummary::failed(task, fatal.to_string())
            }
        }
    }

    async fn run_entries(&self, ctx: &dyn BrowsingContext, task: &ShowTask) -> Result<ShowSummary> {
        let engine = self.engine;
        let show = task.show_name.as_str();
        let timeouts = &engine.config().timeouts;
        let (nav_timeout, element_timeout) = (timeouts.navigation, timeouts.element);
        let url = task.url.as_str();

        engine
            .retry()
            .run(&format!("{show} landing"), move || ctx.navigate(url, nav_timeout))
            .await?;
        engine.detector().ensure_clear(ctx, timeouts.probe).await?;

        let (open, closed) = engine
            .retry()
            .run(&format!("{show} availability"), move || {
                survey(ctx, element_timeout)
            })
            .await?
            .value;

        tracing::info!(show = %show, open = open.len(), closed, "Entries found");
        engine.emit(RunEvent::EntriesDiscovered {
            show: show.to_string(),
            open: open.len(),
            closed,
        });

        if open.is_empty() {
            return Ok(ShowSummary::closed_or_upcoming(task, closed));
        }

        let targets = entry_targets(&open);
        let mut summary = ShowSummary::available(task, open.len() + closed);

        for (position, target) in targets.iter().enumerate() {
            if position > 0 {
                pause(engine.pacer(), ActionKind::InterEntry).await;
            }
            engine.emit(RunEvent::EntryStarted {
                show: show.to_string(),
                index: target.index,
            });

            let run = EntryMachine::new(engine, ctx, task, target).run().await;
            summary.record(&run.outcome);
            engine.emit(RunEvent::EntryFinished {
                show: show.to_string(),
                index: target.index,
                outcome: run.outcome.clone(),
            });

            if run.outcome.is_challenge() {
                let signal = match run.final_state() {
                    Some(EntryState::Failed(FailureReason::Challenge(signal))) => signal.clone(),
                    _ => "unknown".to_string(),
                };
                summary.abandoned_entries = targets.len() - position - 1;
                summary.error = Some(format!("challenge on entry {}: {signal}", target.index));
                tracing::warn!(
                    show = %show,
                    entry = target.index,
                    abandoned = summary.abandoned_entries,
                    "Abandoning remaining entries"
                );
                engine.emit(RunEvent::ChallengeDetected {
                    show: show.to_string(),
                    entry_index: Some(target.index),
                    signal,
                });
                break;
            }
        }

        Ok(summary)
    }
}

/// Wait until the page shows any entry indicator, then report the open
/// controls and the closed count. An empty page after `timeout` reports
/// nothing open and nothing closed.
async fn survey(
    ctx: &dyn BrowsingContext,
    timeout: std::time::Duration,
) -> Result<(Vec<Control>, usize)> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let open = find_before(ctx, ControlKind::OpenEntry, deadline, timeout).await?;
        let closed = find_before(ctx, ControlKind::ClosedEntry, deadline, timeout)
            .await?
            .len();
        let now = tokio::time::Instant::now();
        if !open.is_empty() || closed > 0 || now >= deadline {
            return Ok((open, closed));
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// Prefer a control's link; fall back to clicking it by position.
fn entry_targets(open: &[Control]) -> Vec<EntryTarget> {
    open.iter()
        .enumerate()
        .map(|(index, control)| EntryTarget {
            index,
            reference: match &control.href {
                Some(href) => FormReference::Href(href.clone()),
                None => FormReference::Control {
                    ordinal: control.ordinal,
                },
            },
        })
        .collect()
}
