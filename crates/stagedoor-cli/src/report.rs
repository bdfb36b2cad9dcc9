//! Human-readable rendering of run reports and progress events.

use std::fmt::Write;

use stagedoor_engine::RunEvent;
use stagedoor_types::{AttemptOutcome, RunReport};

/// A fixed-width table of per-show results followed by the totals.
pub fn render_table(report: &RunReport) -> String {
    let name_width = report
        .shows
        .iter()
        .map(|s| s.show_name.len())
        .max()
        .unwrap_or(0)
        .max("Show".len());

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<name_width$}  {:<18}  {:>7}  {:>7}  {:>6}",
        "Show", "Status", "Entries", "Success", "Failed"
    );
    let _ = writeln!(out, "{}", "-".repeat(name_width + 2 + 18 + 2 + 7 + 2 + 7 + 2 + 6));
    for show in &report.shows {
        let _ = writeln!(
            out,
            "{:<name_width$}  {:<18}  {:>7}  {:>7}  {:>6}",
            show.show_name,
            show.status.label(),
            show.total_entries,
            show.success_count,
            show.failure_count
        );
        if let Some(error) = &show.error {
            let _ = writeln!(out, "{:<name_width$}  note: {error}", "");
        }
    }

    let counts = report.counts();
    let verb = if report.dry_run { "Filled" } else { "Submitted" };
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "{verb}: {}  available: {}  closed/upcoming: {}  blocked: {}  skipped: {}  failed: {}",
        report.total_submitted(),
        counts.available,
        counts.closed_or_upcoming,
        counts.blocked,
        counts.skipped,
        counts.failed
    );
    match &report.tripped_by {
        Some(show) => {
            let _ = writeln!(out, "Circuit breaker: activated by {show}");
        }
        None if report.breaker_tripped => {
            let _ = writeln!(out, "Circuit breaker: activated");
        }
        None => {
            let _ = writeln!(out, "Circuit breaker: not activated");
        }
    }
    out
}

/// One progress line for the events worth showing on a terminal.
pub fn progress_line(event: &RunEvent) -> Option<String> {
    match event {
        RunEvent::ShowStarted { show, .. } => Some(format!("> {show}")),
        RunEvent::ShowSkipped { show, tripped_by } => Some(match tripped_by {
            Some(by) => format!("- {show}: skipped (breaker activated by {by})"),
            None => format!("- {show}: skipped"),
        }),
        RunEvent::EntriesDiscovered { show, open, closed } => {
            Some(format!("  {show}: {open} open, {closed} closed"))
        }
        RunEvent::EntryFinished {
            show,
            index,
            outcome,
        } => Some(match outcome {
            AttemptOutcome::Success => format!("  {show} #{}: entered", index + 1),
            AttemptOutcome::Failure { reason } => {
                format!("  {show} #{}: failed ({reason})", index + 1)
            }
            AttemptOutcome::ChallengeDetected => {
                format!("  {show} #{}: challenge detected", index + 1)
            }
        }),
        RunEvent::BreakerTripped { show } => {
            Some(format!("! circuit breaker activated by {show}"))
        }
        RunEvent::ShowFinished { show, status, .. } => {
            Some(format!("< {show}: {}", status.label()))
        }
        _ => None,
    }
}
