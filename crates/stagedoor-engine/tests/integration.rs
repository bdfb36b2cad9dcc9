//! End-to-end integration tests for the lottery entry engine.
//!
//! Each test drives a full batch: plan shows -> orchestrate -> show processor
//! -> entry machine, against the scripted in-memory browser.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use stagedoor_engine::testing::{sample_profile, Action, PageScript, ScriptedBrowser, Site};
use stagedoor_engine::{
    BatchOrchestrator, CircuitBreaker, ControlKind, DiagnosticRecord, DiagnosticsSink, Engine,
    EngineConfig, EventEmitter, NoopPacer, RunEvent,
};
use stagedoor_types::{AttemptOutcome, RunReport, ShowStatus};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

const HOST: &str = "https://lottery.test";

fn show_url(name: &str) -> String {
    format!("{HOST}/show/{name}/")
}

fn form_url(name: &str, n: usize) -> String {
    format!("{HOST}/enter/{name}-{n}")
}

fn done_url() -> String {
    format!("{HOST}/thanks")
}

/// A show with `open` working entry forms and `closed` closed indicators.
fn add_show(site: Site, name: &str, open: usize, closed: usize) -> Site {
    let forms: Vec<String> = (1..=open).map(|n| form_url(name, n)).collect();
    let hrefs: Vec<&str> = forms.iter().map(String::as_str).collect();
    let mut site = site.page(&show_url(name), PageScript::show_page(&hrefs, closed));
    for form in &forms {
        site = site.page(form, PageScript::entry_form().submits_to(&done_url()));
    }
    site.page(&done_url(), PageScript::confirmation())
}

/// Collects every diagnostic record.
#[derive(Default)]
struct RecordingSink {
    records: Mutex<Vec<DiagnosticRecord>>,
}

#[async_trait]
impl DiagnosticsSink for RecordingSink {
    async fn record(&self, record: DiagnosticRecord) {
        self.records.lock().unwrap().push(record);
    }
}

struct Harness {
    orchestrator: BatchOrchestrator,
    browser: ScriptedBrowser,
    sink: Arc<RecordingSink>,
    events: EventEmitter,
}

fn harness(config: EngineConfig, site: Site) -> Harness {
    let browser = ScriptedBrowser::new(site);
    let sink = Arc::new(RecordingSink::default());
    let events = EventEmitter::new(1024);
    let engine = Engine::builder(config, sample_profile())
        .pacer(Arc::new(NoopPacer))
        .sink(sink.clone())
        .events(events.clone())
        .build()
        .expect("engine should build");
    Harness {
        orchestrator: BatchOrchestrator::new(Arc::new(engine), Arc::new(browser.clone())),
        browser,
        sink,
        events,
    }
}

async fn run(h: &Harness, shows: &[&str]) -> RunReport {
    let urls: Vec<String> = shows.iter().map(|s| show_url(s)).collect();
    let tasks = h.orchestrator.plan(&urls);
    h.orchestrator.run(&tasks, &CircuitBreaker::new()).await
}

fn submit_clicks(browser: &ScriptedBrowser) -> usize {
    browser
        .actions()
        .iter()
        .filter(|a| {
            matches!(
                a,
                Action::Click {
                    kind: ControlKind::Submit,
                    ..
                }
            )
        })
        .count()
}

// ---------------------------------------------------------------------------
// Scenario A: closed show
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_a_closed_show_reports_closed_or_upcoming() {
    let site = add_show(Site::new(), "hamilton", 0, 3);
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["hamilton"]).await;

    let summary = report.summary("hamilton").expect("summary for hamilton");
    assert_eq!(summary.status, ShowStatus::ClosedOrUpcoming);
    assert_eq!(summary.total_entries, 3);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.failure_count, 0);
    assert!(h.browser.fills().is_empty(), "no entry machine should run");
    assert!(!report.breaker_tripped);
    assert!(report.is_clean());
}

// ---------------------------------------------------------------------------
// Scenario B: challenge on the second entry trips the breaker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_b_challenge_blocks_show_and_skips_the_rest() {
    let mut site = add_show(Site::new(), "aladdin", 2, 0);
    site = site.page(&form_url("aladdin", 2), PageScript::challenge());
    site = add_show(site, "wicked", 1, 0);
    site = add_show(site, "chicago", 1, 0);
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["aladdin", "wicked", "chicago"]).await;

    let aladdin = report.summary("aladdin").unwrap();
    assert_eq!(aladdin.status, ShowStatus::Blocked);
    assert_eq!(aladdin.success_count, 1);
    assert_eq!(aladdin.failure_count, 0);

    assert!(report.breaker_tripped);
    assert_eq!(report.tripped_by.as_deref(), Some("aladdin"));

    for name in ["wicked", "chicago"] {
        assert_eq!(report.summary(name).unwrap().status, ShowStatus::Skipped);
        assert_eq!(h.browser.navigations_to(&show_url(name)), 0);
    }
    assert_eq!(h.browser.contexts_opened(), 1);

    let counts = report.counts();
    assert_eq!(counts.blocked, 1);
    assert_eq!(counts.skipped, 2);
    assert!(!report.is_clean());
}

// ---------------------------------------------------------------------------
// Scenario C: dry run
// ---------------------------------------------------------------------------

#[tokio::test]
async fn scenario_c_dry_run_succeeds_without_submitting() {
    let site = add_show(Site::new(), "moulin-rouge", 2, 1);
    let config = EngineConfig {
        dry_run: true,
        ..EngineConfig::immediate()
    };
    let h = harness(config, site);
    let mut rx = h.events.subscribe();

    let report = run(&h, &["moulin-rouge"]).await;

    let summary = report.summary("moulin-rouge").unwrap();
    assert_eq!(summary.status, ShowStatus::Available);
    assert_eq!(summary.total_entries, 3);
    assert_eq!(summary.success_count, 2);
    assert!(report.dry_run);
    assert_eq!(submit_clicks(&h.browser), 0);
    assert_eq!(h.browser.fills().len(), 2 * 9);

    let mut finished = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let RunEvent::EntryFinished { outcome, .. } = event {
            finished.push(outcome);
        }
    }
    assert_eq!(finished, vec![AttemptOutcome::Success, AttemptOutcome::Success]);
}

// ---------------------------------------------------------------------------
// Breaker and isolation properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn landing_challenge_trips_breaker_before_next_show() {
    let mut site = add_show(Site::new(), "six", 1, 0);
    site = site.page(&show_url("six"), PageScript::challenge());
    site = add_show(site, "hadestown", 1, 0);
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["six", "hadestown"]).await;

    assert_eq!(report.summary("six").unwrap().status, ShowStatus::Blocked);
    assert_eq!(
        report.summary("hadestown").unwrap().status,
        ShowStatus::Skipped
    );
    assert_eq!(report.tripped_by.as_deref(), Some("six"));

    let records = h.sink.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].show, "six");
    assert_eq!(records[0].stage, "landing-challenge");
}

#[tokio::test]
async fn every_started_show_closes_its_context() {
    let mut site = add_show(Site::new(), "a", 1, 0);
    site = add_show(site, "b", 0, 2);
    site = add_show(site, "c", 2, 0).fail_navigation(&show_url("c"), 10);
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["a", "b", "c"]).await;

    assert_eq!(report.summary("a").unwrap().status, ShowStatus::Available);
    assert_eq!(
        report.summary("b").unwrap().status,
        ShowStatus::ClosedOrUpcoming
    );
    assert_eq!(report.summary("c").unwrap().status, ShowStatus::Failed);
    assert!(!report.breaker_tripped);
    assert_eq!(h.browser.contexts_opened(), 3);
    assert_eq!(h.browser.contexts_closed(), 3);
    let closes = h
        .browser
        .actions()
        .iter()
        .filter(|a| **a == Action::Close)
        .count();
    assert_eq!(closes, 3);
}

#[tokio::test]
async fn failed_show_does_not_stop_the_batch() {
    let mut site = add_show(Site::new(), "broken", 1, 0).fail_navigation(&show_url("broken"), 10);
    site = add_show(site, "working", 1, 0);
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["broken", "working"]).await;

    assert_eq!(report.summary("broken").unwrap().status, ShowStatus::Failed);
    assert_eq!(
        report.summary("working").unwrap().success_count,
        1
    );
    assert_eq!(report.total_submitted(), 1);
    assert_eq!(report.counts().failed, 1);
}

// ---------------------------------------------------------------------------
// Retry properties
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flaky_entry_navigation_recovers_within_retry_limit() {
    let site = add_show(Site::new(), "flaky", 1, 0).fail_navigation(&form_url("flaky", 1), 2);
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["flaky"]).await;

    assert_eq!(report.summary("flaky").unwrap().success_count, 1);
    assert_eq!(h.browser.navigations_to(&form_url("flaky", 1)), 3);
}

#[tokio::test]
async fn challenged_entry_is_visited_exactly_once() {
    let site = add_show(Site::new(), "lion", 1, 0)
        .page(&form_url("lion", 1), PageScript::challenge());
    let h = harness(EngineConfig::immediate(), site);

    let report = run(&h, &["lion"]).await;

    assert_eq!(report.summary("lion").unwrap().status, ShowStatus::Blocked);
    assert_eq!(h.browser.navigations_to(&form_url("lion", 1)), 1);
    assert_eq!(submit_clicks(&h.browser), 0);
}

#[tokio::test]
async fn custom_pacer_is_consulted_between_entries_and_shows() {
    struct CountingPacer(AtomicUsize);

    #[async_trait]
    impl stagedoor_engine::Pacer for CountingPacer {
        fn delay_before(&self, _kind: stagedoor_engine::ActionKind) -> std::time::Duration {
            self.0.fetch_add(1, Ordering::SeqCst);
            std::time::Duration::ZERO
        }

        fn jitter(&self, _max: std::time::Duration) -> std::time::Duration {
            std::time::Duration::ZERO
        }

        async fn simulate_idle_motion(&self, _surface: &dyn stagedoor_engine::BrowsingContext) {}
    }

    let mut site = add_show(Site::new(), "x", 2, 0);
    site = add_show(site, "y", 0, 1);
    let pacer = Arc::new(CountingPacer(AtomicUsize::new(0)));
    let browser = ScriptedBrowser::new(site);
    let engine = Engine::builder(EngineConfig::immediate(), sample_profile())
        .pacer(pacer.clone())
        .build()
        .unwrap();
    let orchestrator = BatchOrchestrator::new(Arc::new(engine), Arc::new(browser));
    let tasks = orchestrator.plan(&[show_url("x"), show_url("y")]);
    orchestrator.run(&tasks, &CircuitBreaker::new()).await;

    // Per entry: 9 field pauses + 1 before terms + 1 post-submit = 11.
    // Plus one inter-entry pause and one inter-show pause.
    assert_eq!(pacer.0.load(Ordering::SeqCst), 2 * 11 + 1 + 1);
}
