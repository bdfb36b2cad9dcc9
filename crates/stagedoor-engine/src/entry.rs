//! Entry state machine: drives one lottery entry from navigation to
//! confirmation.
//!
//! ```text
//! Idle -> Navigated -> ChallengeChecked -> FormReady -> FormFilled -> Submitted -> Done
//!   \________\_______________\_______________\____________\______________\--> Failed
//! ```
//!
//! Technical steps run under the [`RetryController`](crate::retry::RetryController).
//! The challenge check and the submit click never do: a challenge must not be
//! poked again, and a repeated click could submit twice.

use std::fmt;

use serde::{Deserialize, Serialize};
use stagedoor_types::{
    AttemptOutcome, EntryTarget, FormReference, Result, ShowTask, StagedoorError, UserProfile,
};

use crate::browser::{first_control, wait_for_controls, BrowsingContext, ControlKind, FormField};
use crate::diagnostics::capture;
use crate::engine::Engine;
use crate::pacing::{pause, ActionKind};

// ---------------------------------------------------------------------------
// States
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum FailureReason {
    /// A confirmed challenge; carries the detector signal.
    Challenge(String),
    Technical(String),
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::Challenge(signal) => write!(f, "challenge: {signal}"),
            FailureReason::Technical(message) => f.write_str(message),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Idle,
    Navigated,
    ChallengeChecked,
    FormReady,
    FormFilled,
    Submitted,
    Done,
    Failed(FailureReason),
}

impl EntryState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EntryState::Done | EntryState::Failed(_))
    }

    /// The state that follows on success, `None` for terminal states.
    pub fn next(&self) -> Option<EntryState> {
        match self {
            EntryState::Idle => Some(EntryState::Navigated),
            EntryState::Navigated => Some(EntryState::ChallengeChecked),
            EntryState::ChallengeChecked => Some(EntryState::FormReady),
            EntryState::FormReady => Some(EntryState::FormFilled),
            EntryState::FormFilled => Some(EntryState::Submitted),
            EntryState::Submitted => Some(EntryState::Done),
            EntryState::Done | EntryState::Failed(_) => None,
        }
    }
}

/// Everything one machine run produced.
#[derive(Debug, Clone)]
pub struct EntryRun {
    pub outcome: AttemptOutcome,
    /// Every state visited, starting with `Idle`.
    pub trail: Vec<EntryState>,
    /// Whether the real submit control was clicked.
    pub submit_invoked: bool,
}

impl EntryRun {
    pub fn final_state(&self) -> Option<&EntryState> {
        self.trail.last()
    }
}

// ---------------------------------------------------------------------------
// Machine
// ---------------------------------------------------------------------------

pub struct EntryMachine<'a> {
    engine: &'a Engine,
    ctx: &'a dyn BrowsingContext,
    task: &'a ShowTask,
    target: &'a EntryTarget,
    trail: Vec<EntryState>,
    submit_invoked: bool,
}

impl<'a> EntryMachine<'a> {
    pub fn new(
        engine: &'a Engine,
        ctx: &'a dyn BrowsingContext,
        task: &'a ShowTask,
        target: &'a EntryTarget,
    ) -> Self {
        Self {
            engine,
            ctx,
            task,
            target,
            trail: vec![EntryState::Idle],
            submit_invoked: false,
        }
    }

    pub fn state(&self) -> &EntryState {
        // trail always starts with Idle
        self.trail.last().unwrap_or(&EntryState::Idle)
    }

    /// Drive the entry to `Done` or `Failed`. Never returns an error: every
    /// failure is folded into the [`AttemptOutcome`].
    pub async fn run(mut self) -> EntryRun {
        let show = self.task.show_name.as_str();
        let index = self.target.index;

        let outcome = match self.drive().await {
            Ok(()) => {
                tracing::info!(show = %show, entry = index, dry_run = self.engine.config().dry_run, "Entry submitted");
                AttemptOutcome::Success
            }
            Err(e) if e.is_challenge() => {
                let signal = e.challenge_signal().unwrap_or("unknown").to_string();
                tracing::warn!(show = %show, entry = index, state = ?self.state(), signal = %signal, "Challenge during entry");
                self.capture("entry-challenge", serde_json::json!({ "signal": signal }))
                    .await;
                self.trail.push(EntryState::Failed(FailureReason::Challenge(signal)));
                AttemptOutcome::ChallengeDetected
            }
            Err(e) => {
                let reason = e.to_string();
                tracing::warn!(show = %show, entry = index, state = ?self.state(), error = %reason, "Entry failed");
                self.capture(
                    "entry-failure",
                    serde_json::json!({ "state": self.state(), "error": reason }),
                )
                .await;
                self.trail
                    .push(EntryState::Failed(FailureReason::Technical(reason.clone())));
                AttemptOutcome::failure(reason)
            }
        };

        EntryRun {
            outcome,
            trail: self.trail,
            submit_invoked: self.submit_invoked,
        }
    }

    async fn drive(&mut self) -> Result<()> {
        self.navigate().await?;
        self.advance();
        self.check_challenge().await?;
        self.advance();
        self.prepare_form().await?;
        self.advance();
        self.fill_form().await?;
        self.advance();
        self.submit().await?;
        self.advance();
        self.advance();
        Ok(())
    }

    fn advance(&mut self) {
        if let Some(next) = self.state().next() {
            tracing::debug!(show = %self.task.show_name, entry = self.target.index, state = ?next, "Entry state");
            self.trail.push(next);
        }
    }

    fn label(&self, step: &str) -> String {
        format!("{}#{} {step}", self.task.show_name, self.target.index)
    }

    async fn capture(&self, stage: &str, metadata: serde_json::Value) {
        capture(
            self.ctx,
            self.engine.sink(),
            &self.task.show_name,
            stage,
            Some(self.target.index),
            metadata,
            self.engine.config().timeouts.probe,
        )
        .await;
    }

    // -- Idle -> Navigated ---------------------------------------------------

    async fn navigate(&self) -> Result<()> {
        let ctx = self.ctx;
        let timeouts = &self.engine.config().timeouts;
        let (nav_timeout, element_timeout) = (timeouts.navigation, timeouts.element);
        let retry = self.engine.retry();

        match &self.target.reference {
            FormReference::Href(url) => {
                let url = url.as_str();
                retry
                    .run(&self.label("navigate"), move || ctx.navigate(url, nav_timeout))
                    .await?;
            }
            FormReference::Control { ordinal } => {
                let ordinal = *ordinal;
                let show_url = self.task.url.as_str();
                retry
                    .run(&self.label("open entry control"), move || async move {
                        ctx.navigate(show_url, nav_timeout).await?;
                        let control =
                            wait_for_controls(ctx, ControlKind::OpenEntry, element_timeout)
                                .await?
                                .into_iter()
                                .find(|c| c.ordinal == ordinal)
                                .ok_or_else(|| StagedoorError::MissingElement {
                                    what: format!("open entry #{ordinal}"),
                                })?;
                        ctx.click(&control).await
                    })
                    .await?;
            }
        }
        Ok(())
    }

    // -- Navigated -> ChallengeChecked ---------------------------------------

    async fn check_challenge(&self) -> Result<()> {
        self.engine
            .detector()
            .ensure_clear(self.ctx, self.engine.config().timeouts.probe)
            .await
    }

    // -- ChallengeChecked -> FormReady ---------------------------------------

    async fn prepare_form(&self) -> Result<()> {
        let ctx = self.ctx;
        let detector = self.engine.detector();
        let timeouts = &self.engine.config().timeouts;
        let (element_timeout, probe_timeout) = (timeouts.element, timeouts.probe);

        self.engine
            .retry()
            .run(&self.label("form ready"), move || async move {
                dismiss_overlays(ctx).await;
                for field in FormField::REQUIRED_FOR_READY {
                    if let Err(e) =
                        wait_for_controls(ctx, ControlKind::Field(field), element_timeout).await
                    {
                        // A form that never shows up is often a challenge that
                        // replaced it after the first check.
                        detector.ensure_clear(ctx, probe_timeout).await?;
                        return Err(e);
                    }
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    // -- FormReady -> FormFilled ---------------------------------------------

    async fn fill_form(&self) -> Result<()> {
        let ctx = self.ctx;
        let pacer = self.engine.pacer();
        let retry = self.engine.retry();
        let profile = self.engine.profile();
        let country = profile.residence()?.code();

        pacer.simulate_idle_motion(ctx).await;

        for field in FormField::FILL_ORDER {
            pause(pacer, ActionKind::InterField).await;
            let value = field_value(profile, field, country);
            let value = value.as_str();
            retry
                .run(&self.label(&format!("fill {}", field.label())), move || async move {
                    let control = first_control(ctx, ControlKind::Field(field)).await?;
                    ctx.fill(&control, value).await
                })
                .await?;
        }

        pause(pacer, ActionKind::InterField).await;
        retry
            .run(&self.label("agree to terms"), move || async move {
                let control = first_control(ctx, ControlKind::AgreeTerms).await?;
                ctx.click(&control).await
            })
            .await?;
        Ok(())
    }

    // -- FormFilled -> Submitted ---------------------------------------------

    async fn submit(&mut self) -> Result<()> {
        if self.engine.config().dry_run {
            tracing::info!(show = %self.task.show_name, entry = self.target.index, "Dry run, not submitting");
            return Ok(());
        }

        let ctx = self.ctx;
        let timeouts = &self.engine.config().timeouts;
        let submit = self
            .engine
            .retry()
            .run(&self.label("locate submit"), move || {
                first_control(ctx, ControlKind::Submit)
            })
            .await?
            .value;

        self.submit_invoked = true;
        ctx.click(&submit).await?;

        if let Err(e) = wait_for_controls(ctx, ControlKind::Confirmation, timeouts.confirmation).await
        {
            self.engine
                .detector()
                .ensure_clear(ctx, timeouts.probe)
                .await?;
            return Err(e);
        }

        pause(self.engine.pacer(), ActionKind::PostSubmit).await;
        Ok(())
    }
}

/// Click every visible overlay close button. Failures are ignored.
async fn dismiss_overlays(ctx: &dyn BrowsingContext) {
    let overlays = match ctx.find_controls(ControlKind::OverlayDismiss).await {
        Ok(overlays) => overlays,
        Err(e) => {
            tracing::debug!(error = %e, "Overlay lookup failed, ignoring");
            return;
        }
    };
    for overlay in overlays {
        if let Err(e) = ctx.click(&overlay).await {
            tracing::debug!(error = %e, "Overlay dismiss failed, ignoring");
        }
    }
}

/// The text typed (or option chosen) for `field`.
fn field_value(profile: &UserProfile, field: FormField, country: &str) -> String {
    match field {
        FormField::FirstName => profile.first_name.clone(),
        FormField::LastName => profile.last_name.clone(),
        FormField::TicketQuantity => profile.number_of_tickets.to_string(),
        FormField::Email => profile.email.clone(),
        FormField::BirthMonth => profile.date_of_birth.month.clone(),
        FormField::BirthDay => profile.date_of_birth.day.clone(),
        FormField::BirthYear => profile.date_of_birth.year.clone(),
        FormField::Zip => profile.zip.clone(),
        FormField::Country => country.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use crate::config::EngineConfig;
    use crate::testing::{quiet_engine, PageScript, ScriptedBrowser, Site};

    const SHOW: &str = "https://lottery.test/show/aladdin/";
    const FORM: &str = "https://lottery.test/enter/aladdin-1";
    const FORM_2: &str = "https://lottery.test/enter/aladdin-2";
    const DONE: &str = "https://lottery.test/thanks";

    fn happy_site() -> Site {
        Site::new()
            .page(SHOW, PageScript::show_page(&[FORM], 0))
            .page(FORM, PageScript::entry_form().submits_to(DONE))
            .page(DONE, PageScript::confirmation())
    }

    async fn run_entry(
        config: EngineConfig,
        site: Site,
        reference: FormReference,
    ) -> (EntryRun, ScriptedBrowser) {
        let engine = quiet_engine(config).unwrap();
        let browser = ScriptedBrowser::new(site);
        let ctx = browser.new_context().await.unwrap();
        let task = ShowTask::from_url(SHOW);
        let target = EntryTarget {
            index: 0,
            reference,
        };
        let run = EntryMachine::new(&engine, ctx.as_ref(), &task, &target)
            .run()
            .await;
        ctx.close().await.unwrap();
        (run, browser)
    }

    fn full_trail() -> Vec<EntryState> {
        vec![
            EntryState::Idle,
            EntryState::Navigated,
            EntryState::ChallengeChecked,
            EntryState::FormReady,
            EntryState::FormFilled,
            EntryState::Submitted,
            EntryState::Done,
        ]
    }

    #[tokio::test]
    async fn href_entry_runs_to_done() {
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            happy_site(),
            FormReference::Href(FORM.into()),
        )
        .await;

        assert_eq!(run.outcome, AttemptOutcome::Success);
        assert_eq!(run.trail, full_trail());
        assert!(run.submit_invoked);
        assert!(browser.clicked(ControlKind::OverlayDismiss));
        assert!(browser.clicked(ControlKind::AgreeTerms));
        assert!(browser.clicked(ControlKind::Submit));
    }

    #[tokio::test]
    async fn fields_are_filled_in_fixed_order_with_profile_values() {
        let (_, browser) = run_entry(
            EngineConfig::immediate(),
            happy_site(),
            FormReference::Href(FORM.into()),
        )
        .await;

        let fills = browser.fills();
        let order: Vec<FormField> = fills.iter().map(|(f, _)| *f).collect();
        assert_eq!(order, FormField::FILL_ORDER.to_vec());
        let values: Vec<&str> = fills.iter().map(|(_, v)| v.as_str()).collect();
        assert_eq!(
            values,
            vec!["Ada", "Lovelace", "2", "ada@example.com", "12", "10", "1985", "10001", "USA"]
        );
    }

    #[tokio::test]
    async fn dry_run_reaches_submitted_without_clicking_submit() {
        let config = EngineConfig {
            dry_run: true,
            ..EngineConfig::immediate()
        };
        let (run, browser) =
            run_entry(config, happy_site(), FormReference::Href(FORM.into())).await;

        assert_eq!(run.outcome, AttemptOutcome::Success);
        assert!(run.trail.contains(&EntryState::Submitted));
        assert_eq!(run.final_state(), Some(&EntryState::Done));
        assert!(!run.submit_invoked);
        assert!(!browser.clicked(ControlKind::Submit));
        assert_eq!(browser.fills().len(), FormField::FILL_ORDER.len());
    }

    #[tokio::test]
    async fn challenge_on_entry_page_is_not_retried() {
        let site = happy_site().page(FORM_2, PageScript::challenge());
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Href(FORM_2.into()),
        )
        .await;

        assert_eq!(run.outcome, AttemptOutcome::ChallengeDetected);
        assert_eq!(browser.navigations_to(FORM_2), 1);
        assert!(browser.fills().is_empty());
        assert!(matches!(
            run.final_state(),
            Some(EntryState::Failed(FailureReason::Challenge(_)))
        ));
        assert_eq!(run.trail[1], EntryState::Navigated);
        assert_eq!(run.trail.len(), 3);
    }

    #[tokio::test]
    async fn failing_idle_motion_does_not_abort_the_entry() {
        let mut config = EngineConfig::immediate();
        config.pacing.idle_motion = true;
        let engine = Engine::builder(config, crate::testing::sample_profile())
            .sink(std::sync::Arc::new(crate::diagnostics::NullSink))
            .build()
            .unwrap();
        let site = happy_site().page(
            FORM,
            PageScript::entry_form().submits_to(DONE).with_motion_error(),
        );
        let browser = ScriptedBrowser::new(site);
        let ctx = browser.new_context().await.unwrap();
        let task = ShowTask::from_url(SHOW);
        let target = EntryTarget {
            index: 0,
            reference: FormReference::Href(FORM.into()),
        };

        let run = EntryMachine::new(&engine, ctx.as_ref(), &task, &target)
            .run()
            .await;

        assert_eq!(run.outcome, AttemptOutcome::Success);
        assert_eq!(run.trail, full_trail());
        assert!(browser.clicked(ControlKind::Submit));
        assert!(!browser
            .actions()
            .contains(&crate::testing::Action::Idle));
    }

    #[tokio::test]
    async fn transient_navigation_failures_are_retried() {
        let site = happy_site().fail_navigation(FORM, 2);
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Href(FORM.into()),
        )
        .await;

        assert_eq!(run.outcome, AttemptOutcome::Success);
        assert_eq!(browser.navigations_to(FORM), 3);
    }

    #[tokio::test]
    async fn exhausted_navigation_is_a_failure() {
        let site = happy_site().fail_navigation(FORM, 10);
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Href(FORM.into()),
        )
        .await;

        match &run.outcome {
            AttemptOutcome::Failure { reason } => assert!(reason.contains("Retries exhausted")),
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(browser.navigations_to(FORM), 3);
        assert_eq!(run.trail.len(), 2);
    }

    #[tokio::test]
    async fn missing_required_field_fails_after_retries() {
        let site = happy_site().page(
            FORM,
            PageScript::entry_form()
                .without(ControlKind::Field(FormField::Email))
                .submits_to(DONE),
        );
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Href(FORM.into()),
        )
        .await;

        assert!(matches!(run.outcome, AttemptOutcome::Failure { .. }));
        assert!(browser.fills().is_empty());
        assert!(run.trail.contains(&EntryState::ChallengeChecked));
        assert!(!run.trail.contains(&EntryState::FormReady));
    }

    #[tokio::test]
    async fn button_reference_is_reached_through_show_page() {
        let site = Site::new()
            .page(SHOW, PageScript::show_page_with_buttons(&[FORM_2, FORM], 0))
            .page(FORM, PageScript::entry_form().submits_to(DONE))
            .page(FORM_2, PageScript::challenge())
            .page(DONE, PageScript::confirmation());
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Control { ordinal: 1 },
        )
        .await;

        assert_eq!(run.outcome, AttemptOutcome::Success);
        assert_eq!(browser.navigations_to(SHOW), 1);
        assert!(browser.actions().contains(&crate::testing::Action::Click {
            kind: ControlKind::OpenEntry,
            ordinal: 1
        }));
    }

    #[tokio::test]
    async fn challenge_after_submit_is_detected() {
        let site = happy_site()
            .page(FORM, PageScript::entry_form().submits_to(FORM_2))
            .page(FORM_2, PageScript::challenge());
        let (run, browser) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Href(FORM.into()),
        )
        .await;

        assert_eq!(run.outcome, AttemptOutcome::ChallengeDetected);
        assert!(run.submit_invoked);
        assert_eq!(
            browser
                .actions()
                .iter()
                .filter(|a| matches!(a, crate::testing::Action::Click { kind: ControlKind::Submit, .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn missing_confirmation_is_a_technical_failure() {
        let site = happy_site()
            .page(FORM, PageScript::entry_form().submits_to(FORM_2))
            .page(FORM_2, PageScript::content("Something went wrong, please try again later."));
        let (run, _) = run_entry(
            EngineConfig::immediate(),
            site,
            FormReference::Href(FORM.into()),
        )
        .await;

        match run.outcome {
            AttemptOutcome::Failure { reason } => assert!(reason.contains("confirmation")),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn state_chain_ends_in_done() {
        let mut state = EntryState::Idle;
        let mut steps = 0;
        while let Some(next) = state.next() {
            state = next;
            steps += 1;
        }
        assert_eq!(state, EntryState::Done);
        assert_eq!(steps, 6);
        assert!(EntryState::Failed(FailureReason::Technical("x".into())).is_terminal());
    }
}
