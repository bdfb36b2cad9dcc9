//! Scripted in-memory browser for tests.
//!
//! A [`Site`] maps URLs to [`PageScript`]s. [`ScriptedBrowser`] hands out
//! contexts that "load" those scripts and records every action, so tests can
//! assert on what the engine did without a real browser.
//!
//! ```rust,ignore
//! let site = Site::new()
//!     .page(SHOW, PageScript::show_page(&[FORM], 1))
//!     .page(FORM, PageScript::entry_form().submits_to(DONE))
//!     .page(DONE, PageScript::confirmation());
//! let browser = ScriptedBrowser::new(site);
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use stagedoor_types::{DateOfBirth, Result, StagedoorError, UserProfile};

use crate::browser::{Browser, BrowsingContext, Control, ControlKind, FormField};
use crate::config::EngineConfig;
use crate::diagnostics::NullSink;
use crate::engine::Engine;
use crate::pacing::NoopPacer;

/// Enough ordinary text to clear the blank-page heuristic.
const FILLER: &str = "Welcome to the digital lottery. Enter for a chance to purchase \
    tickets at a reduced price. Winners are drawn at random and notified by email. \
    Entries are limited to one per person per performance. Please read the official \
    rules before entering. Good luck and enjoy the show!";

/// A valid profile for tests.
pub fn sample_profile() -> UserProfile {
    UserProfile {
        first_name: "Ada".into(),
        last_name: "Lovelace".into(),
        number_of_tickets: 2,
        email: "ada@example.com".into(),
        date_of_birth: DateOfBirth {
            month: "12".into(),
            day: "10".into(),
            year: "1985".into(),
        },
        zip: "10001".into(),
        country_of_residence: "United States".into(),
    }
}

/// An engine with no pacing and no diagnostics output.
pub fn quiet_engine(config: EngineConfig) -> Result<Engine> {
    Engine::builder(config, sample_profile())
        .pacer(Arc::new(NoopPacer))
        .sink(Arc::new(NullSink))
        .build()
}

/// Something the engine did to a scripted context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Navigate(String),
    Fill { kind: ControlKind, value: String },
    Click { kind: ControlKind, ordinal: usize },
    Screenshot(String),
    Idle,
    Close,
}

/// What a single URL renders as.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub title: String,
    pub text: String,
    /// URL reported after load, e.g. a challenge redirect.
    pub final_url: Option<String>,
    pub controls: Vec<Control>,
    /// Page shown after the submit button is clicked.
    pub submit_to: Option<String>,
    /// Pages reached by clicking link-less open-entry buttons, by ordinal.
    pub button_targets: Vec<String>,
    /// Visibility probes fail instead of answering.
    pub probe_error: bool,
    /// Visibility probes hang this long before answering.
    pub probe_delay: Option<Duration>,
    /// Control lookups hang this long before answering.
    pub lookup_delay: Option<Duration>,
    /// Screenshots hang this long before answering.
    pub screenshot_delay: Option<Duration>,
    /// Pointer moves and scrolls fail.
    pub motion_error: bool,
}

impl PageScript {
    /// A plain page with the given body text.
    pub fn content(text: &str) -> Self {
        Self {
            title: "Lottery".into(),
            text: text.into(),
            ..Self::default()
        }
    }

    /// A show landing page with one open-entry link per href and `closed`
    /// closed/upcoming indicators.
    pub fn show_page(open_hrefs: &[&str], closed: usize) -> Self {
        let mut controls: Vec<Control> = open_hrefs
            .iter()
            .enumerate()
            .map(|(i, href)| Control::new(ControlKind::OpenEntry, i).with_href(*href))
            .collect();
        controls.extend((0..closed).map(|i| Control::new(ControlKind::ClosedEntry, i)));
        Self {
            title: "Show Lottery".into(),
            text: FILLER.into(),
            controls,
            ..Self::default()
        }
    }

    /// A show landing page whose open-entry buttons carry no link; clicking
    /// the n-th one loads `targets[n]`.
    pub fn show_page_with_buttons(targets: &[&str], closed: usize) -> Self {
        let mut script = Self::show_page(&[], closed);
        script.controls.extend(
            (0..targets.len()).map(|i| Control::new(ControlKind::OpenEntry, i)),
        );
        script.button_targets = targets.iter().map(|t| (*t).to_string()).collect();
        script
    }

    /// A complete entry form with an overlay, terms checkbox, and submit button.
    pub fn entry_form() -> Self {
        let mut controls: Vec<Control> = FormField::FILL_ORDER
            .iter()
            .map(|f| Control::new(ControlKind::Field(*f), 0))
            .collect();
        controls.push(Control::new(ControlKind::OverlayDismiss, 0));
        controls.push(Control::new(ControlKind::AgreeTerms, 0));
        controls.push(Control::new(ControlKind::Submit, 0));
        Self {
            title: "Enter Lottery".into(),
            text: FILLER.into(),
            controls,
            ..Self::default()
        }
    }

    pub fn confirmation() -> Self {
        Self {
            title: "Entry received".into(),
            text: format!("Thank you, your entry has been received. {FILLER}"),
            controls: vec![Control::new(ControlKind::Confirmation, 0)],
            ..Self::default()
        }
    }

    /// A classic interstitial: matching title, phrases, and little content.
    pub fn challenge() -> Self {
        Self {
            title: "Just a moment...".into(),
            text: "Checking your browser before accessing the site. Ray ID: 8a1b2c3d".into(),
            ..Self::default()
        }
    }

    pub fn submits_to(mut self, url: &str) -> Self {
        self.submit_to = Some(url.into());
        self
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_final_url(mut self, url: &str) -> Self {
        self.final_url = Some(url.into());
        self
    }

    pub fn without(mut self, kind: ControlKind) -> Self {
        self.controls.retain(|c| c.kind != kind);
        self
    }

    pub fn with_probe_error(mut self) -> Self {
        self.probe_error = true;
        self
    }

    pub fn with_probe_delay(mut self, delay: Duration) -> Self {
        self.probe_delay = Some(delay);
        self
    }

    pub fn with_lookup_delay(mut self, delay: Duration) -> Self {
        self.lookup_delay = Some(delay);
        self
    }

    pub fn with_screenshot_delay(mut self, delay: Duration) -> Self {
        self.screenshot_delay = Some(delay);
        self
    }

    pub fn with_motion_error(mut self) -> Self {
        self.motion_error = true;
        self
    }

    fn has(&self, control: &Control) -> bool {
        self.controls
            .iter()
            .any(|c| c.kind == control.kind && c.ordinal == control.ordinal)
    }
}

/// The scripted world: pages by URL plus injected navigation failures.
#[derive(Debug, Clone, Default)]
pub struct Site {
    pages: HashMap<String, PageScript>,
    nav_failures: HashMap<String, usize>,
}

impl Site {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, script: PageScript) -> Self {
        self.pages.insert(url.to_string(), script);
        self
    }

    /// The first `times` navigations to `url` fail with a technical error.
    pub fn fail_navigation(mut self, url: &str, times: usize) -> Self {
        self.nav_failures.insert(url.to_string(), times);
        self
    }
}

struct Shared {
    site: Site,
    log: Mutex<Vec<Action>>,
    nav_counts: Mutex<HashMap<String, usize>>,
    opened: AtomicUsize,
    closed: AtomicUsize,
    refuse_contexts: bool,
}

/// Hands out [`ScriptedContext`]s over a shared [`Site`] and action log.
#[derive(Clone)]
pub struct ScriptedBrowser {
    shared: Arc<Shared>,
}

impl ScriptedBrowser {
    pub fn new(site: Site) -> Self {
        Self::build(site, false)
    }

    /// A browser whose `new_context` always fails.
    pub fn refusing() -> Self {
        Self::build(Site::new(), true)
    }

    fn build(site: Site, refuse_contexts: bool) -> Self {
        Self {
            shared: Arc::new(Shared {
                site,
                log: Mutex::new(Vec::new()),
                nav_counts: Mutex::new(HashMap::new()),
                opened: AtomicUsize::new(0),
                closed: AtomicUsize::new(0),
                refuse_contexts,
            }),
        }
    }

    pub fn actions(&self) -> Vec<Action> {
        lock(&self.shared.log).clone()
    }

    pub fn contexts_opened(&self) -> usize {
        self.shared.opened.load(Ordering::SeqCst)
    }

    pub fn contexts_closed(&self) -> usize {
        self.shared.closed.load(Ordering::SeqCst)
    }

    pub fn navigations_to(&self, url: &str) -> usize {
        lock(&self.shared.nav_counts).get(url).copied().unwrap_or(0)
    }

    pub fn clicked(&self, kind: ControlKind) -> bool {
        self.actions()
            .iter()
            .any(|a| matches!(a, Action::Click { kind: k, .. } if *k == kind))
    }

    /// Values typed into each form field, in order.
    pub fn fills(&self) -> Vec<(FormField, String)> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Fill {
                    kind: ControlKind::Field(field),
                    value,
                } => Some((field, value)),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Browser for ScriptedBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>> {
        if self.shared.refuse_contexts {
            return Err(StagedoorError::Browser("browser failed to launch".into()));
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedContext {
            shared: Arc::clone(&self.shared),
            current: Mutex::new(None),
        }))
    }
}

/// One scripted tab.
pub struct ScriptedContext {
    shared: Arc<Shared>,
    current: Mutex<Option<String>>,
}

impl ScriptedContext {
    fn record(&self, action: Action) {
        lock(&self.shared.log).push(action);
    }

    fn current_key(&self) -> Result<String> {
        lock(&self.current)
            .clone()
            .ok_or_else(|| StagedoorError::Browser("no page loaded".into()))
    }

    fn page(&self) -> Result<PageScript> {
        let key = self.current_key()?;
        self.shared
            .site
            .pages
            .get(&key)
            .cloned()
            .ok_or_else(|| StagedoorError::Browser(format!("page vanished: {key}")))
    }

    fn require(&self, page: &PageScript, control: &Control) -> Result<()> {
        if page.has(control) {
            Ok(())
        } else {
            Err(StagedoorError::MissingElement {
                what: control.kind.describe(),
            })
        }
    }

    fn idle_motion(&self) -> Result<()> {
        if self.page()?.motion_error {
            return Err(StagedoorError::Browser("input dispatch failed".into()));
        }
        self.record(Action::Idle);
        Ok(())
    }

    fn load(&self, url: &str) {
        *lock(&self.current) = Some(url.to_string());
    }
}

#[async_trait]
impl BrowsingContext for ScriptedContext {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        self.record(Action::Navigate(url.to_string()));
        let attempt = {
            let mut counts = lock(&self.shared.nav_counts);
            let count = counts.entry(url.to_string()).or_insert(0);
            *count += 1;
            *count
        };
        let failures = self.shared.site.nav_failures.get(url).copied().unwrap_or(0);
        if attempt <= failures {
            return Err(StagedoorError::Navigation {
                url: url.to_string(),
                message: "connection reset".into(),
            });
        }
        if !self.shared.site.pages.contains_key(url) {
            return Err(StagedoorError::Navigation {
                url: url.to_string(),
                message: "404 not found".into(),
            });
        }
        self.load(url);
        Ok(())
    }

    async fn find_controls(&self, kind: ControlKind) -> Result<Vec<Control>> {
        let page = self.page()?;
        if let Some(delay) = page.lookup_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(page.controls.into_iter().filter(|c| c.kind == kind).collect())
    }

    async fn fill(&self, control: &Control, value: &str) -> Result<()> {
        let page = self.page()?;
        self.require(&page, control)?;
        self.record(Action::Fill {
            kind: control.kind,
            value: value.to_string(),
        });
        Ok(())
    }

    async fn click(&self, control: &Control) -> Result<()> {
        let page = self.page()?;
        self.require(&page, control)?;
        self.record(Action::Click {
            kind: control.kind,
            ordinal: control.ordinal,
        });

        let next = match control.kind {
            ControlKind::Submit => page.submit_to.clone(),
            ControlKind::OpenEntry => control
                .href
                .clone()
                .or_else(|| page.button_targets.get(control.ordinal).cloned()),
            _ => None,
        };
        if let Some(url) = next {
            if self.shared.site.pages.contains_key(&url) {
                self.load(&url);
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        let key = self.current_key()?;
        let page = self.page()?;
        Ok(page.final_url.unwrap_or(key))
    }

    async fn title(&self) -> Result<String> {
        Ok(self.page()?.title)
    }

    async fn visible_text(&self, probe: &str) -> Result<bool> {
        let page = self.page()?;
        if let Some(delay) = page.probe_delay {
            tokio::time::sleep(delay).await;
        }
        if page.probe_error {
            return Err(StagedoorError::Timeout {
                what: format!("visibility of '{probe}'"),
                timeout_ms: 0,
            });
        }
        Ok(page.text.to_lowercase().contains(&probe.to_lowercase()))
    }

    async fn body_text_length(&self) -> Result<usize> {
        Ok(self.page()?.text.chars().count())
    }

    async fn screenshot(&self, label: &str) -> Result<Vec<u8>> {
        self.record(Action::Screenshot(label.to_string()));
        if let Some(delay) = self.page().ok().and_then(|p| p.screenshot_delay) {
            tokio::time::sleep(delay).await;
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    async fn move_pointer(&self, _x: f64, _y: f64) -> Result<()> {
        self.idle_motion()
    }

    async fn scroll_by(&self, _delta_y: f64) -> Result<()> {
        self.idle_motion()
    }

    async fn close(self: Box<Self>) -> Result<()> {
        self.record(Action::Close);
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
