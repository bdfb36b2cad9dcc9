//! Browsing capability traits.
//!
//! The engine drives pages only through [`BrowsingContext`]; a concrete adapter
//! (Chromium, or the scripted fake behind the `testing` feature) maps each
//! [`ControlKind`] onto the target site's markup.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use stagedoor_types::{Result, StagedoorError};

/// Interval between control lookups while waiting for a page to settle.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Inputs of the lottery entry form, in the order they are filled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormField {
    FirstName,
    LastName,
    TicketQuantity,
    Email,
    BirthMonth,
    BirthDay,
    BirthYear,
    Zip,
    Country,
}

impl FormField {
    pub const FILL_ORDER: [FormField; 9] = [
        FormField::FirstName,
        FormField::LastName,
        FormField::TicketQuantity,
        FormField::Email,
        FormField::BirthMonth,
        FormField::BirthDay,
        FormField::BirthYear,
        FormField::Zip,
        FormField::Country,
    ];

    /// Fields that must be present before the form counts as ready.
    pub const REQUIRED_FOR_READY: [FormField; 3] =
        [FormField::FirstName, FormField::LastName, FormField::Email];

    pub fn label(&self) -> &'static str {
        match self {
            FormField::FirstName => "first name",
            FormField::LastName => "last name",
            FormField::TicketQuantity => "ticket quantity",
            FormField::Email => "email",
            FormField::BirthMonth => "birth month",
            FormField::BirthDay => "birth day",
            FormField::BirthYear => "birth year",
            FormField::Zip => "zip",
            FormField::Country => "country of residence",
        }
    }
}

/// Kinds of page controls the engine looks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    /// An "enter" control for a lottery that is currently open.
    OpenEntry,
    /// An indicator for a lottery that is closed or not yet open.
    ClosedEntry,
    /// Close button of a cookie banner or email-signup prompt.
    OverlayDismiss,
    Field(FormField),
    AgreeTerms,
    Submit,
    /// Something only present once an entry was accepted.
    Confirmation,
}

impl ControlKind {
    pub fn describe(&self) -> String {
        match self {
            ControlKind::OpenEntry => "open entry".into(),
            ControlKind::ClosedEntry => "closed entry".into(),
            ControlKind::OverlayDismiss => "overlay dismiss".into(),
            ControlKind::Field(field) => format!("{} field", field.label()),
            ControlKind::AgreeTerms => "terms checkbox".into(),
            ControlKind::Submit => "submit button".into(),
            ControlKind::Confirmation => "confirmation".into(),
        }
    }
}

/// Handle to one control on the current page: the `ordinal`-th match of `kind`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub kind: ControlKind,
    pub ordinal: usize,
    /// Absolute link target, when the control is a link.
    pub href: Option<String>,
}

impl Control {
    pub fn new(kind: ControlKind, ordinal: usize) -> Self {
        Self {
            kind,
            ordinal,
            href: None,
        }
    }

    pub fn with_href(mut self, href: impl Into<String>) -> Self {
        self.href = Some(href.into());
        self
    }
}

/// A browser engine that hands out isolated contexts, one per show.
#[async_trait]
pub trait Browser: Send + Sync {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>>;
}

/// A single isolated browsing context (own cookies, own tab).
#[async_trait]
pub trait BrowsingContext: Send + Sync {
    /// Navigate and wait for the load, failing after `timeout`.
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;
    /// All controls of `kind` currently on the page, in document order.
    async fn find_controls(&self, kind: ControlKind) -> Result<Vec<Control>>;
    /// Type into an input or pick an option of a select.
    async fn fill(&self, control: &Control, value: &str) -> Result<()>;
    async fn click(&self, control: &Control) -> Result<()>;
    async fn current_url(&self) -> Result<String>;
    async fn title(&self) -> Result<String>;
    /// Whether `probe` (lowercase) appears in the visible body text.
    async fn visible_text(&self, probe: &str) -> Result<bool>;
    async fn body_text_length(&self) -> Result<usize>;
    /// PNG bytes of the current viewport.
    async fn screenshot(&self, label: &str) -> Result<Vec<u8>>;
    async fn move_pointer(&self, x: f64, y: f64) -> Result<()>;
    async fn scroll_by(&self, delta_y: f64) -> Result<()>;
    /// Release the context. Called exactly once.
    async fn close(self: Box<Self>) -> Result<()>;
}

/// Poll until at least one control of `kind` exists, or fail with a timeout.
pub async fn wait_for_controls(
    ctx: &dyn BrowsingContext,
    kind: ControlKind,
    timeout: Duration,
) -> Result<Vec<Control>> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let controls = find_before(ctx, kind, deadline, timeout).await?;
        if !controls.is_empty() {
            return Ok(controls);
        }
        let now = tokio::time::Instant::now();
        if now >= deadline {
            return Err(StagedoorError::Timeout {
                what: kind.describe(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(POLL_INTERVAL.min(deadline - now)).await;
    }
}

/// One `find_controls` call that must finish by `deadline`. `timeout` is the
/// caller's whole budget, reported in the error.
pub(crate) async fn find_before(
    ctx: &dyn BrowsingContext,
    kind: ControlKind,
    deadline: tokio::time::Instant,
    timeout: Duration,
) -> Result<Vec<Control>> {
    match tokio::time::timeout_at(deadline, ctx.find_controls(kind)).await {
        Ok(found) => found,
        Err(_) => Err(StagedoorError::Timeout {
            what: kind.describe(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

/// The first control of `kind`, without waiting.
pub async fn first_control(ctx: &dyn BrowsingContext, kind: ControlKind) -> Result<Control> {
    ctx.find_controls(kind)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| StagedoorError::MissingElement {
            what: kind.describe(),
        })
}
