//! Shared types, errors, user profile, and run report for the Stagedoor engine.
//!
//! This crate provides the foundational types used across all other Stagedoor crates:
//! - `StagedoorError`: unified error taxonomy (technical vs. challenge failures)
//! - `UserProfile`: the person entries are submitted for
//! - `ShowTask` / `EntryTarget`: units of work discovered during a run
//! - `AttemptOutcome` / `ShowSummary` / `RunReport`: what happened

pub mod duration_serde;

use serde::{Deserialize, Serialize};

/// Unified error type for all Stagedoor subsystems.
#[derive(Debug, thiserror::Error)]
pub enum StagedoorError {
    // === Technical failures (retryable) ===
    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Timed out after {timeout_ms}ms waiting for {what}")]
    Timeout { what: String, timeout_ms: u64 },

    #[error("Required element missing: {what}")]
    MissingElement { what: String },

    #[error("Browser error: {0}")]
    Browser(String),

    // === Challenge ===
    #[error("Anti-bot challenge detected at {url} ({signal})")]
    Challenge { url: String, signal: String },

    // === Escalations ===
    #[error("Retries exhausted for '{label}' after {attempts} attempts: {last}")]
    RetryExhausted {
        label: String,
        attempts: usize,
        last: Box<StagedoorError>,
    },

    #[error("Show '{show}' failed: {message}")]
    FatalShow { show: String, message: String },

    // === Inputs ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid user profile: {0}")]
    InvalidProfile(String),

    // === Generic ===
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StagedoorError {
    /// Returns `true` for navigation, timeout, missing-element, and browser errors.
    pub fn is_technical(&self) -> bool {
        matches!(
            self,
            StagedoorError::Navigation { .. }
                | StagedoorError::Timeout { .. }
                | StagedoorError::MissingElement { .. }
                | StagedoorError::Browser(_)
        )
    }

    /// Returns `true` if the error is transient and the operation may succeed on retry.
    ///
    /// A challenge is never retryable, even though it usually shows up during
    /// navigation.
    pub fn is_retryable(&self) -> bool {
        self.is_technical()
    }

    /// Returns `true` if this error is, or wraps, a confirmed challenge.
    pub fn is_challenge(&self) -> bool {
        match self {
            StagedoorError::Challenge { .. } => true,
            StagedoorError::RetryExhausted { last, .. } => last.is_challenge(),
            _ => false,
        }
    }

    /// The signal that identified the challenge, if this is one.
    pub fn challenge_signal(&self) -> Option<&str> {
        match self {
            StagedoorError::Challenge { signal, .. } => Some(signal),
            StagedoorError::RetryExhausted { last, .. } => last.challenge_signal(),
            _ => None,
        }
    }
}

/// A convenience alias for `Result<T, StagedoorError>`.
pub type Result<T> = std::result::Result<T, StagedoorError>;

// ---------------------------------------------------------------------------
// UserProfile
// ---------------------------------------------------------------------------

/// Date of birth as entered into the three separate form inputs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateOfBirth {
    pub month: String,
    pub day: String,
    pub year: String,
}

/// Residence codes offered by the lottery form's country dropdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResidenceCountry {
    UnitedStates,
    Canada,
    Other,
}

impl ResidenceCountry {
    /// Map a free-form country name to the site's residence enumeration.
    /// Anything that is not the US or Canada is `Other`.
    pub fn from_name(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('.', "");
        match normalized.as_str() {
            "" => None,
            "us" | "usa" | "united states" | "united states of america" | "america" => {
                Some(ResidenceCountry::UnitedStates)
            }
            "ca" | "can" | "canada" => Some(ResidenceCountry::Canada),
            _ => Some(ResidenceCountry::Other),
        }
    }

    /// The option label the form expects.
    pub fn code(&self) -> &'static str {
        match self {
            ResidenceCountry::UnitedStates => "USA",
            ResidenceCountry::Canada => "Canada",
            ResidenceCountry::Other => "Other",
        }
    }
}

/// Maximum tickets a single lottery entry may request.
pub const MAX_TICKETS_PER_ENTRY: u8 = 2;

/// The person the lottery entries are submitted for. Read-only for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub first_name: String,
    pub last_name: String,
    pub number_of_tickets: u8,
    pub email: String,
    pub date_of_birth: DateOfBirth,
    pub zip: String,
    pub country_of_residence: String,
}

/// Flat environment variable names used by older deployments.
pub const LEGACY_PROFILE_VARS: [&str; 9] = [
    "FIRST_NAME",
    "LAST_NAME",
    "NUMBER_OF_TICKETS",
    "EMAIL",
    "DOB_MONTH",
    "DOB_DAY",
    "DOB_YEAR",
    "ZIP",
    "COUNTRY_OF_RESIDENCE",
];

impl UserProfile {
    /// Build a profile from the flat legacy variable names.
    ///
    /// `lookup` is usually `|k| std::env::var(k).ok()`.
    pub fn from_flat_env(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .ok_or_else(|| StagedoorError::InvalidProfile(format!("{key} is not set")))
        };

        let tickets = get("NUMBER_OF_TICKETS")?;
        let number_of_tickets = tickets.parse::<u8>().map_err(|_| {
            StagedoorError::InvalidProfile(format!("NUMBER_OF_TICKETS is not a number: {tickets}"))
        })?;

        Ok(Self {
            first_name: get("FIRST_NAME")?,
            last_name: get("LAST_NAME")?,
            number_of_tickets,
            email: get("EMAIL")?,
            date_of_birth: DateOfBirth {
                month: get("DOB_MONTH")?,
                day: get("DOB_DAY")?,
                year: get("DOB_YEAR")?,
            },
            zip: get("ZIP")?,
            country_of_residence: get("COUNTRY_OF_RESIDENCE")?,
        })
    }

    /// Check every field the entry form will need.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(StagedoorError::InvalidProfile(msg));

        if self.first_name.trim().is_empty() {
            return invalid("first name is empty".into());
        }
        if self.last_name.trim().is_empty() {
            return invalid("last name is empty".into());
        }
        if !self.email.contains('@') {
            return invalid(format!("email '{}' has no '@'", self.email));
        }
        if self.number_of_tickets == 0 || self.number_of_tickets > MAX_TICKETS_PER_ENTRY {
            return invalid(format!(
                "number of tickets must be 1..={MAX_TICKETS_PER_ENTRY}, got {}",
                self.number_of_tickets
            ));
        }
        check_component("birth month", &self.date_of_birth.month, 1, 12)?;
        check_component("birth day", &self.date_of_birth.day, 1, 31)?;
        check_component("birth year", &self.date_of_birth.year, 1900, 2100)?;
        if self.zip.trim().is_empty() {
            return invalid("zip is empty".into());
        }
        self.residence()?;
        Ok(())
    }

    /// The residence code for the country dropdown.
    pub fn residence(&self) -> Result<ResidenceCountry> {
        ResidenceCountry::from_name(&self.country_of_residence).ok_or_else(|| {
            StagedoorError::InvalidProfile("country of residence is empty".into())
        })
    }

    /// Email with the local part masked, for logs and reports.
    pub fn masked_email(&self) -> String {
        match self.email.split_once('@') {
            Some((local, domain)) => {
                let first = local.chars().next().unwrap_or('*');
                format!("{first}***@{domain}")
            }
            None => "***".to_string(),
        }
    }
}

fn check_component(name: &str, value: &str, min: u32, max: u32) -> Result<()> {
    match value.trim().parse::<u32>() {
        Ok(n) if (min..=max).contains(&n) => Ok(()),
        _ => Err(StagedoorError::InvalidProfile(format!(
            "{name} must be a number in {min}..={max}, got '{value}'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// ShowTask / EntryTarget
// ---------------------------------------------------------------------------

/// One show landing page to process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowTask {
    pub url: String,
    pub show_name: String,
}

impl ShowTask {
    /// Create a task, deriving the show name from the `/show/<name>/` path segment.
    pub fn from_url(url: impl Into<String>) -> Self {
        let url = url.into();
        let show_name = derive_show_name(&url);
        Self { url, show_name }
    }
}

/// `https://host/show/aladdin/` → `aladdin`. Falls back to the last path
/// segment, then to `"unknown"`.
pub fn derive_show_name(url: &str) -> String {
    let without_scheme = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
    let path = without_scheme
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let segments: Vec<&str> = path.split('/').skip(1).filter(|s| !s.is_empty()).collect();

    if let Some(pos) = segments.iter().position(|s| *s == "show") {
        if let Some(name) = segments.get(pos + 1) {
            return (*name).to_string();
        }
    }
    segments
        .last()
        .map(|s| (*s).to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// How an open entry's form is reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormReference {
    /// The entry control's resolved link.
    Href(String),
    /// No link: the `ordinal`-th open-entry control on the show page must be clicked.
    Control { ordinal: usize },
}

/// One open entry discovered on a show page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryTarget {
    pub index: usize,
    pub reference: FormReference,
}

// ---------------------------------------------------------------------------
// AttemptOutcome
// ---------------------------------------------------------------------------

/// Result of driving one entry through the state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure { reason: String },
    ChallengeDetected,
}

impl AttemptOutcome {
    pub fn failure(reason: impl Into<String>) -> Self {
        AttemptOutcome::Failure {
            reason: reason.into(),
        }
    }

    pub fn is_challenge(&self) -> bool {
        matches!(self, AttemptOutcome::ChallengeDetected)
    }
}

// ---------------------------------------------------------------------------
// ShowSummary
// ---------------------------------------------------------------------------

/// Final disposition of a show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowStatus {
    /// Open entries were found and attempted.
    Available,
    /// No open entries; a normal business state.
    ClosedOrUpcoming,
    /// A challenge was detected while processing this show.
    Blocked,
    /// Not started because the circuit breaker was already tripped.
    Skipped,
    /// A show-level failure outside the per-entry loop.
    Failed,
}

impl ShowStatus {
    pub fn label(&self) -> &'static str {
        match self {
            ShowStatus::Available => "available",
            ShowStatus::ClosedOrUpcoming => "closed/upcoming",
            ShowStatus::Blocked => "blocked",
            ShowStatus::Skipped => "skipped",
            ShowStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShowSummary {
    pub show_name: String,
    pub url: String,
    pub status: ShowStatus,
    /// Open plus closed/upcoming entry indicators found on the show page.
    pub total_entries: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Open entries never attempted because an earlier entry hit a challenge.
    pub abandoned_entries: usize,
    pub error: Option<String>,
}

impl ShowSummary {
    /// A summary in progress for a show with open entries.
    pub fn available(task: &ShowTask, total_entries: usize) -> Self {
        Self {
            show_name: task.show_name.clone(),
            url: task.url.clone(),
            status: ShowStatus::Available,
            total_entries,
            success_count: 0,
            failure_count: 0,
            abandoned_entries: 0,
            error: None,
        }
    }

    pub fn closed_or_upcoming(task: &ShowTask, total_entries: usize) -> Self {
        Self {
            status: ShowStatus::ClosedOrUpcoming,
            ..Self::available(task, total_entries)
        }
    }

    pub fn skipped(task: &ShowTask) -> Self {
        Self {
            status: ShowStatus::Skipped,
            ..Self::available(task, 0)
        }
    }

    pub fn blocked(task: &ShowTask, reason: impl Into<String>) -> Self {
        Self {
            status: ShowStatus::Blocked,
            error: Some(reason.into()),
            ..Self::available(task, 0)
        }
    }

    pub fn failed(task: &ShowTask, reason: impl Into<String>) -> Self {
        Self {
            status: ShowStatus::Failed,
            error: Some(reason.into()),
            ..Self::available(task, 0)
        }
    }

    /// Fold one entry outcome into the counters.
    pub fn record(&mut self, outcome: &AttemptOutcome) {
        match outcome {
            AttemptOutcome::Success => self.success_count += 1,
            AttemptOutcome::Failure { .. } => self.failure_count += 1,
            AttemptOutcome::ChallengeDetected => self.status = ShowStatus::Blocked,
        }
    }
}

// ---------------------------------------------------------------------------
// RunReport
// ---------------------------------------------------------------------------

/// Count of shows per disposition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    pub available: usize,
    pub closed_or_upcoming: usize,
    pub blocked: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// Aggregated result of one batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub shows: Vec<ShowSummary>,
    pub breaker_tripped: bool,
    pub tripped_by: Option<String>,
    pub dry_run: bool,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub finished_at: chrono::DateTime<chrono::Utc>,
}

impl RunReport {
    pub fn counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for show in &self.shows {
            match show.status {
                ShowStatus::Available => counts.available += 1,
                ShowStatus::ClosedOrUpcoming => counts.closed_or_upcoming += 1,
                ShowStatus::Blocked => counts.blocked += 1,
                ShowStatus::Skipped => counts.skipped += 1,
                ShowStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }

    /// Total entries submitted across all shows.
    pub fn total_submitted(&self) -> usize {
        self.shows.iter().map(|s| s.success_count).sum()
    }

    /// No breaker trip and no failed shows.
    pub fn is_clean(&self) -> bool {
        !self.breaker_tripped && self.counts().failed == 0
    }

    pub fn summary(&self, show_name: &str) -> Option<&ShowSummary> {
        self.shows.iter().find(|s| s.show_name == show_name)
    }
}
