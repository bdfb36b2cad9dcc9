//! Engine configuration: retry limits, pacing ranges, timeouts, detector tables.
//!
//! Every field has a default so a config file only needs to mention what it
//! changes. Durations use the human-readable format (`"250ms"`, `"30s"`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use stagedoor_types::{duration_serde, Result, StagedoorError};

use crate::retry::RetryPolicy;

/// Immutable settings for one run, handed to the engine at start-up.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Execute every step except the final submit click.
    pub dry_run: bool,
    /// Shuffle the show list once before the run.
    pub shuffle: bool,
    pub retry: RetryPolicy,
    pub pacing: PacingConfig,
    pub timeouts: Timeouts,
    pub detector: DetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            shuffle: true,
            retry: RetryPolicy::default(),
            pacing: PacingConfig::default(),
            timeouts: Timeouts::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Every delay zeroed, short timeouts, no shuffling.
    pub fn immediate() -> Self {
        Self {
            shuffle: false,
            retry: RetryPolicy {
                max_attempts: 2,
                base_delay: Duration::ZERO,
                max_jitter: Duration::ZERO,
            },
            pacing: PacingConfig::zero(),
            timeouts: Timeouts {
                navigation: Duration::from_millis(200),
                element: Duration::from_millis(50),
                probe: Duration::from_millis(50),
                confirmation: Duration::from_millis(50),
            },
            ..Self::default()
        }
    }

    /// Reject settings the engine cannot honor.
    pub fn validate(&self) -> Result<()> {
        self.pacing.validate()?;
        self.detector.validate()?;
        if self.timeouts.navigation.is_zero() || self.timeouts.element.is_zero() {
            return Err(StagedoorError::Config(
                "navigation and element timeouts must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pacing
// ---------------------------------------------------------------------------

/// `[min, max]` delay ranges per action kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PacingConfig {
    #[serde(with = "duration_serde::range")]
    pub inter_field: (Duration, Duration),
    #[serde(with = "duration_serde::range")]
    pub inter_entry: (Duration, Duration),
    #[serde(with = "duration_serde::range")]
    pub inter_show: (Duration, Duration),
    #[serde(with = "duration_serde::range")]
    pub post_submit: (Duration, Duration),
    /// Move the pointer around a little before filling a form.
    pub idle_motion: bool,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            inter_field: (Duration::from_millis(150), Duration::from_millis(600)),
            inter_entry: (Duration::from_secs(2), Duration::from_secs(6)),
            inter_show: (Duration::from_secs(5), Duration::from_secs(15)),
            post_submit: (Duration::from_millis(1), Duration::from_millis(1000)),
            idle_motion: true,
        }
    }
}

impl PacingConfig {
    pub fn zero() -> Self {
        Self {
            inter_field: (Duration::ZERO, Duration::ZERO),
            inter_entry: (Duration::ZERO, Duration::ZERO),
            inter_show: (Duration::ZERO, Duration::ZERO),
            post_submit: (Duration::ZERO, Duration::ZERO),
            idle_motion: false,
        }
    }

    fn validate(&self) -> Result<()> {
        let ranges = [
            ("inter_field", self.inter_field),
            ("inter_entry", self.inter_entry),
            ("inter_show", self.inter_show),
            ("post_submit", self.post_submit),
        ];
        for (name, (min, max)) in ranges {
            if min > max {
                return Err(StagedoorError::Config(format!(
                    "pacing.{name}: min {}ms exceeds max {}ms",
                    min.as_millis(),
                    max.as_millis()
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Timeouts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    /// Page load after `navigate`.
    #[serde(with = "duration_serde")]
    pub navigation: Duration,
    /// Waiting for a control (form field, entry button) to appear.
    #[serde(with = "duration_serde")]
    pub element: Duration,
    /// A single challenge-phrase visibility probe.
    #[serde(with = "duration_serde")]
    pub probe: Duration,
    /// Waiting for the confirmation signal after submitting.
    #[serde(with = "duration_serde")]
    pub confirmation: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            navigation: Duration::from_secs(30),
            element: Duration::from_secs(10),
            probe: Duration::from_secs(2),
            confirmation: Duration::from_secs(15),
        }
    }
}

// ---------------------------------------------------------------------------
// Detector
// ---------------------------------------------------------------------------

/// Tables driving the challenge heuristic. Phrases are matched case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Regexes matched against the current URL.
    pub url_patterns: Vec<String>,
    /// Substrings of interstitial page titles.
    pub title_phrases: Vec<String>,
    /// Phrases whose visibility in the body means a challenge is on screen.
    pub visible_phrases: Vec<String>,
    /// URL substrings of pages that are normally full of content.
    pub content_rich_markers: Vec<String>,
    /// Body text shorter than this on a content-rich URL counts as a silent block.
    pub min_body_text_length: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            url_patterns: vec![
                r"__cf_chl_".into(),
                r"/cdn-cgi/challenge-platform/".into(),
                r"/cdn-cgi/l/chk_".into(),
                r"challenges\.cloudflare\.com".into(),
            ],
            title_phrases: vec![
                "just a moment".into(),
                "attention required".into(),
                "access denied".into(),
                "security check".into(),
                "please wait".into(),
            ],
            visible_phrases: vec![
                "verifying you are human".into(),
                "verify you are human".into(),
                "checking your browser".into(),
                "ray id".into(),
                "needs to review the security of your connection".into(),
                "enable javascript and cookies to continue".into(),
            ],
            content_rich_markers: vec!["/show/".into(), "enter-lottery".into()],
            min_body_text_length: 200,
        }
    }
}

impl DetectorConfig {
    fn validate(&self) -> Result<()> {
        if self.url_patterns.is_empty()
            && self.title_phrases.is_empty()
            && self.visible_phrases.is_empty()
        {
            return Err(StagedoorError::Config(
                "detector has no url patterns, title phrases, or visible phrases".into(),
            ));
        }
        for pattern in &self.url_patterns {
            regex::Regex::new(pattern).map_err(|e| {
                StagedoorError::Config(format!("detector url pattern '{pattern}': {e}"))
            })?;
        }
        Ok(())
    }
}
