//! Challenge detection: classify the current page as clear or challenged.
//!
//! Collecting signals ([`PageSnapshot::capture`]) is kept apart from the
//! decision ([`ChallengeDetector::classify`]), so classification is a pure
//! function of an immutable snapshot.

use std::fmt;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use stagedoor_types::{Result, StagedoorError};

use crate::browser::BrowsingContext;
use crate::config::DetectorConfig;

/// Signals gathered from a page at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSnapshot {
    pub url: String,
    pub title: String,
    /// Challenge phrases found visible, in probe order.
    pub visible_phrases: Vec<String>,
    /// `None` when the length could not be read.
    pub body_text_length: Option<usize>,
}

impl PageSnapshot {
    /// Probe `ctx` for every signal the detector needs.
    ///
    /// A probe that errors or exceeds `probe_timeout` counts as "not matched";
    /// capture itself never fails.
    pub async fn capture(
        ctx: &dyn BrowsingContext,
        phrases: &[String],
        probe_timeout: Duration,
    ) -> Self {
        let url = probe(ctx.current_url(), probe_timeout, "current url")
            .await
            .unwrap_or_default();
        let title = probe(ctx.title(), probe_timeout, "title")
            .await
            .unwrap_or_default();

        let mut visible_phrases = Vec::new();
        for phrase in phrases {
            if probe(ctx.visible_text(phrase), probe_timeout, phrase)
                .await
                .unwrap_or(false)
            {
                visible_phrases.push(phrase.clone());
            }
        }

        let body_text_length = probe(ctx.body_text_length(), probe_timeout, "body length").await;

        Self {
            url,
            title,
            visible_phrases,
            body_text_length,
        }
    }
}

async fn probe<T>(
    fut: impl std::future::Future<Output = Result<T>>,
    timeout: Duration,
    what: &str,
) -> Option<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::debug!(probe = %what, error = %e, "Probe failed, treating as not matched");
            None
        }
        Err(_) => {
            tracing::debug!(probe = %what, timeout_ms = timeout.as_millis() as u64, "Probe timed out, treating as not matched");
            None
        }
    }
}

/// Why a page was classified as challenged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ChallengeSignal {
    ChallengeUrl { pattern: String },
    InterstitialTitle { phrase: String },
    VisiblePhrase { phrase: String },
    BlankContent { length: usize, minimum: usize },
}

impl fmt::Display for ChallengeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChallengeSignal::ChallengeUrl { pattern } => write!(f, "url matches '{pattern}'"),
            ChallengeSignal::InterstitialTitle { phrase } => write!(f, "title contains '{phrase}'"),
            ChallengeSignal::VisiblePhrase { phrase } => write!(f, "page shows '{phrase}'"),
            ChallengeSignal::BlankContent { length, minimum } => {
                write!(f, "body text {length} chars, expected at least {minimum}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Classification {
    Clear,
    Challenged { signal: ChallengeSignal },
}

impl Classification {
    pub fn is_challenged(&self) -> bool {
        matches!(self, Classification::Challenged { .. })
    }
}

/// Compiled detector tables.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    url_patterns: Vec<Regex>,
    title_phrases: Vec<String>,
    visible_phrases: Vec<String>,
    content_rich_markers: Vec<String>,
    min_body_text_length: usize,
}

impl ChallengeDetector {
    pub fn new(config: &DetectorConfig) -> Result<Self> {
        let url_patterns = config
            .url_patterns
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| {
                    StagedoorError::Config(format!("detector url pattern '{p}': {e}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let lower = |v: &[String]| v.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();

        Ok(Self {
            url_patterns,
            title_phrases: lower(&config.title_phrases),
            visible_phrases: lower(&config.visible_phrases),
            content_rich_markers: config.content_rich_markers.clone(),
            min_body_text_length: config.min_body_text_length,
        })
    }

    /// Phrases to probe for when capturing a snapshot.
    pub fn visible_phrases(&self) -> &[String] {
        &self.visible_phrases
    }

    /// Apply the rules in order; the first match wins.
    ///
    /// 1. challenge-token URL
    /// 2. interstitial title
    /// 3. visible challenge phrase
    /// 4. near-empty body on a URL that is normally content-rich
    pub fn classify(&self, snapshot: &PageSnapshot) -> Classification {
        if let Some(re) = self.url_patterns.iter().find(|re| re.is_match(&snapshot.url)) {
            return Classification::Challenged {
                signal: ChallengeSignal::ChallengeUrl {
                    pattern: re.as_str().to_string(),
                },
            };
        }

        let title = snapshot.title.to_lowercase();
        if let Some(phrase) = self.title_phrases.iter().find(|p| title.contains(p.as_str())) {
            return Classification::Challenged {
                signal: ChallengeSignal::InterstitialTitle {
                    phrase: phrase.clone(),
                },
            };
        }

        if let Some(phrase) = snapshot
            .visible_phrases
            .iter()
            .find(|p| self.visible_phrases.contains(&p.to_lowercase()))
        {
            return Classification::Challenged {
                signal: ChallengeSignal::VisiblePhrase {
                    phrase: phrase.clone(),
                },
            };
        }

        if let Some(length) = snapshot.body_text_length {
            if length < self.min_body_text_length && self.is_content_rich(&snapshot.url) {
                return Classification::Challenged {
                    signal: ChallengeSignal::BlankContent {
                        length,
                        minimum: self.min_body_text_length,
                    },
                };
            }
        }

        Classification::Clear
    }

    fn is_content_rich(&self, url: &str) -> bool {
        self.content_rich_markers.iter().any(|m| url.contains(m.as_str()))
    }

    /// Capture and classify the current page of `ctx`.
    pub async fn inspect(
        &self,
        ctx: &dyn BrowsingContext,
        probe_timeout: Duration,
    ) -> (PageSnapshot, Classification) {
        let snapshot = PageSnapshot::capture(ctx, &self.visible_phrases, probe_timeout).await;
        let classification = self.classify(&snapshot);
        (snapshot, classification)
    }

    /// Like [`inspect`](Self::inspect), but turns a challenge into
    /// [`StagedoorError::Challenge`].
    pub async fn ensure_clear(
        &self,
        ctx: &dyn BrowsingContext,
        probe_timeout: Duration,
    ) -> Result<()> {
        let (snapshot, classification) = self.inspect(ctx, probe_timeout).await;
        match classification {
            Classification::Clear => Ok(()),
            Classification::Challenged { signal } => {
                tracing::warn!(url = %snapshot.url, signal = %signal, "Challenge detected");
                Err(StagedoorError::Challenge {
                    url: snapshot.url,
                    signal: signal.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Browser;
    use crate::testing::{PageScript, ScriptedBrowser, Site};

    fn detector() -> ChallengeDetector {
        ChallengeDetector::new(&DetectorConfig::default()).unwrap()
    }

    fn snapshot(url: &str, title: &str, phrases: &[&str], len: Option<usize>) -> PageSnapshot {
        PageSnapshot {
            url: url.into(),
            title: title.into(),
            visible_phrases: phrases.iter().map(|p| p.to_string()).collect(),
            body_text_length: len,
        }
    }

    #[test]
    fn clear_page() {
        let snap = snapshot("https://x/show/aladdin/", "Aladdin Lottery", &[], Some(5000));
        assert_eq!(detector().classify(&snap), Classification::Clear);
    }

    #[test]
    fn challenge_url_wins_over_everything() {
        let snap = snapshot(
            "https://x/show/a/?__cf_chl_rt_tk=abc",
            "Just a moment...",
            &["ray id"],
            Some(10),
        );
        match detector().classify(&snap) {
            Classification::Challenged {
                signal: ChallengeSignal::ChallengeUrl { pattern },
            } => assert_eq!(pattern, "__cf_chl_"),
            other => panic!("expected url signal, got {other:?}"),
        }
    }

    #[test]
    fn title_rule_is_case_insensitive() {
        let snap = snapshot("https://x/show/a/", "JUST A MOMENT...", &[], Some(5000));
        assert!(matches!(
            detector().classify(&snap),
            Classification::Challenged {
                signal: ChallengeSignal::InterstitialTitle { .. }
            }
        ));
    }

    #[test]
    fn visible_phrase_rule() {
        let snap = snapshot("https://x/show/a/", "Lottery", &["checking your browser"], Some(5000));
        assert_eq!(
            detector().classify(&snap),
            Classification::Challenged {
                signal: ChallengeSignal::VisiblePhrase {
                    phrase: "checking your browser".into()
                }
            }
        );
    }

    #[test]
    fn blank_content_rich_page_is_challenged() {
        let snap = snapshot("https://x/show/a/", "", &[], Some(12));
        assert_eq!(
            detector().classify(&snap),
            Classification::Challenged {
                signal: ChallengeSignal::BlankContent {
                    length: 12,
                    minimum: 200
                }
            }
        );
    }

    #[test]
    fn blank_page_elsewhere_is_clear() {
        let snap = snapshot("https://x/thank-you", "Thanks", &[], Some(12));
        assert_eq!(detector().classify(&snap), Classification::Clear);
    }

    #[test]
    fn unknown_body_length_skips_blank_rule() {
        let snap = snapshot("https://x/show/a/", "Lottery", &[], None);
        assert_eq!(detector().classify(&snap), Classification::Clear);
    }

    #[test]
    fn classify_is_idempotent() {
        let d = detector();
        let snap = snapshot("https://x/show/a/", "Attention Required!", &[], Some(40));
        assert_eq!(d.classify(&snap), d.classify(&snap));
        let clear = snapshot("https://x/show/a/", "Lottery", &[], Some(900));
        assert_eq!(d.classify(&clear), d.classify(&clear));
    }

    #[test]
    fn invalid_pattern_is_config_error() {
        let mut config = DetectorConfig::default();
        config.url_patterns.push("[".into());
        assert!(matches!(
            ChallengeDetector::new(&config),
            Err(StagedoorError::Config(_))
        ));
    }

    #[tokio::test]
    async fn capture_reads_scripted_challenge_page() {
        let site = Site::new().page("https://x/show/a/", PageScript::challenge());
        let browser = ScriptedBrowser::new(site);
        let ctx = browser.new_context().await.unwrap();
        ctx.navigate("https://x/show/a/", Duration::from_secs(1))
            .await
            .unwrap();

        let d = detector();
        let (snap, class) = d.inspect(ctx.as_ref(), Duration::from_millis(100)).await;
        assert_eq!(snap.title, "Just a moment...");
        assert!(snap.visible_phrases.contains(&"checking your browser".to_string()));
        assert!(snap.visible_phrases.contains(&"ray id".to_string()));
        assert!(class.is_challenged());

        let err = d
            .ensure_clear(ctx.as_ref(), Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_challenge());
    }

    #[tokio::test]
    async fn failing_probes_count_as_not_matched() {
        let page = PageScript::challenge()
            .with_title("Lottery")
            .with_probe_error();
        let site = Site::new().page("https://x/other", page);
        let browser = ScriptedBrowser::new(site);
        let ctx = browser.new_context().await.unwrap();
        ctx.navigate("https://x/other", Duration::from_secs(1))
            .await
            .unwrap();

        let (snap, class) = detector()
            .inspect(ctx.as_ref(), Duration::from_millis(100))
            .await;
        assert!(snap.visible_phrases.is_empty());
        assert_eq!(class, Classification::Clear);
    }

    #[tokio::test]
    async fn slow_probes_time_out_as_not_matched() {
        let page = PageScript::challenge()
            .with_title("Lottery")
            .with_probe_delay(Duration::from_secs(5));
        let site = Site::new().page("https://x/other", page);
        let browser = ScriptedBrowser::new(site);
        let ctx = browser.new_context().await.unwrap();
        ctx.navigate("https://x/other", Duration::from_secs(1))
            .await
            .unwrap();

        let (snap, class) = detector()
            .inspect(ctx.as_ref(), Duration::from_millis(20))
            .await;
        assert!(snap.visible_phrases.is_empty());
        assert_eq!(class, Classification::Clear);
    }
}
