//! Diagnostics sink: screenshots and metadata captured at failure points.
//!
//! Recording is fire-and-forget. A sink swallows its own failures so that
//! nothing it does can change the outcome of a show or entry.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::browser::BrowsingContext;

/// One captured moment.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticRecord {
    pub show: String,
    /// Where the capture happened, e.g. `"landing-challenge"`.
    pub stage: String,
    pub entry_index: Option<usize>,
    #[serde(skip)]
    pub screenshot: Option<Vec<u8>>,
    pub metadata: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait DiagnosticsSink: Send + Sync {
    async fn record(&self, record: DiagnosticRecord);
}

/// Take a screenshot (if possible within `screenshot_timeout`) and hand the
/// record to `sink`.
pub async fn capture(
    ctx: &dyn BrowsingContext,
    sink: &dyn DiagnosticsSink,
    show: &str,
    stage: &str,
    entry_index: Option<usize>,
    metadata: serde_json::Value,
    screenshot_timeout: Duration,
) {
    let label = match entry_index {
        Some(i) => format!("{show}-{stage}-{i}"),
        None => format!("{show}-{stage}"),
    };
    let screenshot = match tokio::time::timeout(screenshot_timeout, ctx.screenshot(&label)).await {
        Ok(Ok(bytes)) => Some(bytes),
        Ok(Err(e)) => {
            tracing::debug!(show = %show, stage = %stage, error = %e, "Screenshot failed");
            None
        }
        Err(_) => {
            tracing::debug!(
                show = %show,
                stage = %stage,
                timeout_ms = screenshot_timeout.as_millis() as u64,
                "Screenshot timed out"
            );
            None
        }
    };
    sink.record(DiagnosticRecord {
        show: show.to_string(),
        stage: stage.to_string(),
        entry_index,
        screenshot,
        metadata,
        timestamp: Utc::now(),
    })
    .await;
}

/// Logs each record; images are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

#[async_trait]
impl DiagnosticsSink for TracingSink {
    async fn record(&self, record: DiagnosticRecord) {
        tracing::info!(
            show = %record.show,
            stage = %record.stage,
            entry = ?record.entry_index,
            screenshot_bytes = record.screenshot.as_ref().map_or(0, Vec::len),
            metadata = %record.metadata,
            "Diagnostic captured"
        );
    }
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullSink;

#[async_trait]
impl DiagnosticsSink for NullSink {
    async fn record(&self, _record: DiagnosticRecord) {}
}

/// Writes `<root>/<show>/<timestamp>-<stage>[-<entry>].png` plus a `.json`
/// metadata file next to it.
#[derive(Debug, Clone)]
pub struct DirectorySink {
    root: PathBuf,
}

impl DirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn stem(record: &DiagnosticRecord) -> String {
        let ts = record.timestamp.format("%Y%m%dT%H%M%S%.3fZ");
        match record.entry_index {
            Some(i) => format!("{ts}-{}-{i}", record.stage),
            None => format!("{ts}-{}", record.stage),
        }
    }

    async fn write(&self, record: &DiagnosticRecord) -> std::io::Result<PathBuf> {
        let dir = self.root.join(sanitize(&record.show));
        tokio::fs::create_dir_all(&dir).await?;

        let stem = Self::stem(record);
        if let Some(png) = &record.screenshot {
            tokio::fs::write(dir.join(format!("{stem}.png")), png).await?;
        }
        let json = serde_json::to_vec_pretty(record)?;
        let meta_path = dir.join(format!("{stem}.json"));
        tokio::fs::write(&meta_path, json).await?;
        Ok(meta_path)
    }
}

#[async_trait]
impl DiagnosticsSink for DirectorySink {
    async fn record(&self, record: DiagnosticRecord) {
        match self.write(&record).await {
            Ok(path) => tracing::info!(path = %path.display(), "Diagnostic written"),
            Err(e) => tracing::warn!(
                show = %record.show,
                stage = %record.stage,
                error = %e,
                "Failed to write diagnostic, ignoring"
            ),
        }
    }
}

/// Keep show names usable as directory names.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.is_empty() {
        "unknown".to_string()
    } else {
        cleaned
    }
}
