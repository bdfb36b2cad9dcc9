//! Chromium browsing adapter built on chromiumoxide.
//!
//! Each [`BrowsingContext`] is a freshly launched browser with a single page,
//! so shows never share cookies or storage. All page interaction goes through
//! small JavaScript snippets from [`selectors`].

pub mod selectors;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser as CdpBrowser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
use chromiumoxide::page::{Page, ScreenshotParams};
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use stagedoor_engine::{Browser, BrowsingContext, Control, ControlKind};
use stagedoor_types::{Result, StagedoorError};
use tokio::task::JoinHandle;

/// Launch settings. Everything else about the browser is chromiumoxide's default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserOptions {
    pub headless: bool,
    /// Chrome/Chromium binary; auto-detected when unset.
    pub executable: Option<PathBuf>,
    pub window_width: u32,
    pub window_height: u32,
    /// Extra command-line switches.
    pub args: Vec<String>,
}

impl Default for BrowserOptions {
    fn default() -> Self {
        Self {
            headless: true,
            executable: None,
            window_width: 1366,
            window_height: 900,
            args: vec![
                "--disable-blink-features=AutomationControlled".into(),
                "--disable-dev-shm-usage".into(),
                "--no-first-run".into(),
            ],
        }
    }
}

/// Hands out one isolated Chromium instance per context.
#[derive(Debug, Clone, Default)]
pub struct ChromiumBrowser {
    options: BrowserOptions,
}

impl ChromiumBrowser {
    pub fn new(options: BrowserOptions) -> Self {
        Self { options }
    }

    fn config(&self) -> Result<BrowserConfig> {
        let mut builder = BrowserConfig::builder()
            .window_size(self.options.window_width, self.options.window_height);
        if !self.options.headless {
            builder = builder.with_head();
        }
        if let Some(path) = &self.options.executable {
            builder = builder.chrome_executable(path);
        }
        for arg in &self.options.args {
            builder = builder.arg(arg.as_str());
        }
        builder
            .build()
            .map_err(|e| StagedoorError::Browser(format!("failed to build browser config: {e}")))
    }
}

#[async_trait]
impl Browser for ChromiumBrowser {
    async fn new_context(&self) -> Result<Box<dyn BrowsingContext>> {
        let (browser, mut handler) = CdpBrowser::launch(self.config()?)
            .await
            .map_err(|e| StagedoorError::Browser(format!("failed to launch Chromium: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                let _ = event;
            }
        });

        let page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(e) => {
                handler.abort();
                return Err(StagedoorError::Browser(format!("failed to open page: {e}")));
            }
        };

        tracing::debug!(headless = self.options.headless, "Launched Chromium context");
        Ok(Box::new(ChromiumContext {
            page,
            browser,
            handler,
        }))
    }
}

/// One Chromium process with one page.
pub struct ChromiumContext {
    page: Page,
    browser: CdpBrowser,
    handler: JoinHandle<()>,
}

#[derive(Deserialize)]
struct FoundControl {
    ordinal: usize,
    href: Option<String>,
}

impl ChromiumContext {
    async fn eval<T: DeserializeOwned>(&self, script: &str) -> Result<T> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| StagedoorError::Browser(format!("script failed: {e}")))?
            .into_value()
            .map_err(|e| StagedoorError::Browser(format!("unexpected script result: {e:?}")))
    }

    fn check_status(status: &str, control: &Control) -> Result<()> {
        match status {
            "ok" => Ok(()),
            "missing" => Err(StagedoorError::MissingElement {
                what: control.kind.describe(),
            }),
            other => Err(StagedoorError::Browser(format!(
                "{} rejected input: {other}",
                control.kind.describe()
            ))),
        }
    }
}

#[async_trait]
impl BrowsingContext for ChromiumContext {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        // goto and the load wait share one budget.
        let load = async {
            self.page.goto(url).await?;
            self.page.wait_for_navigation().await?;
            Ok::<_, chromiumoxide::error::CdpError>(())
        };
        match tokio::time::timeout(timeout, load).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(StagedoorError::Navigation {
                url: url.to_string(),
                message: e.to_string(),
            }),
            Err(_) => Err(StagedoorError::Timeout {
                what: format!("navigation to {url}"),
                timeout_ms: timeout.as_millis() as u64,
            }),
        }
    }

    async fn find_controls(&self, kind: ControlKind) -> Result<Vec<Control>> {
        // Evaluation fails while the page is between documents; that reads as
        // "nothing there yet" to a polling caller.
        let found: Vec<FoundControl> = match self.eval(&selectors::find_script(kind)).await {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(kind = ?kind, error = %e, "Control lookup failed");
                return Ok(Vec::new());
            }
        };
        Ok(found
            .into_iter()
            .map(|f| Control {
                kind,
                ordinal: f.ordinal,
                href: f.href,
            })
            .collect())
    }

    async fn fill(&self, control: &Control, value: &str) -> Result<()> {
        let status: String = self
            .eval(&selectors::fill_script(control.kind, control.ordinal, value))
            .await?;
        Self::check_status(&status, control)
    }

    async fn click(&self, control: &Control) -> Result<()> {
        let status: String = self
            .eval(&selectors::click_script(control.kind, control.ordinal))
            .await?;
        Self::check_status(&status, control)
    }

    async fn current_url(&self) -> Result<String> {
        let url = self
            .page
            .url()
            .await
            .map_err(|e| StagedoorError::Browser(format!("failed to read URL: {e}")))?
            .map(|u| u.to_string())
            .unwrap_or_default();
        Ok(url)
    }

    async fn title(&self) -> Result<String> {
        self.eval(selectors::TITLE_SCRIPT).await
    }

    async fn visible_text(&self, probe: &str) -> Result<bool> {
        self.eval(&selectors::visible_text_script(probe)).await
    }

    async fn body_text_length(&self) -> Result<usize> {
        self.eval(selectors::BODY_LENGTH_SCRIPT).await
    }

    async fn screenshot(&self, label: &str) -> Result<Vec<u8>> {
        tracing::debug!(label = %label, "Taking screenshot");
        self.page
            .screenshot(
                ScreenshotParams::builder()
                    .format(CaptureScreenshotFormat::Png)
                    .build(),
            )
            .await
            .map_err(|e| StagedoorError::Browser(format!("screenshot failed: {e}")))
    }

    async fn move_pointer(&self, x: f64, y: f64) -> Result<()> {
        self.eval::<bool>(&selectors::pointer_script(x, y)).await?;
        Ok(())
    }

    async fn scroll_by(&self, delta_y: f64) -> Result<()> {
        self.eval::<bool>(&selectors::scroll_script(delta_y)).await?;
        Ok(())
    }

    async fn close(self: Box<Self>) -> Result<()> {
        let ChromiumContext {
            page,
            mut browser,
            handler,
        } = *self;

        if let Err(e) = page.close().await {
            tracing::debug!(error = %e, "Page close failed");
        }
        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| StagedoorError::Browser(format!("failed to close Chromium: {e}")));
        if let Err(e) = browser.wait().await {
            tracing::debug!(error = %e, "Waiting for Chromium to exit failed");
        }
        handler.abort();
        closed
    }
}
