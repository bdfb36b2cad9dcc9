//! Human-like pacing: randomized delays and idle pointer motion.
//!
//! Pacing only affects how a run looks to the site, never what it does.
//! [`NoopPacer`] can replace [`HumanPacer`] without changing any outcome.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::browser::BrowsingContext;
use crate::config::PacingConfig;

/// Actions that get a pause before them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    InterField,
    InterEntry,
    InterShow,
    PostSubmit,
}

#[async_trait]
pub trait Pacer: Send + Sync {
    /// How long to wait before an action of `kind`.
    fn delay_before(&self, kind: ActionKind) -> Duration;

    /// A random duration in `[0, max]`, used for retry backoff jitter.
    fn jitter(&self, max: Duration) -> Duration;

    /// Wiggle the pointer and scroll a little. Never fails.
    async fn simulate_idle_motion(&self, surface: &dyn BrowsingContext);
}

/// Sleep for the pacer's delay before `kind`, if any.
pub async fn pause(pacer: &dyn Pacer, kind: ActionKind) {
    let delay = pacer.delay_before(kind);
    if !delay.is_zero() {
        tracing::trace!(?kind, delay_ms = delay.as_millis() as u64, "Pausing");
        tokio::time::sleep(delay).await;
    }
}

fn sample(range: (Duration, Duration)) -> Duration {
    let (min, max) = range;
    if max <= min {
        return min;
    }
    let millis = rand::thread_rng().gen_range(min.as_millis() as u64..=max.as_millis() as u64);
    Duration::from_millis(millis)
}

/// Draws delays uniformly from the configured ranges.
#[derive(Debug, Clone)]
pub struct HumanPacer {
    config: PacingConfig,
}

impl HumanPacer {
    pub fn new(config: PacingConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Pacer for HumanPacer {
    fn delay_before(&self, kind: ActionKind) -> Duration {
        let range = match kind {
            ActionKind::InterField => self.config.inter_field,
            ActionKind::InterEntry => self.config.inter_entry,
            ActionKind::InterShow => self.config.inter_show,
            ActionKind::PostSubmit => self.config.post_submit,
        };
        sample(range)
    }

    fn jitter(&self, max: Duration) -> Duration {
        sample((Duration::ZERO, max))
    }

    async fn simulate_idle_motion(&self, surface: &dyn BrowsingContext) {
        if !self.config.idle_motion {
            return;
        }

        // ThreadRng is not Send; draw everything before the first await.
        let (moves, scroll) = {
            let mut rng = rand::thread_rng();
            let count = rng.gen_range(2..=4);
            let moves: Vec<(f64, f64, u64)> = (0..count)
                .map(|_| {
                    (
                        rng.gen_range(80.0..900.0),
                        rng.gen_range(80.0..600.0),
                        rng.gen_range(40..180),
                    )
                })
                .collect();
            (moves, rng.gen_range(60.0..320.0))
        };

        for (x, y, settle_ms) in moves {
            if let Err(e) = surface.move_pointer(x, y).await {
                tracing::debug!(error = %e, "Idle pointer motion failed, ignoring");
                return;
            }
            tokio::time::sleep(Duration::from_millis(settle_ms)).await;
        }
        if let Err(e) = surface.scroll_by(scroll).await {
            tracing::debug!(error = %e, "Idle scroll failed, ignoring");
        }
    }
}

/// Zero delays, no motion.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopPacer;

#[async_trait]
impl Pacer for NoopPacer {
    fn delay_before(&self, _kind: ActionKind) -> Duration {
        Duration::ZERO
    }

    fn jitter(&self, _max: Duration) -> Duration {
        Duration::ZERO
    }

    async fn simulate_idle_motion(&self, _surface: &dyn BrowsingContext) {}
}
