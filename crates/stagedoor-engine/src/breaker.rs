//! Run-scoped circuit breaker.
//!
//! Tripped at most once per run; the first show to trip it is remembered.
//! The breaker never resets, so a fresh one is created for every run.

use std::sync::OnceLock;

use serde::{Deserialize, Serialize};

#[derive(Debug, Default)]
pub struct CircuitBreaker {
    tripped_by: OnceLock<String>,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trip the breaker on behalf of `show`. Returns `true` only for the call
    /// that actually tripped it.
    pub fn trip(&self, show: &str) -> bool {
        let won = self.tripped_by.set(show.to_string()).is_ok();
        if won {
            tracing::warn!(show = %show, "Circuit breaker tripped");
        } else {
            tracing::debug!(
                show = %show,
                tripped_by = ?self.tripped_by.get(),
                "Circuit breaker already tripped"
            );
        }
        won
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped_by.get().is_some()
    }

    pub fn tripped_by(&self) -> Option<&str> {
        self.tripped_by.get().map(String::as_str)
    }

    pub fn state(&self) -> CircuitBreakerState {
        CircuitBreakerState {
            tripped: self.is_tripped(),
            tripped_by_show: self.tripped_by().map(str::to_string),
        }
    }
}

/// Point-in-time copy of the breaker, for reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitBreakerState {
    pub tripped: bool,
    pub tripped_by_show: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_untripped() {
        let breaker = CircuitBreaker::new();
        assert!(!breaker.is_tripped());
        assert_eq!(breaker.tripped_by(), None);
        assert_eq!(
            breaker.state(),
            CircuitBreakerState {
                tripped: false,
                tripped_by_show: None
            }
        );
    }

    #[test]
    fn first_trip_wins() {
        let breaker = CircuitBreaker::new();
        assert!(breaker.trip("aladdin"));
        assert!(!breaker.trip("wicked"));
        assert!(!breaker.trip("aladdin"));
        assert!(breaker.is_tripped());
        assert_eq!(breaker.tripped_by(), Some("aladdin"));
    }

    #[test]
    fn concurrent_trips_have_one_winner() {
        let breaker = Arc::new(CircuitBreaker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let b = breaker.clone();
                std::thread::spawn(move || b.trip(&format!("show-{i}")))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(breaker.tripped_by().unwrap().starts_with("show-"));
    }
}
