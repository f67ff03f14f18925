//! Per-domain circuit breaker.
//!
//! A domain enters cool-off after `failure_threshold` terminal failures
//! within `window`; while open, calls targeting it short-circuit without
//! touching the driver. A single success closes the circuit early.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::warn;

/// Breaker tuning.
#[derive(Debug, Clone, Copy)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub window: Duration,
    pub cool_off: Duration,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            window: Duration::from_secs(30),
            cool_off: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct DomainState {
    consecutive_errors: u32,
    first_error_at: Option<Instant>,
    opened_at: Option<Instant>,
}

/// Outcome of a pre-call breaker check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CircuitDecision {
    Allow,
    Open { remaining: Duration },
}

/// Process-wide per-domain breaker map.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    config: CircuitConfig,
    domains: DashMap<String, DomainState>,
    opens: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(config: CircuitConfig) -> Self {
        Self {
            config,
            domains: DashMap::new(),
            opens: AtomicU64::new(0),
        }
    }

    /// Check whether a call to `domain` may proceed. An expired cool-off
    /// resets the domain and lets the call through.
    pub fn check(&self, domain: &str) -> CircuitDecision {
        let Some(mut state) = self.domains.get_mut(domain) else {
            return CircuitDecision::Allow;
        };
        if let Some(opened_at) = state.opened_at {
            let elapsed = opened_at.elapsed();
            if elapsed < self.config.cool_off {
                return CircuitDecision::Open {
                    remaining: self.config.cool_off - elapsed,
                };
            }
            *state = DomainState::default();
        }
        CircuitDecision::Allow
    }

    /// Record one terminal failure. Returns true when this failure opened
    /// the circuit.
    pub fn record_failure(&self, domain: &str) -> bool {
        let now = Instant::now();
        let mut state = self.domains.entry(domain.to_string()).or_default();

        let window_expired = state
            .first_error_at
            .is_some_and(|first| now.duration_since(first) > self.config.window);
        if window_expired || state.first_error_at.is_none() {
            state.consecutive_errors = 0;
            state.first_error_at = Some(now);
        }
        state.consecutive_errors += 1;

        if state.opened_at.is_none() && state.consecutive_errors >= self.config.failure_threshold {
            state.opened_at = Some(now);
            self.opens.fetch_add(1, Ordering::Relaxed);
            warn!(domain, "Circuit opened");
            return true;
        }
        false
    }

    /// A success clears the domain entirely, closing an open circuit.
    pub fn record_success(&self, domain: &str) {
        self.domains.remove(domain);
    }

    /// Process-wide count of circuit opens (observability).
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }
}

/// Extract the breaker key from a URL; falls back to the raw string for
/// things that do not parse (file paths, about:blank).
pub fn domain_of(url_str: &str) -> String {
    url::Url::parse(url_str)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
        .unwrap_or_else(|| url_str.to_string())
}
