//! Retry policy table and backoff math.

use std::time::Duration;

use rand::Rng;

use super::classifier::ErrorKind;

/// All delays, jitter included, are capped here.
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Backoff progression for one error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffKind {
    /// Same base delay every attempt.
    Fixed,
    /// `base * (n + 1)`.
    Linear,
    /// `base * 2^n`.
    Exponential,
    /// `min(base * 2^n, cap) + uniform(0, 0.25 * base * 2^n)`.
    ExponentialJitter,
}

/// Retry behavior for one error kind.
#[derive(Debug, Clone, Copy)]
pub struct RetryRule {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub base: Duration,
    pub retryable: bool,
    /// Refresh the snapshot before the next attempt.
    pub resnapshot: bool,
    /// Reload the page before the next attempt.
    pub reload: bool,
}

impl RetryRule {
    const fn new(max_attempts: u32, backoff: BackoffKind, base_ms: u64) -> Self {
        Self {
            max_attempts,
            backoff,
            base: Duration::from_millis(base_ms),
            retryable: true,
            resnapshot: false,
            reload: false,
        }
    }

    const fn terminal(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: BackoffKind::Fixed,
            base: Duration::from_millis(0),
            retryable: false,
            resnapshot: false,
            reload: false,
        }
    }

    const fn with_resnapshot(mut self) -> Self {
        self.resnapshot = true;
        self
    }

    const fn with_reload(mut self) -> Self {
        self.reload = true;
        self
    }
}

/// Configuration-driven policy table, one rule per [`ErrorKind`].
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    transient_timeout: RetryRule,
    rate_limit: RetryRule,
    server_5xx: RetryRule,
    selector_missing: RetryRule,
    stale_element: RetryRule,
    connection_reset: RetryRule,
    page_crash: RetryRule,
    obstruction: RetryRule,
    captcha: RetryRule,
    not_found_4xx: RetryRule,
    auth_required: RetryRule,
    circuit_open: RetryRule,
    unknown: RetryRule,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            transient_timeout: RetryRule::new(3, BackoffKind::Exponential, 0),
            rate_limit: RetryRule::new(3, BackoffKind::ExponentialJitter, 30_000),
            server_5xx: RetryRule::new(4, BackoffKind::ExponentialJitter, 5_000),
            selector_missing: RetryRule::new(3, BackoffKind::Linear, 1_000).with_resnapshot(),
            stale_element: RetryRule::new(3, BackoffKind::Fixed, 500).with_resnapshot(),
            connection_reset: RetryRule::new(3, BackoffKind::ExponentialJitter, 1_000),
            page_crash: RetryRule::new(2, BackoffKind::Linear, 2_000).with_reload(),
            // Auto-dismiss happens in validation; one retry after that.
            obstruction: RetryRule::new(2, BackoffKind::Fixed, 0),
            captcha: RetryRule::terminal(1),
            not_found_4xx: RetryRule::terminal(1),
            auth_required: RetryRule::terminal(1),
            circuit_open: RetryRule::terminal(1),
            unknown: RetryRule::new(2, BackoffKind::Exponential, 1_000),
        }
    }
}

impl RetryPolicy {
    pub fn rule(&self, kind: ErrorKind) -> RetryRule {
        match kind {
            ErrorKind::TransientTimeout => self.transient_timeout,
            ErrorKind::RateLimit => self.rate_limit,
            ErrorKind::Server5xx => self.server_5xx,
            ErrorKind::SelectorMissing => self.selector_missing,
            ErrorKind::StaleElement => self.stale_element,
            ErrorKind::ConnectionReset => self.connection_reset,
            ErrorKind::PageCrash => self.page_crash,
            ErrorKind::Obstruction => self.obstruction,
            ErrorKind::Captcha => self.captcha,
            ErrorKind::NotFound4xx => self.not_found_4xx,
            ErrorKind::AuthRequired => self.auth_required,
            ErrorKind::CircuitOpen => self.circuit_open,
            ErrorKind::Unknown => self.unknown,
        }
    }

    /// Grant one extra attempt for the transient kinds (valence bias).
    pub fn with_relaxed_transients(mut self) -> Self {
        self.transient_timeout.max_attempts += 1;
        self.connection_reset.max_attempts += 1;
        self
    }
}

/// Delay before retry number `attempt` (0-based: the delay after the
/// first failed attempt uses `attempt = 0`).
pub fn backoff_delay(rule: &RetryRule, attempt: u32) -> Duration {
    let base_ms = rule.base.as_millis() as u64;
    if base_ms == 0 {
        return Duration::ZERO;
    }
    let raw_ms = match rule.backoff {
        BackoffKind::Fixed => base_ms,
        BackoffKind::Linear => base_ms.saturating_mul(u64::from(attempt) + 1),
        BackoffKind::Exponential | BackoffKind::ExponentialJitter => {
            base_ms.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
        }
    };
    let capped = raw_ms.min(MAX_DELAY.as_millis() as u64);
    let total = if rule.backoff == BackoffKind::ExponentialJitter {
        let jitter_span = raw_ms / 4;
        let jitter = if jitter_span == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_span)
        };
        capped.saturating_add(jitter)
    } else {
        capped
    };
    Duration::from_millis(total.min(MAX_DELAY.as_millis() as u64))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_spec() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.rule(ErrorKind::TransientTimeout).max_attempts, 3);
        assert_eq!(policy.rule(ErrorKind::RateLimit).base, Duration::from_secs(30));
        assert_eq!(policy.rule(ErrorKind::Server5xx).max_attempts, 4);
        assert!(policy.rule(ErrorKind::SelectorMissing).resnapshot);
        assert!(policy.rule(ErrorKind::StaleElement).resnapshot);
        assert!(policy.rule(ErrorKind::PageCrash).reload);
        assert!(!policy.rule(ErrorKind::NotFound4xx).retryable);
        assert!(!policy.rule(ErrorKind::AuthRequired).retryable);
        assert!(!policy.rule(ErrorKind::Captcha).retryable);
    }

    #[test]
    fn linear_progression() {
        let rule = RetryRule::new(3, BackoffKind::Linear, 1_000);
        assert_eq!(backoff_delay(&rule, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&rule, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&rule, 2), Duration::from_secs(3));
    }

    #[test]
    fn exponential_progression() {
        let rule = RetryRule::new(4, BackoffKind::Exponential, 1_000);
        assert_eq!(backoff_delay(&rule, 0), Duration::from_secs(1));
        assert_eq!(backoff_delay(&rule, 1), Duration::from_secs(2));
        assert_eq!(backoff_delay(&rule, 2), Duration::from_secs(4));
    }

    #[test]
    fn zero_base_is_immediate() {
        let rule = RetryRule::new(3, BackoffKind::Exponential, 0);
        for attempt in 0..3 {
            assert_eq!(backoff_delay(&rule, attempt), Duration::ZERO);
        }
    }

    #[test]
    fn jitter_stays_in_bounds() {
        let rule = RetryRule::new(3, BackoffKind::ExponentialJitter, 1_000);
        for attempt in 0..3 {
            let expected_base = 1_000u64 << attempt;
            for _ in 0..50 {
                let delay = backoff_delay(&rule, attempt).as_millis() as u64;
                assert!(delay >= expected_base);
                assert!(delay <= expected_base + expected_base / 4);
            }
        }
    }

    #[test]
    fn all_delays_capped_at_sixty_seconds() {
        let rule = RetryRule::new(20, BackoffKind::ExponentialJitter, 30_000);
        for attempt in 0..20 {
            assert!(backoff_delay(&rule, attempt) <= Duration::from_secs(60));
        }
    }

    #[test]
    fn fixed_delay_repeats() {
        let rule = RetryRule::new(3, BackoffKind::Fixed, 500);
        assert_eq!(backoff_delay(&rule, 0), Duration::from_millis(500));
        assert_eq!(backoff_delay(&rule, 5), Duration::from_millis(500));
    }

    #[test]
    fn relaxed_transients_add_one_attempt() {
        let policy = RetryPolicy::default().with_relaxed_transients();
        assert_eq!(policy.rule(ErrorKind::TransientTimeout).max_attempts, 4);
        assert_eq!(policy.rule(ErrorKind::ConnectionReset).max_attempts, 4);
        assert_eq!(policy.rule(ErrorKind::RateLimit).max_attempts, 3);
    }
}
