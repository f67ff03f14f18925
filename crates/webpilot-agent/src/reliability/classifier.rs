//! Failure classification.
//!
//! The single place raw boundary errors are observed. Every failure is
//! mapped to exactly one [`ErrorKind`]; no other failure vocabulary
//! crosses component boundaries.

use serde::{Deserialize, Serialize};
use webpilot_traits::ExternalError;

/// Classified failure kinds driving the retry policy table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    TransientTimeout,
    RateLimit,
    Server5xx,
    Captcha,
    SelectorMissing,
    StaleElement,
    NotFound4xx,
    AuthRequired,
    ConnectionReset,
    PageCrash,
    Obstruction,
    /// Synthetic kind for calls short-circuited by an open breaker.
    CircuitOpen,
    Unknown,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::TransientTimeout => "transient-timeout",
            Self::RateLimit => "rate-limit",
            Self::Server5xx => "server-5xx",
            Self::Captcha => "captcha",
            Self::SelectorMissing => "selector-missing",
            Self::StaleElement => "stale-element",
            Self::NotFound4xx => "not-found-4xx",
            Self::AuthRequired => "auth-required",
            Self::ConnectionReset => "connection-reset",
            Self::PageCrash => "page-crash",
            Self::Obstruction => "obstruction",
            Self::CircuitOpen => "circuit-open",
            Self::Unknown => "unknown",
        };
        f.write_str(label)
    }
}

/// Map a boundary error to its kind. Status wins over message fragments;
/// anything unrecognized coerces to `Unknown`.
pub fn classify(err: &ExternalError) -> ErrorKind {
    if let Some(status) = err.status {
        match status {
            408 => return ErrorKind::TransientTimeout,
            429 => return ErrorKind::RateLimit,
            401 | 403 => return ErrorKind::AuthRequired,
            404 | 410 => return ErrorKind::NotFound4xx,
            500..=599 => return ErrorKind::Server5xx,
            _ => {}
        }
    }

    let message = err.message.to_lowercase();
    let has = |fragment: &str| message.contains(fragment);

    if has("captcha") || has("recaptcha") || has("hcaptcha") || has("challenge-platform") {
        ErrorKind::Captcha
    } else if has("stale element") || has("detached from document") || has("node is detached") {
        ErrorKind::StaleElement
    } else if has("rate limit") || has("too many requests") || has("quota exceeded") {
        ErrorKind::RateLimit
    } else if has("timed out") || has("timeout") || has("deadline exceeded") {
        ErrorKind::TransientTimeout
    } else if has("connection reset")
        || has("econnreset")
        || has("connection refused")
        || has("connection closed")
        || has("broken pipe")
        || has("connectionerror")
    {
        ErrorKind::ConnectionReset
    } else if has("crashed") || has("target closed") || has("session closed") {
        ErrorKind::PageCrash
    } else if has("no node")
        || has("no element")
        || has("not found in dom")
        || has("failed to find element")
        || has("selector")
    {
        ErrorKind::SelectorMissing
    } else if has("unauthorized") || has("login required") || has("authentication required") {
        ErrorKind::AuthRequired
    } else if has("internal server error") || has("bad gateway") || has("service unavailable") {
        ErrorKind::Server5xx
    } else {
        ErrorKind::Unknown
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(text: &str) -> ExternalError {
        ExternalError::new(text)
    }

    #[test]
    fn status_takes_precedence_over_message() {
        let err = ExternalError::new("something vague").with_status(429);
        assert_eq!(classify(&err), ErrorKind::RateLimit);
        let err = ExternalError::new("timeout maybe").with_status(503);
        assert_eq!(classify(&err), ErrorKind::Server5xx);
    }

    #[test]
    fn timeout_fragments() {
        assert_eq!(
            classify(&msg("navigate timed out after 5s")),
            ErrorKind::TransientTimeout
        );
        assert_eq!(classify(&msg("Timeout 30000ms exceeded")), ErrorKind::TransientTimeout);
    }

    #[test]
    fn connection_fragments() {
        assert_eq!(
            classify(&msg("net::ERR_CONNECTION_RESET")).to_string(),
            "connection-reset"
        );
        assert_eq!(classify(&msg("ConnectionError: refused")), ErrorKind::ConnectionReset);
    }

    #[test]
    fn stale_beats_selector() {
        // "stale element reference" contains no selector fragment, but make
        // sure ordering keeps stale ahead of the broad selector match.
        assert_eq!(
            classify(&msg("stale element reference: element is not attached")),
            ErrorKind::StaleElement
        );
    }

    #[test]
    fn captcha_fragments() {
        assert_eq!(classify(&msg("blocked by reCAPTCHA v2")), ErrorKind::Captcha);
    }

    #[test]
    fn selector_fragments() {
        assert_eq!(
            classify(&msg("failed to find element matching selector #foo")),
            ErrorKind::SelectorMissing
        );
    }

    #[test]
    fn crash_fragments() {
        assert_eq!(classify(&msg("Page crashed!")), ErrorKind::PageCrash);
        assert_eq!(classify(&msg("Target closed")), ErrorKind::PageCrash);
    }

    #[test]
    fn auth_and_not_found_statuses() {
        assert_eq!(classify(&msg("x").clone().with_status(401)), ErrorKind::AuthRequired);
        assert_eq!(classify(&msg("x").clone().with_status(404)), ErrorKind::NotFound4xx);
    }

    #[test]
    fn unknown_fallback() {
        assert_eq!(classify(&msg("some exotic failure")), ErrorKind::Unknown);
    }

    #[test]
    fn display_matches_wire_labels() {
        assert_eq!(ErrorKind::Server5xx.to_string(), "server-5xx");
        assert_eq!(ErrorKind::CircuitOpen.to_string(), "circuit-open");
    }
}
