//! Smart tool router: natural-language triggers that bypass the model.
//!
//! A trigger is a (predicate, constructor) pair over the lowercased
//! prompt. Triggers are ordered, first-match-wins; when several could
//! match, the orchestrator composes follow-up triggers in later steps.
//! Routing never raises: a panicking trigger is logged and treated as
//! "no match" so the model path stays the safety net.

use std::panic::{AssertUnwindSafe, catch_unwind};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::tools::ToolCall;

static PORT_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{2,5})\b").unwrap());

const DEFAULT_DEBUG_PORT: u16 = 9222;

struct Trigger {
    name: &'static str,
    matches: fn(&str) -> bool,
    build: fn(&str) -> Option<ToolCall>,
}

fn any_of(text: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| text.contains(n))
}

fn wants_inventory(text: &str) -> bool {
    any_of(
        text,
        &["extract", "list", "get", "show", "find", "dump", "all"],
    )
}

fn parse_port(text: &str) -> u16 {
    PORT_RE
        .captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(DEFAULT_DEBUG_PORT)
}

/// The ordered trigger table.
fn triggers() -> &'static [Trigger] {
    &[
        // Structured extraction. Contact-form detection outranks the
        // generic form inventory.
        Trigger {
            name: "detect_contact_form",
            matches: |t| t.contains("contact form"),
            build: |_| Some(ToolCall::DetectContactForm),
        },
        Trigger {
            name: "extract_links",
            matches: |t| t.contains("link") && wants_inventory(t),
            build: |_| Some(ToolCall::ExtractLinks),
        },
        Trigger {
            name: "extract_forms",
            matches: |t| t.contains("form") && wants_inventory(t),
            build: |_| Some(ToolCall::ExtractForms),
        },
        Trigger {
            name: "extract_inputs",
            matches: |t| (t.contains("input") || t.contains("field")) && wants_inventory(t),
            build: |_| Some(ToolCall::ExtractInputs),
        },
        Trigger {
            name: "extract_tables",
            matches: |t| t.contains("table") && wants_inventory(t),
            build: |_| Some(ToolCall::ExtractTables),
        },
        // Diagnostic output.
        Trigger {
            name: "console_errors",
            matches: |t| t.contains("console") && t.contains("error"),
            build: |_| Some(ToolCall::ConsoleErrors),
        },
        Trigger {
            name: "failed_requests",
            matches: |t| {
                (t.contains("failed") || t.contains("broken"))
                    && (t.contains("request") || t.contains("network"))
                    || t.contains("network error")
            },
            build: |_| Some(ToolCall::FailedRequests),
        },
        Trigger {
            name: "console_logs",
            matches: |t| t.contains("console") && any_of(t, &["log", "output", "dump"]),
            build: |_| Some(ToolCall::ConsoleLogs),
        },
        // Session reuse.
        Trigger {
            name: "attach_session",
            matches: |t| {
                any_of(t, &["attach", "connect to"])
                    && any_of(t, &["browser", "debug port", "session", "chrome"])
            },
            build: |t| Some(ToolCall::AttachSession { port: parse_port(t) }),
        },
        // Fast HTML inspection.
        Trigger {
            name: "inspect_html",
            matches: |t| {
                any_of(t, &["inspect", "parse", "summarize", "current"])
                    && any_of(t, &["html", "dom", "page source"])
            },
            build: |_| Some(ToolCall::InspectHtml),
        },
    ]
}

/// Route a prompt to a direct tool call, bypassing the model.
/// Returns `None` when no trigger matches; the caller falls through to
/// the model path.
pub fn route(text: &str) -> Option<ToolCall> {
    let lowered = text.to_lowercase();
    for trigger in triggers() {
        let matched = catch_unwind(AssertUnwindSafe(|| {
            (trigger.matches)(&lowered).then(|| (trigger.build)(&lowered)).flatten()
        }));
        match matched {
            Ok(Some(call)) => {
                debug!(trigger = trigger.name, "Prompt routed to direct tool call");
                return Some(call);
            }
            Ok(None) => {}
            Err(_) => {
                warn!(trigger = trigger.name, "Trigger panicked, treating as no match");
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_all_links_routes_without_model() {
        assert_eq!(route("extract all links"), Some(ToolCall::ExtractLinks));
        assert_eq!(route("List the links on this page"), Some(ToolCall::ExtractLinks));
    }

    #[test]
    fn contact_form_outranks_generic_forms() {
        assert_eq!(
            route("find the contact form"),
            Some(ToolCall::DetectContactForm)
        );
        assert_eq!(route("extract all forms"), Some(ToolCall::ExtractForms));
    }

    #[test]
    fn first_match_wins_on_compound_prompts() {
        // Both links and forms match; the table order decides.
        assert_eq!(
            route("extract all links and forms"),
            Some(ToolCall::ExtractLinks)
        );
    }

    #[test]
    fn diagnostics_route() {
        assert_eq!(route("show me the console errors"), Some(ToolCall::ConsoleErrors));
        assert_eq!(route("list failed network requests"), Some(ToolCall::FailedRequests));
        assert_eq!(route("dump the console log"), Some(ToolCall::ConsoleLogs));
    }

    #[test]
    fn attach_parses_port() {
        assert_eq!(
            route("attach to the browser on debug port 9444"),
            Some(ToolCall::AttachSession { port: 9444 })
        );
        assert_eq!(
            route("attach to the running chrome session"),
            Some(ToolCall::AttachSession { port: 9222 })
        );
    }

    #[test]
    fn html_inspection_routes() {
        assert_eq!(route("inspect the current dom"), Some(ToolCall::InspectHtml));
        assert_eq!(route("parse the html without reloading"), Some(ToolCall::InspectHtml));
    }

    #[test]
    fn goal_like_prompts_fall_through_to_model() {
        assert_eq!(route("log into my account and download the invoice"), None);
        assert_eq!(route("book a table for two tomorrow"), None);
        // Mentions a trigger noun without an inventory verb.
        assert_eq!(route("click the first link"), None);
    }

    #[test]
    fn tables_route() {
        assert_eq!(route("extract the pricing table"), Some(ToolCall::ExtractTables));
    }
}
