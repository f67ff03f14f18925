//! Selector synthesis: turn one vision-located element into an ordered
//! list of ways to find it again without vision.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use webpilot_traits::ElementInfo;

/// Selector strategies in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    Id,
    AriaLabel,
    TestId,
    Name,
    TagClass,
    ExactText,
    TagAttr,
    SingleClass,
    ContainsText,
}

impl SelectorKind {
    /// Static priority per strategy.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Id => 100,
            Self::AriaLabel => 90,
            Self::TestId => 85,
            Self::Name => 80,
            Self::TagClass => 70,
            Self::ExactText => 60,
            Self::TagAttr => 50,
            Self::SingleClass => 40,
            Self::ContainsText => 30,
        }
    }
}

/// One way to re-find the element.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectorCandidate {
    pub kind: SelectorKind,
    pub value: String,
    pub priority: u8,
    pub validated: bool,
}

impl SelectorCandidate {
    fn new(kind: SelectorKind, value: String) -> Self {
        Self {
            priority: kind.priority(),
            kind,
            value,
            validated: false,
        }
    }
}

static CSS_IN_JS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)(css|sc|jss|emotion)[-_]?[a-z0-9]+$").unwrap());
static MUI_MARKER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^Mui.*(\d+|-root.*)$").unwrap());
static LONG_HEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[0-9a-fA-F]{8,}$").unwrap());
static ALNUM_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9]{6,}$").unwrap());

/// Stability filter: reject ids/classes that look auto-generated
/// (CSS-in-JS hashes, framework markers, random alphanumeric runs).
pub fn is_stable_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    if CSS_IN_JS.is_match(token) || MUI_MARKER.is_match(token) || LONG_HEX.is_match(token) {
        return false;
    }
    // A mixed letter/digit run with several digits reads as generated.
    if ALNUM_RUN.is_match(token) {
        let digits = token.chars().filter(|c| c.is_ascii_digit()).count();
        let letters = token.chars().filter(|c| c.is_ascii_alphabetic()).count();
        if digits >= 3 && letters >= 2 {
            return false;
        }
    }
    true
}

fn attr<'a>(element: &'a ElementInfo, key: &str) -> Option<&'a str> {
    element
        .attributes
        .get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty())
}

fn tag(element: &ElementInfo) -> String {
    attr(element, "tag").unwrap_or("*").to_string()
}

fn stable_classes(element: &ElementInfo) -> Vec<&str> {
    attr(element, "class")
        .map(|classes| {
            classes
                .split_whitespace()
                .filter(|c| is_stable_token(c))
                .collect()
        })
        .unwrap_or_default()
}

const FORM_CONTROL_TAGS: &[&str] = &["input", "select", "textarea", "button"];
const EXACT_TEXT_MAX: usize = 40;
const CONTAINS_TEXT_MAX: usize = 24;
/// Structural attributes eligible for the tag+attribute strategy.
const STRUCTURAL_ATTRS: &[&str] = &["type", "role", "rel", "placeholder", "title", "href"];

/// Produce candidates in descending priority order.
pub fn candidates_for(element: &ElementInfo) -> Vec<SelectorCandidate> {
    let mut out = Vec::new();
    let tag = tag(element);

    if let Some(id) = attr(element, "id")
        && is_stable_token(id)
    {
        out.push(SelectorCandidate::new(SelectorKind::Id, format!("#{id}")));
    }

    if let Some(label) = attr(element, "aria-label") {
        out.push(SelectorCandidate::new(
            SelectorKind::AriaLabel,
            format!("[aria-label=\"{label}\"]"),
        ));
    }

    if let Some(test_id) = attr(element, "data-testid") {
        out.push(SelectorCandidate::new(
            SelectorKind::TestId,
            format!("[data-testid=\"{test_id}\"]"),
        ));
    }

    if let Some(name) = attr(element, "name")
        && FORM_CONTROL_TAGS.contains(&tag.as_str())
    {
        out.push(SelectorCandidate::new(
            SelectorKind::Name,
            format!("{tag}[name=\"{name}\"]"),
        ));
    }

    let classes = stable_classes(element);
    if let Some(class) = classes.first() {
        out.push(SelectorCandidate::new(
            SelectorKind::TagClass,
            format!("{tag}.{class}"),
        ));
    }

    let text = element.name.trim();
    if !text.is_empty() && text.chars().count() <= EXACT_TEXT_MAX {
        out.push(SelectorCandidate::new(
            SelectorKind::ExactText,
            format!("xpath=//{tag}[normalize-space(text())=\"{text}\"]"),
        ));
    }

    for key in STRUCTURAL_ATTRS {
        if let Some(value) = attr(element, key) {
            out.push(SelectorCandidate::new(
                SelectorKind::TagAttr,
                format!("{tag}[{key}=\"{value}\"]"),
            ));
            break;
        }
    }

    if let Some(class) = classes.first() {
        out.push(SelectorCandidate::new(
            SelectorKind::SingleClass,
            format!(".{class}"),
        ));
    }

    if !text.is_empty() {
        let prefix: String = text.chars().take(CONTAINS_TEXT_MAX).collect();
        out.push(SelectorCandidate::new(
            SelectorKind::ContainsText,
            format!("xpath=//{tag}[contains(text(), \"{prefix}\")]"),
        ));
    }

    out.sort_by(|a, b| b.priority.cmp(&a.priority));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use webpilot_traits::BoundingBox;

    fn element_with(attrs: &[(&str, &str)], name: &str) -> ElementInfo {
        let mut info = ElementInfo::interactable(
            1,
            "link",
            name,
            BoundingBox {
                x: 90.0,
                y: 40.0,
                width: 20.0,
                height: 20.0,
            },
        );
        info.attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        info
    }

    #[test]
    fn stability_filter_accepts_human_tokens() {
        for token in ["signin-btn", "primary", "nav-item", "submit", "btn2"] {
            assert!(is_stable_token(token), "{token} should be stable");
        }
    }

    #[test]
    fn stability_filter_rejects_generated_tokens() {
        for token in [
            "jss123",
            "css-1q2w3e",
            "sc-bdVaJa",
            "MuiButton-root-123",
            "a1b2c3",
            "deadbeef01",
            "emotion-0",
        ] {
            assert!(!is_stable_token(token), "{token} should be rejected");
        }
    }

    #[test]
    fn id_candidate_ranks_first() {
        let element = element_with(&[("tag", "a"), ("id", "signin-btn")], "Sign in");
        let candidates = candidates_for(&element);
        assert_eq!(candidates[0].kind, SelectorKind::Id);
        assert_eq!(candidates[0].value, "#signin-btn");
        assert_eq!(candidates[0].priority, 100);
    }

    #[test]
    fn unstable_id_is_skipped() {
        let element = element_with(&[("tag", "a"), ("id", "css-1q2w3e")], "Sign in");
        let candidates = candidates_for(&element);
        assert!(candidates.iter().all(|c| c.kind != SelectorKind::Id));
    }

    #[test]
    fn priorities_are_strictly_descending() {
        let element = element_with(
            &[
                ("tag", "input"),
                ("id", "email-field"),
                ("aria-label", "Email"),
                ("data-testid", "email"),
                ("name", "email"),
                ("class", "form-input jss123"),
                ("type", "email"),
            ],
            "Email",
        );
        let candidates = candidates_for(&element);
        assert!(candidates.len() >= 7);
        for pair in candidates.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }

    #[test]
    fn unstable_classes_are_filtered_from_class_strategies() {
        let element = element_with(&[("tag", "button"), ("class", "jss42 css-k2jd8s checkout")], "Pay");
        let candidates = candidates_for(&element);
        let class_values: Vec<&str> = candidates
            .iter()
            .filter(|c| matches!(c.kind, SelectorKind::TagClass | SelectorKind::SingleClass))
            .map(|c| c.value.as_str())
            .collect();
        assert_eq!(class_values, vec!["button.checkout", ".checkout"]);
    }

    #[test]
    fn long_text_skips_exact_match_but_keeps_contains() {
        let long_name = "This is a very long accessible name that goes on well past forty characters";
        let element = element_with(&[("tag", "p")], long_name);
        let candidates = candidates_for(&element);
        assert!(candidates.iter().all(|c| c.kind != SelectorKind::ExactText));
        let contains = candidates
            .iter()
            .find(|c| c.kind == SelectorKind::ContainsText)
            .unwrap();
        assert!(contains.value.starts_with("xpath=//p[contains(text()"));
    }

    #[test]
    fn bare_element_produces_no_candidates() {
        let element = element_with(&[], "");
        assert!(candidates_for(&element).is_empty());
    }
}
