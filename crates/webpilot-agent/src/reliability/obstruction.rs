//! Obstruction detection and dismissal.
//!
//! Obstructions are overlays occluding a target element: cookie banners,
//! modals, chat widgets, notification banners, fixed headers, age gates.
//! Detection matches the occluding node against a keyword catalog;
//! dismissal walks a strategy chain and never raises. Dismissed
//! obstructions are remembered by identity for the page's lifetime so a
//! stubborn banner is not re-attempted every call.

use std::collections::HashSet;

use parking_lot::Mutex;
use tracing::{debug, info};
use webpilot_traits::{ElementInfo, PageDriver};

/// Obstruction categories in dismissal priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObstructionCategory {
    CookieBanner,
    Modal,
    ChatWidget,
    NotificationBanner,
    FixedHeader,
    AgeGate,
}

impl ObstructionCategory {
    pub fn label(&self) -> &'static str {
        match self {
            Self::CookieBanner => "cookie-banner",
            Self::Modal => "modal",
            Self::ChatWidget => "chat-widget",
            Self::NotificationBanner => "notification-banner",
            Self::FixedHeader => "fixed-header",
            Self::AgeGate => "age-gate",
        }
    }
}

/// Accept/close controls tried first, per category.
fn dismiss_selectors(category: ObstructionCategory) -> &'static [&'static str] {
    match category {
        ObstructionCategory::CookieBanner => &[
            "#onetrust-accept-btn-handler",
            "[aria-label=\"Accept cookies\"]",
            "[aria-label=\"Accept all\"]",
            "button[id*=\"accept\"]",
            "button[class*=\"consent\"]",
        ],
        ObstructionCategory::Modal => &[
            "[aria-label=\"Close\"]",
            "[aria-label=\"Dismiss\"]",
            "button[class*=\"close\"]",
            ".modal [class*=\"close\"]",
        ],
        ObstructionCategory::ChatWidget => &[
            "[aria-label=\"Close chat\"]",
            "[aria-label=\"Minimize\"]",
            "button[class*=\"chat-close\"]",
        ],
        ObstructionCategory::NotificationBanner => &[
            "[aria-label=\"Close\"]",
            "button[class*=\"dismiss\"]",
            "button[class*=\"banner-close\"]",
        ],
        ObstructionCategory::FixedHeader => &[],
        ObstructionCategory::AgeGate => &[
            "button[id*=\"confirm\"]",
            "button[class*=\"age-confirm\"]",
            "[aria-label=\"Yes\"]",
        ],
    }
}

/// Classify an occluding element against the obstruction catalog.
/// Categories are tested in priority order; the first keyword hit wins.
pub fn detect(info: &ElementInfo) -> Option<ObstructionCategory> {
    let mut haystack = format!("{} {} {}", info.role, info.name, info.backend_id);
    for (key, value) in &info.attributes {
        haystack.push(' ');
        haystack.push_str(key);
        haystack.push(' ');
        haystack.push_str(value);
    }
    let haystack = haystack.to_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if has(&["cookie", "consent", "gdpr", "onetrust"]) {
        Some(ObstructionCategory::CookieBanner)
    } else if info.role == "dialog" || has(&["modal", "popup", "overlay", "lightbox"]) {
        Some(ObstructionCategory::Modal)
    } else if has(&["chat", "intercom", "messenger", "livechat"]) {
        Some(ObstructionCategory::ChatWidget)
    } else if has(&["notification", "newsletter", "subscribe", "banner"]) {
        Some(ObstructionCategory::NotificationBanner)
    } else if has(&["sticky", "fixed-header", "navbar", "header"]) {
        Some(ObstructionCategory::FixedHeader)
    } else if has(&["age", "over 18", "date of birth"]) {
        Some(ObstructionCategory::AgeGate)
    } else {
        None
    }
}

/// Identity of one obstruction: category plus rounded geometry, so the
/// same banner is recognized across validation passes.
fn signature(category: ObstructionCategory, info: &ElementInfo) -> String {
    match info.box_ {
        Some(b) => format!(
            "{}:{:.0}:{:.0}:{:.0}:{:.0}",
            category.label(),
            b.x,
            b.y,
            b.width,
            b.height
        ),
        None => format!("{}:{}", category.label(), info.backend_id),
    }
}

/// Stateful dismissal: tracks what was already attempted on this page.
#[derive(Debug, Default)]
pub struct ObstructionHandler {
    attempted: Mutex<HashSet<String>>,
}

impl ObstructionHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forget attempted obstructions (call on navigation).
    pub fn reset(&self) {
        self.attempted.lock().clear();
    }

    /// Whether this obstruction was already attempted on this page.
    pub fn already_attempted(&self, category: ObstructionCategory, info: &ElementInfo) -> bool {
        self.attempted.lock().contains(&signature(category, info))
    }

    /// Try the strategy chain: known control, Escape, safe backdrop click.
    /// Returns true when a strategy ran to completion; the caller
    /// revalidates to confirm the occlusion is actually gone. Never raises.
    pub async fn dismiss(
        &self,
        driver: &dyn PageDriver,
        category: ObstructionCategory,
        info: &ElementInfo,
    ) -> bool {
        let sig = signature(category, info);
        if !self.attempted.lock().insert(sig) {
            debug!(category = category.label(), "Obstruction already attempted, skipping");
            return false;
        }

        for selector in dismiss_selectors(category) {
            match driver.query_selector(selector).await {
                Ok(Some(control)) => {
                    if driver.click(control.backend_id).await.is_ok() {
                        info!(category = category.label(), selector, "Obstruction dismissed via control");
                        return true;
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    debug!(category = category.label(), selector, error = %err, "Dismiss selector probe failed");
                }
            }
        }

        if driver.press_key("Escape").await.is_ok() {
            info!(category = category.label(), "Obstruction dismiss attempted via Escape");
            return true;
        }

        // Last resort: click a corner coordinate outside typical overlay
        // content so backdrop-close modals go away.
        if driver.click_at(4.0, 4.0).await.is_ok() {
            info!(category = category.label(), "Obstruction dismiss attempted via backdrop");
            return true;
        }

        debug!(category = category.label(), "All dismiss strategies failed");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use webpilot_traits::BoundingBox;

    fn element(role: &str, name: &str, attrs: &[(&str, &str)]) -> ElementInfo {
        let mut info = ElementInfo::interactable(
            1,
            role,
            name,
            BoundingBox {
                x: 0.0,
                y: 0.0,
                width: 100.0,
                height: 100.0,
            },
        );
        info.attributes = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect::<BTreeMap<_, _>>();
        info
    }

    #[test]
    fn cookie_banner_detected_first() {
        // "cookie" should win even when modal keywords are also present.
        let info = element("dialog", "cookie consent modal", &[]);
        assert_eq!(detect(&info), Some(ObstructionCategory::CookieBanner));
    }

    #[test]
    fn dialog_role_is_modal() {
        let info = element("dialog", "Subscribe today", &[]);
        // role wins over the newsletter keyword because modal ranks higher.
        assert_eq!(detect(&info), Some(ObstructionCategory::Modal));
    }

    #[test]
    fn chat_widget_via_class_attr() {
        let info = element("complementary", "", &[("class", "intercom-launcher")]);
        assert_eq!(detect(&info), Some(ObstructionCategory::ChatWidget));
    }

    #[test]
    fn plain_button_is_not_an_obstruction() {
        let info = element("button", "Submit", &[]);
        assert_eq!(detect(&info), None);
    }

    #[tokio::test]
    async fn dismiss_is_not_retried_for_same_signature() {
        use webpilot_traits::{MockPage, MockPageDriver};

        let driver = MockPageDriver::new();
        driver.add_page(MockPage::new("https://a.test/"));
        let handler = ObstructionHandler::new();
        let banner = element("dialog", "cookie banner", &[]);

        assert!(
            handler
                .dismiss(&driver, ObstructionCategory::CookieBanner, &banner)
                .await
        );
        // Second attempt with the same signature is refused outright.
        assert!(
            !handler
                .dismiss(&driver, ObstructionCategory::CookieBanner, &banner)
                .await
        );
        assert!(handler.already_attempted(ObstructionCategory::CookieBanner, &banner));

        handler.reset();
        assert!(!handler.already_attempted(ObstructionCategory::CookieBanner, &banner));
    }

    #[tokio::test]
    async fn dismiss_prefers_known_control() {
        use webpilot_traits::{MockPage, MockPageDriver};

        let driver = MockPageDriver::new();
        let accept = ElementInfo::interactable(
            42,
            "button",
            "Accept all",
            BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 80.0,
                height: 30.0,
            },
        );
        driver.add_page(
            MockPage::new("https://a.test/")
                .with_selector("#onetrust-accept-btn-handler", accept),
        );

        let handler = ObstructionHandler::new();
        let banner = element("dialog", "cookie consent", &[]);
        assert!(
            handler
                .dismiss(&driver, ObstructionCategory::CookieBanner, &banner)
                .await
        );
        assert!(driver.action_log().contains(&"click:42".to_string()));
        // Escape was not needed.
        assert_eq!(driver.calls("press_key"), 0);
    }
}
