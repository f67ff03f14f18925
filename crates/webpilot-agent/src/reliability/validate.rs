//! Pre-action validation for interaction tools.
//!
//! Before a click/type/hover reaches the driver, the target must exist,
//! be visible, sit in the viewport (auto-scrolling if not), be the
//! topmost node at its center (dismissing catalogued obstructions), and
//! be interactable. Remediation is attempted once; what still fails is
//! reported with the precise error kind and a human-readable reason.

use tracing::debug;
use webpilot_traits::{ElementInfo, ExternalError, PageDriver};

use super::classifier::ErrorKind;
use super::obstruction::{ObstructionHandler, detect};

/// A validation check that failed after remediation.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationFailure {
    Missing(String),
    NotVisible(String),
    Obstructed { category: String, reason: String },
    NotInteractable(String),
}

impl ValidationFailure {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Missing(_) | Self::NotVisible(_) => ErrorKind::SelectorMissing,
            Self::Obstructed { .. } => ErrorKind::Obstruction,
            Self::NotInteractable(_) => ErrorKind::Unknown,
        }
    }

    pub fn reason(&self) -> String {
        match self {
            Self::Missing(r) | Self::NotVisible(r) | Self::NotInteractable(r) => r.clone(),
            Self::Obstructed { category, reason } => format!("{category}: {reason}"),
        }
    }
}

/// Validation outcome: a failed check or a raw driver failure (the
/// classifier handles the latter).
#[derive(Debug)]
pub enum ValidationError {
    Check(ValidationFailure),
    Driver(ExternalError),
}

impl From<ExternalError> for ValidationError {
    fn from(err: ExternalError) -> Self {
        Self::Driver(err)
    }
}

/// Run the full check chain for an interaction target, remediating where
/// possible. Ok carries the validated element state.
pub async fn validate_interaction(
    driver: &dyn PageDriver,
    backend_id: u64,
    obstructions: &ObstructionHandler,
) -> Result<ElementInfo, ValidationError> {
    // One remediation pass (scroll and/or dismiss), then a final check.
    for pass in 0..2 {
        match check_once(driver, backend_id, obstructions, pass == 0).await? {
            CheckOutcome::Ok(info) => return Ok(info),
            CheckOutcome::Remediated => continue,
            CheckOutcome::Failed(failure) => return Err(ValidationError::Check(failure)),
        }
    }
    Err(ValidationError::Check(ValidationFailure::Obstructed {
        category: "unknown".to_string(),
        reason: "element still occluded after remediation".to_string(),
    }))
}

enum CheckOutcome {
    Ok(ElementInfo),
    Remediated,
    Failed(ValidationFailure),
}

async fn check_once(
    driver: &dyn PageDriver,
    backend_id: u64,
    obstructions: &ObstructionHandler,
    allow_remediation: bool,
) -> Result<CheckOutcome, ExternalError> {
    // Existence.
    let Some(mut info) = driver.describe_element(backend_id).await? else {
        return Ok(CheckOutcome::Failed(ValidationFailure::Missing(format!(
            "element {backend_id} does not resolve on the current page"
        ))));
    };

    // Visibility.
    let box_ = match info.box_ {
        Some(b) if !b.is_empty() && info.visible => b,
        _ => {
            return Ok(CheckOutcome::Failed(ValidationFailure::NotVisible(
                format!("element {backend_id} has no rendered geometry"),
            )));
        }
    };

    // Viewport, with auto-scroll remediation.
    if !info.in_viewport {
        if !allow_remediation {
            return Ok(CheckOutcome::Failed(ValidationFailure::NotVisible(
                format!("element {backend_id} could not be scrolled into view"),
            )));
        }
        debug!(backend_id, "Target outside viewport, scrolling into view");
        driver.scroll_into_view(backend_id).await?;
        let Some(rescrolled) = driver.describe_element(backend_id).await? else {
            return Ok(CheckOutcome::Failed(ValidationFailure::Missing(format!(
                "element {backend_id} vanished while scrolling"
            ))));
        };
        if !rescrolled.in_viewport {
            return Ok(CheckOutcome::Failed(ValidationFailure::NotVisible(
                format!("element {backend_id} could not be scrolled into view"),
            )));
        }
        info = rescrolled;
    }

    // Occlusion probe at the geometric center.
    let (cx, cy) = box_.center();
    if let Some(top) = driver.element_at_point(cx, cy).await?
        && top.backend_id != backend_id
    {
        let Some(category) = detect(&top) else {
            return Ok(CheckOutcome::Failed(ValidationFailure::Obstructed {
                category: "unknown".to_string(),
                reason: format!(
                    "center occluded by {} \"{}\"",
                    top.role, top.name
                ),
            }));
        };
        if !allow_remediation || obstructions.already_attempted(category, &top) {
            return Ok(CheckOutcome::Failed(ValidationFailure::Obstructed {
                category: category.label().to_string(),
                reason: "dismissal already attempted".to_string(),
            }));
        }
        if obstructions.dismiss(driver, category, &top).await {
            return Ok(CheckOutcome::Remediated);
        }
        return Ok(CheckOutcome::Failed(ValidationFailure::Obstructed {
            category: category.label().to_string(),
            reason: "all dismiss strategies failed".to_string(),
        }));
    }

    // Interactability.
    if info.disabled {
        return Ok(CheckOutcome::Failed(ValidationFailure::NotInteractable(
            format!("element {backend_id} is disabled"),
        )));
    }
    if info.read_only {
        return Ok(CheckOutcome::Failed(ValidationFailure::NotInteractable(
            format!("element {backend_id} is read-only"),
        )));
    }
    if !info.pointer_events {
        return Ok(CheckOutcome::Failed(ValidationFailure::NotInteractable(
            format!("element {backend_id} has pointer-events disabled"),
        )));
    }

    Ok(CheckOutcome::Ok(info))
}

#[cfg(test)]
mod tests {
    use super::*;
    use webpilot_traits::{BoundingBox, MockObstruction, MockPage, MockPageDriver};

    fn button(id: u64) -> ElementInfo {
        ElementInfo::interactable(
            id,
            "button",
            "Buy now",
            BoundingBox {
                x: 100.0,
                y: 300.0,
                width: 120.0,
                height: 40.0,
            },
        )
    }

    #[tokio::test]
    async fn valid_element_passes() {
        let driver = MockPageDriver::new();
        driver.add_page(MockPage::new("https://a.test/").with_element(button(5)));
        let handler = ObstructionHandler::new();

        let info = validate_interaction(&driver, 5, &handler).await.unwrap();
        assert_eq!(info.backend_id, 5);
    }

    #[tokio::test]
    async fn missing_element_reports_selector_missing() {
        let driver = MockPageDriver::new();
        driver.add_page(MockPage::new("https://a.test/"));
        let handler = ObstructionHandler::new();

        let err = validate_interaction(&driver, 99, &handler).await.unwrap_err();
        match err {
            ValidationError::Check(failure) => {
                assert_eq!(failure.kind(), ErrorKind::SelectorMissing)
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn below_fold_element_is_scrolled_into_view() {
        let driver = MockPageDriver::new();
        let mut target = button(5);
        target.in_viewport = false;
        driver.add_page(MockPage::new("https://a.test/").with_element(target));
        let handler = ObstructionHandler::new();

        let info = validate_interaction(&driver, 5, &handler).await.unwrap();
        assert!(info.in_viewport);
        assert_eq!(driver.calls("scroll_into_view"), 1);
    }

    #[tokio::test]
    async fn cookie_banner_is_dismissed_and_click_path_clears() {
        let driver = MockPageDriver::new();
        let accept = ElementInfo::interactable(
            91,
            "button",
            "Accept",
            BoundingBox {
                x: 10.0,
                y: 10.0,
                width: 60.0,
                height: 20.0,
            },
        );
        driver.add_page(
            MockPage::new("https://a.test/")
                .with_element(button(42))
                .with_selector("#onetrust-accept-btn-handler", accept),
        );
        let banner = ElementInfo::interactable(
            90,
            "dialog",
            "We use cookies",
            BoundingBox {
                x: 0.0,
                y: 250.0,
                width: 800.0,
                height: 200.0,
            },
        );
        driver.add_obstruction(MockObstruction {
            element: banner,
            dismiss_backend_id: 91,
            escape_dismisses: false,
        });
        let handler = ObstructionHandler::new();

        let info = validate_interaction(&driver, 42, &handler).await.unwrap();
        assert_eq!(info.backend_id, 42);
        assert_eq!(driver.active_obstructions(), 0);
    }

    #[tokio::test]
    async fn disabled_element_is_not_interactable() {
        let driver = MockPageDriver::new();
        let mut target = button(5);
        target.disabled = true;
        driver.add_page(MockPage::new("https://a.test/").with_element(target));
        let handler = ObstructionHandler::new();

        let err = validate_interaction(&driver, 5, &handler).await.unwrap_err();
        match err {
            ValidationError::Check(failure) => {
                assert!(failure.reason().contains("disabled"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
