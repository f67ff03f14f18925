//! The single entry point every tool call goes through.
//!
//! ```text
//!   START → circuit gate → resolve ref → [validate → attempt]*
//!             │                │              │ error
//!             ▼                ▼              ▼
//!        fail(circuit-open) fail(stale)  classify → backoff/remediate → retry
//! ```
//!
//! Callers never wrap functions in retry decorators; the policy table
//! drives everything.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, warn};
use webpilot_traits::{AgentEvent, ExternalError, PageDriver};

use crate::site_memory::ElementLocator;
use crate::snapshot::{RefError, SnapshotOptions, SnapshotService};
use crate::tools::{ActionResult, ToolCall, ToolContext, dispatch};

use super::circuit::{CircuitBreaker, CircuitDecision, domain_of};
use super::classifier::{ErrorKind, classify};
use super::obstruction::ObstructionHandler;
use super::policy::{RetryPolicy, backoff_delay};
use super::validate::{ValidationError, validate_interaction};

/// Per-kind operation timeouts.
#[derive(Debug, Clone, Copy)]
pub struct ExecutorTimeouts {
    pub action: Duration,
    pub screenshot: Duration,
}

impl Default for ExecutorTimeouts {
    fn default() -> Self {
        Self {
            action: Duration::from_secs(5),
            screenshot: Duration::from_secs(5),
        }
    }
}

/// Reliability-fabric executor: validation, retry, circuit breaking,
/// obstruction handling behind one `execute` call.
pub struct Executor {
    driver: Arc<dyn PageDriver>,
    snapshots: Arc<SnapshotService>,
    circuit: Arc<CircuitBreaker>,
    policy: Mutex<RetryPolicy>,
    obstructions: ObstructionHandler,
    locator: Option<Arc<ElementLocator>>,
    timeouts: ExecutorTimeouts,
    events: Option<mpsc::UnboundedSender<AgentEvent>>,
    /// Domain of the last successful navigation, for keying calls that
    /// carry no URL without asking the driver.
    last_domain: Mutex<Option<String>>,
}

impl Executor {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        snapshots: Arc<SnapshotService>,
        circuit: Arc<CircuitBreaker>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            driver,
            snapshots,
            circuit,
            policy: Mutex::new(policy),
            obstructions: ObstructionHandler::new(),
            locator: None,
            timeouts: ExecutorTimeouts::default(),
            events: None,
            last_domain: Mutex::new(None),
        }
    }

    pub fn with_locator(mut self, locator: Arc<ElementLocator>) -> Self {
        self.locator = Some(locator);
        self
    }

    pub fn with_timeouts(mut self, timeouts: ExecutorTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_events(mut self, events: mpsc::UnboundedSender<AgentEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Swap the retry policy (valence bias).
    pub fn set_policy(&self, policy: RetryPolicy) {
        *self.policy.lock() = policy;
    }

    pub fn snapshots(&self) -> &Arc<SnapshotService> {
        &self.snapshots
    }

    pub fn circuit(&self) -> &Arc<CircuitBreaker> {
        &self.circuit
    }

    fn emit(&self, event: AgentEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    fn call_domain(&self, call: &ToolCall) -> Option<String> {
        match call.target_url() {
            Some(url) => Some(domain_of(url)),
            None => self.last_domain.lock().clone(),
        }
    }

    fn timeout_for(&self, call: &ToolCall) -> Duration {
        match call {
            ToolCall::Screenshot => self.timeouts.screenshot,
            _ => self.timeouts.action,
        }
    }

    /// Execute one tool call with the full reliability treatment.
    pub async fn execute(&self, call: &ToolCall) -> ActionResult {
        let started = Instant::now();
        let domain = self.call_domain(call);

        // Circuit gate: an open domain short-circuits before any driver
        // contact.
        if let Some(domain) = &domain
            && let CircuitDecision::Open { remaining } = self.circuit.check(domain)
        {
            return ActionResult::fail(
                ErrorKind::CircuitOpen,
                format!("circuit open for {domain}, {remaining:?} of cool-off remaining"),
                0,
                started.elapsed().as_millis() as u64,
            );
        }

        // Ref resolution happens once; the backend id stays valid across
        // retry re-snapshots within this call.
        let backend_id = match call.target_ref() {
            Some(ref_) => match self.snapshots.resolve(ref_) {
                Ok(id) => Some(id),
                Err(RefError::Stale) => {
                    return self.finish(
                        call,
                        ActionResult::fail(
                            ErrorKind::StaleElement,
                            format!("ref {ref_} belongs to an earlier snapshot"),
                            0,
                            started.elapsed().as_millis() as u64,
                        ),
                    );
                }
                Err(_) => {
                    return self.finish(
                        call,
                        ActionResult::fail(
                            ErrorKind::SelectorMissing,
                            format!("ref {ref_} does not resolve in the current snapshot"),
                            0,
                            started.elapsed().as_millis() as u64,
                        ),
                    );
                }
            },
            None => None,
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;

            // Pre-action validation for interaction tools, with scroll and
            // obstruction remediation inside.
            if call.is_interaction()
                && let Some(backend_id) = backend_id
            {
                match validate_interaction(self.driver.as_ref(), backend_id, &self.obstructions)
                    .await
                {
                    Ok(_) => {}
                    Err(ValidationError::Check(failure)) => {
                        return self.finish(
                            call,
                            ActionResult::fail(
                                failure.kind(),
                                failure.reason(),
                                attempt,
                                started.elapsed().as_millis() as u64,
                            ),
                        );
                    }
                    Err(ValidationError::Driver(err)) => {
                        match self
                            .handle_attempt_error(call, domain.as_deref(), err, attempt)
                            .await
                        {
                            RetryVerdict::Retry => continue,
                            RetryVerdict::Fail(kind, reason) => {
                                return self.finish(
                                    call,
                                    ActionResult::fail(
                                        kind,
                                        reason,
                                        attempt,
                                        started.elapsed().as_millis() as u64,
                                    ),
                                );
                            }
                        }
                    }
                }
            }

            let ctx = ToolContext {
                driver: self.driver.as_ref(),
                snapshots: &self.snapshots,
                locator: self.locator.as_deref(),
            };
            let attempt_result = tokio::time::timeout(self.timeout_for(call), dispatch(call, &ctx))
                .await
                .unwrap_or_else(|_| {
                    Err(ExternalError::timeout(call.name(), self.timeout_for(call)))
                });

            match attempt_result {
                Ok(data) => {
                    if let Some(domain) = &domain {
                        self.circuit.record_success(domain);
                    }
                    if let ToolCall::Navigate { url } = call {
                        *self.last_domain.lock() = Some(domain_of(url));
                        self.obstructions.reset();
                    }
                    return self.finish(
                        call,
                        ActionResult::ok(data, attempt, started.elapsed().as_millis() as u64),
                    );
                }
                Err(err) => {
                    match self
                        .handle_attempt_error(call, domain.as_deref(), err, attempt)
                        .await
                    {
                        RetryVerdict::Retry => continue,
                        RetryVerdict::Fail(kind, reason) => {
                            return self.finish(
                                call,
                                ActionResult::fail(
                                    kind,
                                    reason,
                                    attempt,
                                    started.elapsed().as_millis() as u64,
                                ),
                            );
                        }
                    }
                }
            }
        }
    }

    /// Execute a recovery/replay sequence, stopping at the first failure.
    pub async fn execute_sequence(&self, calls: &[ToolCall]) -> Vec<ActionResult> {
        let mut results = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.execute(call).await;
            let failed = !result.success;
            results.push(result);
            if failed {
                break;
            }
        }
        results
    }

    async fn handle_attempt_error(
        &self,
        call: &ToolCall,
        domain: Option<&str>,
        err: ExternalError,
        attempt: u32,
    ) -> RetryVerdict {
        let kind = classify(&err);
        let rule = self.policy.lock().rule(kind);

        if !rule.retryable || attempt >= rule.max_attempts {
            if let Some(domain) = domain
                && self.circuit.record_failure(domain)
            {
                self.emit(AgentEvent::CircuitOpened {
                    domain: domain.to_string(),
                });
            }
            return RetryVerdict::Fail(kind, err.to_string());
        }

        warn!(
            tool = call.name(),
            kind = %kind,
            attempt,
            error = %err,
            "Attempt failed, retrying"
        );

        // Remediation before the next attempt.
        if rule.resnapshot {
            let refresh = SnapshotOptions {
                force: true,
                ..Default::default()
            };
            if let Err(refresh_err) = self.snapshots.capture(self.driver.as_ref(), &refresh).await {
                debug!(error = %refresh_err, "Re-snapshot before retry failed");
            }
        }
        if rule.reload
            && let Ok(url) = self.driver.current_url().await
            && let Err(reload_err) = self.driver.navigate(&url).await
        {
            debug!(error = %reload_err, "Reload before retry failed");
        }

        tokio::time::sleep(backoff_delay(&rule, attempt - 1)).await;
        RetryVerdict::Retry
    }

    fn finish(&self, call: &ToolCall, result: ActionResult) -> ActionResult {
        self.emit(AgentEvent::ActionCompleted {
            tool: call.name().to_string(),
            success: result.success,
            latency_ms: result.latency_ms,
        });
        result
    }
}

enum RetryVerdict {
    Retry,
    Fail(ErrorKind, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use webpilot_traits::{
        AxNode, BoundingBox, ElementInfo, MockObstruction, MockPage, MockPageDriver,
    };

    use crate::reliability::circuit::CircuitConfig;
    use crate::snapshot::{ElementRef, SnapshotCacheConfig, SnapshotResult};

    fn executor_for(driver: Arc<MockPageDriver>) -> Executor {
        Executor::new(
            driver,
            Arc::new(SnapshotService::new(SnapshotCacheConfig::default())),
            Arc::new(CircuitBreaker::new(CircuitConfig::default())),
            RetryPolicy::default(),
        )
    }

    fn page_with_button() -> MockPage {
        let button = ElementInfo::interactable(
            42,
            "button",
            "Buy",
            BoundingBox {
                x: 100.0,
                y: 300.0,
                width: 100.0,
                height: 40.0,
            },
        );
        MockPage::new("https://shop.test/")
            .with_title("Shop")
            .with_tree(AxNode {
                backend_id: 1,
                role: "document".into(),
                name: "Shop".into(),
                visible: true,
                children: vec![AxNode {
                    backend_id: 42,
                    role: "button".into(),
                    name: "Buy".into(),
                    visible: true,
                    box_: Some(BoundingBox {
                        x: 100.0,
                        y: 300.0,
                        width: 100.0,
                        height: 40.0,
                    }),
                    ..Default::default()
                }],
                ..Default::default()
            })
            .with_element(button)
    }

    async fn current_ref_for(executor: &Executor, driver: &MockPageDriver, backend_id: u64) -> ElementRef {
        let snapshot = match executor
            .snapshots()
            .capture(driver, &SnapshotOptions::default())
            .await
            .unwrap()
        {
            SnapshotResult::Full(s) => s,
            SnapshotResult::Diff(_) => unreachable!(),
        };
        snapshot
            .elements
            .iter()
            .find(|e| e.backend_id == backend_id)
            .unwrap()
            .ref_
            .clone()
    }

    #[tokio::test]
    async fn successful_navigate_records_domain() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let executor = executor_for(driver.clone());

        let result = executor
            .execute(&ToolCall::Navigate {
                url: "https://a.test/".into(),
            })
            .await;
        assert!(result.success);
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_to_success() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        driver.fail_next(
            "navigate",
            ExternalError::new("navigate timed out after 5s"),
            2,
        );
        let executor = executor_for(driver.clone());

        let result = executor
            .execute(&ToolCall::Navigate {
                url: "https://a.test/".into(),
            })
            .await;
        assert!(result.success);
        assert_eq!(result.attempts, 3);
        assert_eq!(driver.calls("navigate"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn attempts_never_exceed_policy_maximum() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        driver.fail_always("navigate", ExternalError::new("ConnectionError: reset by peer"));
        let executor = executor_for(driver.clone());

        let result = executor
            .execute(&ToolCall::Navigate {
                url: "https://a.test/".into(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::ConnectionReset));
        assert_eq!(result.attempts, 3);
        assert_eq!(driver.calls("navigate"), 3);
    }

    #[tokio::test]
    async fn non_retryable_status_fails_on_first_attempt() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        driver.fail_always("navigate", ExternalError::new("gone").with_status(404));
        let executor = executor_for(driver.clone());

        let result = executor
            .execute(&ToolCall::Navigate {
                url: "https://a.test/".into(),
            })
            .await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::NotFound4xx));
        assert_eq!(result.attempts, 1);
        assert_eq!(driver.calls("navigate"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn circuit_opens_after_three_terminal_failures() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://flaky.test/"));
        driver.fail_always("navigate", ExternalError::new("ConnectionError"));
        let executor = executor_for(driver.clone());
        let call = ToolCall::Navigate {
            url: "https://flaky.test/".into(),
        };

        // Three Execute calls, each exhausting its retry budget.
        for _ in 0..3 {
            let result = executor.execute(&call).await;
            assert!(!result.success);
            assert_eq!(result.error_kind, Some(ErrorKind::ConnectionReset));
        }
        let driver_calls = driver.calls("navigate");

        // Fourth call short-circuits without contacting the driver.
        let result = executor.execute(&call).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::CircuitOpen));
        assert_eq!(result.attempts, 0);
        assert_eq!(driver.calls("navigate"), driver_calls);
        assert_eq!(executor.circuit().open_count(), 1);
    }

    #[tokio::test]
    async fn stale_ref_is_rejected_without_driver_contact() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(page_with_button());
        let executor = executor_for(driver.clone());

        let old_ref = current_ref_for(&executor, &driver, 42).await;
        // Force a fresh capture: the old generation is now stale.
        let _ = executor
            .snapshots()
            .capture(
                driver.as_ref(),
                &SnapshotOptions {
                    force: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let result = executor.execute(&ToolCall::Click { target: old_ref }).await;
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::StaleElement));
        assert_eq!(driver.calls("click"), 0);
    }

    #[tokio::test]
    async fn obstructed_click_dismisses_banner_and_succeeds() {
        let driver = Arc::new(MockPageDriver::new());
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
            page_with_button().with_selector("#onetrust-accept-btn-handler", accept),
        );
        driver.add_obstruction(MockObstruction {
            element: ElementInfo::interactable(
                90,
                "dialog",
                "We use cookies",
                BoundingBox {
                    x: 0.0,
                    y: 250.0,
                    width: 800.0,
                    height: 200.0,
                },
            ),
            dismiss_backend_id: 91,
            escape_dismisses: false,
        });
        let executor = executor_for(driver.clone());
        let target = current_ref_for(&executor, &driver, 42).await;

        let result = executor.execute(&ToolCall::Click { target }).await;
        assert!(result.success, "{:?}", result.error);
        assert_eq!(driver.active_obstructions(), 0);
        // Accept control clicked, then the real target.
        let log = driver.action_log();
        assert!(log.contains(&"click:91".to_string()));
        assert!(log.contains(&"click:42".to_string()));
    }

    #[tokio::test]
    async fn sequence_stops_at_first_failure() {
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        driver.fail_always("press_key", ExternalError::new("gone").with_status(404));
        let executor = executor_for(driver.clone());

        let results = executor
            .execute_sequence(&[
                ToolCall::Navigate {
                    url: "https://a.test/".into(),
                },
                ToolCall::PressKey { key: "Enter".into() },
                ToolCall::ExtractLinks,
            ])
            .await;
        assert_eq!(results.len(), 2);
        assert!(results[0].success);
        assert!(!results[1].success);
    }
}
