//! The orchestrator: transforms a goal into a sequence of steps by
//! alternating model reasoning with tool execution until the goal is
//! complete, blocked, or the budget is exhausted.
//!
//! `run` never errors out: every failure mode becomes an episode outcome
//! (`failed`, `timeout`, `cancelled`, `escalated`) with a diagnostic
//! summary. Tool failures are observations for the model, not crashes.

use std::sync::Arc;
use std::time::Instant;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webpilot_storage::{StoreSet, write_json_state};
use webpilot_traits::{AgentEvent, ModelClient, PageDriver};

use crate::captcha::{CaptchaAction, CaptchaEngine, CaptchaKind};
use crate::config::AgentConfig;
use crate::error::{AgentError, Result};
use crate::memory::{Episode, EpisodeOutcome, MemoryManager, Skill, WorkingMemory};
use crate::model::OpenAiCompatClient;
use crate::reliability::{CircuitBreaker, ErrorKind, Executor, retry_model};
use crate::router;
use crate::site_memory::{ElementLocator, SiteMemoryStore};
use crate::snapshot::{SnapshotOptions, SnapshotResult, SnapshotService};
use crate::tools::{ActionResult, ToolCall, ToolOrigin, infer_tags};
use crate::valence::{ValenceBias, ValenceModule};

use super::prompt::{SYSTEM_PROMPT, build_prompt};
use super::step::{Goal, Step};

/// Observations longer than this are tail-truncated before entering
/// working memory.
const OBSERVATION_MAX_CHARS: usize = 2_000;

/// One agent instance: the long-lived components of the kernel wired
/// around one page driver and one model runtime.
pub struct Agent {
    config: AgentConfig,
    driver: Arc<dyn PageDriver>,
    model: Arc<dyn ModelClient>,
    executor: Arc<Executor>,
    memory: Arc<MemoryManager>,
    site_memory: Arc<SiteMemoryStore>,
    captcha: Arc<CaptchaEngine>,
    valence: Mutex<ValenceModule>,
    events: mpsc::UnboundedSender<AgentEvent>,
    stores: StoreSet,
}

impl Agent {
    /// Wire an agent from its two external capabilities and a config.
    pub fn new(
        driver: Arc<dyn PageDriver>,
        model: Arc<dyn ModelClient>,
        config: AgentConfig,
    ) -> Result<Self> {
        let stores = StoreSet::open(&config.memory_dir)?;
        let memory = Arc::new(MemoryManager::open(&stores, config.memory.clone())?);
        let site_memory = Arc::new(
            SiteMemoryStore::new(stores.site_memory.clone())?
                .with_min_confidence(config.min_selector_confidence),
        );
        let locator = Arc::new(
            ElementLocator::new(Arc::clone(&site_memory)).with_vision(Arc::clone(&model)),
        );
        let snapshots = Arc::new(SnapshotService::new(config.snapshot_cache));
        let circuit = Arc::new(CircuitBreaker::new(config.circuit));

        let (events, mut valence) = ValenceModule::channel(config.valence.clone());
        valence.load(&stores.valence_state_path());

        let executor = Arc::new(
            Executor::new(
                Arc::clone(&driver),
                snapshots,
                circuit,
                config.retry_policy.clone(),
            )
            .with_locator(locator)
            .with_timeouts(config.timeouts)
            .with_events(events.clone()),
        );
        let captcha = Arc::new(CaptchaEngine::new(
            Arc::clone(&model),
            config.captcha_thresholds,
        ));

        Ok(Self {
            config,
            driver,
            model,
            executor,
            memory,
            site_memory,
            captcha,
            valence: Mutex::new(valence),
            events,
            stores,
        })
    }

    /// Build an agent whose model client targets the configured
    /// OpenAI-compatible endpoint.
    pub fn with_http_model(driver: Arc<dyn PageDriver>, config: AgentConfig) -> Result<Self> {
        let model: Arc<dyn ModelClient> = Arc::new(
            OpenAiCompatClient::new(config.model_endpoint.clone())
                .with_text_model(config.text_model.clone())
                .with_vision_model(config.vision_model.clone()),
        );
        Self::new(driver, model, config)
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.memory
    }

    pub fn site_memory(&self) -> &Arc<SiteMemoryStore> {
        &self.site_memory
    }

    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    pub fn stores(&self) -> &StoreSet {
        &self.stores
    }

    /// Start the periodic background tasks: the snapshot-cache TTL sweep
    /// and memory consolidation. Call once from an async context; the
    /// handles die with the runtime.
    pub fn spawn_background_tasks(&self) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.executor.snapshots().spawn_ttl_sweeper(),
            self.memory.spawn_consolidator(),
        ]
    }

    /// Execute one goal. Always returns a final answer (or diagnostic
    /// summary) and a well-formed episode.
    pub async fn run(&self, goal_text: &str) -> (String, Episode) {
        let goal = Goal::new(goal_text);
        let started = Instant::now();
        let deadline = started + self.config.goal_timeout;
        info!(goal = %goal.text, id = %goal.id, "Goal started");

        let mut wm = WorkingMemory::new(SYSTEM_PROMPT, goal_text)
            .with_limits(
                self.config.context_cap,
                self.config.compact_threshold,
                self.config.keep_tail,
            )
            .with_screenshot_retention(self.config.keep_last_n_screenshots);
        let mut executed: Vec<(ToolCall, bool)> = Vec::new();
        let mut consecutive_failures: u32 = 0;
        let mut last_error_kind = ErrorKind::Unknown;
        let mut captcha_attempted = false;
        let mut final_answer: Option<String> = None;
        let mut outcome: Option<EpisodeOutcome> = None;

        // Fast path: unambiguous prompts bypass the model entirely.
        if let Some(call) = router::route(goal_text) {
            debug!(tool = call.name(), "Trigger bypass");
            let result = self.executor.execute(&call).await;
            let step = self.build_step(&mut wm, String::new(), &call, ToolOrigin::Trigger, &result);
            executed.push((call, result.success));
            wm.add_step(step);
            self.checkpoint(&wm);
            if result.success {
                final_answer =
                    Some(serde_json::to_string_pretty(&result.data).unwrap_or_default());
                outcome = Some(EpisodeOutcome::Success);
            } else {
                consecutive_failures = 1;
                last_error_kind = result.error_kind.unwrap_or(ErrorKind::Unknown);
            }
        }

        if outcome.is_none() {
            let enriched = self.memory.enriched_context(goal_text);
            let schemas = ToolCall::schemas();

            while wm.step_count() < self.config.max_iterations {
                if Instant::now() >= deadline {
                    warn!(goal = %goal.text, "Goal deadline reached");
                    outcome = Some(EpisodeOutcome::Cancelled);
                    break;
                }

                let bias = self.apply_valence_bias();
                let fatal_threshold = self
                    .config
                    .fatal_consecutive_failures
                    .saturating_sub(bias.tighten_fatal_by)
                    .max(1);

                if wm.needs_compaction() {
                    let stats = wm.compact();
                    debug!(
                        summarized = stats.steps_summarized,
                        screenshots_dropped = stats.screenshots_dropped,
                        "Working memory compacted"
                    );
                }

                let context = wm.render_context(self.config.detailed_tail);
                let prompt = build_prompt(&wm.system, &enriched, goal_text, &context);
                let turn = match retry_model(
                    self.model.as_ref(),
                    &prompt,
                    &schemas,
                    self.config.model_timeout,
                    &self.config.retry_policy,
                )
                .await
                {
                    Ok(turn) => turn,
                    Err((kind, err)) => {
                        warn!(kind = %kind, error = %err, "Model unavailable, abandoning goal");
                        outcome = Some(EpisodeOutcome::Failed { error: kind });
                        break;
                    }
                };

                let Some(call) = turn.action.as_ref().and_then(ToolCall::parse) else {
                    // No parseable tool call: the turn is the final answer.
                    let answer = turn
                        .answer
                        .filter(|a| !a.trim().is_empty())
                        .unwrap_or(turn.thought);
                    final_answer = Some(answer);
                    outcome = Some(EpisodeOutcome::Success);
                    break;
                };

                let result = self.executor.execute(&call).await;

                // CAPTCHA is never auto-retried by the fabric; it
                // escalates through the confidence engine.
                let mut observation_override = None;
                if result.error_kind == Some(ErrorKind::Captcha) {
                    let (observation, escalate) = self.handle_captcha(captcha_attempted).await;
                    captcha_attempted = true;
                    if escalate {
                        let _ = self.events.send(AgentEvent::CaptchaEscalated {
                            band: "low".to_string(),
                        });
                        let step = self.build_step(
                            &mut wm,
                            turn.thought.clone(),
                            &call,
                            ToolOrigin::Model,
                            &result,
                        );
                        wm.add_step(step);
                        self.checkpoint(&wm);
                        outcome = Some(EpisodeOutcome::Escalated);
                        break;
                    }
                    observation_override = Some(observation);
                }

                let mut step =
                    self.build_step(&mut wm, turn.thought, &call, ToolOrigin::Model, &result);
                if let Some(observation) = observation_override {
                    step.observation = observation;
                }
                // A fresh page needs fresh refs: observe after navigation.
                if result.success
                    && matches!(call, ToolCall::Navigate { .. })
                    && let Some(page_view) = self.observe_page().await
                {
                    step.observation.push('\n');
                    step.observation.push_str(&page_view);
                }
                executed.push((call, result.success));

                if result.success {
                    consecutive_failures = 0;
                } else {
                    consecutive_failures += 1;
                    last_error_kind = result.error_kind.unwrap_or(ErrorKind::Unknown);
                }
                wm.add_step(step);
                if wm.needs_compaction() {
                    wm.compact();
                }
                self.checkpoint(&wm);

                if consecutive_failures >= fatal_threshold {
                    warn!(
                        failures = consecutive_failures,
                        kind = %last_error_kind,
                        "Fatal consecutive-failure threshold reached"
                    );
                    outcome = Some(EpisodeOutcome::Failed {
                        error: last_error_kind,
                    });
                    break;
                }
            }
        }

        // Iteration budget exhausted with no terminal answer.
        let outcome = outcome.unwrap_or(EpisodeOutcome::Timeout);
        let answer = final_answer.unwrap_or_else(|| diagnostic_summary(&outcome, &wm));

        let episode = self.close_episode(&goal, &wm, &executed, outcome, started);
        (answer, episode)
    }

    /// Re-execute a stored skill's or episode's action sequence.
    pub async fn replay(&self, id: &str) -> Result<Episode> {
        let (label, calls, skill_id) = if let Some(skill) = self.memory.skills().get(id) {
            (skill.name.clone(), skill.calls.clone(), Some(skill.id))
        } else if let Some(episode) = self.memory.episodic().get(id) {
            (episode.goal_text.clone(), episode.calls.clone(), None)
        } else {
            return Err(AgentError::Config(format!(
                "no stored skill or episode with id {id}"
            )));
        };
        if calls.is_empty() {
            return Err(AgentError::Config(format!(
                "{label}: nothing to replay (empty action sequence)"
            )));
        }

        info!(source = %label, calls = calls.len(), "Replaying action sequence");
        let started = Instant::now();
        let results = self.executor.execute_sequence(&calls).await;
        let success = results.len() == calls.len() && results.iter().all(|r| r.success);
        let duration_ms = started.elapsed().as_millis() as u64;

        if let Some(skill_id) = skill_id {
            self.memory
                .record_skill_execution(&skill_id, success, duration_ms)?;
        }

        let outcome = if success {
            EpisodeOutcome::Success
        } else {
            EpisodeOutcome::Failed {
                error: results
                    .iter()
                    .rev()
                    .find_map(|r| r.error_kind)
                    .unwrap_or(ErrorKind::Unknown),
            }
        };
        let mut episode = Episode::new(format!("replay: {label}"), outcome);
        episode.duration_ms = duration_ms;
        episode.trace = results
            .iter()
            .zip(&calls)
            .enumerate()
            .map(|(i, (result, call))| format!("Step {i}: {} - {}", call.name(), result.brief()))
            .collect();
        episode.calls = calls.clone();
        episode.tool_sequence = calls.iter().map(|c| c.name().to_string()).collect();
        episode.tags = infer_tags(&episode.tool_sequence);
        self.memory.save_episode(&episode)?;
        Ok(episode)
    }

    fn apply_valence_bias(&self) -> ValenceBias {
        let mut valence = self.valence.lock();
        valence.drain();
        let bias = valence.bias();
        if bias.relax_transient_retries {
            self.executor
                .set_policy(self.config.retry_policy.clone().with_relaxed_transients());
        } else {
            self.executor.set_policy(self.config.retry_policy.clone());
        }
        bias
    }

    fn build_step(
        &self,
        wm: &mut WorkingMemory,
        thought: String,
        call: &ToolCall,
        origin: ToolOrigin,
        result: &ActionResult,
    ) -> Step {
        let screenshot = match call {
            ToolCall::Screenshot if result.success => result
                .data
                .get("base64")
                .and_then(Value::as_str)
                .and_then(|b64| BASE64_STANDARD.decode(b64).ok()),
            _ => None,
        };
        let observation = if result.success {
            truncate_observation(
                &serde_json::to_string(&result.data).unwrap_or_default(),
                OBSERVATION_MAX_CHARS,
            )
        } else {
            format!(
                "error[{}]: {} (after {} attempts)",
                result
                    .error_kind
                    .map(|k| k.to_string())
                    .unwrap_or_else(|| "unknown".into()),
                result.error.clone().unwrap_or_default(),
                result.attempts,
            )
        };
        Step {
            index: wm.next_index(),
            thought,
            tool: Some(call.clone()),
            origin: Some(origin),
            observation,
            success: result.success,
            duration_ms: result.latency_ms,
            error_kind: result.error_kind,
            screenshot,
        }
    }

    /// Snapshot the current page for the model's next observation, in
    /// the configured diff mode.
    async fn observe_page(&self) -> Option<String> {
        let options = SnapshotOptions {
            diff: self.config.snapshot_diff_enabled,
            ..Default::default()
        };
        match self
            .executor
            .snapshots()
            .capture(self.driver.as_ref(), &options)
            .await
        {
            Ok(SnapshotResult::Full(snapshot)) => Some(truncate_observation(
                &format!("Page snapshot:\n{}", snapshot.render()),
                OBSERVATION_MAX_CHARS,
            )),
            Ok(SnapshotResult::Diff(diff)) => serde_json::to_string(&diff)
                .ok()
                .map(|delta| truncate_observation(&format!("Page delta: {delta}"), OBSERVATION_MAX_CHARS)),
            Err(err) => {
                debug!(error = %err, "Post-navigation snapshot failed");
                None
            }
        }
    }

    async fn handle_captcha(&self, already_attempted: bool) -> (String, bool) {
        let image = match self.driver.screenshot().await {
            Ok(bytes) => bytes,
            Err(err) => {
                return (
                    format!("captcha detected but screenshot failed: {err}"),
                    true,
                );
            }
        };
        match self.captcha.assess(&image, CaptchaKind::Text).await {
            Ok(assessment) => match assessment.action {
                CaptchaAction::Submit | CaptchaAction::SubmitWithRetry => (
                    format!(
                        "captcha solved (band {}, score {:.2}): answer \"{}\". \
                         Locate the captcha input, type the answer, and submit.",
                        assessment.band.label(),
                        assessment.score,
                        assessment.answer,
                    ),
                    false,
                ),
                CaptchaAction::SubmitThenEscalate if !already_attempted => (
                    format!(
                        "captcha tentatively solved (band {}): answer \"{}\". \
                         Submit it once; a rejection will escalate to a human.",
                        assessment.band.label(),
                        assessment.answer,
                    ),
                    false,
                ),
                _ => (
                    "captcha could not be solved with confidence; human help required"
                        .to_string(),
                    true,
                ),
            },
            Err(err) => (format!("captcha assessment failed: {err}"), true),
        }
    }

    fn close_episode(
        &self,
        goal: &Goal,
        wm: &WorkingMemory,
        executed: &[(ToolCall, bool)],
        outcome: EpisodeOutcome,
        started: Instant,
    ) -> Episode {
        let successful_calls: Vec<ToolCall> = executed
            .iter()
            .filter(|(_, ok)| *ok)
            .map(|(call, _)| call.clone())
            .collect();
        let all_names: Vec<String> = executed
            .iter()
            .map(|(call, _)| call.name().to_string())
            .collect();

        let mut episode = Episode::new(goal.text.clone(), outcome.clone());
        episode.trace = wm.trace();
        episode.tool_sequence = successful_calls.iter().map(|c| c.name().to_string()).collect();
        episode.calls = successful_calls;
        episode.tags = infer_tags(&all_names);
        episode.duration_ms = started.elapsed().as_millis() as u64;
        episode.importance = if outcome.is_success() { 0.8 } else { 0.4 };

        if let Err(err) = self.memory.save_episode(&episode) {
            warn!(error = %err, "Could not persist episode");
        }

        // Update the skill whose sequence matches this plan, if any.
        if outcome.is_success() && !episode.tool_sequence.is_empty() {
            let sequence_id = Skill::sequence_id(&episode.tool_sequence);
            if self.memory.skills().get(&sequence_id).is_some()
                && let Err(err) =
                    self.memory
                        .record_skill_execution(&sequence_id, true, episode.duration_ms)
            {
                warn!(error = %err, "Could not update skill stats");
            }
        }

        let _ = self.events.send(AgentEvent::GoalFinished {
            success: outcome.is_success(),
        });
        {
            let mut valence = self.valence.lock();
            valence.drain();
            valence.persist(&self.stores.valence_state_path());
        }

        info!(
            goal = %goal.text,
            outcome = ?episode.outcome,
            steps = episode.trace.len(),
            duration_ms = episode.duration_ms,
            "Goal finished"
        );
        episode
    }

    fn checkpoint(&self, wm: &WorkingMemory) {
        if let Err(err) = write_json_state(&self.stores.working_state_path(), wm) {
            debug!(error = %err, "Working-memory checkpoint failed");
        }
    }
}

fn truncate_observation(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let kept: String = text.chars().take(max).collect();
    format!("{kept}… [{} chars truncated]", text.chars().count() - max)
}

fn diagnostic_summary(outcome: &EpisodeOutcome, wm: &WorkingMemory) -> String {
    let steps = wm.step_count();
    match outcome {
        EpisodeOutcome::Success => "goal completed".to_string(),
        EpisodeOutcome::Failed { error } => {
            format!("goal abandoned after {steps} steps: repeated {error} failures")
        }
        EpisodeOutcome::Timeout => {
            format!("iteration budget exhausted after {steps} steps without a terminal answer")
        }
        EpisodeOutcome::Cancelled => format!("goal cancelled after {steps} steps (deadline)"),
        EpisodeOutcome::Escalated => {
            format!("escalated to a human after {steps} steps (unsolvable challenge)")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use tempfile::tempdir;
    use webpilot_traits::{ExternalError, MockPage, MockPageDriver};

    use crate::model::{MockModelClient, MockModelStep};

    fn test_config(dir: &std::path::Path) -> AgentConfig {
        AgentConfig::default().with_memory_dir(dir.join("memory"))
    }

    fn links_page() -> MockPage {
        MockPage::new("https://links.test/").with_eval(
            "querySelectorAll('a')",
            json!([
                {"text": "One", "href": "/a"},
                {"text": "Two", "href": "/b"},
                {"text": "Three", "href": "/c"},
            ]),
        )
    }

    #[tokio::test]
    async fn trigger_bypass_skips_the_model() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(links_page());
        let model = Arc::new(MockModelClient::new()); // empty script: any call would error
        let agent = Agent::new(driver, Arc::clone(&model) as Arc<dyn ModelClient>, test_config(dir.path())).unwrap();

        let (answer, episode) = agent.run("extract all links").await;

        assert!(episode.outcome.is_success());
        assert_eq!(episode.trace.len(), 1);
        assert_eq!(model.complete_calls(), 0);
        assert!(answer.contains("One"));
        assert!(answer.contains("/c"));
    }

    #[tokio::test]
    async fn model_answer_terminates_immediately() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let model = Arc::new(
            MockModelClient::new().with_steps(vec![MockModelStep::answer("All done: 42")]),
        );
        let agent = Agent::new(driver, model, test_config(dir.path())).unwrap();

        let (answer, episode) = agent.run("what is six times seven").await;
        assert_eq!(answer, "All done: 42");
        assert!(episode.outcome.is_success());
        assert!(episode.trace.is_empty());
    }

    #[tokio::test]
    async fn action_then_answer_records_one_step() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let model = Arc::new(MockModelClient::new().with_steps(vec![
            MockModelStep::action(
                "open the page first",
                json!({"type": "navigate", "url": "https://a.test/"}),
            ),
            MockModelStep::answer("navigated successfully"),
        ]));
        let agent = Agent::new(driver.clone(), model, test_config(dir.path())).unwrap();

        let (answer, episode) = agent.run("open a.test").await;
        assert_eq!(answer, "navigated successfully");
        assert_eq!(episode.trace.len(), 1);
        assert_eq!(episode.tool_sequence, vec!["navigate"]);
        assert_eq!(episode.calls.len(), 1);
        assert_eq!(driver.calls("navigate"), 1);
    }

    #[tokio::test]
    async fn unknown_tool_output_is_treated_as_final_answer() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let model = Arc::new(MockModelClient::new().with_steps(vec![MockModelStep::action(
            "trying something exotic",
            json!({"type": "teleport", "to": "mars"}),
        )]));
        let agent = Agent::new(driver, model, test_config(dir.path())).unwrap();

        let (_answer, episode) = agent.run("go to mars").await;
        // Unparseable action terminates with the thought as answer.
        assert!(episode.outcome.is_success());
        assert!(episode.trace.is_empty());
    }

    #[tokio::test]
    async fn consecutive_failures_abandon_the_goal() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://gone.test/"));
        driver.fail_always("navigate", ExternalError::new("gone").with_status(404));
        let model = Arc::new(MockModelClient::new().with_steps(vec![
            MockModelStep::action("try", json!({"type": "navigate", "url": "https://gone.test/x"})),
            MockModelStep::action("retry", json!({"type": "navigate", "url": "https://gone.test/y"})),
        ]));
        let config = test_config(dir.path()).with_fatal_consecutive_failures(2);
        let agent = Agent::new(driver, model, config).unwrap();

        let (answer, episode) = agent.run("open gone.test").await;
        assert_eq!(
            episode.outcome,
            EpisodeOutcome::Failed {
                error: ErrorKind::NotFound4xx
            }
        );
        assert_eq!(episode.outcome.exit_code(), 1);
        assert!(answer.contains("not-found-4xx"));
        assert_eq!(episode.trace.len(), 2);
    }

    #[tokio::test]
    async fn iteration_budget_yields_timeout_outcome() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let model = Arc::new(MockModelClient::new().with_steps(vec![
            MockModelStep::action("step", json!({"type": "press_key", "key": "Tab"})),
            MockModelStep::action("step", json!({"type": "press_key", "key": "Tab"})),
            MockModelStep::action("step", json!({"type": "press_key", "key": "Tab"})),
        ]));
        let config = test_config(dir.path()).with_max_iterations(2);
        let agent = Agent::new(driver, model, config).unwrap();

        let (_answer, episode) = agent.run("tab around forever").await;
        assert_eq!(episode.outcome, EpisodeOutcome::Timeout);
        assert_eq!(episode.outcome.exit_code(), 2);
        assert_eq!(episode.trace.len(), 2); // exactly maxIterations steps
    }

    #[tokio::test]
    async fn expired_deadline_cancels_before_model_call() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let model = Arc::new(MockModelClient::new());
        let config = test_config(dir.path()).with_goal_timeout(Duration::ZERO);
        let agent = Agent::new(driver, Arc::clone(&model) as Arc<dyn ModelClient>, config).unwrap();

        let (_answer, episode) = agent.run("anything at all").await;
        assert_eq!(episode.outcome, EpisodeOutcome::Cancelled);
        assert_eq!(episode.outcome.exit_code(), 3);
        assert_eq!(model.complete_calls(), 0);
    }

    #[tokio::test]
    async fn model_outage_fails_with_classified_kind() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        // Rate-limited on every attempt; retry_model exhausts its budget.
        let model = Arc::new(MockModelClient::new().with_steps(vec![
            MockModelStep::error_with_status("too many requests", 429),
            MockModelStep::error_with_status("too many requests", 429),
            MockModelStep::error_with_status("too many requests", 429),
        ]));
        let mut config = test_config(dir.path());
        // Keep the test fast: no real backoff delays.
        config.retry_policy = crate::reliability::RetryPolicy::default();
        let agent = Agent::new(driver, model, config).unwrap();

        // Paused clock makes the 30s rate-limit backoffs instant.
        tokio::time::pause();
        let (_answer, episode) = agent.run("needs the model").await;
        assert_eq!(
            episode.outcome,
            EpisodeOutcome::Failed {
                error: ErrorKind::RateLimit
            }
        );
    }

    #[tokio::test]
    async fn captcha_low_confidence_escalates() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://guarded.test/"));
        driver.fail_always("navigate", ExternalError::new("blocked by reCAPTCHA challenge"));
        let model = Arc::new(
            MockModelClient::new()
                .with_steps(vec![
                    MockModelStep::action(
                        "open it",
                        json!({"type": "navigate", "url": "https://guarded.test/"}),
                    ),
                    // Validator turn for the captcha engine.
                    MockModelStep::answer(r#"{"valid": false, "confidence": 0.1}"#),
                ])
                .with_vision_replies(vec![
                    "I cannot read this distorted text".into(),
                    "A heavily warped text captcha".into(),
                ]),
        );
        let agent = Agent::new(driver, model, test_config(dir.path())).unwrap();

        let (answer, episode) = agent.run("open guarded.test").await;
        assert_eq!(episode.outcome, EpisodeOutcome::Escalated);
        assert!(answer.contains("escalated"));
    }

    #[tokio::test]
    async fn working_memory_checkpoint_is_written() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(links_page());
        let model = Arc::new(MockModelClient::new());
        let config = test_config(dir.path());
        let agent = Agent::new(driver, model, config).unwrap();

        let _ = agent.run("extract all links").await;
        assert!(agent.stores().working_state_path().exists());
    }

    #[tokio::test]
    async fn replay_skill_updates_its_stats() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(links_page());
        let model = Arc::new(MockModelClient::new());
        let agent = Agent::new(driver, model, test_config(dir.path())).unwrap();

        let skill = Skill::new(
            "grab-links",
            "collect links from links.test",
            vec![
                ToolCall::Navigate {
                    url: "https://links.test/".into(),
                },
                ToolCall::ExtractLinks,
            ],
        );
        agent.memory().skills().save(&skill).unwrap();

        let episode = agent.replay("grab-links").await.unwrap();
        assert!(episode.outcome.is_success());
        assert_eq!(episode.trace.len(), 2);

        let updated = agent.memory().skills().get("grab-links").unwrap();
        assert_eq!(updated.exec_count, 1);
        assert_eq!(updated.success_count, 1);
    }

    #[tokio::test]
    async fn replay_unknown_id_is_an_error() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(MockPage::new("https://a.test/"));
        let model = Arc::new(MockModelClient::new());
        let agent = Agent::new(driver, model, test_config(dir.path())).unwrap();

        assert!(agent.replay("no-such-id").await.is_err());
    }

    #[tokio::test]
    async fn successful_run_is_searchable_in_episodic_memory() {
        let dir = tempdir().unwrap();
        let driver = Arc::new(MockPageDriver::new());
        driver.add_page(links_page());
        let model = Arc::new(MockModelClient::new());
        let agent = Agent::new(driver, model, test_config(dir.path())).unwrap();

        let _ = agent.run("extract all links").await;

        let hits = agent.memory().episodic().search(
            "extract all links",
            &crate::memory::EpisodeFilter::default(),
            1,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].1.goal_text, "extract all links");
        assert!(hits[0].1.tags.contains(&"extraction".to_string()));
    }
}
