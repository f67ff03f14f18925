//! Dual-model CAPTCHA confidence engine.
//!
//! A vision solve produces an answer plus a heuristic image confidence;
//! a text-model validation pass produces a context confidence; the
//! weighted combination maps to a decision band that decides between
//! auto-submission and human escalation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use webpilot_traits::{ExternalError, ExternalResult, ModelClient, VisionOptions};

/// CAPTCHA flavors the engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptchaKind {
    Text,
    Math,
    ImageGrid,
}

/// Decision bands over the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionBand {
    High,
    Good,
    Medium,
    Low,
}

impl DecisionBand {
    pub fn label(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Good => "good",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// What to do with the proposed solution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptchaAction {
    /// Submit immediately.
    Submit,
    /// Submit; if the site rejects it, retry once.
    SubmitWithRetry,
    /// Submit once, then escalate to a human.
    SubmitThenEscalate,
    /// Escalate to a human immediately.
    Escalate,
}

/// Band cutoffs, configurable so they can be retuned from metrics.
#[derive(Debug, Clone, Copy)]
pub struct CaptchaThresholds {
    pub high: f64,
    pub good: f64,
    pub medium: f64,
}

impl Default for CaptchaThresholds {
    fn default() -> Self {
        Self {
            high: 0.85,
            good: 0.75,
            medium: 0.50,
        }
    }
}

impl CaptchaThresholds {
    pub fn band(&self, score: f64) -> DecisionBand {
        if score >= self.high {
            DecisionBand::High
        } else if score >= self.good {
            DecisionBand::Good
        } else if score >= self.medium {
            DecisionBand::Medium
        } else {
            DecisionBand::Low
        }
    }
}

/// Full assessment of one CAPTCHA.
#[derive(Debug, Clone)]
pub struct CaptchaAssessment {
    pub answer: String,
    pub description: String,
    pub image_confidence: f64,
    pub context_confidence: f64,
    pub validator_accepted: bool,
    pub score: f64,
    pub band: DecisionBand,
    pub action: CaptchaAction,
}

const REFUSAL_PHRASES: &[&str] = &[
    "i cannot",
    "i can't",
    "i'm unable",
    "i am unable",
    "i'm sorry",
    "as an ai",
    "unreadable",
];
const AMBIGUOUS_CHARS: &[char] = &['O', '0', 'I', 'l', '1'];

/// Heuristic confidence in the raw vision answer: length plausibility,
/// refusal phrases, ambiguous characters, format cleanliness.
pub fn image_confidence(kind: CaptchaKind, answer: &str) -> f64 {
    let trimmed = answer.trim();
    if trimmed.is_empty() {
        return 0.0;
    }
    let lowered = trimmed.to_lowercase();
    if REFUSAL_PHRASES.iter().any(|p| lowered.contains(p)) {
        return 0.0;
    }

    let mut confidence: f64 = 1.0;
    let len = trimmed.chars().count();

    match kind {
        CaptchaKind::Text => {
            if !(4..=8).contains(&len) {
                confidence -= 0.15;
            }
            if !trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
                confidence -= 0.15;
            }
        }
        CaptchaKind::Math => {
            if !trimmed.chars().all(|c| c.is_ascii_digit() || c == '-') {
                confidence -= 0.25;
            }
            if len > 6 {
                confidence -= 0.15;
            }
        }
        CaptchaKind::ImageGrid => {
            // Grid answers are cell lists ("1,3,7"); punish prose.
            if len > 20 {
                confidence -= 0.25;
            }
        }
    }

    let ambiguous = trimmed
        .chars()
        .filter(|c| AMBIGUOUS_CHARS.contains(c))
        .count();
    confidence -= 0.05 * (ambiguous.min(3) as f64);

    confidence.clamp(0.0, 1.0)
}

/// Whether the answer's shape fits the CAPTCHA kind (format bonus).
pub fn format_appropriate(kind: CaptchaKind, answer: &str) -> bool {
    let trimmed = answer.trim();
    match kind {
        CaptchaKind::Text => {
            !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_alphanumeric())
        }
        CaptchaKind::Math => {
            !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_digit() || c == '-')
        }
        CaptchaKind::ImageGrid => trimmed
            .split(',')
            .all(|cell| cell.trim().parse::<u8>().is_ok()),
    }
}

/// Combine the two confidences into the final score:
/// `0.6·image + 0.3·context + 0.1 format bonus`, minus penalties for
/// over-long answers, embedded spaces, and validator rejection.
pub fn combine_score(
    kind: CaptchaKind,
    answer: &str,
    image_conf: f64,
    context_conf: f64,
    validator_accepted: bool,
) -> f64 {
    let mut score = 0.6 * image_conf + 0.3 * context_conf;
    if format_appropriate(kind, answer) {
        score += 0.10;
    }
    if answer.trim().chars().count() > 12 {
        score -= 0.10;
    }
    if answer.trim().contains(' ') {
        score -= 0.10;
    }
    if !validator_accepted {
        score -= 0.20;
    }
    score.clamp(0.0, 1.0)
}

fn action_for(band: DecisionBand) -> CaptchaAction {
    match band {
        DecisionBand::High => CaptchaAction::Submit,
        DecisionBand::Good => CaptchaAction::SubmitWithRetry,
        DecisionBand::Medium => CaptchaAction::SubmitThenEscalate,
        DecisionBand::Low => CaptchaAction::Escalate,
    }
}

/// Per-band submission stats, for threshold retuning. Informative only:
/// it never changes runtime behavior.
#[derive(Debug, Default)]
pub struct CaptchaMetrics {
    outcomes: Mutex<HashMap<DecisionBand, (u32, u32)>>,
}

impl CaptchaMetrics {
    /// Record whether the site accepted a submission from this band.
    pub fn record(&self, band: DecisionBand, accepted: bool) {
        let mut outcomes = self.outcomes.lock();
        let entry = outcomes.entry(band).or_insert((0, 0));
        entry.0 += 1;
        if accepted {
            entry.1 += 1;
        }
    }

    /// (submissions, acceptances) for one band.
    pub fn for_band(&self, band: DecisionBand) -> (u32, u32) {
        self.outcomes.lock().get(&band).copied().unwrap_or((0, 0))
    }
}

/// The engine: vision solve, text validation, scoring, banding.
pub struct CaptchaEngine {
    model: Arc<dyn ModelClient>,
    thresholds: CaptchaThresholds,
    /// Alternative vision model tried on low-confidence retries.
    alternate_model: Option<String>,
    timeout: Duration,
    metrics: CaptchaMetrics,
}

impl CaptchaEngine {
    pub fn new(model: Arc<dyn ModelClient>, thresholds: CaptchaThresholds) -> Self {
        Self {
            model,
            thresholds,
            alternate_model: None,
            timeout: Duration::from_secs(30),
            metrics: CaptchaMetrics::default(),
        }
    }

    pub fn with_alternate_model(mut self, model: impl Into<String>) -> Self {
        self.alternate_model = Some(model.into());
        self
    }

    pub fn metrics(&self) -> &CaptchaMetrics {
        &self.metrics
    }

    /// Record the site's verdict on a submitted solution.
    pub fn record_outcome(&self, band: DecisionBand, accepted: bool) {
        self.metrics.record(band, accepted);
    }

    /// Assess a CAPTCHA image. Low and Medium first passes retry once
    /// with the alternate vision model and an enhancement hint; the
    /// better-scoring assessment wins.
    pub async fn assess(
        &self,
        image: &[u8],
        kind: CaptchaKind,
    ) -> ExternalResult<CaptchaAssessment> {
        let first = self.assess_once(image, kind, VisionOptions::default()).await?;
        if !matches!(first.band, DecisionBand::Low | DecisionBand::Medium) {
            return Ok(first);
        }

        let Some(alternate) = &self.alternate_model else {
            return Ok(first);
        };
        debug!(band = first.band.label(), "Low confidence, retrying with alternate vision model");
        let retry_options = VisionOptions {
            enhance: true,
            model_override: Some(alternate.clone()),
        };
        match self.assess_once(image, kind, retry_options).await {
            Ok(second) if second.score > first.score => Ok(second),
            Ok(_) => Ok(first),
            Err(err) => {
                debug!(error = %err, "Alternate model retry failed, keeping first assessment");
                Ok(first)
            }
        }
    }

    async fn assess_once(
        &self,
        image: &[u8],
        kind: CaptchaKind,
        options: VisionOptions,
    ) -> ExternalResult<CaptchaAssessment> {
        let solve_prompt = match kind {
            CaptchaKind::Text => "Read the characters in this CAPTCHA. Reply with only the characters.",
            CaptchaKind::Math => "Solve the arithmetic in this CAPTCHA. Reply with only the result.",
            CaptchaKind::ImageGrid => {
                "Identify the matching grid cells in this CAPTCHA. Reply with only the \
                 cell numbers, comma-separated."
            }
        };
        let answer = self
            .model
            .complete_vision(solve_prompt, image, options.clone(), self.timeout)
            .await?
            .trim()
            .to_string();

        let description = self
            .model
            .complete_vision(
                "Describe this CAPTCHA in one sentence.",
                image,
                options,
                self.timeout,
            )
            .await?
            .trim()
            .to_string();

        let image_conf = image_confidence(kind, &answer);
        let (validator_accepted, context_conf) =
            self.validate_with_text_model(kind, &answer, &description).await?;

        let score = combine_score(kind, &answer, image_conf, context_conf, validator_accepted);
        let band = self.thresholds.band(score);
        info!(
            band = band.label(),
            score,
            image_conf,
            context_conf,
            "CAPTCHA assessed"
        );

        Ok(CaptchaAssessment {
            answer,
            description,
            image_confidence: image_conf,
            context_confidence: context_conf,
            validator_accepted,
            score,
            band,
            action: action_for(band),
        })
    }

    async fn validate_with_text_model(
        &self,
        kind: CaptchaKind,
        answer: &str,
        description: &str,
    ) -> ExternalResult<(bool, f64)> {
        let prompt = format!(
            "A {kind:?} CAPTCHA was described as: \"{description}\". The proposed answer \
             is \"{answer}\". Is the answer plausible for that CAPTCHA? Reply with only a \
             JSON object {{\"valid\": <bool>, \"confidence\": <0..1>}}."
        );
        let outcome = self.model.complete(&prompt, &[], self.timeout).await?;
        let reply = outcome.answer.unwrap_or(outcome.thought);
        parse_validation(&reply)
            .ok_or_else(|| ExternalError::new(format!("unparseable validator reply: {reply}")))
    }
}

fn parse_validation(text: &str) -> Option<(bool, f64)> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    let value: serde_json::Value = serde_json::from_str(&text[start..=end]).ok()?;
    let valid = value.get("valid")?.as_bool()?;
    let confidence = value.get("confidence")?.as_f64()?.clamp(0.0, 1.0);
    Some((valid, confidence))
}
