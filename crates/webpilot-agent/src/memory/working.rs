//! Working memory: the ordered step sequence of the current run, with
//! the compaction policy that keeps it under the message cap.
//!
//! Message accounting: the system message and the goal (first user
//! message) count one each, the summary block counts one when present,
//! and every detailed step counts one. When the count crosses the
//! compaction threshold, the middle is replaced by one-line summaries
//! and screenshots are stripped down to the most recent.

use serde::{Deserialize, Serialize};

use crate::agent::step::Step;

/// Result of one compaction pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompactStats {
    pub steps_summarized: usize,
    pub screenshots_dropped: usize,
}

/// Per-run working memory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemory {
    /// System instructions, preserved byte-for-byte across compaction.
    pub system: String,
    /// The goal text: the first user message, also preserved verbatim.
    pub goal: String,
    /// One-line summaries of compacted steps, oldest first.
    summary: Vec<String>,
    /// Detailed steps not yet compacted.
    steps: Vec<Step>,
    next_index: usize,
    cap: usize,
    compact_threshold: usize,
    keep_tail: usize,
    keep_screenshots: usize,
}

impl WorkingMemory {
    pub fn new(system: impl Into<String>, goal: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            goal: goal.into(),
            summary: Vec::new(),
            steps: Vec::new(),
            next_index: 0,
            cap: 100,
            compact_threshold: 80,
            keep_tail: 10,
            keep_screenshots: 1,
        }
    }

    pub fn with_limits(mut self, cap: usize, compact_threshold: usize, keep_tail: usize) -> Self {
        self.cap = cap;
        self.compact_threshold = compact_threshold;
        self.keep_tail = keep_tail;
        self
    }

    pub fn with_screenshot_retention(mut self, keep: usize) -> Self {
        self.keep_screenshots = keep;
        self
    }

    /// Next step index to assign.
    pub fn next_index(&mut self) -> usize {
        let index = self.next_index;
        self.next_index += 1;
        index
    }

    pub fn add_step(&mut self, step: Step) {
        debug_assert!(
            self.steps.last().map(|s| s.index < step.index).unwrap_or(true),
            "steps must be appended in index order"
        );
        self.steps.push(step);
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn step_count(&self) -> usize {
        self.summary.len() + self.steps.len()
    }

    /// Message count under the compaction accounting rules.
    pub fn message_count(&self) -> usize {
        2 + usize::from(!self.summary.is_empty()) + self.steps.len()
    }

    pub fn needs_compaction(&self) -> bool {
        self.message_count() >= self.compact_threshold
    }

    pub fn over_cap(&self) -> bool {
        self.message_count() > self.cap
    }

    /// Count of screenshot payloads still held.
    pub fn screenshot_count(&self) -> usize {
        self.steps.iter().filter(|s| s.screenshot.is_some()).count()
    }

    /// Compact: summarize everything but the last `keep_tail` steps and
    /// strip screenshots beyond the most recent `keep_screenshots`.
    /// Idempotent: a second pass with no new steps changes nothing.
    pub fn compact(&mut self) -> CompactStats {
        let mut stats = CompactStats::default();

        if self.steps.len() > self.keep_tail {
            let cut = self.steps.len() - self.keep_tail;
            for step in self.steps.drain(..cut) {
                self.summary.push(step.summary());
                stats.steps_summarized += 1;
            }
        }

        // Keep only the newest screenshots; everything older is dropped.
        let with_screenshots: Vec<usize> = self
            .steps
            .iter()
            .enumerate()
            .filter(|(_, s)| s.screenshot.is_some())
            .map(|(i, _)| i)
            .collect();
        if with_screenshots.len() > self.keep_screenshots {
            let drop_count = with_screenshots.len() - self.keep_screenshots;
            for &i in with_screenshots.iter().take(drop_count) {
                self.steps[i].screenshot = None;
                stats.screenshots_dropped += 1;
            }
        }

        stats
    }

    /// Context body for the next prompt: summarized head plus the last
    /// `detailed_tail` steps verbatim.
    pub fn render_context(&self, detailed_tail: usize) -> String {
        let mut out = String::new();
        if !self.summary.is_empty() {
            out.push_str("Earlier steps:\n");
            for line in &self.summary {
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        let start = self.steps.len().saturating_sub(detailed_tail);
        for step in &self.steps[..start] {
            out.push_str(&step.summary());
            out.push('\n');
        }
        for step in &self.steps[start..] {
            out.push_str(&step.render_detailed());
            out.push('\n');
        }
        out
    }

    /// Full one-line trace (summaries plus remaining steps) for the
    /// episode record.
    pub fn trace(&self) -> Vec<String> {
        let mut lines = self.summary.clone();
        lines.extend(self.steps.iter().map(|s| s.summary()));
        lines
    }
}
