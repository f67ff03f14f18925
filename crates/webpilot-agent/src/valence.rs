//! Optional valence module: a numeric behavioral state fed by typed
//! agent events.
//!
//! Components emit [`AgentEvent`]s into a channel; this module drains
//! them between iterations and maintains a state in [-1, 1]. The
//! orchestrator may query the resulting bias to tighten its fatal
//! threshold under sustained failure or relax transient retries when
//! things go well. Disabled by default, in which case the bias is
//! neutral and nothing changes.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;
use webpilot_traits::AgentEvent;

/// Valence tuning.
#[derive(Debug, Clone)]
pub struct ValenceConfig {
    pub enabled: bool,
    /// Pull toward neutral applied per drained event.
    pub decay: f64,
}

impl Default for ValenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            decay: 0.01,
        }
    }
}

/// Behavioral adjustments derived from the current state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ValenceBias {
    /// Subtract from the fatal consecutive-failure tolerance.
    pub tighten_fatal_by: u32,
    /// Grant transient error kinds one extra retry attempt.
    pub relax_transient_retries: bool,
}

/// Persisted snapshot (`valence_state.json`).
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ValenceState {
    pub value: f64,
    pub events_seen: u64,
}

/// The module: an event receiver plus the numeric state.
pub struct ValenceModule {
    config: ValenceConfig,
    state: ValenceState,
    rx: mpsc::UnboundedReceiver<AgentEvent>,
}

impl ValenceModule {
    /// Create the module and the sender components emit into.
    pub fn channel(config: ValenceConfig) -> (mpsc::UnboundedSender<AgentEvent>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                config,
                state: ValenceState::default(),
                rx,
            },
        )
    }

    pub fn state(&self) -> ValenceState {
        self.state
    }

    /// Drain pending events and update the state. No-op when disabled.
    pub fn drain(&mut self) {
        while let Ok(event) = self.rx.try_recv() {
            if !self.config.enabled {
                continue;
            }
            let delta = match &event {
                AgentEvent::ActionCompleted { success: true, .. } => 0.05,
                AgentEvent::ActionCompleted { success: false, .. } => -0.10,
                AgentEvent::ObstructionDismissed { .. } => 0.02,
                AgentEvent::CircuitOpened { .. } => -0.20,
                AgentEvent::CaptchaEscalated { .. } => -0.15,
                AgentEvent::HealthCritical { .. } => -0.30,
                AgentEvent::GoalFinished { success } => {
                    if *success {
                        0.15
                    } else {
                        -0.15
                    }
                }
            };
            let decayed = self.state.value * (1.0 - self.config.decay);
            self.state.value = (decayed + delta).clamp(-1.0, 1.0);
            self.state.events_seen += 1;
            debug!(value = self.state.value, ?event, "Valence updated");
        }
    }

    /// Current behavioral bias. Neutral unless the state is strongly
    /// polarized (or the module is disabled).
    pub fn bias(&self) -> ValenceBias {
        if !self.config.enabled {
            return ValenceBias::default();
        }
        ValenceBias {
            tighten_fatal_by: u32::from(self.state.value < -0.5),
            relax_transient_retries: self.state.value > 0.5,
        }
    }

    pub fn load(&mut self, path: &Path) {
        if let Ok(Some(state)) = webpilot_storage::read_json_state::<ValenceState>(path) {
            self.state = state;
        }
    }

    pub fn persist(&self, path: &Path) {
        if let Err(err) = webpilot_storage::write_json_state(path, &self.state) {
            debug!(error = %err, "Could not persist valence state");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enabled() -> ValenceConfig {
        ValenceConfig {
            enabled: true,
            decay: 0.01,
        }
    }

    #[test]
    fn disabled_module_stays_neutral() {
        let (tx, mut module) = ValenceModule::channel(ValenceConfig::default());
        for _ in 0..20 {
            tx.send(AgentEvent::HealthCritical {
                reason: "oom".into(),
            })
            .unwrap();
        }
        module.drain();
        assert_eq!(module.state().value, 0.0);
        assert_eq!(module.bias(), ValenceBias::default());
    }

    #[test]
    fn sustained_failure_tightens_fatal_threshold() {
        let (tx, mut module) = ValenceModule::channel(enabled());
        for _ in 0..6 {
            tx.send(AgentEvent::ActionCompleted {
                tool: "navigate".into(),
                success: false,
                latency_ms: 10,
            })
            .unwrap();
        }
        tx.send(AgentEvent::CircuitOpened {
            domain: "flaky.test".into(),
        })
        .unwrap();
        module.drain();

        assert!(module.state().value < -0.5);
        assert_eq!(module.bias().tighten_fatal_by, 1);
        assert!(!module.bias().relax_transient_retries);
    }

    #[test]
    fn sustained_success_relaxes_transient_retries() {
        let (tx, mut module) = ValenceModule::channel(enabled());
        for _ in 0..12 {
            tx.send(AgentEvent::ActionCompleted {
                tool: "click".into(),
                success: true,
                latency_ms: 5,
            })
            .unwrap();
        }
        module.drain();
        assert!(module.state().value > 0.5);
        assert!(module.bias().relax_transient_retries);
    }

    #[test]
    fn state_is_clamped() {
        let (tx, mut module) = ValenceModule::channel(enabled());
        for _ in 0..50 {
            tx.send(AgentEvent::HealthCritical {
                reason: "x".into(),
            })
            .unwrap();
        }
        module.drain();
        assert!(module.state().value >= -1.0);
    }

    #[test]
    fn persist_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("valence_state.json");

        let (tx, mut module) = ValenceModule::channel(enabled());
        tx.send(AgentEvent::GoalFinished { success: true }).unwrap();
        module.drain();
        module.persist(&path);

        let (_tx2, mut fresh) = ValenceModule::channel(enabled());
        fresh.load(&path);
        assert_eq!(fresh.state().events_seen, 1);
        assert!(fresh.state().value > 0.0);
    }
}
