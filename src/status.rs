//! Model status state machine and action legality

use crate::error::{FleetError, FleetResult};
use crate::model::{Model, ModelStatus};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tokio::time::{Duration, Instant};

/// Operator actions gated by model status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelAction {
    Stop,
    Restart,
    Remove,
}

impl ModelAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Remove => "remove",
        }
    }
}

impl std::fmt::Display for ModelAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl ModelStatus {
    /// Whether `action` may be issued for a model in this status
    ///
    /// | State    | stop | restart | remove |
    /// |----------|------|---------|--------|
    /// | starting |  -   |    -    |   -    |
    /// | running  |  x   |    -    |   x    |
    /// | stopped  |  -   |    x    |   x    |
    /// | error    |  -   |    x    |   x    |
    pub fn allows(&self, action: ModelAction) -> bool {
        use ModelAction::*;
        use ModelStatus::*;

        matches!(
            (self, action),
            (Running, Stop) | (Running, Remove) | (Stopped, Restart | Remove) | (Error, Restart | Remove)
        )
    }

    /// Actions enabled in this status
    pub fn enabled_actions(&self) -> Vec<ModelAction> {
        [ModelAction::Stop, ModelAction::Restart, ModelAction::Remove]
            .into_iter()
            .filter(|a| self.allows(*a))
            .collect()
    }

    /// Whether `next` is a legal successor of this status
    pub fn can_transition_to(&self, next: ModelStatus) -> bool {
        use ModelStatus::*;

        if *self == next {
            return true;
        }
        matches!(
            (self, next),
            (Starting, Running)
                | (Starting, Error)
                | (Running, Stopped)
                | (Running, Error)
                | (Stopped, Starting)
                | (Error, Starting)
        )
    }
}

/// Status the gateway should report once `action` has been accepted
///
/// Remove has no successor: removal is a registry deletion, not a transition.
pub fn expected_status_after(action: ModelAction) -> Option<ModelStatus> {
    match action {
        ModelAction::Stop => Some(ModelStatus::Stopped),
        ModelAction::Restart => Some(ModelStatus::Starting),
        ModelAction::Remove => None,
    }
}

/// Reject `action` for `model` unless its status allows it
pub fn ensure_allowed(model: &Model, status: ModelStatus, action: ModelAction) -> FleetResult<()> {
    if status.allows(action) {
        Ok(())
    } else {
        Err(FleetError::ActionNotAllowed {
            id: model.id.clone(),
            action,
            status,
        })
    }
}

/// Tracks how long models stay in `starting` across refreshes
///
/// A model continuously observed as `starting` for at least `timeout` is
/// reported as stalled, and its display status becomes `error` so restart is
/// offered as recovery. Elapsed time counts from the first refresh that saw
/// it starting, so the number or spacing of refreshes does not matter. The
/// gateway's own status wins as soon as it moves.
#[derive(Debug, Clone)]
pub struct StartupWatchdog {
    timeout: Duration,
    first_seen: HashMap<String, Instant>,
    stalled: HashSet<String>,
}

impl StartupWatchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            first_seen: HashMap::new(),
            stalled: HashSet::new(),
        }
    }

    /// Record one refresh worth of observations
    pub fn observe(&mut self, models: &[Model]) {
        self.observe_at(models, Instant::now());
    }

    fn observe_at(&mut self, models: &[Model], now: Instant) {
        let mut first_seen = HashMap::with_capacity(self.first_seen.len());
        let mut stalled = HashSet::new();

        for model in models.iter().filter(|m| m.status == ModelStatus::Starting) {
            let since = self.first_seen.get(&model.id).copied().unwrap_or(now);

            if now.duration_since(since) >= self.timeout {
                if !self.stalled.contains(&model.id) {
                    tracing::warn!(
                        model_id = %model.id,
                        name = %model.name,
                        starting_secs = now.duration_since(since).as_secs(),
                        "Model appears stuck in starting"
                    );
                }
                stalled.insert(model.id.clone());
            }
            first_seen.insert(model.id.clone(), since);
        }

        self.first_seen = first_seen;
        self.stalled = stalled;
    }

    pub fn is_stalled(&self, id: &str) -> bool {
        self.stalled.contains(id)
    }

    /// Status shown to the operator and used for action gating
    pub fn display_status(&self, model: &Model) -> ModelStatus {
        if model.status == ModelStatus::Starting && self.is_stalled(&model.id) {
            ModelStatus::Error
        } else {
            model.status
        }
    }
}
