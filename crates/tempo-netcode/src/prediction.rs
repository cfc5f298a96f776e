//! Client-side prediction of the locally controlled entity
//!
//! Every captured sample is recorded in the entity's [`InputHistory`] and
//! applied at once through the same gameplay dispatch the server runs, against
//! the client's own copy of the collision world. Reconciliation (see
//! `reconciliation.rs`) later rewinds the history when the authoritative
//! snapshot for that entity arrives.

use crate::{InputHistory, ResyncPolicy};
use tempo_core::collision::SpatialGrid;
use tempo_core::{
    step, EntityId, EntityState, InputSample, MovementConfig, SideEffect, StepContext, Timestamp,
};

/// Predicts one entity ahead of the server
#[derive(Debug, Clone)]
pub struct PredictionEngine {
    pub(crate) entity: EntityId,
    pub(crate) history: InputHistory,
    pub(crate) state: EntityState,
    pub(crate) world: SpatialGrid,
    pub(crate) config: MovementConfig,
    pub(crate) policy: ResyncPolicy,
    /// Input application is suspended until the server confirms a resync
    pub(crate) wait_resync: bool,
    /// Timestamp of the newest snapshot applied
    pub(crate) last_snapshot: Option<Timestamp>,
}

impl PredictionEngine {
    /// Start predicting `entity` from `state`
    pub fn new(
        entity: EntityId,
        state: EntityState,
        world: SpatialGrid,
        config: MovementConfig,
        history_capacity: usize,
    ) -> Self {
        let mut history = InputHistory::new(history_capacity);
        history.bind(entity);
        Self {
            entity,
            history,
            state,
            world,
            config,
            policy: ResyncPolicy::default(),
            wait_resync: false,
            last_snapshot: None,
        }
    }

    /// Use a different resync policy
    pub fn with_policy(mut self, policy: ResyncPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Record a sample and apply it to the predicted state
    ///
    /// Returns the gameplay notifications the step raised. While waiting for
    /// a resync the sample is recorded but not applied.
    pub fn predict(&mut self, sample: InputSample) -> Vec<SideEffect> {
        self.history.append(sample);

        // Catch the cursor up to the sample just appended
        let mut effects = Vec::new();
        while let Some(sample) = self.history.next() {
            if self.wait_resync {
                continue;
            }
            effects.extend(self.apply(&sample));
        }
        effects
    }

    pub(crate) fn apply(&mut self, sample: &InputSample) -> Vec<SideEffect> {
        let ctx = StepContext {
            config: &self.config,
            world: &self.world,
        };
        let transition = step(&self.state, sample, &ctx);
        self.state = transition.entity;
        transition.effects
    }

    /// The predicted entity
    pub fn entity(&self) -> EntityId {
        self.entity
    }

    /// Current predicted state
    pub fn state(&self) -> &EntityState {
        &self.state
    }

    /// Input recorded so far
    pub fn history(&self) -> &InputHistory {
        &self.history
    }

    /// Collision world used for prediction
    pub fn world(&self) -> &SpatialGrid {
        &self.world
    }

    /// True while local input is suppressed after a desync
    pub fn is_waiting_resync(&self) -> bool {
        self.wait_resync
    }

    /// Timestamp of the newest applied snapshot
    pub fn last_snapshot(&self) -> Option<Timestamp> {
        self.last_snapshot
    }

    pub fn policy(&self) -> ResyncPolicy {
        self.policy
    }
}
