use ndarray::{Array1, ArrayView1};
use tracing::{debug, warn};

use crate::config::LearnerConfig;
use crate::network::optimizer::{EnumOptimizer, Optimizer};
use crate::network::Network;
use crate::observation::Transition;
use crate::value_function::{ValueFunction, ValueFunctionPair};

/// Owns the value function pair and its optimizer and applies replay updates.
///
/// `target` is synchronised after every `target_sync_interval`-th step, never
/// otherwise.
#[derive(Debug, Clone)]
pub struct Learner<V: ValueFunction = Network> {
    pair: ValueFunctionPair<V>,
    optimizer: EnumOptimizer,
    discount_factor: f64,
    target_sync_interval: u64,
    steps: u64,
    last_loss: Option<f64>,
}

impl<V: ValueFunction> Learner<V> {
    pub fn new(online: V, config: &LearnerConfig) -> Self {
        Self::from_parts(
            ValueFunctionPair::new(online),
            config.optimizer.build(config.learning_rate),
            config,
            0,
        )
    }

    /// Resumes from a snapshot of the pair, the optimizer and the step counter.
    pub fn from_parts(
        pair: ValueFunctionPair<V>,
        optimizer: EnumOptimizer,
        config: &LearnerConfig,
        steps: u64,
    ) -> Self {
        Self {
            pair,
            optimizer,
            discount_factor: config.discount_factor,
            target_sync_interval: config.target_sync_interval.max(1),
            steps,
            last_loss: None,
        }
    }

    /// Updates online on one sampled batch and returns the loss.
    pub fn step(&mut self, batch: &[Transition]) -> f64 {
        let loss = self
            .pair
            .update(batch, self.discount_factor, &mut self.optimizer);
        self.steps += 1;
        self.last_loss = Some(loss);
        debug!(step = self.steps, loss, "learner step");
        if !loss.is_finite() {
            warn!(step = self.steps, loss, "learner loss is not finite");
        }
        if self.steps % self.target_sync_interval == 0 {
            self.pair.sync_target();
            debug!(step = self.steps, "target network synchronised");
        }
        loss
    }

    pub fn evaluate(&self, observation: ArrayView1<f64>) -> Array1<f64> {
        self.pair.evaluate(observation)
    }

    pub fn pair(&self) -> &ValueFunctionPair<V> {
        &self.pair
    }

    pub fn optimizer(&self) -> &EnumOptimizer {
        &self.optimizer
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn last_loss(&self) -> Option<f64> {
        self.last_loss
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn discount_factor(&self) -> f64 {
        self.discount_factor
    }
}
