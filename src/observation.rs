use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Fixed-dimension sensor reading reported by one robot at one control step.
pub type Observation = Array1<f64>;

/// The observation used as `next_observation` of terminal transitions.
///
/// Terminal targets never bootstrap, so its values only need to be well formed.
pub fn absorbing(dim: usize) -> Observation {
    Array1::zeros(dim)
}

/// One `(observation, action, reward, next_observation, terminal)` learning sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub observation: Observation,
    pub action: usize,
    pub reward: f64,
    pub next_observation: Observation,
    pub terminal: bool,
}

impl Transition {
    pub fn new(
        observation: Observation,
        action: usize,
        reward: f64,
        next_observation: Observation,
        terminal: bool,
    ) -> Self {
        Self {
            observation,
            action,
            reward,
            next_observation,
            terminal,
        }
    }
}
