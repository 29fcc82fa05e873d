use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};

use crate::network::optimizer::EnumOptimizer;
use crate::network::Network;
use crate::observation::{Observation, Transition};
use crate::utils::max;

/// A parametric mapping from an observation to one value per discrete action.
///
/// Implementations must be deterministic for fixed parameters. Target
/// synchronisation goes through [`ValueFunction::copy_parameters`].
pub trait ValueFunction: Clone {
    fn evaluate_batch(&self, observations: ArrayView2<f64>) -> Array2<f64>;

    /// One gradient step of `self` towards `targets`; returns the loss before the step.
    fn fit(&mut self, observations: &Array2<f64>, targets: &Array2<f64>, optimizer: &mut EnumOptimizer) -> f64;

    fn evaluate(&self, observation: ArrayView1<f64>) -> Array1<f64> {
        self.evaluate_batch(observation.insert_axis(Axis(0)))
            .index_axis_move(Axis(0), 0)
    }

    /// Overwrites every parameter of `self` with the ones of `other`.
    fn copy_parameters(&mut self, other: &Self) {
        self.clone_from(other);
    }
}

impl ValueFunction for Network {
    fn evaluate_batch(&self, observations: ArrayView2<f64>) -> Array2<f64> {
        self.predict(&observations.to_owned())
    }

    fn fit(&mut self, observations: &Array2<f64>, targets: &Array2<f64>, optimizer: &mut EnumOptimizer) -> f64 {
        Network::fit(self, observations, targets, optimizer)
    }

    fn copy_parameters(&mut self, other: &Self) {
        self.copy_weights_and_bias(other);
    }
}

/// The online estimator and its lagging target copy.
///
/// `target` is only ever replaced as a whole by [`ValueFunctionPair::sync_target`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueFunctionPair<V = Network> {
    online: V,
    target: V,
}

fn stack<'a>(rows: impl ExactSizeIterator<Item = &'a Observation>, dim: usize) -> Array2<f64> {
    let mut stacked = Array2::zeros((rows.len(), dim));
    for (mut row, observation) in stacked.rows_mut().into_iter().zip(rows) {
        row.assign(observation);
    }
    stacked
}

impl<V: ValueFunction> ValueFunctionPair<V> {
    pub fn new(online: V) -> Self {
        Self {
            target: online.clone(),
            online,
        }
    }

    /// Rebuilds a pair from a snapshot, target included.
    pub fn from_parts(online: V, target: V) -> Self {
        Self { online, target }
    }

    pub fn online(&self) -> &V {
        &self.online
    }

    pub fn target(&self) -> &V {
        &self.target
    }

    pub fn into_parts(self) -> (V, V) {
        (self.online, self.target)
    }

    pub fn evaluate(&self, observation: ArrayView1<f64>) -> Array1<f64> {
        self.online.evaluate(observation)
    }

    /// One Q-learning step on `batch`.
    ///
    /// The learning target of `(o, a, r, o', terminal)` is `r` when terminal and
    /// `r + discount_factor * max_a' target(o')[a']` otherwise; only online changes.
    pub fn update(&mut self, batch: &[Transition], discount_factor: f64, optimizer: &mut EnumOptimizer) -> f64 {
        let Some(first) = batch.first() else {
            return 0.0;
        };
        let dim = first.observation.len();
        let observations = stack(batch.iter().map(|t| &t.observation), dim);
        let next_observations = stack(batch.iter().map(|t| &t.next_observation), dim);

        let next_values = self.target.evaluate_batch(next_observations.view());
        let mut targets = self.online.evaluate_batch(observations.view());
        for (i, transition) in batch.iter().enumerate() {
            let bootstrap = if transition.terminal {
                0.0
            } else {
                discount_factor * max(next_values.row(i).iter().copied())
            };
            targets[[i, transition.action]] = transition.reward + bootstrap;
        }
        self.online.fit(&observations, &targets, optimizer)
    }

    pub fn sync_target(&mut self) {
        self.target.copy_parameters(&self.online);
    }
}
