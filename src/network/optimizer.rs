use std::fmt;
use std::str::FromStr;

use enum_dispatch::enum_dispatch;
use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};

/// First-order update rule applied to each parameter matrix of a network.
///
/// Parameters are addressed by a stable `slot` (their position in the network), so
/// stateful optimizers keep one set of moments per slot.
#[enum_dispatch]
pub trait Optimizer {
    /// Called once before the updates of one gradient step.
    fn begin_step(&mut self);
    fn update(&mut self, slot: usize, param: &mut Array2<f64>, grad: &Array2<f64>);
    fn learning_rate(&self) -> f64;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[enum_dispatch(Optimizer)]
pub enum EnumOptimizer {
    Adam(Adam),
    Sgd(Sgd),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    Adam,
    Sgd,
}

impl OptimizerKind {
    pub fn build(&self, learning_rate: f64) -> EnumOptimizer {
        match self {
            Self::Adam => EnumOptimizer::from(Adam::new(learning_rate)),
            Self::Sgd => EnumOptimizer::from(Sgd::new(learning_rate)),
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "adam" => Ok(Self::Adam),
            "sgd" => Ok(Self::Sgd),
            other => Err(format!("unknown optimizer {other:?}")),
        }
    }
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adam => f.write_str("adam"),
            Self::Sgd => f.write_str("sgd"),
        }
    }
}

/// Plain gradient descent, stateless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn begin_step(&mut self) {}

    fn update(&mut self, _slot: usize, param: &mut Array2<f64>, grad: &Array2<f64>) {
        param.scaled_add(-self.learning_rate, grad);
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Moments {
    first: Array2<f64>,
    second: Array2<f64>,
}

impl Moments {
    fn empty() -> Self {
        Self {
            first: Array2::zeros((0, 0)),
            second: Array2::zeros((0, 0)),
        }
    }
}

/// Adam (Kingma & Ba, 2015) with bias-corrected moment estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    timestep: i32,
    moments: Vec<Moments>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        Self {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            timestep: 0,
            moments: vec![],
        }
    }

    pub fn timestep(&self) -> i32 {
        self.timestep
    }
}

impl Optimizer for Adam {
    fn begin_step(&mut self) {
        self.timestep = self.timestep.saturating_add(1);
    }

    fn update(&mut self, slot: usize, param: &mut Array2<f64>, grad: &Array2<f64>) {
        if self.moments.len() <= slot {
            self.moments.resize_with(slot + 1, Moments::empty);
        }
        let (beta1, beta2) = (self.beta1, self.beta2);
        let moments = &mut self.moments[slot];
        if moments.first.raw_dim() != param.raw_dim() {
            moments.first = Array2::zeros(param.raw_dim());
            moments.second = Array2::zeros(param.raw_dim());
        }
        moments
            .first
            .zip_mut_with(grad, |m, g| *m = beta1 * *m + (1.0 - beta1) * g);
        moments
            .second
            .zip_mut_with(grad, |v, g| *v = beta2 * *v + (1.0 - beta2) * g * g);

        let t = self.timestep.max(1);
        let first_correction = 1.0 - beta1.powi(t);
        let second_correction = 1.0 - beta2.powi(t);
        let (lr, eps) = (self.learning_rate, self.epsilon);
        Zip::from(param)
            .and(&moments.first)
            .and(&moments.second)
            .for_each(|p, m, v| {
                let m_hat = m / first_correction;
                let v_hat = v / second_correction;
                *p -= lr * m_hat / (v_hat.sqrt() + eps);
            });
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}
