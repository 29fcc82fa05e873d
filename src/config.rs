use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::network::activation::Activation;
use crate::network::optimizer::OptimizerKind;

/// Position (2) + goal (2) + proximity readings (24).
pub const OBSERVATION_DIM: usize = 28;
/// forward, turn-left, turn-right, stop.
pub const ACTION_COUNT: usize = 4;

/// How the next observation of a non-terminal transition is obtained.
///
/// REWARD lines carry no next observation, so a transition is either held until the
/// client's following STATE (`Deferred`) or pushed at once with the rewarded
/// observation standing in for the next one (`Repeat`). Terminal transitions always
/// use the absorbing observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum NextObservation {
    #[default]
    Deferred,
    Repeat,
}

impl FromStr for NextObservation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "deferred" => Ok(Self::Deferred),
            "repeat" => Ok(Self::Repeat),
            other => Err(format!("unknown next observation policy {other:?}")),
        }
    }
}

impl fmt::Display for NextObservation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Deferred => f.write_str("deferred"),
            Self::Repeat => f.write_str("repeat"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub hidden_layers: Vec<usize>,
    pub activation: Activation,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            hidden_layers: vec![128, 128, 128],
            activation: Activation::Relu,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearnerConfig {
    pub discount_factor: f64,
    pub learning_rate: f64,
    pub optimizer: OptimizerKind,
    pub batch_size: usize,
    /// Learner steps between two hard copies of online into target.
    pub target_sync_interval: u64,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            discount_factor: 0.99,
            learning_rate: 0.001,
            optimizer: OptimizerKind::Adam,
            batch_size: 64,
            target_sync_interval: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub capacity: usize,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self { capacity: 10_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplorationConfig {
    pub initial_epsilon: f64,
    pub min_epsilon: f64,
    pub decay_rate: f64,
}

impl Default for ExplorationConfig {
    fn default() -> Self {
        Self {
            initial_epsilon: 1.0,
            min_epsilon: 0.01,
            decay_rate: 0.995,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// `None` keeps everything in memory.
    pub directory: Option<PathBuf>,
    /// Completed episodes between two named snapshots.
    pub interval: u64,
    /// Completed episodes between two statistics reports.
    pub stats_interval: u64,
}

impl CheckpointConfig {
    pub fn disabled() -> Self {
        Self {
            directory: None,
            ..Self::default()
        }
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            directory: Some(PathBuf::from("models")),
            interval: 25,
            stats_interval: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerConfig {
    pub observation_dim: usize,
    pub action_count: usize,
    pub network: NetworkConfig,
    pub learner: LearnerConfig,
    pub buffer: BufferConfig,
    pub exploration: ExplorationConfig,
    pub checkpoint: CheckpointConfig,
    pub next_observation: NextObservation,
    /// Seeds weight initialisation, replay sampling and every session's exploration draws.
    pub seed: u64,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            observation_dim: OBSERVATION_DIM,
            action_count: ACTION_COUNT,
            network: NetworkConfig::default(),
            learner: LearnerConfig::default(),
            buffer: BufferConfig::default(),
            exploration: ExplorationConfig::default(),
            checkpoint: CheckpointConfig::default(),
            next_observation: NextObservation::default(),
            seed: 42,
        }
    }
}

fn check_range(
    name: &'static str,
    range: &'static str,
    value: f64,
    ok: impl Fn(f64) -> bool,
) -> Result<(), ConfigError> {
    if value.is_finite() && ok(value) {
        Ok(())
    } else {
        Err(ConfigError::OutOfRange { name, range, value })
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.observation_dim == 0 {
            return Err(ConfigError::ZeroObservationDim);
        }
        if self.action_count < 2 {
            return Err(ConfigError::TooFewActions(self.action_count));
        }
        if self.network.hidden_layers.iter().any(|w| *w == 0) {
            return Err(ConfigError::ZeroLayerWidth);
        }
        if self.buffer.capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.learner.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.learner.target_sync_interval == 0 {
            return Err(ConfigError::ZeroSyncInterval);
        }
        if self.checkpoint.interval == 0 || self.checkpoint.stats_interval == 0 {
            return Err(ConfigError::ZeroCheckpointInterval);
        }
        check_range("discount factor", "[0, 1]", self.learner.discount_factor, |v| {
            (0.0..=1.0).contains(&v)
        })?;
        check_range("learning rate", "(0, inf)", self.learner.learning_rate, |v| v > 0.0)?;
        let exploration = &self.exploration;
        check_range("initial epsilon", "[0, 1]", exploration.initial_epsilon, |v| {
            (0.0..=1.0).contains(&v)
        })?;
        check_range("minimum epsilon", "[0, initial epsilon]", exploration.min_epsilon, |v| {
            (0.0..=exploration.initial_epsilon).contains(&v)
        })?;
        check_range("epsilon decay rate", "(0, 1]", exploration.decay_rate, |v| {
            v > 0.0 && v <= 1.0
        })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TrainerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.observation_dim, 28);
        assert_eq!(config.action_count, 4);
        assert_eq!(config.learner.target_sync_interval, 100);
        assert_eq!(config.checkpoint.interval, 25);
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let mut config = TrainerConfig::default();
        config.buffer.capacity = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));
    }

    #[test]
    fn decay_outside_unit_interval_is_rejected() {
        let mut config = TrainerConfig::default();
        config.exploration.decay_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::OutOfRange { name: "epsilon decay rate", .. })
        ));
    }

    #[test]
    fn next_observation_parses_case_insensitively() {
        assert_eq!("Deferred".parse(), Ok(NextObservation::Deferred));
        assert_eq!("repeat".parse(), Ok(NextObservation::Repeat));
        assert!("later".parse::<NextObservation>().is_err());
    }
}
