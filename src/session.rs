use std::fmt;
use std::mem;

use rand::rngs::StdRng;
use tracing::debug;

use crate::config::NextObservation;
use crate::error::{ProtocolParseError, SessionError};
use crate::observation::{absorbing, Observation, Transition};
use crate::trainer::Trainer;

/// Opaque per-connection identity. Never reused within a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionKey(pub u64);

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What the session expects next from its client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingObservation,
    AwaitingReward,
}

/// Result of a terminal reward.
#[derive(Debug, Clone, PartialEq)]
pub struct EpisodeSummary {
    pub client_id: String,
    pub episode_index: u64,
    pub steps: u64,
    pub reward: f64,
}

#[derive(Debug, Clone)]
enum Phase {
    AwaitingObservation {
        // rewarded step still waiting for its next observation
        completed: Option<(Observation, usize, f64)>,
    },
    AwaitingReward {
        observation: Observation,
        action: usize,
    },
}

impl Phase {
    fn idle() -> Self {
        Phase::AwaitingObservation { completed: None }
    }
}

/// Pairs one client's alternating STATE and REWARD messages into transitions.
///
/// Owned by the connection's handler; nothing in here is shared between clients.
#[derive(Debug)]
pub struct Session {
    key: SessionKey,
    client_id: Option<String>,
    episode_index: u64,
    step_index: u64,
    episode_reward: f64,
    phase: Phase,
    next_observation: NextObservation,
    rng: StdRng,
}

impl Session {
    pub fn new(key: SessionKey, trainer: &Trainer) -> Self {
        Self {
            key,
            client_id: None,
            episode_index: 0,
            step_index: 0,
            episode_reward: 0.0,
            phase: Phase::idle(),
            next_observation: trainer.config().next_observation,
            rng: trainer.session_rng(key),
        }
    }

    pub fn key(&self) -> SessionKey {
        self.key
    }

    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    pub fn episode_index(&self) -> u64 {
        self.episode_index
    }

    pub fn step_index(&self) -> u64 {
        self.step_index
    }

    pub fn episode_reward(&self) -> f64 {
        self.episode_reward
    }

    pub fn phase(&self) -> SessionPhase {
        match self.phase {
            Phase::AwaitingObservation { .. } => SessionPhase::AwaitingObservation,
            Phase::AwaitingReward { .. } => SessionPhase::AwaitingReward,
        }
    }

    fn label(&self) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| self.key.to_string())
    }

    /// Binds the connection to the first client id it carries; later ids must match.
    pub fn bind(&mut self, client_id: &str) -> Result<(), ProtocolParseError> {
        match &self.client_id {
            None => {
                self.client_id = Some(client_id.to_string());
                Ok(())
            }
            Some(bound) if bound == client_id => Ok(()),
            Some(bound) => Err(ProtocolParseError::ClientMismatch {
                expected: bound.clone(),
                found: client_id.to_string(),
            }),
        }
    }

    /// Chooses the action for `observation`.
    ///
    /// Fails without touching any state if the previous action has not been rewarded
    /// yet; see [`replace_pending`](Self::replace_pending).
    pub fn on_observation(
        &mut self,
        observation: Observation,
        trainer: &Trainer,
    ) -> Result<usize, SessionError> {
        if let Phase::AwaitingReward { .. } = self.phase {
            return Err(SessionError::OutOfOrderMessage {
                client: self.label(),
                step: self.step_index,
            });
        }
        Ok(self.accept_observation(observation, trainer))
    }

    /// Drops the unrewarded pair, if any, and chooses the action for `observation`.
    pub fn replace_pending(&mut self, observation: Observation, trainer: &Trainer) -> usize {
        self.discard_pending();
        self.accept_observation(observation, trainer)
    }

    fn accept_observation(&mut self, observation: Observation, trainer: &Trainer) -> usize {
        if let Phase::AwaitingObservation {
            completed: Some((previous, action, reward)),
        } = mem::replace(&mut self.phase, Phase::idle())
        {
            trainer.push_transition(Transition::new(
                previous,
                action,
                reward,
                observation.clone(),
                false,
            ));
        }
        let action = trainer.select_action(&observation, &mut self.rng);
        self.phase = Phase::AwaitingReward {
            observation,
            action,
        };
        action
    }

    /// Drops an unrewarded observation/action pair. Returns whether there was one.
    pub fn discard_pending(&mut self) -> bool {
        match self.phase {
            Phase::AwaitingReward { .. } => {
                self.phase = Phase::idle();
                true
            }
            Phase::AwaitingObservation { .. } => false,
        }
    }

    /// Concludes the pending action with its reward.
    ///
    /// A terminal reward pushes its transition against the absorbing observation,
    /// closes the episode and returns its summary.
    pub fn on_reward(
        &mut self,
        reward: f64,
        done: bool,
        trainer: &Trainer,
    ) -> Result<Option<EpisodeSummary>, SessionError> {
        let (observation, action) = match mem::replace(&mut self.phase, Phase::idle()) {
            Phase::AwaitingReward {
                observation,
                action,
            } => (observation, action),
            unchanged => {
                self.phase = unchanged;
                return Err(SessionError::UnmatchedReward {
                    client: self.label(),
                    reward,
                });
            }
        };

        self.step_index += 1;
        self.episode_reward += reward;

        if done {
            let next_observation = absorbing(observation.len());
            trainer.push_transition(Transition::new(
                observation,
                action,
                reward,
                next_observation,
                true,
            ));
            let summary = EpisodeSummary {
                client_id: self.label(),
                episode_index: self.episode_index,
                steps: self.step_index,
                reward: self.episode_reward,
            };
            self.episode_index += 1;
            self.step_index = 0;
            self.episode_reward = 0.0;
            trainer.complete_episode(&summary);
            return Ok(Some(summary));
        }

        match self.next_observation {
            NextObservation::Deferred => {
                self.phase = Phase::AwaitingObservation {
                    completed: Some((observation, action, reward)),
                };
            }
            NextObservation::Repeat => {
                trainer.push_transition(Transition::new(
                    observation.clone(),
                    action,
                    reward,
                    observation,
                    false,
                ));
            }
        }
        Ok(None)
    }

    /// Tears the session down. Unfinished experience is dropped, never pushed.
    pub fn close(self) {
        match self.phase {
            Phase::AwaitingReward { .. } => {
                debug!(session = %self.key, "discarding unrewarded observation")
            }
            Phase::AwaitingObservation {
                completed: Some(_),
            } => debug!(session = %self.key, "discarding step without next observation"),
            Phase::AwaitingObservation { completed: None } => {}
        }
    }
}
