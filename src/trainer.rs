use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::action_selection::EpsilonGreedy;
use crate::checkpoint::{CheckpointRecord, Checkpointer, FORMAT_VERSION, LATEST_FILE};
use crate::config::TrainerConfig;
use crate::error::{CheckpointError, TrainerError};
use crate::experience_buffer::TransitionBuffer;
use crate::learner::Learner;
use crate::network::Network;
use crate::observation::{Observation, Transition};
use crate::session::{EpisodeSummary, SessionKey};
use crate::utils::{lock, tail_mean};
use crate::value_function::ValueFunctionPair;

const STATS_WINDOW: usize = 100;

/// State shared by every connection: replay memory, learner, exploration rate and
/// episode history.
///
/// The buffer and the learner sit behind separate locks that are never held together,
/// so a client pushing experience never waits on another client's forward pass for
/// longer than one push.
pub struct Trainer {
    config: TrainerConfig,
    buffer: Mutex<TransitionBuffer>,
    learner: Mutex<Learner>,
    policy: EpsilonGreedy,
    checkpointer: Checkpointer,
    total_steps: AtomicU64,
    next_session: AtomicU64,
}

impl Trainer {
    /// Starts from freshly initialised weights.
    pub fn new(config: TrainerConfig) -> Result<Self, TrainerError> {
        config.validate()?;
        let mut rng = StdRng::seed_from_u64(config.seed);
        let online = Network::mlp(
            config.observation_dim,
            &config.network.hidden_layers,
            config.action_count,
            config.network.activation,
            &mut rng,
        );
        let learner = Learner::new(online, &config.learner);
        let policy = EpsilonGreedy::new(config.action_count, &config.exploration);
        Self::assemble(config, learner, policy, Vec::new(), 0)
    }

    /// Continues from a snapshot. Shapes must match the configuration.
    pub fn from_record(config: TrainerConfig, record: CheckpointRecord) -> Result<Self, TrainerError> {
        config.validate()?;
        check_compatible(&config, &record)?;
        let CheckpointRecord {
            online,
            target,
            optimizer,
            epsilon,
            learner_steps,
            total_steps,
            episode_rewards,
            ..
        } = record;
        let learner = Learner::from_parts(
            ValueFunctionPair::from_parts(online, target),
            optimizer,
            &config.learner,
            learner_steps,
        );
        let policy = EpsilonGreedy::new(config.action_count, &config.exploration);
        policy.set_epsilon(epsilon);
        info!(
            episodes = episode_rewards.len(),
            learner_steps,
            total_steps,
            epsilon,
            "resuming from checkpoint"
        );
        Self::assemble(config, learner, policy, episode_rewards, total_steps)
    }

    /// Resumes from the latest snapshot in the checkpoint directory when there is one.
    pub fn open(config: TrainerConfig, fresh: bool) -> Result<Self, TrainerError> {
        let latest = config.checkpoint.directory.as_ref().map(|d| d.join(LATEST_FILE));
        match latest {
            Some(path) if !fresh && path.exists() => {
                let record = CheckpointRecord::load(&path)?;
                Self::from_record(config, record)
            }
            _ => {
                info!("starting with fresh weights");
                Self::new(config)
            }
        }
    }

    fn assemble(
        config: TrainerConfig,
        learner: Learner,
        policy: EpsilonGreedy,
        history: Vec<f64>,
        total_steps: u64,
    ) -> Result<Self, TrainerError> {
        let checkpointer = Checkpointer::new(&config.checkpoint, history)?;
        Ok(Self {
            buffer: Mutex::new(TransitionBuffer::new(
                config.buffer.capacity,
                config.seed.wrapping_add(1),
            )),
            learner: Mutex::new(learner),
            policy,
            checkpointer,
            total_steps: AtomicU64::new(total_steps),
            next_session: AtomicU64::new(0),
            config,
        })
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// A key no other session of this process has had.
    pub fn next_session_key(&self) -> SessionKey {
        SessionKey(self.next_session.fetch_add(1, Ordering::Relaxed))
    }

    /// Exploration generator for one session, derived from the configured seed.
    pub fn session_rng(&self, key: SessionKey) -> StdRng {
        let mut seeder = StdRng::seed_from_u64(self.config.seed ^ key.0.rotate_left(32));
        StdRng::seed_from_u64(seeder.gen())
    }

    /// Chooses an action for one observation and counts the step.
    pub fn select_action<R: Rng + ?Sized>(&self, observation: &Observation, rng: &mut R) -> usize {
        self.total_steps.fetch_add(1, Ordering::Relaxed);
        self.policy
            .get_action(rng, || lock(&self.learner).evaluate(observation.view()))
    }

    /// Stores a transition and, once a full batch is available, runs one learner step.
    ///
    /// Returns the loss of that step.
    pub fn push_transition(&self, transition: Transition) -> Option<f64> {
        let batch = {
            let mut buffer = lock(&self.buffer);
            buffer.push(transition);
            buffer.sample(self.config.learner.batch_size).ok()?
        };
        Some(lock(&self.learner).step(&batch))
    }

    /// Decays epsilon, records the episode and schedules its snapshot.
    ///
    /// Returns the global number of completed episodes.
    pub fn complete_episode(&self, summary: &EpisodeSummary) -> u64 {
        let epsilon = self.policy.decay();
        let count = self
            .checkpointer
            .record_episode(summary.reward, |rewards| self.snapshot_with(rewards));
        info!(
            client = %summary.client_id,
            episode = summary.episode_index,
            steps = summary.steps,
            reward = summary.reward,
            epsilon,
            total_episodes = count,
            "episode finished"
        );
        if count % self.config.checkpoint.stats_interval == 0 {
            self.log_statistics();
        }
        count
    }

    fn snapshot_with(&self, rewards: &[f64]) -> CheckpointRecord {
        let learner = lock(&self.learner);
        let (online, target) = (learner.pair().online(), learner.pair().target());
        CheckpointRecord {
            version: FORMAT_VERSION,
            online: online.clone(),
            target: target.clone(),
            optimizer: learner.optimizer().clone(),
            epsilon: self.policy.epsilon(),
            learner_steps: learner.steps(),
            total_steps: self.total_steps(),
            episode_rewards: rewards.to_vec(),
        }
    }

    /// A consistent copy of everything a checkpoint holds.
    pub fn snapshot(&self) -> CheckpointRecord {
        self.checkpointer
            .with_history(|rewards| self.snapshot_with(rewards))
    }

    pub fn log_statistics(&self) {
        let rewards = self.checkpointer.episode_rewards();
        info!(
            total_steps = self.total_steps(),
            epsilon = self.epsilon(),
            buffer = self.buffer_len(),
            learner_steps = self.learner_steps(),
            avg_reward = tail_mean(STATS_WINDOW, &rewards),
            total_episodes = rewards.len(),
            "training statistics"
        );
    }

    /// Writes the final snapshot and the training data.
    pub fn shutdown(&self) -> Result<(), CheckpointError> {
        self.log_statistics();
        let record = self.snapshot();
        if self.checkpointer.directory().is_none() {
            warn!("no checkpoint directory configured, final model not saved");
        }
        self.checkpointer.finish(record)
    }

    pub fn epsilon(&self) -> f64 {
        self.policy.epsilon()
    }

    pub fn total_steps(&self) -> u64 {
        self.total_steps.load(Ordering::Relaxed)
    }

    pub fn buffer_len(&self) -> usize {
        lock(&self.buffer).len()
    }

    /// Buffered transitions, oldest first.
    pub fn buffer_contents(&self) -> Vec<Transition> {
        lock(&self.buffer).iter().cloned().collect()
    }

    pub fn learner_steps(&self) -> u64 {
        lock(&self.learner).steps()
    }

    pub fn last_loss(&self) -> Option<f64> {
        lock(&self.learner).last_loss()
    }

    pub fn episodes(&self) -> u64 {
        self.checkpointer.episodes()
    }

    pub fn episode_rewards(&self) -> Vec<f64> {
        self.checkpointer.episode_rewards()
    }
}

fn check_compatible(config: &TrainerConfig, record: &CheckpointRecord) -> Result<(), CheckpointError> {
    let expected = (Some(config.observation_dim), Some(config.action_count));
    for (name, network) in [("online", &record.online), ("target", &record.target)] {
        let found = (network.input_size(), network.output_size());
        if found != expected {
            return Err(CheckpointError::Incompatible(format!(
                "{name} network maps {:?} to {:?}, trainer expects {} to {}",
                found.0, found.1, config.observation_dim, config.action_count
            )));
        }
    }
    if !(0.0..=1.0).contains(&record.epsilon) {
        return Err(CheckpointError::Incompatible(format!(
            "epsilon {} outside [0, 1]",
            record.epsilon
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckpointConfig;
    use crate::observation::absorbing;
    use ndarray::arr1;
    use crate::checkpoint::episode_file;
    use std::fs;
    use std::path::Path;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn config(checkpoint: CheckpointConfig) -> TrainerConfig {
        let mut config = TrainerConfig {
            observation_dim: 4,
            action_count: 2,
            checkpoint,
            ..TrainerConfig::default()
        };
        config.network.hidden_layers = vec![8, 8];
        config.buffer.capacity = 2;
        config.learner.batch_size = 2;
        config
    }

    fn on_disk(dir: &Path) -> CheckpointConfig {
        CheckpointConfig {
            directory: Some(dir.to_path_buf()),
            ..CheckpointConfig::default()
        }
    }

    fn transition(reward: f64) -> Transition {
        Transition::new(
            arr1(&[0.1, 0.2, 0.3, 0.4]),
            1,
            reward,
            arr1(&[0.2, 0.3, 0.4, 0.5]),
            false,
        )
    }

    #[test]
    fn learning_starts_with_the_first_full_batch() {
        let trainer = Trainer::new(config(CheckpointConfig::disabled())).unwrap();
        assert_eq!(trainer.push_transition(transition(1.0)), None);
        assert_eq!(trainer.learner_steps(), 0);

        let loss = trainer.push_transition(transition(0.5)).unwrap();
        assert!(loss.is_finite() && loss >= 0.0);
        assert_eq!(trainer.learner_steps(), 1);

        trainer.push_transition(transition(2.0));
        let rewards: Vec<f64> = trainer.buffer_contents().iter().map(|t| t.reward).collect();
        assert_eq!(rewards, vec![0.5, 2.0]);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut bad = config(CheckpointConfig::disabled());
        bad.learner.batch_size = 0;
        assert!(matches!(Trainer::new(bad), Err(TrainerError::Config(_))));
    }

    #[test]
    fn episode_completion_decays_and_records() {
        let trainer = Trainer::new(config(CheckpointConfig::disabled())).unwrap();
        let summary = EpisodeSummary {
            client_id: "0".to_string(),
            episode_index: 0,
            steps: 3,
            reward: 4.5,
        };
        assert_eq!(trainer.complete_episode(&summary), 1);
        assert_eq!(trainer.complete_episode(&summary), 2);
        assert!((trainer.epsilon() - 0.995 * 0.995).abs() < 1e-12);
        assert_eq!(trainer.episode_rewards(), vec![4.5, 4.5]);
    }

    #[test]
    fn session_keys_are_unique_across_threads() {
        let trainer = Arc::new(Trainer::new(config(CheckpointConfig::disabled())).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let trainer = Arc::clone(&trainer);
                thread::spawn(move || (0..50).map(|_| trainer.next_session_key()).collect::<Vec<_>>())
            })
            .collect();
        let mut keys: Vec<_> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 200);
    }

    #[test]
    fn concurrent_pushes_keep_the_buffer_consistent() {
        let mut wide = config(CheckpointConfig::disabled());
        wide.buffer.capacity = 64;
        wide.learner.batch_size = 8;
        let trainer = Arc::new(Trainer::new(wide).unwrap());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let trainer = Arc::clone(&trainer);
                thread::spawn(move || {
                    let mut rng = trainer.session_rng(SessionKey(i));
                    for step in 0..40 {
                        let observation = arr1(&[i as f64, step as f64, 0.0, 1.0]);
                        let action = trainer.select_action(&observation, &mut rng);
                        assert!(action < 2);
                        trainer.push_transition(Transition::new(
                            observation,
                            action,
                            1.0,
                            absorbing(4),
                            true,
                        ));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(trainer.buffer_len(), 64);
        assert_eq!(trainer.total_steps(), 160);
        assert_eq!(trainer.learner_steps(), 160 - 7);
    }

    #[test]
    fn restored_trainer_acts_identically() {
        let dir = tempfile::tempdir().unwrap();
        let trainer = Trainer::new(config(on_disk(dir.path()))).unwrap();
        for step in 0..10 {
            trainer.push_transition(transition(step as f64));
        }
        let mut rng = trainer.session_rng(SessionKey(9));
        for _ in 0..3 {
            trainer.select_action(&arr1(&[0.0, 0.0, 0.0, 1.0]), &mut rng);
        }
        trainer.policy.set_epsilon(0.3);
        let record = trainer.snapshot();
        let path = dir.path().join("snapshot.ckpt");
        record.save(&path).unwrap();

        let restored =
            Trainer::from_record(config(CheckpointConfig::disabled()), CheckpointRecord::load(&path).unwrap())
                .unwrap();
        assert_eq!(restored.epsilon(), 0.3);
        assert_eq!(restored.learner_steps(), trainer.learner_steps());
        assert_eq!(restored.total_steps(), 3);

        let key = SessionKey(5);
        let (mut a, mut b) = (trainer.session_rng(key), restored.session_rng(key));
        for i in 0..50 {
            let observation = arr1(&[i as f64 * 0.1, -0.3, 0.7, 1.0]);
            assert_eq!(
                trainer.select_action(&observation, &mut a),
                restored.select_action(&observation, &mut b)
            );
        }
    }

    #[test]
    fn open_resumes_from_latest_unless_fresh() {
        let dir = tempfile::tempdir().unwrap();
        {
            let trainer = Trainer::new(config(on_disk(dir.path()))).unwrap();
            let summary = EpisodeSummary {
                client_id: "r".to_string(),
                episode_index: 0,
                steps: 1,
                reward: -2.0,
            };
            trainer.complete_episode(&summary);
            trainer.shutdown().unwrap();
        }
        assert!(dir.path().join(LATEST_FILE).exists());

        let resumed = Trainer::open(config(on_disk(dir.path())), false).unwrap();
        assert_eq!(resumed.episode_rewards(), vec![-2.0]);
        assert!((resumed.epsilon() - 0.995).abs() < 1e-12);

        let fresh = Trainer::open(config(on_disk(dir.path())), true).unwrap();
        assert_eq!(fresh.episodes(), 0);
        assert_eq!(fresh.epsilon(), 1.0);
    }

    #[test]
    fn failed_checkpoint_write_does_not_stop_training() {
        let dir = tempfile::tempdir().unwrap();
        let checkpoint = CheckpointConfig {
            interval: 1,
            ..on_disk(dir.path())
        };
        let trainer = Trainer::new(config(checkpoint)).unwrap();
        let summary = EpisodeSummary {
            client_id: "0".to_string(),
            episode_index: 0,
            steps: 1,
            reward: 1.0,
        };
        // a directory where the temporary file should go makes every latest write fail
        let blocker = dir.path().join(LATEST_FILE).with_extension("ckpt.tmp");
        fs::create_dir(&blocker).unwrap();

        assert_eq!(trainer.complete_episode(&summary), 1);
        // named snapshots are queued after latest, so once one exists latest was attempted
        let named = dir.path().join(episode_file(1));
        let deadline = Instant::now() + Duration::from_secs(10);
        while !named.exists() {
            assert!(Instant::now() < deadline, "episode snapshot never written");
            thread::sleep(Duration::from_millis(5));
        }
        assert!(!dir.path().join(LATEST_FILE).exists());

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(trainer.complete_episode(&summary), 2);
        trainer.shutdown().unwrap();

        let latest = CheckpointRecord::load(&dir.path().join(LATEST_FILE)).unwrap();
        assert_eq!(latest.episodes(), 2);
        assert_eq!(latest.episode_rewards, vec![1.0, 1.0]);
        assert!(dir.path().join(episode_file(2)).exists());
    }

    #[test]
    fn mismatched_checkpoint_is_incompatible() {
        let trainer = Trainer::new(config(CheckpointConfig::disabled())).unwrap();
        let record = trainer.snapshot();
        let mut other = config(CheckpointConfig::disabled());
        other.action_count = 3;
        assert!(matches!(
            Trainer::from_record(other, record),
            Err(TrainerError::Checkpoint(CheckpointError::Incompatible(_)))
        ));
    }
}
