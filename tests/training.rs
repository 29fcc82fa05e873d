use ndarray::arr1;
use rstest::rstest;

use swarm_trainer::checkpoint::{CheckpointRecord, FINAL_FILE, LATEST_FILE};
use swarm_trainer::config::{CheckpointConfig, NextObservation};
use swarm_trainer::observation::{absorbing, Transition};
use swarm_trainer::session::{Session, SessionKey};
use swarm_trainer::{Trainer, TrainerConfig};

fn small_config(checkpoint: CheckpointConfig) -> TrainerConfig {
    let mut config = TrainerConfig {
        observation_dim: 4,
        action_count: 2,
        checkpoint,
        ..TrainerConfig::default()
    };
    config.network.hidden_layers = vec![8];
    config.buffer.capacity = 2;
    config.learner.batch_size = 2;
    config
}

#[test]
fn two_pushes_train_and_a_third_evicts_the_oldest() {
    let trainer = Trainer::new(small_config(CheckpointConfig::disabled())).unwrap();
    let first = Transition::new(arr1(&[0.1, 0.2, 0.3, 0.4]), 1, 1.0, arr1(&[0.2, 0.3, 0.4, 0.5]), false);
    let second = Transition::new(arr1(&[0.2, 0.3, 0.4, 0.5]), 0, 0.5, absorbing(4), true);

    assert_eq!(trainer.push_transition(first), None);
    let loss = trainer.push_transition(second).unwrap();
    assert!(loss.is_finite());
    assert!(loss >= 0.0);

    let third = Transition::new(arr1(&[0.3, 0.4, 0.5, 0.6]), 1, -1.0, absorbing(4), true);
    trainer.push_transition(third);
    let rewards: Vec<f64> = trainer.buffer_contents().iter().map(|t| t.reward).collect();
    assert_eq!(rewards, vec![0.5, -1.0]);
    assert_eq!(trainer.learner_steps(), 2);
}

#[rstest]
#[case(NextObservation::Deferred)]
#[case(NextObservation::Repeat)]
fn rewarded_step_becomes_exactly_one_transition(#[case] policy: NextObservation) {
    let mut config = small_config(CheckpointConfig::disabled());
    config.buffer.capacity = 16;
    config.learner.batch_size = 16;
    config.next_observation = policy;
    let trainer = Trainer::new(config).unwrap();
    let mut session = Session::new(SessionKey(0), &trainer);

    let action = session.on_observation(arr1(&[1.0, 0.0, 0.0, 0.0]), &trainer).unwrap();
    session.on_reward(2.0, false, &trainer).unwrap();
    session.on_observation(arr1(&[0.0, 1.0, 0.0, 0.0]), &trainer).unwrap();

    let pushed = trainer.buffer_contents();
    assert_eq!(pushed.len(), 1);
    assert_eq!(pushed[0].observation, arr1(&[1.0, 0.0, 0.0, 0.0]));
    assert_eq!(pushed[0].action, action);
    assert_eq!(pushed[0].reward, 2.0);
    assert!(!pushed[0].terminal);
}

#[test]
fn hundred_episodes_bring_epsilon_to_about_six_tenths() {
    let trainer = Trainer::new(small_config(CheckpointConfig::disabled())).unwrap();
    let mut session = Session::new(SessionKey(0), &trainer);
    for episode in 0..100 {
        session.on_observation(arr1(&[episode as f64, 0.0, 0.0, 1.0]), &trainer).unwrap();
        session.on_reward(1.0, true, &trainer).unwrap();
    }
    assert_eq!(session.episode_index(), 100);
    assert!((trainer.epsilon() - 0.606).abs() < 1e-3);
}

#[test]
fn shutdown_then_resume_continues_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let on_disk = || CheckpointConfig {
        directory: Some(dir.path().to_path_buf()),
        interval: 2,
        ..CheckpointConfig::default()
    };

    let trainer = Trainer::new(small_config(on_disk())).unwrap();
    let mut session = Session::new(SessionKey(0), &trainer);
    for episode in 0..3 {
        session.on_observation(arr1(&[episode as f64, 1.0, 0.0, 0.0]), &trainer).unwrap();
        session.on_reward(episode as f64, true, &trainer).unwrap();
    }
    let epsilon = trainer.epsilon();
    trainer.shutdown().unwrap();

    let last = CheckpointRecord::load(&dir.path().join(FINAL_FILE)).unwrap();
    assert_eq!(last, CheckpointRecord::load(&dir.path().join(LATEST_FILE)).unwrap());
    assert_eq!(last.episode_rewards, vec![0.0, 1.0, 2.0]);

    let resumed = Trainer::open(small_config(on_disk()), false).unwrap();
    assert_eq!(resumed.episodes(), 3);
    assert_eq!(resumed.epsilon(), epsilon);
    assert_eq!(resumed.learner_steps(), trainer.learner_steps());
}
