use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use crossbeam::channel;
use structopt::StructOpt;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use swarm_trainer::config::{
    BufferConfig, CheckpointConfig, ExplorationConfig, LearnerConfig, NetworkConfig,
    NextObservation, ACTION_COUNT, OBSERVATION_DIM,
};
use swarm_trainer::error::TrainerError;
use swarm_trainer::network::activation::Activation;
use swarm_trainer::network::optimizer::OptimizerKind;
use swarm_trainer::{Server, Trainer, TrainerConfig};

extern crate structopt;

/// Serve actions to a swarm of robots and learn a shared Q-network from their experience
#[derive(StructOpt, Debug)]
#[structopt(name = "swarm_trainer")]
struct Cli {
    /// Address to listen on
    #[structopt(long = "host", default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on
    #[structopt(long = "port", short = "p", default_value = "5555")]
    port: u16,

    /// Directory for checkpoints and the training data export
    #[structopt(long = "model_dir", default_value = "models", parse(from_os_str))]
    model_dir: PathBuf,

    /// Keep everything in memory, never read or write checkpoints
    #[structopt(long = "no_checkpoints")]
    no_checkpoints: bool,

    /// Ignore an existing latest checkpoint and start from fresh weights
    #[structopt(long = "fresh")]
    fresh: bool,

    /// Seed for weight initialisation, replay sampling and exploration
    #[structopt(long = "seed", default_value = "42")]
    seed: u64,

    /// Number of values in each observation
    #[structopt(long = "observation_dim", default_value = "28")]
    observation_dim: usize,

    /// Number of discrete actions
    #[structopt(long = "action_count", default_value = "4")]
    action_count: usize,

    /// Widths of the hidden layers
    #[structopt(long = "hidden_layers", default_value = "128,128,128", use_delimiter = true)]
    hidden_layers: Vec<usize>,

    /// Hidden layer activation: relu, leaky_relu, tanh, sigmoid or linear
    #[structopt(long = "activation", default_value = "relu")]
    activation: Activation,

    /// Optimizer: adam or sgd
    #[structopt(long = "optimizer", default_value = "adam")]
    optimizer: OptimizerKind,

    /// Learning rate of the optimizer
    #[structopt(long = "learning_rate", default_value = "0.001")]
    learning_rate: f64,

    /// Discount factor to be used on the temporal difference calculation
    #[structopt(long = "discount_factor", default_value = "0.99")]
    discount_factor: f64,

    /// Maximum number of transitions kept for replay
    #[structopt(long = "buffer_capacity", default_value = "10000")]
    buffer_capacity: usize,

    /// Transitions sampled per learner step
    #[structopt(long = "batch_size", default_value = "64")]
    batch_size: usize,

    /// Learner steps between two target network synchronisations
    #[structopt(long = "target_sync_interval", default_value = "100")]
    target_sync_interval: u64,

    /// Initial value for the exploration ratio
    #[structopt(long = "initial_epsilon", default_value = "1.0")]
    initial_epsilon: f64,

    /// Final value for the exploration ratio
    #[structopt(long = "min_epsilon", default_value = "0.01")]
    min_epsilon: f64,

    /// Factor applied to the exploration ratio after every episode
    #[structopt(long = "epsilon_decay", default_value = "0.995")]
    epsilon_decay: f64,

    /// Episodes between two named checkpoints
    #[structopt(long = "checkpoint_interval", default_value = "25")]
    checkpoint_interval: u64,

    /// Episodes between two statistics reports
    #[structopt(long = "stats_interval", default_value = "100")]
    stats_interval: u64,

    /// Where the next observation of a non-terminal step comes from: deferred or repeat
    #[structopt(long = "next_observation", default_value = "deferred")]
    next_observation: NextObservation,

    /// Log learner steps and chosen actions
    #[structopt(long = "verbose", short = "v")]
    verbose: bool,
}

impl Cli {
    fn trainer_config(&self) -> TrainerConfig {
        TrainerConfig {
            observation_dim: self.observation_dim,
            action_count: self.action_count,
            network: NetworkConfig {
                hidden_layers: self.hidden_layers.clone(),
                activation: self.activation,
            },
            learner: LearnerConfig {
                discount_factor: self.discount_factor,
                learning_rate: self.learning_rate,
                optimizer: self.optimizer,
                batch_size: self.batch_size,
                target_sync_interval: self.target_sync_interval,
            },
            buffer: BufferConfig {
                capacity: self.buffer_capacity,
            },
            exploration: ExplorationConfig {
                initial_epsilon: self.initial_epsilon,
                min_epsilon: self.min_epsilon,
                decay_rate: self.epsilon_decay,
            },
            checkpoint: CheckpointConfig {
                directory: (!self.no_checkpoints).then(|| self.model_dir.clone()),
                interval: self.checkpoint_interval,
                stats_interval: self.stats_interval,
            },
            next_observation: self.next_observation,
            seed: self.seed,
        }
    }
}

fn run(cli: Cli) -> Result<(), TrainerError> {
    let config = cli.trainer_config();
    if (config.observation_dim, config.action_count) != (OBSERVATION_DIM, ACTION_COUNT) {
        info!(
            observation_dim = config.observation_dim,
            action_count = config.action_count,
            "using a non-default robot interface"
        );
    }
    let trainer = Arc::new(Trainer::open(config, cli.fresh)?);
    let server = Server::bind((cli.host.as_str(), cli.port), Arc::clone(&trainer))?;

    let (tx, rx) = channel::bounded(1);
    ctrlc::set_handler(move || {
        let _ = tx.try_send(());
    })?;

    let handle = server.spawn()?;
    info!(address = %handle.local_addr(), "trainer ready, press Ctrl+C to stop");
    // a closed channel means the handler is gone, which is as good as a signal
    let _ = rx.recv();

    info!(clients = handle.client_count(), "shutting down");
    handle.stop();
    trainer.shutdown()?;
    info!(episodes = trainer.episodes(), "training stopped");
    Ok(())
}

fn main() {
    let cli = Cli::from_args();

    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if let Err(e) = run(cli) {
        error!(error = %e, "trainer failed");
        process::exit(1);
    }
}
