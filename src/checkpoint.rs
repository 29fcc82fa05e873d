use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Sender};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::config::CheckpointConfig;
use crate::error::CheckpointError;
use crate::network::optimizer::EnumOptimizer;
use crate::network::Network;
use crate::utils::lock;

pub const FORMAT_VERSION: u32 = 2;

pub const LATEST_FILE: &str = "q_network_latest.ckpt";
pub const FINAL_FILE: &str = "q_network_final.ckpt";
pub const TRAINING_DATA_FILE: &str = "training_data.json";

pub fn episode_file(episode: u64) -> String {
    format!("q_network_episode_{episode}.ckpt")
}

/// Everything needed to resume training where a snapshot was taken.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub version: u32,
    pub online: Network,
    pub target: Network,
    pub optimizer: EnumOptimizer,
    pub epsilon: f64,
    pub learner_steps: u64,
    /// Observations answered over the whole run.
    pub total_steps: u64,
    /// Cumulative reward of every completed episode, in completion order.
    pub episode_rewards: Vec<f64>,
}

impl CheckpointRecord {
    pub fn episodes(&self) -> u64 {
        self.episode_rewards.len() as u64
    }

    /// Writes next to `path` first and renames, so readers never see a partial file.
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let tmp = path.with_extension("ckpt.tmp");
        let file = File::create(&tmp).map_err(|e| CheckpointError::io(&tmp, e))?;
        let mut writer = BufWriter::new(file);
        bincode::serialize_into(&mut writer, self)?;
        writer.flush().map_err(|e| CheckpointError::io(&tmp, e))?;
        drop(writer);
        fs::rename(&tmp, path).map_err(|e| CheckpointError::io(path, e))
    }

    pub fn load(path: &Path) -> Result<Self, CheckpointError> {
        let file = File::open(path).map_err(|e| CheckpointError::io(path, e))?;
        let record: Self = bincode::deserialize_from(BufReader::new(file))?;
        if record.version != FORMAT_VERSION {
            return Err(CheckpointError::Incompatible(format!(
                "format version {} (expected {FORMAT_VERSION})",
                record.version
            )));
        }
        Ok(record)
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrainingData {
    pub episode_rewards: Vec<f64>,
    pub total_episodes: u64,
    pub final_epsilon: f64,
}

impl TrainingData {
    pub fn save(&self, path: &Path) -> Result<(), CheckpointError> {
        let file = File::create(path).map_err(|e| CheckpointError::io(path, e))?;
        let mut writer = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.flush().map_err(|e| CheckpointError::io(path, e))
    }
}

struct WriteJob {
    path: PathBuf,
    record: Box<CheckpointRecord>,
}

struct Writer {
    sender: Sender<WriteJob>,
    handle: JoinHandle<()>,
}

fn spawn_writer() -> Result<Writer, CheckpointError> {
    let (sender, receiver) = channel::unbounded::<WriteJob>();
    let handle = thread::Builder::new()
        .name("checkpoint-writer".to_string())
        .spawn(move || {
            for job in receiver {
                match job.record.save(&job.path) {
                    Ok(()) => debug!(path = %job.path.display(), "checkpoint written"),
                    Err(e) => error!(error = %e, "checkpoint write failed, training continues"),
                }
            }
        })
        .map_err(|e| CheckpointError::io("checkpoint-writer", e))?;
    Ok(Writer { sender, handle })
}

/// Owns the global episode history and the periodic snapshot schedule.
///
/// Snapshots are taken on the caller's thread and written by a dedicated writer
/// thread, so no lock is held while a file is being written.
pub struct Checkpointer {
    directory: Option<PathBuf>,
    interval: u64,
    history: Mutex<Vec<f64>>,
    writer: Mutex<Option<Writer>>,
}

impl Checkpointer {
    /// Creates the directory if needed and starts the writer.
    pub fn new(config: &CheckpointConfig, history: Vec<f64>) -> Result<Self, CheckpointError> {
        let writer = match &config.directory {
            Some(directory) => {
                fs::create_dir_all(directory).map_err(|e| CheckpointError::io(directory, e))?;
                Some(spawn_writer()?)
            }
            None => None,
        };
        Ok(Self {
            directory: config.directory.clone(),
            interval: config.interval.max(1),
            history: Mutex::new(history),
            writer: Mutex::new(writer),
        })
    }

    pub fn directory(&self) -> Option<&Path> {
        self.directory.as_deref()
    }

    pub fn episodes(&self) -> u64 {
        lock(&self.history).len() as u64
    }

    pub fn episode_rewards(&self) -> Vec<f64> {
        lock(&self.history).clone()
    }

    /// Runs `f` over the history while holding its lock.
    pub fn with_history<T>(&self, f: impl FnOnce(&[f64]) -> T) -> T {
        f(&lock(&self.history))
    }

    /// Appends one completed episode and returns the new global episode count.
    ///
    /// `snapshot` is only called when there is somewhere to write to, with the history
    /// lock held, so the snapshot and the count it is filed under always agree.
    pub fn record_episode(
        &self,
        reward: f64,
        snapshot: impl FnOnce(&[f64]) -> CheckpointRecord,
    ) -> u64 {
        let mut history = lock(&self.history);
        history.push(reward);
        let count = history.len() as u64;
        if self.directory.is_some() {
            let record = snapshot(&history);
            self.maybe_checkpoint(count, record);
        }
        count
    }

    /// Queues `latest` and, every `interval` episodes, a named snapshot.
    pub fn maybe_checkpoint(&self, global_episode_count: u64, record: CheckpointRecord) {
        let Some(directory) = &self.directory else {
            return;
        };
        let writer = lock(&self.writer);
        let Some(writer) = writer.as_ref() else {
            debug!(episode = global_episode_count, "checkpointer finished, snapshot skipped");
            return;
        };
        let mut jobs = vec![directory.join(LATEST_FILE)];
        if global_episode_count % self.interval == 0 {
            jobs.push(directory.join(episode_file(global_episode_count)));
            info!(episode = global_episode_count, "checkpoint scheduled");
        }
        let record = Box::new(record);
        for path in jobs {
            let job = WriteJob {
                path,
                record: record.clone(),
            };
            if writer.sender.send(job).is_err() {
                warn!("checkpoint writer is gone, snapshot dropped");
            }
        }
    }

    /// Drains pending writes, then writes the final snapshot and the training data.
    pub fn finish(&self, record: CheckpointRecord) -> Result<(), CheckpointError> {
        let writer = lock(&self.writer).take();
        if let Some(Writer { sender, handle }) = writer {
            drop(sender);
            if handle.join().is_err() {
                error!("checkpoint writer panicked");
            }
        }
        let Some(directory) = &self.directory else {
            return Ok(());
        };
        let path = directory.join(FINAL_FILE);
        record.save(&path)?;
        info!(path = %path.display(), episodes = record.episodes(), "final model saved");

        let data = TrainingData {
            total_episodes: record.episodes(),
            final_epsilon: record.epsilon,
            episode_rewards: record.episode_rewards,
        };
        let path = directory.join(TRAINING_DATA_FILE);
        data.save(&path)?;
        info!(path = %path.display(), "training data saved");
        Ok(())
    }
}
