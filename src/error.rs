//! Error taxonomy of the trainer.
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A wire line that does not match `STATE|...` or `REWARD|...`.
///
/// The connection that sent it is closed; other connections are unaffected.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolParseError {
    #[error("empty message")]
    Empty,
    #[error("message is not valid UTF-8")]
    NotUtf8,
    #[error("message exceeds {limit} bytes")]
    LineTooLong { limit: usize },
    #[error("unknown message kind {0:?}")]
    UnknownKind(String),
    #[error("{kind} message is missing field `{field}`")]
    MissingField {
        kind: &'static str,
        field: &'static str,
    },
    #[error("{kind} message has {count} unexpected trailing field(s)")]
    TrailingFields { kind: &'static str, count: usize },
    #[error("field `{field}` is not a number: {value:?}")]
    InvalidNumber { field: String, value: String },
    #[error("field `{field}` is not finite")]
    NonFinite { field: String },
    #[error("observation has {found} values, expected {expected}")]
    Dimension { expected: usize, found: usize },
    #[error("done flag must be \"0\" or \"1\", got {0:?}")]
    InvalidDone(String),
    #[error("connection is bound to client {expected:?} but received a message for {found:?}")]
    ClientMismatch { expected: String, found: String },
}

/// Violations of the per-client STATE / REWARD alternation.
///
/// Both are recoverable: they are logged as warnings and the connection stays open.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("client {client} sent a new observation at step {step} before rewarding the previous action")]
    OutOfOrderMessage { client: String, step: u64 },
    #[error("client {client} sent reward {reward} with no pending observation")]
    UnmatchedReward { client: String, reward: f64 },
}

/// Internal only: the buffer cannot fill a batch yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("transition buffer holds {available} transitions, {requested} requested")]
pub struct InsufficientDataError {
    pub requested: usize,
    pub available: usize,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint i/o on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("checkpoint encoding: {0}")]
    Encode(#[from] bincode::Error),
    #[error("training data export: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint does not fit this trainer: {0}")]
    Incompatible(String),
}

impl CheckpointError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Invalid configuration. These are invariant violations and stop the process.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("transition buffer capacity must be positive")]
    ZeroCapacity,
    #[error("batch size must be positive")]
    ZeroBatchSize,
    #[error("target synchronisation interval must be positive")]
    ZeroSyncInterval,
    #[error("checkpoint interval must be positive")]
    ZeroCheckpointInterval,
    #[error("observation dimension must be positive")]
    ZeroObservationDim,
    #[error("at least two actions are required, got {0}")]
    TooFewActions(usize),
    #[error("hidden layer widths must be positive")]
    ZeroLayerWidth,
    #[error("{name} must lie in {range}, got {value}")]
    OutOfRange {
        name: &'static str,
        range: &'static str,
        value: f64,
    },
}

/// Anything that stops the trainer process.
#[derive(Debug, Error)]
pub enum TrainerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),
    #[error("network i/o: {0}")]
    Io(#[from] io::Error),
    #[error("could not install the shutdown handler: {0}")]
    Signal(#[from] ctrlc::Error),
}
