pub mod action_selection;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod experience_buffer;
pub mod learner;
pub mod network;
pub mod observation;
pub mod protocol;
pub mod server;
pub mod session;
pub mod trainer;
pub mod utils;
pub mod value_function;

pub use config::TrainerConfig;
pub use server::{Server, ServerHandle};
pub use trainer::Trainer;
