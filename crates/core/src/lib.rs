pub mod config;
pub mod error;
pub mod message;
pub mod task;

pub use config::{OffloadConfig, SchedulerConfig, WorkerConfig};
pub use error::*;
pub use message::{WorkerRequest, WorkerResponse};
pub use task::*;
