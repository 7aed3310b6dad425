pub mod cli;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod group;
pub mod metrics_constants;
pub mod paths;
pub mod sequencer;
pub mod strategy;
pub mod types;

pub use error::{Error, Result};
