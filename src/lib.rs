pub mod analyzers;
pub mod config;
pub mod enrich;
pub mod error;
pub mod graph;
pub mod llm;
pub mod models;
pub mod orchestrator;
pub mod relations;
pub mod schema;
pub mod source;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{GenesisError, Result};
pub use orchestrator::{Orchestrator, RunOptions, RunOutcome};
