pub mod config;
pub mod domain;
pub mod errors;

pub use config::EngineConfig;
pub use errors::{EngineError, EngineResult};
