//! Domain-only types that never cross the engine boundary as records.

pub mod validation;

pub use validation::*;
