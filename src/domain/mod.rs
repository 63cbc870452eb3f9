//! Domain layer types and invariants.

pub mod budget;
pub mod diagram;
pub mod error;
pub mod format;
