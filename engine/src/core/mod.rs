//! ClipScribe Core Engine
//!
//! Token-cost optimization and the annotation pipeline that drives a
//! remote vision-language model.

pub mod annotations;
pub mod cost;
pub mod fs;
pub mod settings;

// Re-export common types
mod types;
pub use types::*;

mod error;
pub use error::*;
