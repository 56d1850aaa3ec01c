//! Completion service client module.

mod classifier;
mod ollama;

pub use classifier::*;
pub use ollama::*;
