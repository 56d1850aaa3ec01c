//! Core data models for the annotator.

mod config;
mod document;
mod error;
mod prompt;
mod stats;

pub use config::*;
pub use document::*;
pub use error::*;
pub use prompt::*;
pub use stats::*;
