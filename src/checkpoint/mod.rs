//! Checkpoint module for resumable stage execution.
//!
//! Provides:
//! - `Checkpoint`: A stage checkpoint as read from disk
//! - `CheckpointManager`: Atomic persistence and loading of checkpoints
//! - `CheckpointWriter`: A manager bound to one running stage

mod state;

pub use state::*;
