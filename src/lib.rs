//! annotator - Resumable cascading LLM annotation of text corpora.
//!
//! ## Architecture
//!
//! Every stage classifies a corpus through a bounded worker pool:
//! - **Retry Executor**: bounded retries with jittered backoff per document
//! - **Self-Consistency**: optional majority vote over several samples
//! - **Worker Pool**: concurrent classification, single-writer checkpointing
//!
//! ## Cascade
//!
//! - **hate**: screens the full corpus
//! - **dehumanizing → stigmatizing → stereotyping → simplifying**: each reads
//!   the previous stage's documents carrying its forwarding label
//! - **othering**: classifies the full corpus independently
//!
//! ## Resumability
//!
//! Each stage checkpoints its annotated set atomically. A rerun classifies only
//! documents missing from the checkpoint; failed documents are kept with a null
//! annotation and are not retried.

pub mod checkpoint;
pub mod client;
pub mod models;
pub mod pipeline;
pub mod pool;
pub mod store;

// Re-exports for convenience
pub use checkpoint::{Checkpoint, CheckpointManager, CheckpointWriter};
pub use client::{Classifier, OllamaClient};
pub use models::{
    AnnotatedDocument, AnnotatedSet, Annotation, AnnotatorError, ClassifyError, Config,
    ConfigOverrides, Corpus, Document, PromptData, Result, SamplingParams, StageStats,
};
pub use pipeline::{CascadeReport, StageLayout, StagePipeline, StageSelection, StageSpec};
pub use pool::{RetryExecutor, RetryPolicy, SelfConsistency, WorkerPool};
pub use store::DocumentStore;
