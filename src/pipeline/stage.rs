//! A single classification stage.
//!
//! Stage flow:
//! Corpus + Checkpoint → pending set → Worker Pool → Checkpoint

use crate::checkpoint::{CheckpointManager, CheckpointWriter};
use crate::models::{AnnotatedSet, Config, PromptData, Result, StagePrompt, StageStats};
use crate::pool::{RetryExecutor, WorkerPool};
use crate::store::{DocumentStore, RunState};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Where a stage reads its documents from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageInput {
    /// The configured corpus
    Original,
    /// The previous stage's documents carrying its forwarding label
    Forwarded,
}

/// Definition of one cascade stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    pub name: String,
    pub prompt_file: PathBuf,
    pub input: StageInput,
    /// Label whose documents feed the next stage
    pub forward_label: Option<String>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, prompt_file: impl Into<PathBuf>, input: StageInput) -> Self {
        Self {
            name: name.into(),
            prompt_file: prompt_file.into(),
            input,
            forward_label: None,
        }
    }

    /// Forward documents labelled `label` to the next stage.
    pub fn forwarding(mut self, label: impl Into<String>) -> Self {
        self.forward_label = Some(label.into());
        self
    }
}

/// Runs stages against a shared classifier.
pub struct StageRunner {
    executor: Arc<RetryExecutor>,
    config: Arc<Config>,
    show_progress: bool,
}

impl StageRunner {
    pub fn new(executor: Arc<RetryExecutor>, config: Arc<Config>) -> Self {
        Self {
            executor,
            config,
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    /// Classify every document of `input` that `checkpoint_path` does not
    /// already hold, and return the stage's full annotated set.
    ///
    /// Running again over an unchanged corpus with a complete checkpoint
    /// makes no classifier calls.
    pub async fn run(
        &self,
        spec: &StageSpec,
        input: &Path,
        checkpoint_path: &Path,
    ) -> Result<(StageStats, AnnotatedSet)> {
        let start = Instant::now();

        let prompt_data = PromptData::from_file(&spec.prompt_file)?;
        let corpus = DocumentStore::load(input)?;
        let manager = CheckpointManager::new(checkpoint_path);
        let prior = manager.load_data()?;

        let state = RunState::derive(&spec.name, input, &corpus, &prior);
        let pending = DocumentStore::pending_set(&corpus, &prior);

        info!(
            stage = %spec.name,
            source = %state.source.display(),
            total = corpus.len(),
            already_done = state.processed.len(),
            pending = state.pending.len(),
            progress = format!("{:.1}%", state.progress_percent()),
            "Starting stage"
        );

        let prompt = Arc::new(StagePrompt::from(&prompt_data));
        let writer = CheckpointWriter::new(
            manager,
            self.config.snapshot(&spec.name, &spec.prompt_file),
            prompt_data,
        );

        let pool = WorkerPool::new(
            Arc::clone(&self.executor),
            prompt,
            self.config.sampling.params(),
            self.config.workers.size,
            self.config.workers.save_interval,
        )
        .with_self_consistency(self.config.self_consistency.samples())
        .with_progress(self.show_progress);

        let (annotated, outcome) = pool.run(pending, prior, &writer).await?;

        let mut stats = StageStats {
            stage: spec.name.clone(),
            total_documents: corpus.len(),
            already_done: state.processed.len(),
            processed: outcome.processed,
            runtime_secs: start.elapsed().as_secs_f64(),
            ..Default::default()
        };
        stats.tally(&annotated);
        stats.finalize();

        info!(
            stage = %spec.name,
            processed = stats.processed,
            annotated = stats.annotated,
            failed = stats.failed,
            throughput = format!("{:.0}/hr", stats.throughput_per_hour),
            "Stage complete"
        );

        Ok((stats, annotated))
    }
}
