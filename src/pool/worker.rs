//! Worker pool for document classification.
//!
//! Up to `pool_size` documents are classified concurrently. Completions flow
//! back to a single collector loop, which is the only code that touches the
//! annotated set and the checkpoint file.

use crate::checkpoint::CheckpointWriter;
use crate::models::{AnnotatedDocument, AnnotatedSet, Corpus, Document, Result, SamplingParams, StagePrompt};
use crate::pool::{RetryExecutor, SelfConsistency};
use indicatif::{ProgressBar, ProgressStyle};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Counts for one pool run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolOutcome {
    /// Documents classified during this run
    pub processed: usize,
    /// Of those, documents that got an annotation
    pub annotated: usize,
    /// Of those, documents recorded with a null annotation
    pub failed: usize,
    /// Checkpoint writes, including the final one
    pub checkpoints: usize,
}

/// Worker pool for parallel classification.
pub struct WorkerPool {
    /// Retrying classifier (shared)
    executor: Arc<RetryExecutor>,
    /// Prompt parts of the stage
    prompt: Arc<StagePrompt>,
    /// Base sampling parameters
    sampling: SamplingParams,
    /// Majority voting, when enabled
    consistency: Option<SelfConsistency>,
    /// Pool size (max concurrent documents)
    pool_size: usize,
    /// Completions between checkpoint writes
    save_interval: usize,
    /// Semaphore for concurrency control
    semaphore: Arc<Semaphore>,
    show_progress: bool,
}

impl WorkerPool {
    /// Create a new worker pool. Zero sizes are raised to one.
    pub fn new(
        executor: Arc<RetryExecutor>,
        prompt: Arc<StagePrompt>,
        sampling: SamplingParams,
        pool_size: usize,
        save_interval: usize,
    ) -> Self {
        let pool_size = pool_size.max(1);
        Self {
            executor,
            prompt,
            sampling,
            consistency: None,
            pool_size,
            save_interval: save_interval.max(1),
            semaphore: Arc::new(Semaphore::new(pool_size)),
            show_progress: true,
        }
    }

    /// Classify every document with `samples` votes instead of once.
    pub fn with_self_consistency(mut self, samples: Option<usize>) -> Self {
        self.consistency = samples.map(SelfConsistency::new);
        self
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Classify `documents`, merging each completion into `annotated`.
    ///
    /// The checkpoint is written after every `save_interval` completions and
    /// once more at the end, also when `documents` is empty. A document
    /// whose task dies is recorded with a null annotation. A checkpoint
    /// write failure aborts the run.
    pub async fn run(
        &self,
        documents: Corpus,
        mut annotated: AnnotatedSet,
        checkpoint: &CheckpointWriter,
    ) -> Result<(AnnotatedSet, PoolOutcome)> {
        let pending = documents.len();
        let mut outcome = PoolOutcome::default();

        info!(
            pending = pending,
            already_done = annotated.len(),
            workers = self.pool_size,
            self_consistency = ?self.consistency.map(|c| c.samples()),
            "Starting worker pool"
        );

        let pb = self.progress_bar(annotated.len() + pending, annotated.len());

        let mut tasks = JoinSet::new();
        for (id, document) in &documents {
            let id = id.clone();
            let document = document.clone();
            let executor = Arc::clone(&self.executor);
            let prompt = Arc::clone(&self.prompt);
            let semaphore = Arc::clone(&self.semaphore);
            let sampling = self.sampling;
            let consistency = self.consistency;

            tasks.spawn(async move {
                let entry = match semaphore.acquire_owned().await {
                    Ok(_permit) => {
                        annotate_document(&executor, &prompt, sampling, consistency, &id, document)
                            .await
                    }
                    Err(_) => AnnotatedDocument::failed(document),
                };
                (id, entry)
            });
        }

        // Documents whose completion has not been collected yet.
        let mut outstanding = documents;

        while let Some(joined) = tasks.join_next().await {
            let (id, entry) = match joined {
                Ok(completed) => completed,
                Err(e) => {
                    warn!(error = %e, "Classification task died");
                    continue;
                }
            };
            outstanding.remove(&id);
            self.record(&mut annotated, &mut outcome, id, entry, checkpoint)?;
            pb.inc(1);
        }

        // Tasks that died never reported back; record them as failed.
        for (id, document) in outstanding {
            self.record(
                &mut annotated,
                &mut outcome,
                id,
                AnnotatedDocument::failed(document),
                checkpoint,
            )?;
            pb.inc(1);
        }

        checkpoint.save(&annotated)?;
        outcome.checkpoints += 1;

        pb.finish_with_message(format!(
            "Done: {} annotated, {} failed",
            outcome.annotated, outcome.failed
        ));

        info!(
            processed = outcome.processed,
            annotated = outcome.annotated,
            failed = outcome.failed,
            checkpoints = outcome.checkpoints,
            "Worker pool finished"
        );

        Ok((annotated, outcome))
    }

    /// Merge one completion and checkpoint on the interval.
    fn record(
        &self,
        annotated: &mut AnnotatedSet,
        outcome: &mut PoolOutcome,
        id: String,
        entry: AnnotatedDocument,
        checkpoint: &CheckpointWriter,
    ) -> Result<()> {
        if entry.is_failed() {
            outcome.failed += 1;
        } else {
            outcome.annotated += 1;
        }
        outcome.processed += 1;
        annotated.insert(id, entry);

        if outcome.processed % self.save_interval == 0 {
            checkpoint.save(annotated)?;
            outcome.checkpoints += 1;
            debug!(processed = outcome.processed, "Interval checkpoint written");
        }
        Ok(())
    }

    fn progress_bar(&self, total: usize, done: usize) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }

        let pb = ProgressBar::new(total as u64);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("##-");
        pb.set_style(style);
        pb.set_position(done as u64);
        pb
    }
}

/// Classify one document, by single attempt or by majority vote.
async fn annotate_document(
    executor: &RetryExecutor,
    prompt: &StagePrompt,
    sampling: SamplingParams,
    consistency: Option<SelfConsistency>,
    id: &str,
    document: Document,
) -> AnnotatedDocument {
    let context = prompt.context(&document.text);

    if let Some(sc) = consistency {
        let result = sc.sample(executor, id, context, sampling).await;
        return match result {
            Some(result) => result.into_annotated(document),
            None => AnnotatedDocument::failed(document),
        };
    }

    let annotation = executor.attempt(id, context, sampling).await;
    match annotation {
        Some(annotation) => AnnotatedDocument::annotated(document, annotation),
        None => AnnotatedDocument::failed(document),
    }
}
