//! Run statistics.

use super::AnnotatedSet;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Statistics for one stage run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StageStats {
    /// Stage name
    pub stage: String,

    /// Documents in the stage's input corpus
    pub total_documents: usize,

    /// Documents already in the checkpoint when the run started
    pub already_done: usize,

    /// Documents classified during this run
    pub processed: usize,

    /// Documents in the checkpoint with an annotation
    pub annotated: usize,

    /// Documents in the checkpoint whose retries were exhausted
    pub failed: usize,

    /// Checkpoint label histogram (normalized labels)
    pub labels: BTreeMap<String, usize>,

    /// Documents forwarded to the next stage, if it is chained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub forwarded: Option<usize>,

    /// Total runtime in seconds
    pub runtime_secs: f64,

    /// Documents per hour throughput
    pub throughput_per_hour: f64,
}

impl StageStats {
    /// Fill the checkpoint-derived counters from an annotated set.
    pub fn tally(&mut self, annotated: &AnnotatedSet) {
        self.annotated = 0;
        self.failed = 0;
        self.labels.clear();
        for doc in annotated.values() {
            match &doc.annotation {
                Some(a) => {
                    self.annotated += 1;
                    *self.labels.entry(a.normalized_label()).or_default() += 1;
                }
                None => self.failed += 1,
            }
        }
    }

    /// Calculate derived stats.
    pub fn finalize(&mut self) {
        if self.runtime_secs > 0.0 {
            self.throughput_per_hour = self.processed as f64 / self.runtime_secs * 3600.0;
        }
    }
}
