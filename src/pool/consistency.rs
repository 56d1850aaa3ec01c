//! Self-consistency: sample a document several times and take the majority.

use crate::models::{
    AnnotatedDocument, Annotation, ConsistencyRecord, Document, PromptContext, SamplingParams,
    normalize_label,
};
use crate::pool::RetryExecutor;
use tracing::debug;

/// Most frequent label.
///
/// Ties go to the label whose first occurrence comes earliest, so the
/// result only depends on sample order. Returns `None` for no labels.
pub fn majority_vote(labels: &[String]) -> Option<&str> {
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for label in labels {
        match tally.iter_mut().find(|(l, _)| *l == label.as_str()) {
            Some(entry) => entry.1 += 1,
            None => tally.push((label.as_str(), 1)),
        }
    }

    let mut best: Option<(&str, usize)> = None;
    for (label, count) in tally {
        if best.is_none_or(|(_, top)| count > top) {
            best = Some((label, count));
        }
    }
    best.map(|(label, _)| label)
}

/// Outcome of a self-consistency run over one document.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatedResult {
    /// Majority label (normalized)
    pub label: String,
    /// Normalized label of each successful sample
    pub votes: Vec<String>,
    /// Reasoning of each successful sample
    pub reasonings: Vec<String>,
    /// Scores reported by the successful samples
    pub scores: Vec<f64>,
    /// Mean of `scores`, if any sample reported one
    pub avg_score: Option<f64>,
    /// Reasoning of the first sample that voted for `label`
    pub reasoning: String,
    /// Target of the first sample that voted for `label`
    pub target: String,
    /// Samples requested
    pub samples: usize,
}

impl AggregatedResult {
    /// Fold the successful samples of one document.
    pub fn from_samples(samples: usize, annotations: &[Annotation]) -> Option<Self> {
        let votes: Vec<String> = annotations.iter().map(|a| normalize_label(&a.label)).collect();
        let label = majority_vote(&votes)?.to_string();

        // The winner was voted for, so a representative exists.
        let representative = annotations
            .iter()
            .zip(&votes)
            .find(|(_, vote)| **vote == label)
            .map(|(a, _)| a)?;

        let scores: Vec<f64> = annotations.iter().filter_map(|a| a.score).collect();
        let avg_score = if scores.is_empty() {
            None
        } else {
            Some(scores.iter().sum::<f64>() / scores.len() as f64)
        };

        Some(Self {
            reasoning: representative.reasoning.clone(),
            target: representative.target.clone(),
            reasonings: annotations.iter().map(|a| a.reasoning.clone()).collect(),
            label,
            votes,
            scores,
            avg_score,
            samples,
        })
    }

    /// Annotated document carrying the majority annotation and the vote record.
    pub fn into_annotated(self, document: Document) -> AnnotatedDocument {
        let annotation = Annotation {
            label: self.label,
            reasoning: self.reasoning,
            target: self.target,
            score: self.avg_score,
        };
        AnnotatedDocument::annotated(document, annotation).with_consistency(ConsistencyRecord {
            samples: self.samples,
            votes: self.votes,
            reasonings: self.reasonings,
            scores: self.scores,
        })
    }
}

/// Runs `samples` retried classifications per document and aggregates them.
#[derive(Debug, Clone, Copy)]
pub struct SelfConsistency {
    samples: usize,
}

impl SelfConsistency {
    pub fn new(samples: usize) -> Self {
        Self { samples }
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    /// Sample a document sequentially, each sample with its own seed and
    /// temperature derived from `base`.
    ///
    /// Samples whose retries are exhausted do not vote. Returns `None` when
    /// no sample succeeded.
    pub async fn sample(
        &self,
        executor: &RetryExecutor,
        doc_id: &str,
        prompt: PromptContext<'_>,
        base: SamplingParams,
    ) -> Option<AggregatedResult> {
        let mut annotations = Vec::with_capacity(self.samples);
        for index in 0..self.samples {
            if let Some(annotation) = executor.attempt(doc_id, prompt, base.for_sample(index)).await {
                annotations.push(annotation);
            }
        }

        let result = AggregatedResult::from_samples(self.samples, &annotations);
        if let Some(r) = &result {
            debug!(
                doc_id = %doc_id,
                label = %r.label,
                votes = r.votes.len(),
                samples = self.samples,
                "Self-consistency vote"
            );
        }
        result
    }
}
