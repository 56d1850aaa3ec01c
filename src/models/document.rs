//! Documents and annotations.
//!
//! Corpora and annotated sets are maps keyed by document id, so an id can
//! appear at most once in either.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A corpus keyed by document id.
pub type Corpus = BTreeMap<String, Document>;

/// Annotated documents keyed by document id.
pub type AnnotatedSet = BTreeMap<String, AnnotatedDocument>;

/// A document to classify. Its id is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Structured classifier output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub label: String,
    pub reasoning: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

impl Annotation {
    /// Label in the form used for voting and forwarding.
    pub fn normalized_label(&self) -> String {
        normalize_label(&self.label)
    }
}

/// Trim and lower-case a label.
pub fn normalize_label(label: &str) -> String {
    label.trim().to_lowercase()
}

/// Vote record kept when an annotation came out of self-consistency sampling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencyRecord {
    /// Number of samples requested
    pub samples: usize,
    /// Normalized labels of the successful samples, in sample order
    pub votes: Vec<String>,
    /// Reasoning of every successful sample, in sample order
    pub reasonings: Vec<String>,
    /// Scores reported by the successful samples
    #[serde(default)]
    pub scores: Vec<f64>,
}

/// A document after its classification attempt.
///
/// `annotation` is `None` when every attempt failed; it is still written to
/// the checkpoint so that "could not classify" stays distinguishable from
/// "classified as something else".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnotatedDocument {
    pub text: String,
    pub annotation: Option<Annotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub self_consistency: Option<ConsistencyRecord>,
}

impl AnnotatedDocument {
    pub fn annotated(document: Document, annotation: Annotation) -> Self {
        Self {
            text: document.text,
            annotation: Some(annotation),
            self_consistency: None,
        }
    }

    pub fn failed(document: Document) -> Self {
        Self {
            text: document.text,
            annotation: None,
            self_consistency: None,
        }
    }

    /// Attach the vote record of a self-consistency run.
    pub fn with_consistency(mut self, record: ConsistencyRecord) -> Self {
        self.self_consistency = Some(record);
        self
    }

    pub fn is_failed(&self) -> bool {
        self.annotation.is_none()
    }

    /// Whether the annotation label equals `label`, ignoring case and
    /// surrounding whitespace. Failed documents never match.
    pub fn label_matches(&self, label: &str) -> bool {
        self.annotation
            .as_ref()
            .is_some_and(|a| a.normalized_label() == normalize_label(label))
    }

    /// Strip the annotation, keeping the original text.
    pub fn to_document(&self) -> Document {
        Document::new(self.text.clone())
    }
}
