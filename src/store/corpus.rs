//! Corpus loading, saving and resume bookkeeping.

use crate::checkpoint::write_json_atomic;
use crate::models::{AnnotatedSet, AnnotatorError, Corpus, Document, Result};
use serde::de::{Deserializer, Error as _, MapAccess, Visitor};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One line of a JSONL corpus.
#[derive(Debug, Deserialize)]
struct CorpusLine {
    id: String,
    #[serde(alias = "body")]
    text: String,
}

/// A JSON-object corpus that rejects repeated ids instead of keeping the
/// last one.
struct UniqueCorpus(Corpus);

impl<'de> Deserialize<'de> for UniqueCorpus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct CorpusVisitor;

        impl<'de> Visitor<'de> for CorpusVisitor {
            type Value = UniqueCorpus;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("an object mapping document id to {\"text\": ...}")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> std::result::Result<Self::Value, A::Error> {
                let mut corpus = Corpus::new();
                while let Some((id, document)) = map.next_entry::<String, Document>()? {
                    if corpus.contains_key(&id) {
                        return Err(A::Error::custom(format!("duplicate id '{id}'")));
                    }
                    corpus.insert(id, document);
                }
                Ok(UniqueCorpus(corpus))
            }
        }

        deserializer.deserialize_map(CorpusVisitor)
    }
}

/// Reads and writes corpora.
pub struct DocumentStore;

impl DocumentStore {
    /// Load a corpus.
    ///
    /// `.jsonl` files hold one `{"id", "text"}` object per line (`body` is
    /// accepted for `text`); anything else is a JSON object mapping id to
    /// `{"text": ...}`. A repeated id is an error in both formats.
    pub fn load(path: &Path) -> Result<Corpus> {
        let content = fs::read_to_string(path).map_err(|e| AnnotatorError::corpus(path, e))?;

        let is_jsonl = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("jsonl"));

        let corpus = if is_jsonl {
            Self::parse_jsonl(path, &content)?
        } else {
            serde_json::from_str::<UniqueCorpus>(&content)
                .map_err(|e| AnnotatorError::corpus(path, e))?
                .0
        };

        info!(path = %path.display(), documents = corpus.len(), "Loaded corpus");
        Ok(corpus)
    }

    fn parse_jsonl(path: &Path, content: &str) -> Result<Corpus> {
        let mut corpus = Corpus::new();

        for (line_num, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let entry: CorpusLine = serde_json::from_str(line).map_err(|e| {
                AnnotatorError::corpus(path, format!("Line {}: {}", line_num + 1, e))
            })?;

            if corpus.insert(entry.id.clone(), Document::new(entry.text)).is_some() {
                return Err(AnnotatorError::corpus(
                    path,
                    format!("Line {}: duplicate id '{}'", line_num + 1, entry.id),
                ));
            }
        }

        Ok(corpus)
    }

    /// Write a corpus as a JSON object (atomic write).
    pub fn save(corpus: &Corpus, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AnnotatorError::io(format!("creating {}", parent.display()), e))?;
        }

        let temp = path.with_extension("tmp.json");
        write_json_atomic(&temp, path, corpus)
            .map_err(|e| AnnotatorError::io(format!("writing corpus {}", path.display()), e))?;

        debug!(path = %path.display(), documents = corpus.len(), "Corpus saved");
        Ok(())
    }

    /// Documents of `corpus` that have no entry in `annotated`.
    ///
    /// Failed entries count as present: they are not retried on resume.
    pub fn pending_set(corpus: &Corpus, annotated: &AnnotatedSet) -> Corpus {
        corpus
            .iter()
            .filter(|(id, _)| !annotated.contains_key(*id))
            .map(|(id, doc)| (id.clone(), doc.clone()))
            .collect()
    }
}

/// Where a stage stands relative to its checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunState {
    pub stage: String,
    /// Corpus the stage reads
    pub source: PathBuf,
    /// Corpus ids already in the checkpoint
    pub processed: BTreeSet<String>,
    /// Corpus ids still to classify
    pub pending: BTreeSet<String>,
}

impl RunState {
    pub fn derive(stage: &str, source: &Path, corpus: &Corpus, annotated: &AnnotatedSet) -> Self {
        let (processed, pending) = corpus
            .keys()
            .cloned()
            .partition(|id| annotated.contains_key(id));

        Self {
            stage: stage.to_string(),
            source: source.to_owned(),
            processed,
            pending,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }

    /// Get progress percentage.
    pub fn progress_percent(&self) -> f64 {
        let total = self.processed.len() + self.pending.len();
        if total == 0 {
            return 100.0;
        }
        (self.processed.len() as f64 / total as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotatedDocument, Annotation};
    use tempfile::TempDir;

    #[test]
    fn test_load_json_object() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.json");
        fs::write(
            &path,
            r#"{"a": {"text": "first", "score": 3}, "b": {"text": "second"}}"#,
        )
        .unwrap();

        let corpus = DocumentStore::load(&path).unwrap();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus["a"].text, "first");
    }

    #[test]
    fn test_load_jsonl_with_body_alias_and_blank_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.jsonl");
        fs::write(
            &path,
            "{\"id\": \"a\", \"text\": \"first\"}\n\n{\"id\": \"b\", \"body\": \"second\"}\n",
        )
        .unwrap();

        let corpus = DocumentStore::load(&path).unwrap();
        assert_eq!(corpus["b"].text, "second");
    }

    #[test]
    fn test_load_jsonl_duplicate_id_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.jsonl");
        fs::write(
            &path,
            "{\"id\": \"a\", \"text\": \"x\"}\n{\"id\": \"a\", \"text\": \"y\"}\n",
        )
        .unwrap();

        let err = DocumentStore::load(&path).unwrap_err().to_string();
        assert!(err.contains("Line 2"));
        assert!(err.contains("duplicate"));
    }

    #[test]
    fn test_load_json_object_duplicate_id_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.json");
        fs::write(&path, r#"{"a": {"text": "x"}, "a": {"text": "y"}}"#).unwrap();

        let err = DocumentStore::load(&path).unwrap_err().to_string();
        assert!(err.contains("duplicate id 'a'"));
    }

    #[test]
    fn test_load_missing_text_fails() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("comments.json");
        fs::write(&path, r#"{"a": {"body": "no text field"}}"#).unwrap();
        assert!(matches!(
            DocumentStore::load(&path),
            Err(AnnotatorError::CorpusLoad { .. })
        ));
    }

    #[test]
    fn test_load_missing_file_fails() {
        let err = DocumentStore::load(Path::new("/nonexistent/comments.json")).unwrap_err();
        assert!(matches!(err, AnnotatorError::CorpusLoad { .. }));
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/forwarded.json");
        let mut corpus = Corpus::new();
        corpus.insert("x".to_string(), Document::new("text"));

        DocumentStore::save(&corpus, &path).unwrap();
        assert_eq!(DocumentStore::load(&path).unwrap(), corpus);
    }

    #[test]
    fn test_pending_set_skips_annotated_and_failed() {
        let mut corpus = Corpus::new();
        for id in ["a", "b", "c"] {
            corpus.insert(id.to_string(), Document::new(id));
        }
        let mut annotated = AnnotatedSet::new();
        annotated.insert(
            "a".to_string(),
            AnnotatedDocument::annotated(
                Document::new("a"),
                Annotation {
                    label: "hate".to_string(),
                    reasoning: String::new(),
                    target: String::new(),
                    score: None,
                },
            ),
        );
        annotated.insert("b".to_string(), AnnotatedDocument::failed(Document::new("b")));

        let pending = DocumentStore::pending_set(&corpus, &annotated);
        assert_eq!(pending.keys().collect::<Vec<_>>(), vec!["c"]);

        let state = RunState::derive("hate", Path::new("c.json"), &corpus, &annotated);
        assert_eq!(state.processed.len(), 2);
        assert!(!state.is_complete());
        assert!((state.progress_percent() - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_pending_set_of_empty_corpus_is_empty() {
        let pending = DocumentStore::pending_set(&Corpus::new(), &AnnotatedSet::new());
        assert!(pending.is_empty());
    }
}
