//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use annotator::models::{ClassifyError, ConfigOverrides, PromptContext};
use annotator::{Annotation, Classifier, Config, Corpus, Document, DocumentStore, SamplingParams};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

pub const STAGES: [&str; 6] = [
    "hate",
    "dehumanizing",
    "stigmatizing",
    "stereotyping",
    "simplifying",
    "othering",
];

/// Answers from the document text: the first word is the label in the
/// `hate` stage, the second word in every other stage. Texts containing
/// "broken" never get a valid reply.
///
/// Prompt files use the stage name as system prompt, which is how the fake
/// tells stages apart.
pub struct StageAware {
    calls: AtomicUsize,
}

impl StageAware {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Classifier for StageAware {
    async fn classify(
        &self,
        prompt: PromptContext<'_>,
        _params: SamplingParams,
    ) -> Result<Annotation, ClassifyError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;

        if prompt.text.contains("broken") {
            return Err(ClassifyError::InvalidResponse("not json".to_string()));
        }

        let words: Vec<&str> = prompt.text.split_whitespace().collect();
        let label = if prompt.system_prompt == "hate" {
            words.first().copied().unwrap_or("none")
        } else {
            words.get(1).copied().unwrap_or("none")
        };

        Ok(Annotation {
            label: label.to_string(),
            reasoning: format!("{} on '{}'", prompt.system_prompt, prompt.text),
            target: "group".to_string(),
            score: None,
        })
    }
}

/// A data root with a corpus, prompt files and a config pointing at both.
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
}

impl Fixture {
    pub fn new(docs: &[(&str, &str)]) -> Self {
        let corpus: Corpus = docs
            .iter()
            .map(|(id, text)| (id.to_string(), Document::new(*text)))
            .collect();
        Self::with_corpus(&corpus)
    }

    pub fn with_corpus(corpus: &Corpus) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path();

        DocumentStore::save(corpus, &root.join("comments.json")).unwrap();

        std::fs::create_dir_all(root.join("prompts")).unwrap();
        for stage in STAGES {
            let prompt = serde_json::json!({
                "system_prompt": stage,
                "question": format!("Which {stage} category applies?"),
                "demos": [{ "text": "example", "answer": { "label": "none" } }]
            });
            std::fs::write(
                root.join("prompts").join(format!("{stage}.json")),
                prompt.to_string(),
            )
            .unwrap();
        }

        let mut config = Config::from_toml(
            r#"
[workers]
size = 4
save_interval = 3
max_retries = 2
backoff_base_ms = 0
backoff_max_ms = 0

[data]
dataset = "comments.json"

[prompts]
hate = "prompts/hate.json"
dehumanizing = "prompts/dehumanizing.json"
stigmatizing = "prompts/stigmatizing.json"
stereotyping = "prompts/stereotyping.json"
simplifying = "prompts/simplifying.json"
othering = "prompts/othering.json"
"#,
        )
        .unwrap();
        config.prompts.resolve_relative(root);
        config.apply(ConfigOverrides {
            data_root: Some(root.to_path_buf()),
            run_id: Some("test".to_string()),
            ..Default::default()
        });
        config.validate().unwrap();

        Self { dir, config }
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.path().join("results").join("test")
    }
}
