//! Prompt definitions and per-call sampling parameters.

use super::{AnnotatorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Stage prompt definition as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptData {
    pub system_prompt: String,
    pub question: String,
    /// Few-shot examples prepended to every document prompt
    #[serde(default)]
    pub demos: Vec<Demo>,
}

/// One few-shot example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Demo {
    pub text: String,
    /// Expected answer; prompt files use both plain strings and objects
    pub answer: serde_json::Value,
}

impl Demo {
    fn answer_text(&self) -> String {
        match &self.answer {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl PromptData {
    /// Load a prompt definition from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| AnnotatorError::PromptLoad {
            path: path.to_owned(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&content).map_err(|e| AnnotatorError::PromptLoad {
            path: path.to_owned(),
            reason: e.to_string(),
        })
    }

    /// Few-shot head prompt built from the demos.
    ///
    /// Each demo becomes a `user:` turn (question + text) followed by an
    /// `assistant:` turn with the answer; turns are joined by blank lines.
    pub fn head_prompt(&self) -> String {
        self.demos
            .iter()
            .map(|demo| {
                format!(
                    "user: {}\n{}\nassistant: {}",
                    self.question,
                    demo.text,
                    demo.answer_text()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// Prompt parts shared by every document of a stage.
#[derive(Debug, Clone)]
pub struct StagePrompt {
    pub system_prompt: String,
    pub head_prompt: String,
    pub question: String,
}

impl From<&PromptData> for StagePrompt {
    fn from(data: &PromptData) -> Self {
        Self {
            system_prompt: data.system_prompt.clone(),
            head_prompt: data.head_prompt(),
            question: data.question.clone(),
        }
    }
}

impl StagePrompt {
    /// Borrow the stage parts together with one document's text.
    pub fn context<'a>(&'a self, text: &'a str) -> PromptContext<'a> {
        PromptContext {
            system_prompt: &self.system_prompt,
            head_prompt: &self.head_prompt,
            question: &self.question,
            text,
        }
    }
}

/// Everything the classifier needs to build one request.
#[derive(Debug, Clone, Copy)]
pub struct PromptContext<'a> {
    pub system_prompt: &'a str,
    pub head_prompt: &'a str,
    pub question: &'a str,
    pub text: &'a str,
}

impl PromptContext<'_> {
    /// User message: few-shot head, blank line, then question and document.
    pub fn user_message(&self) -> String {
        let doc_prompt = format!("{}\n{}", self.question, self.text);
        if self.head_prompt.is_empty() {
            doc_prompt
        } else {
            format!("{}\n\n{}", self.head_prompt, doc_prompt)
        }
    }
}

/// Sampling options sent with a single classification call.
///
/// Passed by value on every call and never stored on a shared client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub seed: i64,
    pub temperature: f64,
}

/// Temperature added per self-consistency sample.
pub const TEMPERATURE_STEP: f64 = 0.05;

impl SamplingParams {
    pub fn new(seed: i64, temperature: f64) -> Self {
        Self { seed, temperature }
    }

    /// Parameters for self-consistency sample `index`.
    ///
    /// Depends only on the base values and the index, never on the order in
    /// which samples execute.
    pub fn for_sample(&self, index: usize) -> Self {
        Self {
            seed: self.seed.wrapping_add(index as i64),
            temperature: self.temperature + TEMPERATURE_STEP * index as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_data(demos: Vec<Demo>) -> PromptData {
        PromptData {
            system_prompt: "You are an annotator.".to_string(),
            question: "Is this hateful?".to_string(),
            demos,
        }
    }

    #[test]
    fn test_head_prompt_formats_demos() {
        let data = prompt_data(vec![
            Demo {
                text: "first".to_string(),
                answer: serde_json::json!("yes"),
            },
            Demo {
                text: "second".to_string(),
                answer: serde_json::json!({"label": "no"}),
            },
        ]);

        assert_eq!(
            data.head_prompt(),
            "user: Is this hateful?\nfirst\nassistant: yes\n\n\
             user: Is this hateful?\nsecond\nassistant: {\"label\":\"no\"}"
        );
    }

    #[test]
    fn test_user_message_without_demos() {
        let stage = StagePrompt::from(&prompt_data(vec![]));
        let ctx = stage.context("some comment");
        assert_eq!(ctx.user_message(), "Is this hateful?\nsome comment");
    }

    #[test]
    fn test_user_message_with_head_prompt() {
        let stage = StagePrompt::from(&prompt_data(vec![Demo {
            text: "d".to_string(),
            answer: serde_json::json!("a"),
        }]));
        let msg = stage.context("doc").user_message();
        assert!(msg.starts_with("user: Is this hateful?\nd\nassistant: a\n\n"));
        assert!(msg.ends_with("Is this hateful?\ndoc"));
    }

    #[test]
    fn test_prompt_file_without_demos() {
        let data: PromptData =
            serde_json::from_str(r#"{"system_prompt":"s","question":"q"}"#).unwrap();
        assert!(data.demos.is_empty());
        assert_eq!(data.head_prompt(), "");
    }

    #[test]
    fn test_sample_params_are_derived_from_index() {
        let base = SamplingParams::new(42, 0.2);
        assert_eq!(base.for_sample(0), base);

        let third = base.for_sample(3);
        assert_eq!(third.seed, 45);
        assert!((third.temperature - 0.35).abs() < 1e-9);

        // Same index, same parameters, regardless of what was derived before.
        assert_eq!(base.for_sample(3), third);
    }
}
