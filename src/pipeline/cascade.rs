//! The stage cascade.
//!
//! Pipeline flow:
//! Corpus → hate → dehumanizing → stigmatizing → stereotyping → simplifying
//! Corpus → othering
//!
//! Each chained stage reads the previous stage's documents whose label equals
//! the forwarding label. The forwarded corpus is written next to the stage
//! checkpoints before the stage runs.

use crate::checkpoint::CheckpointManager;
use crate::client::Classifier;
use crate::models::{
    AnnotatedSet, AnnotatorError, Config, ConfigError, Corpus, Result, StageStats,
};
use crate::pipeline::{StageInput, StageRunner, StageSpec};
use crate::pool::{RetryExecutor, RetryPolicy};
use crate::store::DocumentStore;
use serde::Serialize;
use std::ops::Range;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// Documents of `annotated` whose label matches `label`, stripped back to
/// their original text. Failed documents never match.
pub fn forward_subset(annotated: &AnnotatedSet, label: &str) -> Corpus {
    annotated
        .iter()
        .filter(|(_, doc)| doc.label_matches(label))
        .map(|(id, doc)| (id.clone(), doc.to_document()))
        .collect()
}

/// Which stages a run covers.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum StageSelection {
    #[default]
    All,
    /// The named stage and every stage after it
    From(String),
    /// Only the named stage
    Only(String),
}

/// Summary of a cascade run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeReport {
    pub stages: Vec<StageStats>,
    pub runtime_secs: f64,
}

impl CascadeReport {
    /// Documents classified during this run, over all stages.
    pub fn total_processed(&self) -> usize {
        self.stages.iter().map(|s| s.processed).sum()
    }

    /// Failed documents across all stage checkpoints.
    pub fn total_failed(&self) -> usize {
        self.stages.iter().map(|s| s.failed).sum()
    }
}

/// Checkpoint state of one stage, read without running it.
#[derive(Debug, Clone)]
pub struct StageStatus {
    pub checkpoint: PathBuf,
    pub exists: bool,
    pub stats: StageStats,
}

/// Stage order and on-disk naming of a cascade. Needs no classifier, so
/// checkpoints can be inspected offline.
#[derive(Debug, Clone)]
pub struct StageLayout {
    stages: Vec<StageSpec>,
    dataset: PathBuf,
    results_dir: PathBuf,
    out_stem: String,
}

impl StageLayout {
    /// Layout of the default cascade.
    pub fn new(config: &Config) -> Result<Self> {
        Self::with_stages(config, StagePipeline::default_stages(config))
    }

    /// Layout of custom stages. The config is validated first.
    pub fn with_stages(config: &Config, stages: Vec<StageSpec>) -> Result<Self> {
        config.validate()?;
        Self::check_stages(&stages)?;

        let out_filename = config.out_filename();
        let out_stem = out_filename
            .strip_suffix(".json")
            .unwrap_or(&out_filename)
            .to_string();

        Ok(Self {
            stages,
            dataset: config.dataset_path()?,
            results_dir: config.results_dir()?,
            out_stem,
        })
    }

    fn check_stages(stages: &[StageSpec]) -> Result<()> {
        let invalid = |reason: String| {
            AnnotatorError::Config(ConfigError::Invalid {
                field: "cascade".to_string(),
                reason,
            })
        };

        let first = stages.first().ok_or_else(|| invalid("no stages".to_string()))?;
        if first.input == StageInput::Forwarded {
            return Err(invalid(format!("first stage '{}' has no stage to read from", first.name)));
        }
        for pair in stages.windows(2) {
            if pair[1].input == StageInput::Forwarded && pair[0].forward_label.is_none() {
                return Err(invalid(format!(
                    "stage '{}' reads from '{}', which forwards nothing",
                    pair[1].name, pair[0].name
                )));
            }
        }
        for (i, stage) in stages.iter().enumerate() {
            if stages[..i].iter().any(|s| s.name == stage.name) {
                return Err(invalid(format!("duplicate stage '{}'", stage.name)));
            }
        }
        Ok(())
    }

    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages.iter().position(|s| s.name == name)
    }

    /// Checkpoint file of a stage: `<out stem>_<stage>.json`.
    pub fn checkpoint_path(&self, stage: &StageSpec) -> PathBuf {
        self.results_dir
            .join(format!("{}_{}.json", self.out_stem, stage.name))
    }

    /// Corpus a stage reads.
    pub fn input_path(&self, stage: &StageSpec) -> PathBuf {
        match stage.input {
            StageInput::Original => self.dataset.clone(),
            StageInput::Forwarded => self
                .results_dir
                .join(format!("{}_{}_input.json", self.out_stem, stage.name)),
        }
    }

    fn selected(&self, selection: &StageSelection) -> Result<Range<usize>> {
        let index = |name: &str| {
            self.stage_index(name).ok_or_else(|| {
                AnnotatorError::Config(ConfigError::Invalid {
                    field: "stage".to_string(),
                    reason: format!(
                        "unknown stage '{}', expected one of: {}",
                        name,
                        self.stages
                            .iter()
                            .map(|s| s.name.as_str())
                            .collect::<Vec<_>>()
                            .join(", ")
                    ),
                })
            })
        };

        Ok(match selection {
            StageSelection::All => 0..self.stages.len(),
            StageSelection::From(name) => index(name)?..self.stages.len(),
            StageSelection::Only(name) => {
                let i = index(name)?;
                i..i + 1
            }
        })
    }

    /// Annotated set a forwarded stage reads from when its predecessor did
    /// not run in this invocation.
    fn load_stage_data(&self, stage: &StageSpec) -> Result<AnnotatedSet> {
        let path = self.checkpoint_path(stage);
        match CheckpointManager::new(&path).load()? {
            Some(checkpoint) => Ok(checkpoint.data),
            None => Err(AnnotatorError::CheckpointRead {
                path,
                reason: format!("no checkpoint yet, run stage '{}' first", stage.name),
            }),
        }
    }

    /// Read every stage's checkpoint without classifying anything.
    pub fn status(&self) -> Result<Vec<StageStatus>> {
        self.stages
            .iter()
            .map(|spec| {
                let manager = CheckpointManager::new(self.checkpoint_path(spec));
                let data = manager.load_data()?;

                let input = self.input_path(spec);
                let total_documents = if input.exists() {
                    DocumentStore::load(&input)?.len()
                } else {
                    0
                };

                let mut stats = StageStats {
                    stage: spec.name.clone(),
                    total_documents,
                    already_done: data.len(),
                    ..Default::default()
                };
                stats.tally(&data);

                Ok(StageStatus {
                    checkpoint: manager.path().to_owned(),
                    exists: manager.exists(),
                    stats,
                })
            })
            .collect()
    }
}

/// Ordered stages sharing one classifier and one results directory.
pub struct StagePipeline {
    layout: StageLayout,
    runner: StageRunner,
}

impl StagePipeline {
    /// The default cascade: a hate screen, four chained taxonomy stages and
    /// an independent othering pass over the full corpus.
    pub fn default_stages(config: &Config) -> Vec<StageSpec> {
        let prompts = &config.prompts;
        let forward = config.cascade.forward_label.as_str();

        vec![
            StageSpec::new("hate", &prompts.hate, StageInput::Original)
                .forwarding(config.cascade.screen_label.as_str()),
            StageSpec::new("dehumanizing", &prompts.dehumanizing, StageInput::Forwarded)
                .forwarding(forward),
            StageSpec::new("stigmatizing", &prompts.stigmatizing, StageInput::Forwarded)
                .forwarding(forward),
            StageSpec::new("stereotyping", &prompts.stereotyping, StageInput::Forwarded)
                .forwarding(forward),
            StageSpec::new("simplifying", &prompts.simplifying, StageInput::Forwarded),
            StageSpec::new("othering", &prompts.othering, StageInput::Original),
        ]
    }

    /// Create the default cascade.
    pub fn new(config: Config, classifier: Arc<dyn Classifier>) -> Result<Self> {
        let stages = Self::default_stages(&config);
        Self::with_stages(config, classifier, stages)
    }

    /// Create a cascade over custom stages.
    pub fn with_stages(
        config: Config,
        classifier: Arc<dyn Classifier>,
        stages: Vec<StageSpec>,
    ) -> Result<Self> {
        let layout = StageLayout::with_stages(&config, stages)?;

        let policy = RetryPolicy::from_config(&config.workers, &config.service);
        let executor = Arc::new(RetryExecutor::new(classifier, policy));
        let runner = StageRunner::new(executor, Arc::new(config));

        Ok(Self { layout, runner })
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.runner = self.runner.with_progress(show);
        self
    }

    pub fn layout(&self) -> &StageLayout {
        &self.layout
    }

    pub fn stages(&self) -> &[StageSpec] {
        self.layout.stages()
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.layout.stage_index(name)
    }

    pub fn checkpoint_path(&self, stage: &StageSpec) -> PathBuf {
        self.layout.checkpoint_path(stage)
    }

    pub fn status(&self) -> Result<Vec<StageStatus>> {
        self.layout.status()
    }

    /// Run the selected stages in order.
    pub async fn run(&self, selection: &StageSelection) -> Result<CascadeReport> {
        let start = Instant::now();
        let layout = &self.layout;
        let range = layout.selected(selection)?;
        let mut report = CascadeReport::default();

        info!(
            stages = range.len(),
            first = %layout.stages[range.start].name,
            results_dir = %layout.results_dir.display(),
            "Starting cascade"
        );

        // Annotated set of the stage that ran just before, if any.
        let mut previous: Option<AnnotatedSet> = None;

        for index in range {
            let spec = &layout.stages[index];

            let input = match spec.input {
                StageInput::Original => layout.input_path(spec),
                StageInput::Forwarded => {
                    let source = &layout.stages[index - 1];
                    let label = source.forward_label.as_deref().ok_or_else(|| {
                        AnnotatorError::Internal(format!("stage '{}' forwards nothing", source.name))
                    })?;

                    let source_data = match previous.take() {
                        Some(data) => data,
                        None => layout.load_stage_data(source)?,
                    };
                    let subset = forward_subset(&source_data, label);

                    if let Some(last) = report.stages.last_mut().filter(|s| s.stage == source.name) {
                        last.forwarded = Some(subset.len());
                    }
                    info!(
                        from = %source.name,
                        to = %spec.name,
                        label = %label,
                        forwarded = subset.len(),
                        "Forwarding documents"
                    );

                    let path = layout.input_path(spec);
                    DocumentStore::save(&subset, &path)?;
                    path
                }
            };

            let (stats, annotated) = self
                .runner
                .run(spec, &input, &layout.checkpoint_path(spec))
                .await?;
            report.stages.push(stats);
            previous = Some(annotated);
        }

        report.runtime_secs = start.elapsed().as_secs_f64();
        info!(
            stages = report.stages.len(),
            processed = report.total_processed(),
            failed = report.total_failed(),
            runtime_secs = format!("{:.1}", report.runtime_secs),
            "Cascade complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnnotatedDocument, Annotation, Document};

    fn labelled(text: &str, label: Option<&str>) -> AnnotatedDocument {
        let doc = Document::new(text);
        match label {
            Some(l) => AnnotatedDocument::annotated(
                doc,
                Annotation {
                    label: l.to_string(),
                    reasoning: "r".to_string(),
                    target: "t".to_string(),
                    score: None,
                },
            ),
            None => AnnotatedDocument::failed(doc),
        }
    }

    #[test]
    fn test_forward_subset_matches_label_case_insensitively() {
        let mut set = AnnotatedSet::new();
        set.insert("1".to_string(), labelled("first", Some("Other")));
        set.insert("2".to_string(), labelled("second", Some("dehumanizing")));
        set.insert("3".to_string(), labelled("third", None));
        set.insert("4".to_string(), labelled("fourth", Some("OTHER ")));

        let subset = forward_subset(&set, "other");
        assert_eq!(subset.keys().collect::<Vec<_>>(), vec!["1", "4"]);
        assert_eq!(subset["1"], Document::new("first"));
    }

    #[test]
    fn test_forward_subset_of_nothing_is_empty() {
        assert!(forward_subset(&AnnotatedSet::new(), "hate").is_empty());
    }

    #[test]
    fn test_check_stages_rejects_forwarded_first_stage() {
        let stages = vec![StageSpec::new("a", "a.json", StageInput::Forwarded)];
        assert!(StageLayout::check_stages(&stages).is_err());
    }

    #[test]
    fn test_check_stages_rejects_chain_without_label() {
        let stages = vec![
            StageSpec::new("a", "a.json", StageInput::Original),
            StageSpec::new("b", "b.json", StageInput::Forwarded),
        ];
        assert!(StageLayout::check_stages(&stages).is_err());
    }

    #[test]
    fn test_check_stages_rejects_duplicate_names() {
        let stages = vec![
            StageSpec::new("a", "a.json", StageInput::Original).forwarding("x"),
            StageSpec::new("a", "b.json", StageInput::Forwarded),
        ];
        assert!(StageLayout::check_stages(&stages).is_err());
    }

    #[test]
    fn test_default_cascade_shape() {
        let config = Config::from_toml(
            r#"
[data]
dataset = "c.json"

[prompts]
hate = "h.json"
dehumanizing = "d.json"
stigmatizing = "s.json"
stereotyping = "t.json"
simplifying = "p.json"
othering = "o.json"
"#,
        )
        .unwrap();
        let stages = StagePipeline::default_stages(&config);

        assert!(StageLayout::check_stages(&stages).is_ok());
        let names: Vec<_> = stages.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            ["hate", "dehumanizing", "stigmatizing", "stereotyping", "simplifying", "othering"]
        );
        assert_eq!(stages[0].forward_label.as_deref(), Some("hate"));
        assert_eq!(stages[1].forward_label.as_deref(), Some("other"));
        assert_eq!(stages[4].forward_label, None);
        assert_eq!(stages[5].input, StageInput::Original);
    }
}
