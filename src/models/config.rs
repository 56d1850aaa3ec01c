//! Configuration models for the annotator.
//!
//! Built once at startup from the TOML file, CLI overrides and environment,
//! validated, then passed explicitly through the pipeline.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::SamplingParams;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Completion service settings
    #[serde(default)]
    pub service: ServiceConfig,

    /// Base sampling options
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Worker pool, checkpoint cadence and retry policy
    #[serde(default)]
    pub workers: WorkerConfig,

    /// Multi-sample majority voting
    #[serde(default)]
    pub self_consistency: SelfConsistencyConfig,

    /// Input corpus and output locations
    pub data: DataConfig,

    /// One prompt file per stage
    pub prompts: PromptFiles,

    /// Forwarding labels between stages
    #[serde(default)]
    pub cascade: CascadeConfig,
}

/// Completion service (Ollama) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Host, with or without scheme
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Model id as loaded by the service
    #[serde(default = "default_model")]
    pub model: String,

    /// Per-call timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_host() -> String {
    "http://localhost".to_string()
}

fn default_port() -> u16 {
    11434
}

fn default_model() -> String {
    "llama3.1:8b".to_string()
}

fn default_timeout() -> u64 {
    120
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            model: default_model(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ServiceConfig {
    /// Base URL of the service, e.g. `http://localhost:11434`.
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}:{}", self.port)
        } else {
            format!("http://{host}:{}", self.port)
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Base sampling options; self-consistency derives per-sample values from these.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamplingConfig {
    #[serde(default = "default_seed")]
    pub seed: i64,

    #[serde(default)]
    pub temperature: f64,
}

fn default_seed() -> i64 {
    42
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            temperature: 0.0,
        }
    }
}

impl SamplingConfig {
    pub fn params(&self) -> SamplingParams {
        SamplingParams::new(self.seed, self.temperature)
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    #[serde(default = "default_workers")]
    pub size: usize,

    /// Completions between checkpoint writes
    #[serde(default = "default_save_interval")]
    pub save_interval: usize,

    /// Attempts per document (or per sample) before it is recorded as failed
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// First backoff delay in milliseconds (0 disables backoff)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_ms: u64,

    /// Upper bound on a single backoff delay in milliseconds
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

fn default_workers() -> usize {
    4
}

fn default_save_interval() -> usize {
    50
}

fn default_max_retries() -> u32 {
    5
}

fn default_backoff_base() -> u64 {
    250
}

fn default_backoff_max() -> u64 {
    10_000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            size: default_workers(),
            save_interval: default_save_interval(),
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

/// Self-consistency (majority voting) configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfConsistencyConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Samples per document
    #[serde(default = "default_samples")]
    pub samples: usize,
}

fn default_samples() -> usize {
    5
}

impl Default for SelfConsistencyConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            samples: default_samples(),
        }
    }
}

impl SelfConsistencyConfig {
    /// Sample count when enabled.
    pub fn samples(&self) -> Option<usize> {
        self.enabled.then_some(self.samples)
    }
}

/// Input and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataConfig {
    /// Corpus file, relative to the data root
    pub dataset: PathBuf,

    /// Base checkpoint file name (default: `<dataset stem>_processed.json`)
    #[serde(default)]
    pub out_filename: Option<String>,

    /// Data root (usually from `DATA_PATH`)
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Run identifier namespacing the results directory (usually from `RUN_ID`)
    #[serde(default = "default_run_id")]
    pub run_id: String,
}

fn default_run_id() -> String {
    "0".to_string()
}

/// Prompt definition files, one per cascade stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptFiles {
    pub hate: PathBuf,
    pub dehumanizing: PathBuf,
    pub stigmatizing: PathBuf,
    pub stereotyping: PathBuf,
    pub simplifying: PathBuf,
    pub othering: PathBuf,
}

impl PromptFiles {
    /// Resolve relative prompt paths against `base` (the config file's directory).
    pub fn resolve_relative(&mut self, base: &Path) {
        for path in [
            &mut self.hate,
            &mut self.dehumanizing,
            &mut self.stigmatizing,
            &mut self.stereotyping,
            &mut self.simplifying,
            &mut self.othering,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }
}

/// Labels that move documents from one stage to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CascadeConfig {
    /// Stage 1 label forwarded into the taxonomy stages
    #[serde(default = "default_screen_label")]
    pub screen_label: String,

    /// Taxonomy label forwarded to the next taxonomy stage
    #[serde(default = "default_forward_label")]
    pub forward_label: String,
}

fn default_screen_label() -> String {
    "hate".to_string()
}

fn default_forward_label() -> String {
    "other".to_string()
}

impl Default for CascadeConfig {
    fn default() -> Self {
        Self {
            screen_label: default_screen_label(),
            forward_label: default_forward_label(),
        }
    }
}

/// Values supplied on the command line or through the environment.
///
/// Every `Some` replaces the corresponding file value.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub dataset: Option<PathBuf>,
    pub out_filename: Option<String>,
    pub model: Option<String>,
    pub seed: Option<i64>,
    pub temperature: Option<f64>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub workers: Option<usize>,
    pub save_interval: Option<usize>,
    pub max_retries: Option<u32>,
    pub samples: Option<usize>,
    pub data_root: Option<PathBuf>,
    pub run_id: Option<String>,
}

/// Flat view of the configuration stored in every checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub stage: String,
    pub dataset: PathBuf,
    pub out_filename: String,
    pub prompt_file: PathBuf,
    pub model: String,
    pub seed: i64,
    pub temperature: f64,
    pub host: String,
    pub port: u16,
    pub workers: usize,
    pub save_interval: usize,
    pub max_retries: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub self_consistency_samples: Option<usize>,
    pub run_id: String,
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_owned(),
            source: e,
        })?;

        Self::from_toml(&content).map_err(|e| ConfigError::Parse {
            path: path.to_owned(),
            source: e,
        })
    }

    /// Parse configuration from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Apply command-line and environment overrides.
    pub fn apply(&mut self, overrides: ConfigOverrides) {
        if let Some(v) = overrides.dataset {
            self.data.dataset = v;
        }
        if let Some(v) = overrides.out_filename {
            self.data.out_filename = Some(v);
        }
        if let Some(v) = overrides.data_root {
            self.data.root = Some(v);
        }
        if let Some(v) = overrides.run_id {
            self.data.run_id = v;
        }
        if let Some(v) = overrides.model {
            self.service.model = v;
        }
        if let Some(v) = overrides.host {
            self.service.host = v;
        }
        if let Some(v) = overrides.port {
            self.service.port = v;
        }
        if let Some(v) = overrides.seed {
            self.sampling.seed = v;
        }
        if let Some(v) = overrides.temperature {
            self.sampling.temperature = v;
        }
        if let Some(v) = overrides.workers {
            self.workers.size = v;
        }
        if let Some(v) = overrides.save_interval {
            self.workers.save_interval = v;
        }
        if let Some(v) = overrides.max_retries {
            self.workers.max_retries = v;
        }
        if let Some(v) = overrides.samples {
            self.self_consistency.enabled = true;
            self.self_consistency.samples = v;
        }
    }

    /// Check the values the pipeline relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |field: &str, reason: &str| -> Result<(), ConfigError> {
            Err(ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.to_string(),
            })
        };

        if self.workers.size == 0 {
            return invalid("workers.size", "must be at least 1");
        }
        if self.workers.save_interval == 0 {
            return invalid("workers.save_interval", "must be at least 1");
        }
        if self.workers.max_retries == 0 {
            return invalid("workers.max_retries", "must be at least 1");
        }
        if self.workers.backoff_max_ms < self.workers.backoff_base_ms {
            return invalid("workers.backoff_max_ms", "must not be below backoff_base_ms");
        }
        if !self.sampling.temperature.is_finite() || self.sampling.temperature < 0.0 {
            return invalid("sampling.temperature", "must be a non-negative number");
        }
        if self.self_consistency.enabled && self.self_consistency.samples == 0 {
            return invalid("self_consistency.samples", "must be at least 1 when enabled");
        }
        if self.service.model.trim().is_empty() {
            return invalid("service.model", "must not be empty");
        }
        if self.data.dataset.as_os_str().is_empty() {
            return invalid("data.dataset", "must not be empty");
        }
        if self.data.run_id.trim().is_empty() {
            return invalid("data.run_id", "must not be empty");
        }
        if self.cascade.screen_label.trim().is_empty() || self.cascade.forward_label.trim().is_empty()
        {
            return invalid("cascade", "forwarding labels must not be empty");
        }
        Ok(())
    }

    /// Data root directory.
    pub fn data_root(&self) -> Result<&Path, ConfigError> {
        self.data.root.as_deref().ok_or(ConfigError::MissingDataRoot)
    }

    /// Path of the original corpus.
    pub fn dataset_path(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join(&self.data.dataset))
    }

    /// Directory holding checkpoints and forwarded corpora for this run.
    pub fn results_dir(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.data_root()?.join("results").join(&self.data.run_id))
    }

    /// Base checkpoint file name.
    pub fn out_filename(&self) -> String {
        self.data.out_filename.clone().unwrap_or_else(|| {
            let stem = self
                .data
                .dataset
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| "dataset".to_string());
            format!("{stem}_processed.json")
        })
    }

    /// Flat configuration snapshot for a stage checkpoint.
    pub fn snapshot(&self, stage: &str, prompt_file: &Path) -> ConfigSnapshot {
        ConfigSnapshot {
            stage: stage.to_string(),
            dataset: self.data.dataset.clone(),
            out_filename: self.out_filename(),
            prompt_file: prompt_file.to_owned(),
            model: self.service.model.clone(),
            seed: self.sampling.seed,
            temperature: self.sampling.temperature,
            host: self.service.host.clone(),
            port: self.service.port,
            workers: self.workers.size,
            save_interval: self.workers.save_interval,
            max_retries: self.workers.max_retries,
            self_consistency_samples: self.self_consistency.samples(),
            run_id: self.data.run_id.clone(),
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Data root not set: pass --data-path or set DATA_PATH")]
    MissingDataRoot,
}
