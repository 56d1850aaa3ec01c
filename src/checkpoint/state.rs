//! Checkpoint persistence for resumable stages.
//!
//! - A checkpoint holds the config snapshot, the stage prompt and the
//!   annotated set, keyed by document id
//! - Writes go to a temp file which is then renamed over the destination,
//!   so a reader sees either the old or the new checkpoint
//! - The previous checkpoint is copied to `<stem>.backup.json` first

use crate::models::{AnnotatedSet, AnnotatorError, ConfigSnapshot, PromptData, Result};
use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Format of `time_saved`.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// A checkpoint as read back from disk.
#[derive(Debug, Clone, Deserialize)]
pub struct Checkpoint {
    /// Configuration the checkpoint was written with
    #[serde(default)]
    pub config: serde_json::Value,
    /// Local wall-clock time of the write
    #[serde(default)]
    pub time_saved: String,
    /// Prompt definition of the stage
    #[serde(default)]
    pub prompt_data: Option<PromptData>,
    /// Annotated documents
    #[serde(default)]
    pub data: AnnotatedSet,
}

/// Borrowed view written to disk, so saving never clones the annotated set.
#[derive(Serialize)]
struct CheckpointRef<'a> {
    config: &'a ConfigSnapshot,
    time_saved: String,
    prompt_data: &'a PromptData,
    data: &'a AnnotatedSet,
}

/// Loads and saves the checkpoint file of one stage.
#[derive(Debug, Clone)]
pub struct CheckpointManager {
    /// Path to main checkpoint file
    checkpoint_path: PathBuf,
    /// Path to backup file
    backup_path: PathBuf,
    /// Path the next checkpoint is written to before the rename
    temp_path: PathBuf,
}

impl CheckpointManager {
    pub fn new(checkpoint_path: impl Into<PathBuf>) -> Self {
        let checkpoint_path = checkpoint_path.into();
        let stem = checkpoint_path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "checkpoint".to_string());

        Self {
            backup_path: checkpoint_path.with_file_name(format!("{stem}.backup.json")),
            temp_path: checkpoint_path.with_file_name(format!("{stem}.tmp.json")),
            checkpoint_path,
        }
    }

    pub fn path(&self) -> &Path {
        &self.checkpoint_path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Check if a checkpoint exists.
    pub fn exists(&self) -> bool {
        self.checkpoint_path.exists()
    }

    /// Load the checkpoint, or `None` if there is none yet.
    ///
    /// A file that exists but does not parse is an error: resuming from it
    /// silently would re-annotate everything.
    pub fn load(&self) -> Result<Option<Checkpoint>> {
        let content = match fs::read_to_string(&self.checkpoint_path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AnnotatorError::CheckpointRead {
                    path: self.checkpoint_path.clone(),
                    reason: e.to_string(),
                });
            }
        };

        let checkpoint: Checkpoint =
            serde_json::from_str(&content).map_err(|e| AnnotatorError::CheckpointRead {
                path: self.checkpoint_path.clone(),
                reason: e.to_string(),
            })?;

        info!(
            path = %self.checkpoint_path.display(),
            documents = checkpoint.data.len(),
            time_saved = %checkpoint.time_saved,
            "Loaded checkpoint"
        );
        Ok(Some(checkpoint))
    }

    /// Load only the annotated set, empty if there is no checkpoint.
    pub fn load_data(&self) -> Result<AnnotatedSet> {
        Ok(self.load()?.map(|c| c.data).unwrap_or_default())
    }

    /// Save a checkpoint (atomic write).
    pub fn save(
        &self,
        config: &ConfigSnapshot,
        prompt_data: &PromptData,
        data: &AnnotatedSet,
    ) -> Result<()> {
        let checkpoint = CheckpointRef {
            config,
            time_saved: Local::now().format(TIME_FORMAT).to_string(),
            prompt_data,
            data,
        };

        if let Some(parent) = self.checkpoint_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AnnotatorError::checkpoint_write(&self.checkpoint_path, e))?;
        }

        // Backup existing checkpoint
        if self.checkpoint_path.exists() {
            fs::copy(&self.checkpoint_path, &self.backup_path)
                .map_err(|e| AnnotatorError::checkpoint_write(&self.backup_path, e))?;
        }

        write_json_atomic(&self.temp_path, &self.checkpoint_path, &checkpoint)
            .map_err(|e| AnnotatorError::checkpoint_write(&self.checkpoint_path, e))?;

        debug!(
            path = %self.checkpoint_path.display(),
            documents = data.len(),
            "Checkpoint saved"
        );
        Ok(())
    }
}

/// Checkpoint manager bound to the snapshot and prompt of a running stage.
///
/// The worker pool's collector calls [`CheckpointWriter::save`] with the
/// current annotated set; nothing else writes the file.
#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    manager: CheckpointManager,
    config: ConfigSnapshot,
    prompt_data: PromptData,
}

impl CheckpointWriter {
    pub fn new(manager: CheckpointManager, config: ConfigSnapshot, prompt_data: PromptData) -> Self {
        Self {
            manager,
            config,
            prompt_data,
        }
    }

    pub fn save(&self, data: &AnnotatedSet) -> Result<()> {
        self.manager.save(&self.config, &self.prompt_data, data)
    }

    pub fn manager(&self) -> &CheckpointManager {
        &self.manager
    }
}

/// Write pretty JSON to `temp`, sync it, then rename it over `dest`.
pub(crate) fn write_json_atomic<T: Serialize>(
    temp: &Path,
    dest: &Path,
    value: &T,
) -> std::io::Result<()> {
    let file = File::create(temp)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value).map_err(std::io::Error::other)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    drop(writer);

    fs::rename(temp, dest)
}
