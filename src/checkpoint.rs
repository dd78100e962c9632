use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::storage;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total_keys: usize,
    pub translated_keys: usize,
    pub failed_keys: usize,
    pub skipped_keys: usize,
}

/// Progress of one target language, persisted after every batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointState {
    pub target_language: String,
    pub source_file: String,
    pub target_file: String,
    pub language_pair: String,
    pub total_batches: usize,
    #[serde(default)]
    pub completed_batches: BTreeSet<u32>,
    #[serde(default)]
    pub failed_batches: BTreeSet<u32>,
    pub current_batch: Option<u32>,
    pub started_at: String,
    pub last_updated_at: String,
    #[serde(default)]
    pub counters: Counters,
}

impl CheckpointState {
    pub fn new(
        target_language: &str,
        source_file: &Path,
        target_file: &Path,
        language_pair: &str,
    ) -> Self {
        let now = now_rfc3339();
        Self {
            target_language: target_language.to_string(),
            source_file: source_file.display().to_string(),
            target_file: target_file.display().to_string(),
            language_pair: language_pair.to_string(),
            total_batches: 0,
            completed_batches: BTreeSet::new(),
            failed_batches: BTreeSet::new(),
            current_batch: None,
            started_at: now.clone(),
            last_updated_at: now,
            counters: Counters::default(),
        }
    }

    pub fn mark_started(&mut self, number: u32) {
        self.current_batch = Some(number);
    }

    /// Only call once the batch file is durably on disk.
    pub fn mark_completed(&mut self, number: u32) {
        self.failed_batches.remove(&number);
        self.completed_batches.insert(number);
        self.current_batch = None;
    }

    pub fn mark_failed(&mut self, number: u32) {
        if !self.completed_batches.contains(&number) {
            self.failed_batches.insert(number);
        }
        self.current_batch = None;
    }

    pub fn is_completed(&self, number: u32) -> bool {
        self.completed_batches.contains(&number)
    }

    pub fn highest_completed(&self) -> u32 {
        self.completed_batches.last().copied().unwrap_or(0)
    }

    fn check(&self, lang: &str) -> Result<(), String> {
        if self.target_language != lang {
            return Err(format!(
                "recorded for '{}', expected '{}'",
                self.target_language, lang
            ));
        }
        if let Some(number) = self.completed_batches.intersection(&self.failed_batches).next() {
            return Err(format!("batch {} is both completed and failed", number));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, lang: &str) -> PathBuf {
        self.dir.join(format!("translation-state-{}.json", lang))
    }

    /// Reads the checkpoint for `lang`. `Ok(None)` when none exists.
    pub fn try_load(&self, lang: &str) -> Result<Option<CheckpointState>, PipelineError> {
        let path = self.file_path(lang);
        if !path.exists() {
            return Ok(None);
        }
        let corrupt = |reason: String| PipelineError::StateCorruption {
            lang: lang.to_string(),
            reason,
        };
        let content = fs::read_to_string(&path).map_err(|err| corrupt(err.to_string()))?;
        let state: CheckpointState =
            serde_json::from_str(&content).map_err(|err| corrupt(err.to_string()))?;
        state.check(lang).map_err(corrupt)?;
        Ok(Some(state))
    }

    /// Like [`try_load`](Self::try_load), but an unusable checkpoint counts as absent.
    pub fn load(&self, lang: &str) -> Option<CheckpointState> {
        match self.try_load(lang) {
            Ok(state) => state,
            Err(err) => {
                warn!("{}; starting fresh", err);
                None
            }
        }
    }

    pub fn save(&self, state: &mut CheckpointState) -> Result<()> {
        state.last_updated_at = now_rfc3339();
        let path = self.file_path(&state.target_language);
        let content = serde_json::to_string_pretty(state)?;
        storage::write_atomic(&path, &content)
            .with_context(|| format!("failed to save checkpoint: {}", path.display()))?;
        debug!(
            "checkpoint saved for '{}': {} completed, {} failed",
            state.target_language,
            state.completed_batches.len(),
            state.failed_batches.len()
        );
        Ok(())
    }

    /// Returns true when a checkpoint file was removed.
    pub fn clear(&self, lang: &str) -> Result<bool> {
        let path = self.file_path(lang);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path)
            .with_context(|| format!("failed to remove checkpoint: {}", path.display()))?;
        Ok(true)
    }
}

fn now_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .unwrap_or_else(|_| OffsetDateTime::now_utc().unix_timestamp().to_string())
}
