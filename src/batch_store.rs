use anyhow::{Context, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::PipelineError;
use crate::scheduler::EmittedBatch;
use crate::storage;
use crate::tree;

/// Write-once batch result files, `batch_0001_en.json` and so on.
#[derive(Debug, Clone)]
pub struct BatchStore {
    dir: PathBuf,
}

impl BatchStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file_path(&self, lang: &str, number: u32) -> PathBuf {
        self.dir.join(format!("batch_{:04}_{}.json", number, lang))
    }

    /// Batch numbers on disk for `lang`, ascending.
    pub fn list(&self, lang: &str) -> Result<Vec<(u32, PathBuf)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let suffix = format!("_{}.json", lang);
        let mut found = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("failed to list batches in {}", self.dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let number = name
                .strip_prefix("batch_")
                .and_then(|rest| rest.strip_suffix(suffix.as_str()))
                .filter(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|digits| digits.parse::<u32>().ok());
            if let Some(number) = number {
                found.push((number, entry.path()));
            }
        }
        found.sort_by_key(|(number, _)| *number);
        Ok(found)
    }

    /// Every readable batch for `lang`, ascending. Unreadable files are
    /// skipped so their entries get planned again.
    pub fn load_all(&self, lang: &str) -> Result<Vec<EmittedBatch>> {
        let mut batches = Vec::new();
        for (number, path) in self.list(lang)? {
            match tree::load_tree(&path) {
                Ok(tree) => batches.push(EmittedBatch { number, tree }),
                Err(err) => warn!("skipping unreadable batch {}: {:#}", path.display(), err),
            }
        }
        Ok(batches)
    }

    pub fn highest_number(&self, lang: &str) -> Result<u32> {
        Ok(self
            .list(lang)?
            .last()
            .map(|(number, _)| *number)
            .unwrap_or(0))
    }

    /// Persists one finished batch and reads it back. The batch only counts
    /// as durable once the re-read tree equals what was written.
    pub fn write(&self, lang: &str, number: u32, result: &Value) -> Result<PathBuf, PipelineError> {
        let path = self.file_path(lang, number);
        let content =
            tree::to_pretty_string(result).map_err(|err| PipelineError::batch_write(lang, number, err))?;
        storage::write_new(&path, &content)
            .map_err(|err| PipelineError::batch_write(lang, number, format!("{:#}", err)))?;

        match tree::load_tree(&path) {
            Ok(reread) if reread == *result => {
                debug!("batch {} for '{}' written to {}", number, lang, path.display());
                Ok(path)
            }
            Ok(_) => {
                discard(&path);
                Err(PipelineError::batch_write(
                    lang,
                    number,
                    "file content differs from the batch result",
                ))
            }
            Err(err) => {
                discard(&path);
                Err(PipelineError::batch_write(lang, number, format!("{:#}", err)))
            }
        }
    }
}

fn discard(path: &Path) {
    if let Err(err) = fs::remove_file(path) {
        warn!("failed to remove {}: {}", path.display(), err);
    }
}
