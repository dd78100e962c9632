//! Combines batch results into the per-language artifact.
//!
//! `null` inside a batch tree is array padding written by [`tree::insert`]
//! and never overwrites anything.

use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{error, info, warn};

use crate::backup::Backups;
use crate::collector;
use crate::error::PipelineError;
use crate::scheduler::EmittedBatch;
use crate::storage;
use crate::tree;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeReport {
    pub batches: usize,
    pub leaves: usize,
    pub changed: bool,
    pub backup: Option<PathBuf>,
}

/// Merges `incoming` into `acc`: containers of the same kind merge
/// recursively, anything else is overwritten by the incoming value.
pub fn deep_merge(acc: &mut Value, incoming: Value) {
    match (acc, incoming) {
        (_, Value::Null) => {}
        (Value::Object(acc), Value::Object(incoming)) => {
            for (key, value) in incoming {
                if value.is_null() {
                    continue;
                }
                match acc.get_mut(&key) {
                    Some(slot) => deep_merge(slot, value),
                    None => {
                        acc.insert(key, value);
                    }
                }
            }
        }
        (Value::Array(acc), Value::Array(incoming)) => {
            for (index, value) in incoming.into_iter().enumerate() {
                if index < acc.len() {
                    deep_merge(&mut acc[index], value);
                } else {
                    acc.push(value);
                }
            }
        }
        (acc, incoming) => *acc = incoming,
    }
}

/// Folds the batches, lowest number first, into `existing`.
pub fn merge(existing: Value, batches: &[EmittedBatch]) -> Value {
    let mut ordered: Vec<&EmittedBatch> = batches.iter().collect();
    ordered.sort_by_key(|batch| batch.number);
    let mut merged = existing;
    for batch in ordered {
        deep_merge(&mut merged, batch.tree.clone());
    }
    merged
}

/// Reorders `artifact` to follow `source` and fills in the source's numbers,
/// booleans and nulls inside containers the artifact already has. Keys the
/// source does not know are kept after the aligned ones.
pub fn align_to_source(artifact: Value, source: &Value) -> Value {
    match (artifact, source) {
        (Value::Object(mut artifact), Value::Object(source)) => {
            let original_order: Vec<String> = artifact.keys().cloned().collect();
            let mut aligned = Map::new();
            for (key, source_value) in source {
                match artifact.remove(key) {
                    Some(value) => {
                        aligned.insert(key.clone(), align_to_source(value, source_value));
                    }
                    None if is_plain_scalar(source_value) => {
                        aligned.insert(key.clone(), source_value.clone());
                    }
                    None => {}
                }
            }
            for key in original_order {
                if let Some(value) = artifact.remove(&key) {
                    aligned.insert(key, value);
                }
            }
            Value::Object(aligned)
        }
        (Value::Array(artifact), Value::Array(source)) => {
            let mut aligned = Vec::with_capacity(artifact.len());
            for (index, value) in artifact.into_iter().enumerate() {
                match source.get(index) {
                    Some(source_value) => aligned.push(align_to_source(value, source_value)),
                    None => aligned.push(value),
                }
            }
            while let Some(source_value) = source.get(aligned.len()) {
                if !is_plain_scalar(source_value) {
                    break;
                }
                aligned.push(source_value.clone());
            }
            Value::Array(aligned)
        }
        (Value::Null, source) if is_plain_scalar(source) => source.clone(),
        (artifact, _) => artifact,
    }
}

fn is_plain_scalar(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Bool(_) | Value::Number(_))
}

/// Serializes `merged`, parses it back and checks it is unchanged and still
/// holds every batch leaf as a string. Returns the serialized form.
pub fn validate(lang: &str, merged: &Value, batches: &[EmittedBatch]) -> Result<String, PipelineError> {
    let content =
        tree::to_pretty_string(merged).map_err(|err| PipelineError::merge_validation(lang, err))?;
    let reparsed: Value = serde_json::from_str(&content)
        .map_err(|err| PipelineError::merge_validation(lang, err))?;
    if reparsed != *merged {
        return Err(PipelineError::merge_validation(
            lang,
            "re-parsed artifact differs from the merged tree",
        ));
    }
    for batch in batches {
        for entry in collector::collect(&batch.tree) {
            match tree::get(&reparsed, &entry.path) {
                Some(Value::String(_)) => {}
                Some(other) => {
                    return Err(PipelineError::merge_validation(
                        lang,
                        format!(
                            "{} from batch {} became a {}",
                            entry.path,
                            batch.number,
                            tree::kind_name(other)
                        ),
                    ));
                }
                None => {
                    return Err(PipelineError::merge_validation(
                        lang,
                        format!("{} from batch {} is missing", entry.path, batch.number),
                    ));
                }
            }
        }
    }
    Ok(content)
}

/// Merges every batch into the artifact at `target`, aligned to `source`.
///
/// The previous artifact stays untouched unless the merged tree validates;
/// it is copied aside through `backups` before being replaced.
pub fn merge_into_artifact(
    lang: &str,
    target: &Path,
    source: &Value,
    batches: &[EmittedBatch],
    backups: Option<&Backups>,
) -> Result<MergeReport, PipelineError> {
    let existing = tree::load_tree_or_empty(target).map_err(|err| {
        let err = PipelineError::merge_validation(
            lang,
            format!("existing artifact is unusable, left untouched: {:#}", err),
        );
        error!("{}", err);
        err
    })?;
    let merged = align_to_source(merge(existing, batches), source);
    let content = match validate(lang, &merged, batches) {
        Ok(content) => content,
        Err(err) => {
            error!("{}", err);
            return Err(err);
        }
    };
    let leaves = collector::collect(&merged).len();

    let on_disk = fs::read_to_string(target).ok();
    if on_disk.as_deref() == Some(content.as_str()) {
        info!("'{}' is up to date ({} strings)", lang, leaves);
        return Ok(MergeReport {
            batches: batches.len(),
            leaves,
            changed: false,
            backup: None,
        });
    }

    let mut backup = None;
    if target.exists() {
        if let Some(backups) = backups {
            match backups.backup_file(target) {
                Ok(entry) => backup = Some(PathBuf::from(entry.backup)),
                Err(err) => warn!("failed to back up {}: {:#}", target.display(), err),
            }
        }
    }

    storage::write_atomic(target, &content).map_err(|err| PipelineError::ArtifactWrite {
        path: target.display().to_string(),
        reason: format!("{:#}", err),
    })?;
    info!(
        "merged {} batches into {} ({} strings)",
        batches.len(),
        target.display(),
        leaves
    );
    Ok(MergeReport {
        batches: batches.len(),
        leaves,
        changed: true,
        backup,
    })
}
