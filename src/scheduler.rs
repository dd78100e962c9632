use serde_json::Value;
use std::collections::HashSet;
use std::fmt;

use crate::collector::{self, StringEntry};
use crate::tree::TreePath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub number: u32,
    pub entries: Vec<StringEntry>,
}

/// A batch result already on disk.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedBatch {
    pub number: u32,
    pub tree: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub total: usize,
    pub in_artifact: usize,
    pub in_batches: usize,
    pub remaining: usize,
    pub batches: usize,
}

impl fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "total={} translated={} batched={} remaining={} batches={}",
            self.total, self.in_artifact, self.in_batches, self.remaining, self.batches
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub batches: Vec<Batch>,
    pub summary: PlanSummary,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }

    /// Shifts numbering so the first batch is numbered after `last`, keeping
    /// the numbers consecutive. A no-op when they already are.
    pub fn number_after(&mut self, last: u32) {
        let Some(first) = self.batches.first().map(|batch| batch.number) else {
            return;
        };
        if first > last {
            return;
        }
        for (offset, batch) in self.batches.iter_mut().enumerate() {
            batch.number = last + 1 + offset as u32;
        }
    }
}

/// Splits the entries not yet present in `existing` or in any emitted batch
/// into consecutive batches of at most `batch_size`, in collection order.
///
/// Numbering continues after the highest emitted batch number, so a batch
/// file is never written twice under the same name.
pub fn plan(
    entries: &[StringEntry],
    existing: &Value,
    emitted: &[EmittedBatch],
    batch_size: usize,
) -> Plan {
    let batch_size = batch_size.max(1);
    let in_artifact = collector::paths_of(existing);
    let mut in_batches: HashSet<TreePath> = HashSet::new();
    for batch in emitted {
        in_batches.extend(collector::paths_of(&batch.tree));
    }

    let mut summary = PlanSummary {
        total: entries.len(),
        ..PlanSummary::default()
    };
    let mut remaining = Vec::new();
    for entry in entries {
        if in_artifact.contains(&entry.path) {
            summary.in_artifact += 1;
        } else if in_batches.contains(&entry.path) {
            summary.in_batches += 1;
        } else {
            remaining.push(entry.clone());
        }
    }
    summary.remaining = remaining.len();

    let first = emitted.iter().map(|batch| batch.number).max().unwrap_or(0) + 1;
    let batches: Vec<Batch> = remaining
        .chunks(batch_size)
        .enumerate()
        .map(|(offset, chunk)| Batch {
            number: first + offset as u32,
            entries: chunk.to_vec(),
        })
        .collect();
    summary.batches = batches.len();

    Plan { batches, summary }
}
