// Import pipeline types: source descriptors coming off a device scan, the
// plan the planner emits, and the aggregated outcome the executor reports.

pub mod duplicates;
pub mod executor;
pub mod planner;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::book::{BookKey, NormalizedBook};
use crate::device::{DeviceMetadata, StatisticsLookup};
use crate::identity::Uid;
use crate::paths::VaultPath;

/// One source file from a device scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    pub source_path: String,
    /// Epoch milliseconds.
    pub mtime: i64,
    pub size: u64,
    pub metadata: DeviceMetadata,
    pub statistics: Option<StatisticsLookup>,
}

impl SourceDescriptor {
    /// Timestamp of the newest annotation, used for cheap change detection.
    pub fn newest_annotation_ts(&self) -> Option<i64> {
        self.metadata
            .annotations
            .iter()
            .filter_map(|a| a.datetime.as_deref().and_then(parse_annotation_datetime))
            .max()
    }
}

/// Device annotation timestamps come as `YYYY-MM-DD HH:MM:SS`.
pub fn parse_annotation_datetime(raw: &str) -> Option<i64> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|dt| dt.and_utc().timestamp_millis())
}

/// A source paired with its normalized book and identity key, computed once
/// by the planner.
#[derive(Debug, Clone, PartialEq)]
pub struct PlannedSource {
    pub descriptor: SourceDescriptor,
    pub book: NormalizedBook,
    pub key: BookKey,
}

/// Classification of an existing note against the incoming annotations.
/// The order is the candidate-sort order: an exact copy beats one that only
/// gained annotations, which beats one whose existing annotations changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Updated,
    Divergent,
}

/// One existing note that may correspond to an incoming source.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub path: VaultPath,
    pub uid: Option<Uid>,
    pub match_type: MatchType,
    pub modified_existing: usize,
    pub new_annotations: usize,
    pub in_highlights_folder: bool,
    /// Vault file mtime, epoch milliseconds.
    pub mtime: i64,
    /// Body still matches its verified snapshot: no user edits since the
    /// last import.
    pub pristine: bool,
}

/// The atomic unit the executor processes.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanItem {
    /// Source unchanged since the last successful import.
    Skip {
        source_path: String,
        reason: String,
    },
    /// No existing note corresponds to this source.
    Create { source: PlannedSource },
    /// One existing note, body replaced unconditionally.
    Replace {
        source: PlannedSource,
        target: VaultPath,
    },
    /// One existing note, three-way merged against its snapshot.
    Merge {
        source: PlannedSource,
        target: VaultPath,
    },
    /// More than one plausible note, or policy requires a prompt. Candidates
    /// arrive sorted best-first.
    ManualDuplicate {
        source: PlannedSource,
        candidates: Vec<Candidate>,
    },
}

impl PlanItem {
    pub fn source_path(&self) -> &str {
        match self {
            PlanItem::Skip { source_path, .. } => source_path,
            PlanItem::Create { source } => &source.descriptor.source_path,
            PlanItem::Replace { source, .. } => &source.descriptor.source_path,
            PlanItem::Merge { source, .. } => &source.descriptor.source_path,
            PlanItem::ManualDuplicate { source, .. } => &source.descriptor.source_path,
        }
    }

    /// Lock key for the executor: the book key where one is known.
    pub fn lock_key(&self) -> String {
        match self {
            PlanItem::Skip { source_path, .. } => source_path.clone(),
            PlanItem::Create { source }
            | PlanItem::Replace { source, .. }
            | PlanItem::Merge { source, .. }
            | PlanItem::ManualDuplicate { source, .. } => source.key.as_str().to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ItemStatus {
    Created { path: VaultPath },
    Replaced { path: VaultPath },
    Merged { path: VaultPath, conflicted: bool },
    Unchanged { path: VaultPath },
    Skipped { reason: String },
    ManualPending { candidate_paths: Vec<VaultPath> },
    Failed { kind: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct ItemOutcome {
    pub source_path: String,
    pub status: ItemStatus,
    /// Non-fatal problems hit after the note content was already persisted.
    pub diagnostics: Vec<String>,
}

/// Terminal outcome of one import batch.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportOutcome {
    pub created: usize,
    pub replaced: usize,
    pub merged: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub manual_pending: usize,
    pub failed: usize,
    /// Paths where conflict markers were inserted.
    pub conflict_paths: Vec<VaultPath>,
    pub cancelled: bool,
    pub items: Vec<ItemOutcome>,
}

impl ImportOutcome {
    pub fn record(&mut self, outcome: ItemOutcome) {
        match &outcome.status {
            ItemStatus::Created { .. } => self.created += 1,
            ItemStatus::Replaced { .. } => self.replaced += 1,
            ItemStatus::Merged { path, conflicted } => {
                self.merged += 1;
                if *conflicted {
                    self.conflict_paths.push(path.clone());
                }
            }
            ItemStatus::Unchanged { .. } => self.unchanged += 1,
            ItemStatus::Skipped { .. } => self.skipped += 1,
            ItemStatus::ManualPending { .. } => self.manual_pending += 1,
            ItemStatus::Failed { .. } => self.failed += 1,
        }
        self.items.push(outcome);
    }

    /// Human-readable per-failure reasons.
    pub fn failure_reasons(&self) -> Vec<String> {
        self.items
            .iter()
            .filter_map(|item| match &item.status {
                ItemStatus::Failed { kind, message } => {
                    Some(format!("{}: [{}] {}", item.source_path, kind, message))
                }
                _ => None,
            })
            .collect()
    }
}
