// Merge engine: pure preparations that turn vault state plus freshly
// rendered device content into the next on-disk note. Without a trustworthy
// baseline, user edits surface as conflict markers; they are never
// overwritten silently.

pub mod diff3;

use chrono::NaiveDate;
use serde_json::Value;

use crate::book::display::{from_frontmatter, to_frontmatter, FIELD_ORDER};
use crate::book::merge::merge_books;
use crate::book::NormalizedBook;
use crate::frontmatter::{
    Frontmatter, NoteDocument, CONFLICTS_KEY, LAST_MERGED_KEY, SHA256_KEY, UID_KEY,
};
use crate::identity::Uid;
use crate::settings::{EmptyIncomingGuard, FrontmatterSettings};

use self::diff3::{merge3_text, Region};

pub const CONFLICT_CURRENT_HEADER: &str = "> [!warning] Unresolved conflict (your version)";
pub const CONFLICT_INCOMING_HEADER: &str = "> [!warning] Unresolved conflict (incoming version)";
pub const CONFLICT_END: &str = "> [!warning] End of conflict";

/// A pure function from the current document to its next form. The executor
/// applies it under the per-book lock.
pub type NoteUpdater = Box<dyn Fn(&NoteDocument) -> NoteDocument + Send + Sync>;

/// Baseline for a three-way merge. Missing, corrupt, and integrity-failed
/// snapshots all collapse to `Untrusted`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SnapshotState {
    Trusted(String),
    Untrusted,
}

pub enum MergePreparation {
    /// Trusted baseline, clean merge.
    Safe {
        updater: NoteUpdater,
        snapshot_used: bool,
    },
    /// Merge shown; user intervention required.
    Conflicted {
        updater: NoteUpdater,
        snapshot_used: bool,
        diagnostics: Vec<String>,
    },
}

impl MergePreparation {
    pub fn updater(&self) -> &NoteUpdater {
        match self {
            MergePreparation::Safe { updater, .. } => updater,
            MergePreparation::Conflicted { updater, .. } => updater,
        }
    }

    pub fn into_updater(self) -> NoteUpdater {
        match self {
            MergePreparation::Safe { updater, .. } => updater,
            MergePreparation::Conflicted { updater, .. } => updater,
        }
    }

    pub fn is_conflicted(&self) -> bool {
        matches!(self, MergePreparation::Conflicted { .. })
    }
}

#[derive(Debug, Clone)]
pub struct MergeEngine {
    policy: FrontmatterSettings,
    guard: EmptyIncomingGuard,
}

impl MergeEngine {
    pub fn new(policy: FrontmatterSettings, guard: EmptyIncomingGuard) -> Self {
        Self { policy, guard }
    }

    /// No vault file exists: frontmatter from the normalized record, body
    /// from the rendered device content, identity freshly minted.
    pub fn prepare_create(
        &self,
        incoming: &NormalizedBook,
        rendered_body: &str,
        uid: &Uid,
    ) -> NoteUpdater {
        let mut frontmatter = to_frontmatter(incoming, &self.policy);
        frontmatter.set(UID_KEY, Value::String(uid.as_str().to_string()));
        let body = rendered_body.to_string();
        Box::new(move |_current| NoteDocument {
            frontmatter: frontmatter.clone(),
            body: body.clone(),
        })
    }

    /// Vault file exists and the body is replaced unconditionally; the
    /// frontmatter merges under field policies and the UID is preserved.
    pub fn prepare_replace(&self, incoming: &NormalizedBook, rendered_body: &str) -> NoteUpdater {
        let incoming = incoming.clone();
        let policy = self.policy.clone();
        let body = rendered_body.to_string();
        Box::new(move |current| {
            let last_merged = current.frontmatter.get(LAST_MERGED_KEY).cloned();
            // Fresh device content carries no unresolved conflicts.
            let frontmatter =
                merged_frontmatter(&current.frontmatter, &incoming, &policy, last_merged, false);
            NoteDocument {
                frontmatter,
                body: body.clone(),
            }
        })
    }

    /// Three-way merge of the current body against the snapshot baseline and
    /// the rendered device content. Deterministic: identical inputs produce
    /// byte-identical output, frontmatter ordering included.
    pub fn prepare_merge(
        &self,
        current: &NoteDocument,
        snapshot: SnapshotState,
        incoming: &NormalizedBook,
        rendered_body: &str,
        today: NaiveDate,
    ) -> MergePreparation {
        let snapshot_used = matches!(snapshot, SnapshotState::Trusted(_));
        let base = match &snapshot {
            SnapshotState::Trusted(body) => body.clone(),
            SnapshotState::Untrusted => String::new(),
        };

        let mut diagnostics = Vec::new();
        let (body, conflict_regions) = if self.empty_incoming_guard_applies(
            &base,
            &current.body,
            rendered_body,
        ) {
            // An empty re-import against a manually expanded note always
            // stops for review.
            diagnostics.push("incoming content is empty; current note kept for review".to_string());
            (
                render_regions(&[forced_conflict(&current.body, rendered_body)]),
                1,
            )
        } else if !snapshot_used {
            if current.body.is_empty() {
                (rendered_body.to_string(), 0)
            } else {
                // Even byte-equal bodies stay wrapped: without a baseline
                // there is no way to tell a clean state from a swapped note.
                diagnostics.push(
                    "no trusted snapshot baseline; both versions kept for review".to_string(),
                );
                (
                    render_regions(&[forced_conflict(&current.body, rendered_body)]),
                    1,
                )
            }
        } else {
            let result = merge3_text(&base, &current.body, rendered_body);
            let conflicts = result.conflict_count();
            if conflicts > 0 {
                diagnostics.push(format!("{} conflict region(s) in body merge", conflicts));
            }
            (render_regions(&result.regions), conflicts)
        };

        if !snapshot_used {
            diagnostics.push("snapshot baseline missing or failed verification".to_string());
        }
        let flag_conflicts = conflict_regions > 0 || !snapshot_used;

        let incoming = incoming.clone();
        let policy = self.policy.clone();
        let updater: NoteUpdater = Box::new(move |current: &NoteDocument| {
            let frontmatter = merged_frontmatter(
                &current.frontmatter,
                &incoming,
                &policy,
                Some(Value::String(today.format("%Y-%m-%d").to_string())),
                flag_conflicts,
            );
            NoteDocument {
                frontmatter,
                body: body.clone(),
            }
        });

        if flag_conflicts {
            MergePreparation::Conflicted {
                updater,
                snapshot_used,
                diagnostics,
            }
        } else {
            MergePreparation::Safe {
                updater,
                snapshot_used,
            }
        }
    }

    /// The guard that protects manually expanded notes from an empty
    /// re-import. Both comparison variants are supported; see settings.
    fn empty_incoming_guard_applies(&self, base: &str, current: &str, incoming: &str) -> bool {
        match self.guard {
            EmptyIncomingGuard::StrictLength => {
                incoming.is_empty() && current.len() > base.len()
            }
            EmptyIncomingGuard::NonWhitespace => {
                incoming.trim().is_empty()
                    && !current.trim().is_empty()
                    && current != base
            }
        }
    }
}

/// Field-policy merge of frontmatter. Emission order is deterministic and
/// stable across repeated merges: known fields in their fixed order, then
/// the reserved keys, then user-owned keys passed through in their original
/// order.
fn merged_frontmatter(
    current: &Frontmatter,
    incoming: &NormalizedBook,
    policy: &FrontmatterSettings,
    last_merged: Option<Value>,
    conflicts: bool,
) -> Frontmatter {
    let base_book = from_frontmatter(current);
    let merged = merge_books(&base_book, incoming);
    let mut fm = to_frontmatter(&merged, policy);

    if let Some(uid) = current.get_str(UID_KEY) {
        fm.set(UID_KEY, Value::String(uid.to_string()));
    }
    if let Some(last_merged) = last_merged {
        fm.set(LAST_MERGED_KEY, last_merged);
    }
    if conflicts {
        fm.set(CONFLICTS_KEY, Value::String("unresolved".to_string()));
    }
    for (key, value) in current.iter() {
        if is_system_key(key) || fm.contains_key(key) {
            continue;
        }
        fm.set(key, value.clone());
    }
    fm
}

fn is_system_key(key: &str) -> bool {
    FIELD_ORDER.contains(&key)
        || matches!(key, UID_KEY | SHA256_KEY | LAST_MERGED_KEY | CONFLICTS_KEY)
}

fn forced_conflict(current: &str, incoming: &str) -> Region {
    Region::Conflict {
        base: Vec::new(),
        current: lines_owned(current),
        incoming: lines_owned(incoming),
    }
}

fn lines_owned(text: &str) -> Vec<String> {
    if text.is_empty() {
        Vec::new()
    } else {
        text.lines().map(|l| l.to_string()).collect()
    }
}

/// Render merge regions back into a body. Conflict regions are wrapped in
/// callout-style markers; the conflicting lines themselves stay verbatim.
fn render_regions(regions: &[Region]) -> String {
    let mut lines: Vec<String> = Vec::new();
    for region in regions {
        match region {
            Region::Stable(stable) => lines.extend(stable.iter().cloned()),
            Region::Conflict {
                current, incoming, ..
            } => {
                lines.push(CONFLICT_CURRENT_HEADER.to_string());
                lines.push(String::new());
                lines.extend(current.iter().cloned());
                lines.push(String::new());
                lines.push(CONFLICT_INCOMING_HEADER.to_string());
                lines.push(String::new());
                lines.extend(incoming.iter().cloned());
                lines.push(String::new());
                lines.push(CONFLICT_END.to_string());
            }
        }
    }
    if lines.is_empty() {
        String::new()
    } else {
        let mut body = lines.join("\n");
        body.push('\n');
        body
    }
}
