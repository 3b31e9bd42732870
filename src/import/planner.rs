// Import planner: classify every scanned source into a plan item. The
// planner only reads; all effects belong to the executor. For a fixed
// snapshot of index state, settings, and descriptor list, the emitted plan
// is identical run to run.

use tracing::debug;

use crate::book::normalize::normalize;
use crate::cancel::CancellationToken;
use crate::device::TemplateRenderer;
use crate::error::Result;
use crate::frontmatter::NoteDocument;
use crate::fs::FilesystemService;
use crate::identity::{IdentityStore, Uid};
use crate::index::LocalIndex;
use crate::paths::VaultPath;
use crate::settings::Settings;
use crate::snapshot::SnapshotStore;

use super::duplicates::{classify_annotations, DuplicateFinder};
use super::{Candidate, MatchType, PlanItem, PlannedSource, SourceDescriptor};

pub struct Planner<'a> {
    pub index: &'a LocalIndex,
    pub identity: &'a IdentityStore,
    pub fs: &'a FilesystemService,
    pub snapshots: &'a SnapshotStore,
    pub renderer: &'a dyn TemplateRenderer,
    pub settings: &'a Settings,
}

impl Planner<'_> {
    pub async fn plan(
        &self,
        cancel: &CancellationToken,
        sources: Vec<SourceDescriptor>,
    ) -> Result<Vec<PlanItem>> {
        let mut items = Vec::with_capacity(sources.len());
        for descriptor in sources {
            cancel.check()?;
            items.push(self.plan_one(cancel, descriptor).await?);
        }
        Ok(items)
    }

    async fn plan_one(
        &self,
        cancel: &CancellationToken,
        descriptor: SourceDescriptor,
    ) -> Result<PlanItem> {
        if let Some(row) = self
            .index
            .get_import_source(cancel, &descriptor.source_path)
            .await?
        {
            let unchanged = row.last_error.is_none()
                && row.last_processed_mtime == descriptor.mtime
                && row.last_processed_size == descriptor.size
                && row.newest_annotation_ts == descriptor.newest_annotation_ts();
            if unchanged {
                return Ok(PlanItem::Skip {
                    source_path: descriptor.source_path,
                    reason: "unchanged since last import".to_string(),
                });
            }
        }

        // A statistics row found through a non-unique MD5 is not a strong
        // identity; ignore it rather than risk mixing two books.
        let statistics = descriptor
            .statistics
            .as_ref()
            .filter(|s| s.md5_unique || s.row.md5.is_none());
        let book = normalize(&descriptor.metadata, statistics);
        let key = book.book_key();
        let uid_hint = descriptor
            .metadata
            .uid_hint
            .as_deref()
            .and_then(Uid::parse);

        let finder = DuplicateFinder {
            index: self.index,
            identity: self.identity,
            fs: self.fs,
            settings: self.settings,
        };
        let paths = finder
            .find_candidates(cancel, &book, uid_hint.as_ref())
            .await?;

        let source = PlannedSource {
            descriptor,
            book,
            key,
        };

        match paths.len() {
            0 => Ok(PlanItem::Create { source }),
            1 => Ok(self.single_candidate_item(source, &paths[0], uid_hint.as_ref())),
            _ => {
                let mut candidates: Vec<Candidate> = paths
                    .iter()
                    .map(|path| self.build_candidate(&source, path))
                    .collect();
                sort_candidates(&mut candidates);
                Ok(PlanItem::ManualDuplicate { source, candidates })
            }
        }
    }

    /// One existing note. A UID confirmation or the auto-merge policy lets
    /// the import proceed without a prompt; divergent device annotations
    /// without a UID confirmation always go to the user. A note whose body
    /// still matches its verified snapshot carries no user edits, so a plain
    /// replace is safe; anything else takes the three-way merge.
    fn single_candidate_item(
        &self,
        source: PlannedSource,
        path: &VaultPath,
        uid_hint: Option<&Uid>,
    ) -> PlanItem {
        let candidate = self.build_candidate(&source, path);
        let uid_confirmed = match (uid_hint, &candidate.uid) {
            (Some(hint), Some(uid)) => hint == uid,
            _ => false,
        };

        if !uid_confirmed {
            if !self.settings.auto_merge_on_addition
                || candidate.match_type == MatchType::Divergent
            {
                return PlanItem::ManualDuplicate {
                    source,
                    candidates: vec![candidate],
                };
            }
        }

        let target = candidate.path.clone();
        if candidate.pristine {
            debug!(path = %target, "single candidate matches its snapshot, replacing");
            PlanItem::Replace { source, target }
        } else {
            debug!(path = %target, "single candidate has local changes, merging");
            PlanItem::Merge { source, target }
        }
    }

    fn build_candidate(&self, source: &PlannedSource, path: &VaultPath) -> Candidate {
        let (uid, existing, pristine) = match self.fs.read_text(path) {
            Ok(content) => match NoteDocument::parse(&content) {
                Ok(doc) => {
                    let uid = doc
                        .frontmatter
                        .get_str(crate::frontmatter::UID_KEY)
                        .and_then(Uid::parse);
                    let pristine = uid
                        .as_ref()
                        .and_then(|u| self.snapshots.read(u).ok())
                        .is_some_and(|snapshot| snapshot == doc.body);
                    (uid, self.renderer.extract_annotations(&doc.body), pristine)
                }
                Err(_) => (None, Vec::new(), false),
            },
            Err(_) => (None, Vec::new(), false),
        };

        let diff = classify_annotations(&existing, &source.descriptor.metadata.annotations);
        let mtime = self
            .fs
            .resolve(path)
            .to_path_buf()
            .metadata()
            .and_then(|m| m.modified())
            .ok()
            .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        Candidate {
            path: path.clone(),
            uid,
            match_type: diff.match_type,
            modified_existing: diff.modified_existing,
            new_annotations: diff.new_annotations,
            in_highlights_folder: path.starts_with(&self.settings.highlights_folder),
            mtime,
            pristine,
        }
    }
}

/// Best candidate first: match type, fewer modified existing highlights,
/// fewer new highlights, inside the highlights folder before outside,
/// newest mtime first, path as the final deterministic tie-break.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.match_type
            .cmp(&b.match_type)
            .then(a.modified_existing.cmp(&b.modified_existing))
            .then(a.new_annotations.cmp(&b.new_annotations))
            .then(b.in_highlights_folder.cmp(&a.in_highlights_folder))
            .then(b.mtime.cmp(&a.mtime))
            .then(a.path.cmp(&b.path))
    });
}
