// Duplicate discovery: pair an incoming book with the existing notes that
// may already represent it, and classify how far each has drifted.

use tracing::debug;

use crate::book::NormalizedBook;
use crate::cancel::CancellationToken;
use crate::device::Annotation;
use crate::error::Result;
use crate::fs::{FilesystemService, ListOptions};
use crate::identity::{IdentityStore, Uid};
use crate::index::LocalIndex;
use crate::paths::slug::to_match_key;
use crate::paths::VaultPath;
use crate::settings::Settings;

use super::MatchType;

/// Difference between an existing annotation list and the incoming one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnnotationDiff {
    pub match_type: MatchType,
    pub new_annotations: usize,
    pub modified_existing: usize,
}

/// Classify two annotation lists. Annotations are keyed by
/// `(page, pos0, pos1, datetime, text-hash)`; an incoming annotation at a
/// known position with different content counts as a modification.
pub fn classify_annotations(existing: &[Annotation], incoming: &[Annotation]) -> AnnotationDiff {
    let existing_full: Vec<String> = existing.iter().map(full_key).collect();
    let existing_pos: Vec<String> = existing.iter().map(position_key).collect();

    let mut new_annotations = 0usize;
    let mut modified_existing = 0usize;
    for annotation in incoming {
        if existing_full.contains(&full_key(annotation)) {
            continue;
        }
        if existing_pos.contains(&position_key(annotation)) {
            modified_existing += 1;
        } else {
            new_annotations += 1;
        }
    }

    let match_type = if modified_existing > 0 {
        MatchType::Divergent
    } else if new_annotations > 0 {
        MatchType::Updated
    } else {
        MatchType::Exact
    };
    AnnotationDiff {
        match_type,
        new_annotations,
        modified_existing,
    }
}

fn position_key(a: &Annotation) -> String {
    format!(
        "{}|{}|{}",
        a.page,
        a.pos0.as_deref().unwrap_or(""),
        a.pos1.as_deref().unwrap_or("")
    )
}

fn full_key(a: &Annotation) -> String {
    format!(
        "{}|{}|{}",
        position_key(a),
        a.datetime.as_deref().unwrap_or(""),
        crate::snapshot::sha256_hex(&a.text)
    )
}

pub struct DuplicateFinder<'a> {
    pub index: &'a LocalIndex,
    pub identity: &'a IdentityStore,
    pub fs: &'a FilesystemService,
    pub settings: &'a Settings,
}

impl<'a> DuplicateFinder<'a> {
    /// Enumerate candidate notes for a book: index hits, filename-heuristic
    /// hits against the highlights folder, and a UID hit when the device
    /// record carries one. Results are sorted for determinism.
    pub async fn find_candidates(
        &self,
        cancel: &CancellationToken,
        book: &NormalizedBook,
        uid_hint: Option<&Uid>,
    ) -> Result<Vec<VaultPath>> {
        let mut candidates = self
            .index
            .find_paths_by_key(cancel, &book.book_key())
            .await?;

        if self.settings.enable_full_duplicate_check {
            candidates.extend(self.filename_heuristic_hits(book)?);
        }

        if let Some(uid) = uid_hint {
            cancel.check()?;
            if let Some(path) = self
                .identity
                .find_file_by_uid(&self.settings.highlights_folder, uid)?
            {
                candidates.push(path);
            }
        }

        candidates.sort();
        candidates.dedup();
        // Only notes that still exist count.
        candidates.retain(|path| self.fs.exists(path));
        debug!(book = %book.title, count = candidates.len(), "duplicate candidates");
        Ok(candidates)
    }

    /// Filename heuristics: a note stem matches when its match-key equals
    /// the title, the authors, or either concatenation of the two.
    fn filename_heuristic_hits(&self, book: &NormalizedBook) -> Result<Vec<VaultPath>> {
        let title_key = to_match_key(&book.title);
        let authors_key = to_match_key(&book.authors.join(" "));
        let mut wanted = vec![title_key.clone()];
        if !authors_key.is_empty() {
            wanted.push(authors_key.clone());
            wanted.push(format!("{} {}", title_key, authors_key));
            wanted.push(format!("{} {}", authors_key, title_key));
        }

        let listing = self
            .fs
            .list_files(&self.settings.highlights_folder, &ListOptions::default())?;
        Ok(listing
            .files
            .iter()
            .filter(|path| {
                let stem_key = to_match_key(path.file_stem());
                !stem_key.is_empty() && wanted.iter().any(|w| *w == stem_key)
            })
            .cloned()
            .collect())
    }
}
