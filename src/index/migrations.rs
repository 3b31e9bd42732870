// Ordered migration registry. Migrations run on open, one at a time, in
// registry order; a failure aborts the remaining batch and its ID is not
// recorded, so the next run retries from the failure point.

use tracing::{info, warn};

use crate::book::display::from_frontmatter;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::fs::{FilesystemService, ListOptions};
use crate::identity::{IdentityStore, Uid};
use crate::index::{BookRow, LocalIndex};
use crate::frontmatter::NoteDocument;
use crate::paths::VaultPath;
use crate::settings::Settings;
use crate::snapshot::{sha256_hex, SnapshotStore};

pub const BACKFILL_UIDS: &str = "1.3.0-backfill-uids";
pub const RENAME_SNAPSHOTS_TO_UID: &str = "1.3.0-rename-snapshots-to-uid";
pub const RESOLVE_UID_COLLISIONS: &str = "1.3.0-resolve-uid-collisions";
pub const UPGRADE_INDEX_DATABASE: &str = "1.3.0-upgrade-index-database";

/// Registry order is execution order.
pub const REGISTRY: &[&str] = &[
    BACKFILL_UIDS,
    RENAME_SNAPSHOTS_TO_UID,
    RESOLVE_UID_COLLISIONS,
    UPGRADE_INDEX_DATABASE,
];

pub struct MigrationContext<'a> {
    pub fs: &'a FilesystemService,
    pub identity: &'a IdentityStore,
    pub snapshots: &'a SnapshotStore,
    pub index: &'a LocalIndex,
    pub settings: &'a Settings,
    pub cancel: &'a CancellationToken,
}

#[derive(Debug, Clone)]
pub struct MigrationFailure {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct MigrationOutcome {
    pub newly_applied: Vec<String>,
    pub failure: Option<MigrationFailure>,
}

impl MigrationOutcome {
    /// Imports refuse to proceed while a failure is pending.
    pub fn blocks_imports(&self) -> bool {
        self.failure.is_some()
    }
}

/// Run every registered migration not yet in `applied`, in order. Stops at
/// the first failure; already-applied IDs stay applied.
pub async fn run_pending(ctx: &MigrationContext<'_>, applied: &[String]) -> MigrationOutcome {
    let mut outcome = MigrationOutcome::default();
    for &id in REGISTRY {
        if applied.iter().any(|a| a == id) {
            continue;
        }
        info!(migration = id, "running migration");
        match run_one(id, ctx).await {
            Ok(()) => outcome.newly_applied.push(id.to_string()),
            Err(e) => {
                warn!(migration = id, error = %e, "migration failed, aborting batch");
                outcome.failure = Some(MigrationFailure {
                    id: id.to_string(),
                    message: e.to_string(),
                });
                break;
            }
        }
    }
    outcome
}

async fn run_one(id: &str, ctx: &MigrationContext<'_>) -> Result<()> {
    match id {
        BACKFILL_UIDS => backfill_uids(ctx),
        RENAME_SNAPSHOTS_TO_UID => rename_snapshots_to_uid(ctx),
        RESOLVE_UID_COLLISIONS => resolve_uid_collisions(ctx),
        UPGRADE_INDEX_DATABASE => upgrade_index_database(ctx).await,
        other => {
            warn!(migration = other, "unknown migration id, skipping");
            Ok(())
        }
    }
}

/// Every markdown note under the highlights folder gets a UID.
fn backfill_uids(ctx: &MigrationContext<'_>) -> Result<()> {
    let listing = ctx
        .fs
        .list_files(&ctx.settings.highlights_folder, &ListOptions::default())?;
    let mut minted = 0usize;
    for file in &listing.files {
        ctx.cancel.check()?;
        if ctx.identity.try_get_uid(file)?.is_some() {
            continue;
        }
        ctx.identity.ensure_uid(file)?;
        minted += 1;
    }
    info!(minted, total = listing.files.len(), "uid backfill complete");
    Ok(())
}

/// The legacy snapshot layout keyed files by a hash of the vault path. Move
/// each legacy snapshot to its note's UID. Orphans (no matching note) are
/// left in place and reported; deleting them is not this migration's call.
fn rename_snapshots_to_uid(ctx: &MigrationContext<'_>) -> Result<()> {
    let stems = ctx.snapshots.list_stems();
    let legacy: Vec<&String> = stems.iter().filter(|s| Uid::parse(s).is_none()).collect();
    if legacy.is_empty() {
        return Ok(());
    }

    let listing = ctx
        .fs
        .list_files(&ctx.settings.highlights_folder, &ListOptions::default())?;
    let mut migrated = 0usize;
    for file in &listing.files {
        ctx.cancel.check()?;
        let stem = legacy_snapshot_stem(file);
        if !legacy.iter().any(|l| **l == stem) {
            continue;
        }
        let uid = ctx.identity.ensure_uid(file)?;
        ctx.snapshots.migrate_legacy(&stem, &uid)?;
        migrated += 1;
    }

    let orphaned = legacy.len() - migrated;
    if orphaned > 0 {
        warn!(orphaned, "legacy snapshots without a matching note were left in place");
    }
    Ok(())
}

/// Stem used by the legacy path-keyed snapshot layout.
pub fn legacy_snapshot_stem(path: &VaultPath) -> String {
    sha256_hex(path.as_str())
}

fn resolve_uid_collisions(ctx: &MigrationContext<'_>) -> Result<()> {
    let report = ctx
        .identity
        .resolve_collisions(&ctx.settings.highlights_folder)?;
    if report.files_reassigned > 0 {
        info!(
            reassigned = report.files_reassigned,
            groups = report.collisions.len(),
            "uid collisions resolved"
        );
    }
    Ok(())
}

/// Schema upgrade plus backfill. Rows are re-derived from existing note
/// frontmatter; files whose frontmatter cannot be parsed are skipped and
/// reported, since the next import rebuilds them from device data anyway.
async fn upgrade_index_database(ctx: &MigrationContext<'_>) -> Result<()> {
    let listing = ctx
        .fs
        .list_files(&ctx.settings.highlights_folder, &ListOptions::default())?;
    let mut indexed = 0usize;
    let mut skipped = 0usize;
    for file in &listing.files {
        ctx.cancel.check()?;
        let content = match ctx.fs.read_text(file) {
            Ok(c) => c,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let doc = match NoteDocument::parse(&content) {
            Ok(d) => d,
            Err(_) => {
                skipped += 1;
                continue;
            }
        };
        let book = from_frontmatter(&doc.frontmatter);
        if book.title.is_empty() {
            skipped += 1;
            continue;
        }
        let row = BookRow {
            key: book.book_key(),
            id: None,
            title: book.title.clone(),
            authors: book.authors.join(", "),
        };
        ctx.index.upsert_book(ctx.cancel, &row, Some(file)).await?;
        indexed += 1;
    }
    info!(indexed, skipped, "index backfill complete");
    Ok(())
}
