// Import executor: applies plan items with bounded parallelism. Items with
// the same book key serialize behind a keyed lock; failures stay on the item
// they belong to and never abort the batch.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::cancel::CancellationToken;
use crate::device::TemplateRenderer;
use crate::error::{CoreError, Result};
use crate::frontmatter::{NoteDocument, UID_KEY};
use crate::fs::FilesystemService;
use crate::identity::{IdentityStore, Uid};
use crate::index::{BookRow, ImportSourceRow, LocalIndex};
use crate::lock::KeyedLocks;
use crate::merge::{MergeEngine, MergePreparation, SnapshotState};
use crate::paths::slug::{generate_unique_stem, to_file_safe, FileSafeOpts, UniqueStemOpts};
use crate::paths::VaultPath;
use crate::settings::Settings;
use crate::snapshot::SnapshotStore;

use super::{ImportOutcome, ItemOutcome, ItemStatus, PlanItem, PlannedSource};

const WORKER_POOL: usize = 4;
const QUEUE_CAPACITY: usize = 16;

#[derive(Clone)]
pub struct Executor {
    pub fs: Arc<FilesystemService>,
    pub identity: Arc<IdentityStore>,
    pub snapshots: Arc<SnapshotStore>,
    pub index: Arc<LocalIndex>,
    pub locks: Arc<KeyedLocks>,
    pub renderer: Arc<dyn TemplateRenderer>,
    pub settings: Settings,
}

impl Executor {
    fn engine(&self) -> MergeEngine {
        MergeEngine::new(
            self.settings.frontmatter.clone(),
            self.settings.empty_incoming_guard,
        )
    }

    /// Drain a plan through a bounded queue into a worker pool. Cancellation
    /// abandons pending items; completed writes stay persisted.
    pub async fn execute(&self, cancel: &CancellationToken, plan: Vec<PlanItem>) -> ImportOutcome {
        let total = plan.len();
        let (item_tx, item_rx) = mpsc::channel::<PlanItem>(QUEUE_CAPACITY);
        let item_rx = Arc::new(tokio::sync::Mutex::new(item_rx));
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<ItemOutcome>();

        let mut workers = Vec::new();
        for _ in 0..WORKER_POOL.min(total.max(1)) {
            let executor = self.clone();
            let cancel = cancel.clone();
            let item_rx = Arc::clone(&item_rx);
            let out_tx = out_tx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let item = { item_rx.lock().await.recv().await };
                    let Some(item) = item else { break };
                    if cancel.is_cancelled() {
                        break;
                    }
                    let outcome = executor.process_item(&cancel, item).await;
                    if out_tx.send(outcome).is_err() {
                        break;
                    }
                }
            }));
        }
        drop(out_tx);

        let producer_cancel = cancel.clone();
        let producer = tokio::spawn(async move {
            for item in plan {
                if producer_cancel.is_cancelled() {
                    break;
                }
                // Bounded send is the planner-side backpressure.
                if item_tx.send(item).await.is_err() {
                    break;
                }
            }
        });

        let mut outcome = ImportOutcome::default();
        while let Some(item_outcome) = out_rx.recv().await {
            outcome.record(item_outcome);
        }
        let _ = producer.await;
        for worker in workers {
            let _ = worker.await;
        }

        outcome.cancelled = cancel.is_cancelled();
        debug!(
            created = outcome.created,
            merged = outcome.merged,
            replaced = outcome.replaced,
            skipped = outcome.skipped,
            failed = outcome.failed,
            "import batch finished"
        );
        outcome
    }

    async fn process_item(&self, cancel: &CancellationToken, item: PlanItem) -> ItemOutcome {
        let source_path = item.source_path().to_string();
        let lock_key = item.lock_key();
        let mut diagnostics = Vec::new();

        let status = match item {
            PlanItem::Skip { reason, .. } => ItemStatus::Skipped { reason },
            PlanItem::ManualDuplicate { candidates, .. } => ItemStatus::ManualPending {
                candidate_paths: candidates.into_iter().map(|c| c.path).collect(),
            },
            PlanItem::Create { source } => {
                let _guard = self.locks.acquire(&lock_key).await;
                match self.create_note(cancel, &source, &mut diagnostics).await {
                    Ok(status) => status,
                    Err(e) => failed(e),
                }
            }
            PlanItem::Replace { source, target } => {
                let _guard = self.locks.acquire(&lock_key).await;
                match self
                    .update_note(cancel, &source, &target, false, &mut diagnostics)
                    .await
                {
                    Ok(status) => status,
                    Err(e) => failed(e),
                }
            }
            PlanItem::Merge { source, target } => {
                let _guard = self.locks.acquire(&lock_key).await;
                match self
                    .update_note(cancel, &source, &target, true, &mut diagnostics)
                    .await
                {
                    Ok(status) => status,
                    Err(e) => failed(e),
                }
            }
        };

        ItemOutcome {
            source_path,
            status,
            diagnostics,
        }
    }

    async fn create_note(
        &self,
        cancel: &CancellationToken,
        source: &PlannedSource,
        diagnostics: &mut Vec<String>,
    ) -> Result<ItemStatus> {
        cancel.check()?;
        let rendered = self
            .renderer
            .render_body(&source.book, &source.descriptor.metadata.annotations)?;

        let target = self.target_path_for(source);
        let uid = Uid::generate();
        let updater = self.engine().prepare_create(&source.book, &rendered, &uid);
        let doc = updater(&NoteDocument::default());

        cancel.check()?;
        self.fs.write_text_atomic(&target, &doc.compose())?;
        self.fs.invalidate_scans();

        self.post_write(cancel, source, &target, &uid, &doc.body, diagnostics)
            .await;
        Ok(ItemStatus::Created { path: target })
    }

    async fn update_note(
        &self,
        cancel: &CancellationToken,
        source: &PlannedSource,
        target: &VaultPath,
        merge: bool,
        diagnostics: &mut Vec<String>,
    ) -> Result<ItemStatus> {
        cancel.check()?;
        // The note vanished between planning and execution: recreate it.
        if !self.fs.exists(target) {
            diagnostics.push(format!("{} disappeared before execution, recreating", target));
            return self.create_note(cancel, source, diagnostics).await;
        }

        let current_content = self.fs.read_text(target)?;
        let current = NoteDocument::parse(&current_content)?;
        let uid = current
            .frontmatter
            .get_str(UID_KEY)
            .and_then(Uid::parse);

        let rendered = self
            .renderer
            .render_body(&source.book, &source.descriptor.metadata.annotations)?;
        let engine = self.engine();

        let (updater, conflicted) = if merge {
            let snapshot = match &uid {
                Some(uid) => match self.snapshots.read(uid) {
                    Ok(body) => SnapshotState::Trusted(body),
                    Err(e) => {
                        if !e.reads_as_missing() {
                            diagnostics.push(format!("snapshot unavailable: {}", e));
                        }
                        SnapshotState::Untrusted
                    }
                },
                None => SnapshotState::Untrusted,
            };
            let preparation = engine.prepare_merge(
                &current,
                snapshot,
                &source.book,
                &rendered,
                Utc::now().date_naive(),
            );
            if let MergePreparation::Conflicted {
                diagnostics: merge_diagnostics,
                ..
            } = &preparation
            {
                diagnostics.extend(merge_diagnostics.iter().cloned());
            }
            let conflicted = preparation.is_conflicted();
            (preparation.into_updater(), conflicted)
        } else {
            (engine.prepare_replace(&source.book, &rendered), false)
        };

        let mut new_doc = updater(&current);
        // A note that never had an identity gets one on its first rewrite.
        let uid = match uid {
            Some(uid) => uid,
            None => {
                let minted = Uid::generate();
                new_doc
                    .frontmatter
                    .set(UID_KEY, serde_json::Value::String(minted.as_str().to_string()));
                minted
            }
        };

        let new_content = new_doc.compose();
        if new_content == current_content {
            // Nothing to write; still refresh the source row so the next
            // import can skip cheaply.
            self.update_import_source(cancel, source, diagnostics).await;
            return Ok(ItemStatus::Unchanged {
                path: target.clone(),
            });
        }

        cancel.check()?;
        if self.settings.max_backups_per_note > 0 {
            self.fs.write_backup(
                target,
                &current_content,
                self.settings.max_backups_per_note,
                self.settings.backup_retention_days,
            )?;
        }
        self.fs.write_text_atomic(target, &new_content)?;
        self.fs.invalidate_scans();
        self.identity.invalidate(target);

        self.post_write(cancel, source, target, &uid, &new_doc.body, diagnostics)
            .await;

        Ok(if merge {
            ItemStatus::Merged {
                path: target.clone(),
                conflicted,
            }
        } else {
            ItemStatus::Replaced {
                path: target.clone(),
            }
        })
    }

    /// Steps after the atomic rename: snapshot refresh and index updates.
    /// These fail as diagnostics, never as item failures; the note content
    /// on disk is already the source of truth.
    async fn post_write(
        &self,
        cancel: &CancellationToken,
        source: &PlannedSource,
        target: &VaultPath,
        uid: &Uid,
        body: &str,
        diagnostics: &mut Vec<String>,
    ) {
        if let Err(e) = self.snapshots.write(uid, body) {
            warn!(uid = %uid, error = %e, "snapshot refresh failed");
            diagnostics.push(format!("snapshot refresh failed: {}", e));
        }

        let row = BookRow {
            key: source.key.clone(),
            id: source
                .descriptor
                .statistics
                .as_ref()
                .map(|s| s.row.id),
            title: source.book.title.clone(),
            authors: source.book.authors.join(", "),
        };
        if let Err(e) = self.index.upsert_book(cancel, &row, Some(target)).await {
            warn!(key = %source.key, error = %e, "index update failed, queued for next import");
            diagnostics.push(format!("index update failed: {}", e));
        }
        self.update_import_source(cancel, source, diagnostics).await;
    }

    async fn update_import_source(
        &self,
        cancel: &CancellationToken,
        source: &PlannedSource,
        diagnostics: &mut Vec<String>,
    ) {
        let row = ImportSourceRow {
            source_path: source.descriptor.source_path.clone(),
            last_processed_mtime: source.descriptor.mtime,
            last_processed_size: source.descriptor.size,
            newest_annotation_ts: source.descriptor.newest_annotation_ts(),
            last_success_ts: Some(Utc::now().timestamp_millis()),
            last_error: None,
            book_key: Some(source.key.clone()),
            md5: source.book.md5.clone(),
        };
        if let Err(e) = self.index.upsert_import_source(cancel, &row).await {
            diagnostics.push(format!("import source update failed: {}", e));
        }
    }

    /// Stem for a new note: the filename template, made file-safe, made
    /// unique against the live vault.
    fn target_path_for(&self, source: &PlannedSource) -> VaultPath {
        let template = if self.settings.use_custom_file_name_template {
            self.settings.file_name_template.as_str()
        } else {
            "{{authors}} - {{title}}"
        };
        let authors = if source.book.authors.is_empty() {
            "Unknown Author".to_string()
        } else {
            source.book.authors.join(", ")
        };
        let filled = template
            .replace("{{title}}", &source.book.title)
            .replace("{{authors}}", &authors)
            .replace("{{importDate}}", &Utc::now().format("%Y-%m-%d").to_string());

        let desired = to_file_safe(&filled, &FileSafeOpts::default());
        let opts = UniqueStemOpts::new(self.settings.highlights_folder.clone(), "md");
        let unique = generate_unique_stem(&desired, |path| self.fs.exists(path), &opts);
        self.settings
            .highlights_folder
            .join(&format!("{}.md", unique.stem))
    }
}

fn failed(e: CoreError) -> ItemStatus {
    ItemStatus::Failed {
        kind: e.kind().to_string(),
        message: e.to_string(),
    }
}
