// kohl: importer core for reading-device annotation exports. Materializes
// per-book device exports as Markdown notes in a vault and reconciles device
// state with user edits on every subsequent import.

pub mod book;
pub mod cancel;
pub mod device;
pub mod error;
pub mod frontmatter;
pub mod fs;
pub mod identity;
pub mod import;
pub mod index;
pub mod lock;
pub mod merge;
pub mod paths;
pub mod plugin_data;
pub mod render;
pub mod settings;
pub mod snapshot;

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

pub use crate::book::{BookKey, NormalizedBook, ReadingStatus};
pub use crate::cancel::CancellationToken;
pub use crate::device::{
    Annotation, BookStatistics, DeviceMetadata, DocProps, ReadingSession, StatisticsLookup,
    StatisticsProvider, TemplateRenderer,
};
pub use crate::error::{CoreError, Result, SnapshotError};
pub use crate::identity::{IdentityStore, Uid};
pub use crate::import::{ImportOutcome, PlanItem, SourceDescriptor};
pub use crate::paths::{SystemPath, VaultPath};
pub use crate::settings::Settings;

use crate::fs::FilesystemService;
use crate::import::executor::Executor;
use crate::import::planner::Planner;
use crate::index::migrations::{self, MigrationContext, MigrationOutcome};
use crate::index::LocalIndex;
use crate::lock::KeyedLocks;
use crate::plugin_data::PluginDataStore;
use crate::snapshot::SnapshotStore;

const INDEX_FILE: &str = "index.sqlite";

/// Statically constructed composition root: one struct owning every service,
/// handed to the planner and executor by reference.
///
/// Field order is teardown order, the reverse of construction.
pub struct CoreServices {
    locks: Arc<KeyedLocks>,
    snapshots: Arc<SnapshotStore>,
    identity: Arc<IdentityStore>,
    index: Arc<LocalIndex>,
    plugin_data: Arc<PluginDataStore>,
    fs: Arc<FilesystemService>,
    settings_tx: watch::Sender<Settings>,
    migrations_blocked: bool,
}

impl CoreServices {
    /// Construct every service and run pending migrations. Construction
    /// order: plugin data (settings) first, filesystem probe, index, then
    /// the stores; migrations run last, against the complete set.
    pub async fn bootstrap(
        vault_root: SystemPath,
        plugin_data_dir: SystemPath,
        cancel: &CancellationToken,
    ) -> Result<(Self, MigrationOutcome)> {
        let fs = Arc::new(FilesystemService::new(vault_root, plugin_data_dir)?);
        let plugin_data = Arc::new(PluginDataStore::new(Arc::clone(&fs)));
        let mut data = plugin_data.load()?;

        let index = Arc::new(LocalIndex::open(
            &fs.plugin_data_path(INDEX_FILE).to_path_buf(),
        )?);
        index.validate(cancel).await?;

        let identity = Arc::new(IdentityStore::new(Arc::clone(&fs)));
        let snapshots = Arc::new(SnapshotStore::new(Arc::clone(&fs)));

        let outcome = migrations::run_pending(
            &MigrationContext {
                fs: &fs,
                identity: &identity,
                snapshots: &snapshots,
                index: &index,
                settings: &data.settings,
                cancel,
            },
            &data.applied_migrations,
        )
        .await;
        if !outcome.newly_applied.is_empty() {
            data.record_migrations(outcome.newly_applied.clone());
            plugin_data.save(&data).await?;
        }
        if let Some(failure) = &outcome.failure {
            warn!(
                migration = %failure.id,
                error = %failure.message,
                "migration failed; imports are blocked until resolved"
            );
        } else {
            info!(applied = outcome.newly_applied.len(), "core services ready");
        }

        let (settings_tx, _) = watch::channel(data.settings.clone());
        let services = Self {
            locks: Arc::new(KeyedLocks::new()),
            snapshots,
            identity,
            index,
            plugin_data,
            fs,
            settings_tx,
            migrations_blocked: outcome.blocks_imports(),
        };
        Ok((services, outcome))
    }

    pub fn settings(&self) -> Settings {
        self.settings_tx.borrow().clone()
    }

    /// Services subscribe at construction time and observe later changes.
    pub fn subscribe_settings(&self) -> watch::Receiver<Settings> {
        self.settings_tx.subscribe()
    }

    /// Persist new settings and broadcast them to subscribers.
    pub async fn update_settings(&self, settings: Settings) -> Result<()> {
        let mut data = self.plugin_data.load()?;
        data.settings = settings.clone();
        self.plugin_data.save(&data).await?;
        let _ = self.settings_tx.send(settings);
        Ok(())
    }

    pub fn fs(&self) -> &Arc<FilesystemService> {
        &self.fs
    }

    pub fn identity(&self) -> &Arc<IdentityStore> {
        &self.identity
    }

    pub fn snapshots(&self) -> &Arc<SnapshotStore> {
        &self.snapshots
    }

    pub fn index(&self) -> &Arc<LocalIndex> {
        &self.index
    }

    /// Plan and execute one import batch from a device scan.
    pub async fn import(
        &self,
        renderer: Arc<dyn TemplateRenderer>,
        cancel: &CancellationToken,
        sources: Vec<SourceDescriptor>,
    ) -> Result<ImportOutcome> {
        if self.migrations_blocked {
            return Err(CoreError::DbValidateFailed {
                message: "a pending migration failed; resolve it before importing".to_string(),
            });
        }
        let settings = self.settings();

        let planner = Planner {
            index: &self.index,
            identity: &self.identity,
            fs: &self.fs,
            snapshots: &self.snapshots,
            renderer: renderer.as_ref(),
            settings: &settings,
        };
        let plan = planner.plan(cancel, sources).await?;

        let executor = Executor {
            fs: Arc::clone(&self.fs),
            identity: Arc::clone(&self.identity),
            snapshots: Arc::clone(&self.snapshots),
            index: Arc::clone(&self.index),
            locks: Arc::clone(&self.locks),
            renderer,
            settings,
        };
        Ok(executor.execute(cancel, plan).await)
    }

    /// Track a user-driven rename so duplicate discovery keeps working.
    pub async fn note_renamed(
        &self,
        cancel: &CancellationToken,
        old_path: &VaultPath,
        new_path: &VaultPath,
    ) -> Result<()> {
        self.identity.invalidate(old_path);
        self.fs.invalidate_scans();
        self.index.rename_file(cancel, old_path, new_path).await
    }

    pub async fn folder_renamed(
        &self,
        cancel: &CancellationToken,
        old_prefix: &VaultPath,
        new_prefix: &VaultPath,
    ) -> Result<usize> {
        self.fs.invalidate_scans();
        self.index.rename_folder(cancel, old_prefix, new_prefix).await
    }
}
