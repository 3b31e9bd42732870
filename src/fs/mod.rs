// Filesystem service: atomic writes, capability probing, cached directory
// listing, backup rotation, and the plugin-data JSON convention
// (primary file plus `.bak` sibling).

use std::fs;
use std::io::Write;
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use lru::LruCache;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{CoreError, Result};
use crate::paths::{SystemPath, VaultPath};

/// What the capability probe found at initialization. Writes degrade
/// gracefully when a capability is missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub atomic_rename: bool,
    pub fsync: bool,
    pub case_sensitive: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            atomic_rename: true,
            fsync: true,
            case_sensitive: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ScanKey {
    folder: VaultPath,
    extensions: Vec<String>,
    recursive: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanResult {
    pub files: Vec<VaultPath>,
    pub diagnostics: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ListOptions {
    pub extensions: Vec<String>,
    pub recursive: bool,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["md".to_string()],
            recursive: true,
        }
    }
}

const SCAN_CACHE_CAPACITY: usize = 64;

pub struct FilesystemService {
    vault_root: SystemPath,
    plugin_data_dir: SystemPath,
    capabilities: Capabilities,
    scan_cache: Mutex<LruCache<ScanKey, Arc<ScanResult>>>,
}

impl FilesystemService {
    pub fn new(vault_root: SystemPath, plugin_data_dir: SystemPath) -> Result<Self> {
        let data_path = plugin_data_dir.to_path_buf();
        fs::create_dir_all(&data_path).map_err(|e| CoreError::from_io(&data_path, e))?;
        let capabilities = probe_capabilities(&data_path);
        debug!(?capabilities, "filesystem capabilities probed");
        Ok(Self {
            vault_root,
            plugin_data_dir,
            capabilities,
            scan_cache: Mutex::new(LruCache::new(
                NonZeroUsize::new(SCAN_CACHE_CAPACITY).unwrap(),
            )),
        })
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn vault_root(&self) -> &SystemPath {
        &self.vault_root
    }

    pub fn resolve(&self, path: &VaultPath) -> SystemPath {
        path.to_system(&self.vault_root)
    }

    pub fn exists(&self, path: &VaultPath) -> bool {
        self.resolve(path).to_path_buf().exists()
    }

    pub fn read_text(&self, path: &VaultPath) -> Result<String> {
        let system = self.resolve(path).to_path_buf();
        fs::read_to_string(&system).map_err(|e| CoreError::from_io(&system, e))
    }

    pub fn ensure_parent_dir(&self, path: &VaultPath) -> Result<()> {
        if let Some(parent) = path.parent() {
            let system = self.resolve(&parent).to_path_buf();
            fs::create_dir_all(&system).map_err(|e| CoreError::from_io(&system, e))?;
        }
        Ok(())
    }

    /// Write a vault file atomically: temp in the target directory, fsync
    /// when honored, rename over the destination.
    pub fn write_text_atomic(&self, path: &VaultPath, content: &str) -> Result<()> {
        self.ensure_parent_dir(path)?;
        let system = self.resolve(path);
        self.write_system_atomic(&system, content)
    }

    pub fn write_system_atomic(&self, path: &SystemPath, content: &str) -> Result<()> {
        let target = path.to_path_buf();
        if !self.capabilities.atomic_rename {
            // Degraded mode: plain write is the best this filesystem offers.
            return fs::write(&target, content).map_err(|e| CoreError::WriteFailed {
                path: path.as_str().to_string(),
                source: e,
            });
        }

        let parent = target.parent().ok_or_else(|| CoreError::WriteFailed {
            path: path.as_str().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidInput, "no parent directory"),
        })?;
        fs::create_dir_all(parent).map_err(|e| CoreError::WriteFailed {
            path: path.as_str().to_string(),
            source: e,
        })?;

        let mut temp = NamedTempFile::new_in(parent).map_err(|e| CoreError::WriteFailed {
            path: path.as_str().to_string(),
            source: e,
        })?;
        temp.write_all(content.as_bytes())
            .and_then(|_| temp.flush())
            .map_err(|e| CoreError::WriteFailed {
                path: path.as_str().to_string(),
                source: e,
            })?;
        if self.capabilities.fsync {
            temp.as_file().sync_all().map_err(|e| CoreError::WriteFailed {
                path: path.as_str().to_string(),
                source: e,
            })?;
        }
        temp.persist(&target).map_err(|e| CoreError::WriteFailed {
            path: path.as_str().to_string(),
            source: e.error,
        })?;
        Ok(())
    }

    /// List files under a vault folder, caching results per
    /// `(folder, extensions, recursive)` to amortize repeated scans within
    /// one import.
    pub fn list_files(&self, folder: &VaultPath, opts: &ListOptions) -> Result<Arc<ScanResult>> {
        let key = ScanKey {
            folder: folder.clone(),
            extensions: opts.extensions.clone(),
            recursive: opts.recursive,
        };
        if let Some(cached) = self.scan_cache.lock().get(&key) {
            return Ok(Arc::clone(cached));
        }

        let root = self.resolve(folder).to_path_buf();
        let mut result = ScanResult::default();
        if root.exists() {
            let walker = if opts.recursive {
                WalkDir::new(&root)
            } else {
                WalkDir::new(&root).max_depth(1)
            };
            for entry in walker.follow_links(true) {
                let entry = match entry {
                    Ok(e) => e,
                    Err(e) => {
                        result.diagnostics.push(e.to_string());
                        continue;
                    }
                };
                if !entry.file_type().is_file() {
                    continue;
                }
                let ext = entry
                    .path()
                    .extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("")
                    .to_ascii_lowercase();
                if !opts.extensions.is_empty() && !opts.extensions.contains(&ext) {
                    continue;
                }
                match entry.path().strip_prefix(&self.vault_root.to_path_buf()) {
                    Ok(relative) => result
                        .files
                        .push(VaultPath::new(&relative.to_string_lossy())),
                    Err(_) => result
                        .diagnostics
                        .push(format!("outside vault: {}", entry.path().display())),
                }
            }
        }
        result.files.sort();

        let result = Arc::new(result);
        self.scan_cache.lock().put(key, Arc::clone(&result));
        Ok(result)
    }

    /// Drop cached scans. Called after any write that changes a listing.
    pub fn invalidate_scans(&self) {
        self.scan_cache.lock().clear();
    }

    pub fn plugin_data_path(&self, sub: &str) -> SystemPath {
        self.plugin_data_dir.join_relative(sub)
    }

    /// Write JSON-shaped plugin data: the previous primary becomes the `.bak`
    /// sibling before the new content lands atomically.
    pub fn write_json_atomic<T: Serialize>(&self, path: &SystemPath, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data).map_err(|e| CoreError::WriteFailed {
            path: path.as_str().to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let target = path.to_path_buf();
        if target.exists() {
            let backup = backup_sibling(path).to_path_buf();
            if let Err(e) = fs::copy(&target, &backup) {
                warn!(path = %path, error = %e, "failed to refresh .bak sibling");
            }
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| CoreError::from_io(parent, e))?;
        }
        self.write_system_atomic(path, &json)
    }

    /// Read JSON-shaped plugin data: primary first, `.bak` sibling on parse
    /// or read failure. Absent both reads as `None`.
    pub fn try_read_json<T: DeserializeOwned>(&self, path: &SystemPath) -> Result<Option<T>> {
        for candidate in [path.clone(), backup_sibling(path)] {
            let target = candidate.to_path_buf();
            if !target.exists() {
                continue;
            }
            match fs::read_to_string(&target) {
                Ok(content) => match serde_json::from_str::<T>(&content) {
                    Ok(data) => return Ok(Some(data)),
                    Err(e) => {
                        warn!(path = %candidate, error = %e, "corrupt plugin data, trying fallback");
                    }
                },
                Err(e) => {
                    warn!(path = %candidate, error = %e, "unreadable plugin data, trying fallback");
                }
            }
        }
        Ok(None)
    }

    /// Write a timestamped backup of a note into the plugin backup folder,
    /// then rotate old entries for that note.
    pub fn write_backup(
        &self,
        path: &VaultPath,
        content: &str,
        max_per_note: u32,
        retention_days: u32,
    ) -> Result<SystemPath> {
        let stem = path.file_stem();
        let folder = self.plugin_data_path(&format!("backups/{}", stem));
        fs::create_dir_all(folder.to_path_buf().as_path())
            .map_err(|e| CoreError::from_io(&folder.to_path_buf(), e))?;

        let timestamp = Utc::now().format("%Y%m%dT%H%M%S%3f");
        let backup = folder.join_relative(&format!("{}.md", timestamp));
        self.write_system_atomic(&backup, content)?;
        self.prune_backups(&folder, max_per_note, retention_days);
        Ok(backup)
    }

    /// Keep the N newest backups for a note, dropping anything older than
    /// the retention window. Rotation failures are diagnostics, not errors.
    fn prune_backups(&self, folder: &SystemPath, max_per_note: u32, retention_days: u32) {
        let Ok(entries) = fs::read_dir(folder.to_path_buf()) else {
            return;
        };
        let mut backups: Vec<_> = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.path().is_file())
            .collect();
        // Timestamped names sort newest-last.
        backups.sort_by_key(|e| e.file_name());

        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);
        let keep_from = backups.len().saturating_sub(max_per_note as usize);
        for (idx, entry) in backups.iter().enumerate() {
            let too_many = idx < keep_from;
            let expired = entry
                .metadata()
                .and_then(|m| m.modified())
                .map(|m| chrono::DateTime::<Utc>::from(m) < cutoff)
                .unwrap_or(false);
            if too_many || expired {
                if let Err(e) = fs::remove_file(entry.path()) {
                    warn!(path = %entry.path().display(), error = %e, "backup rotation failed");
                }
            }
        }
    }
}

fn backup_sibling(path: &SystemPath) -> SystemPath {
    SystemPath::new(Path::new(&format!("{}.bak", path.as_str())))
}

/// Feature-detect what the plugin data directory supports: atomic rename,
/// honored fsync, and case-sensitive paths.
fn probe_capabilities(data_dir: &Path) -> Capabilities {
    let mut caps = Capabilities {
        atomic_rename: false,
        fsync: false,
        case_sensitive: true,
    };

    let probe_target = data_dir.join(".capability-probe");
    if let Ok(mut temp) = NamedTempFile::new_in(data_dir) {
        if temp.write_all(b"probe").is_ok() {
            caps.fsync = temp.as_file().sync_all().is_ok();
            caps.atomic_rename = temp.persist(&probe_target).is_ok();
        }
    }

    if probe_target.exists() {
        // A hit on the upper-cased twin means lookups are case-insensitive.
        let twin = data_dir.join(".CAPABILITY-PROBE");
        caps.case_sensitive = !twin.exists();
        let _ = fs::remove_file(&probe_target);
    }

    caps
}
