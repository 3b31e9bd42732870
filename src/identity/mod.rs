// Note identity: every generated note carries a v4 UUID under the reserved
// `kohl-uid` frontmatter key. The UID survives renames and edits; it is the
// primary identity of a note.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::SystemTime;

use lru::LruCache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::frontmatter::{FrontmatterWriter, NoteDocument, UID_KEY};
use crate::fs::{FilesystemService, ListOptions};
use crate::paths::VaultPath;

/// A lowercase v4 UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Uid(String);

impl Uid {
    pub fn generate() -> Self {
        Uid(Uuid::new_v4().to_string())
    }

    /// Accept only syntactically correct v4 UUIDs, canonicalized lowercase.
    pub fn parse(s: &str) -> Option<Self> {
        let uuid = Uuid::parse_str(s.trim()).ok()?;
        if uuid.get_version_num() != 4 {
            return None;
        }
        Some(Uid(uuid.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CollisionGroup {
    pub uid: Uid,
    pub kept: VaultPath,
    pub reassigned: Vec<(VaultPath, Uid)>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CollisionReport {
    pub collisions: Vec<CollisionGroup>,
    pub files_reassigned: usize,
}

const UID_CACHE_CAPACITY: usize = 10_000;

pub struct IdentityStore {
    fs: Arc<FilesystemService>,
    cache: Mutex<LruCache<VaultPath, Uid>>,
}

impl IdentityStore {
    pub fn new(fs: Arc<FilesystemService>) -> Self {
        Self {
            fs,
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(UID_CACHE_CAPACITY).unwrap())),
        }
    }

    /// Read a file's UID without ever writing. Corrupt frontmatter or an
    /// invalid UID value read as absent.
    pub fn try_get_uid(&self, file: &VaultPath) -> Result<Option<Uid>> {
        if let Some(uid) = self.cache.lock().get(file) {
            return Ok(Some(uid.clone()));
        }
        if !self.fs.exists(file) {
            return Ok(None);
        }
        let content = self.fs.read_text(file)?;
        let uid = match NoteDocument::parse(&content) {
            Ok(doc) => doc.frontmatter.get_str(UID_KEY).and_then(Uid::parse),
            Err(_) => None,
        };
        if let Some(ref uid) = uid {
            self.cache.lock().put(file.clone(), uid.clone());
        }
        Ok(uid)
    }

    /// Return the file's UID, minting and persisting one when absent. The
    /// rewrite preserves every other frontmatter key in order and the body
    /// byte-for-byte.
    pub fn ensure_uid(&self, file: &VaultPath) -> Result<Uid> {
        if let Some(uid) = self.try_get_uid(file)? {
            return Ok(uid);
        }
        if !self.fs.exists(file) {
            return Err(CoreError::NotFound {
                path: file.as_str().to_string(),
            });
        }
        self.write_uid(file, Uid::generate())
    }

    /// Overwrite any existing UID with a fresh one. Used by collision
    /// resolution; never called on the file being kept.
    pub fn assign_new_id(&self, file: &VaultPath) -> Result<Uid> {
        if !self.fs.exists(file) {
            return Err(CoreError::NotFound {
                path: file.as_str().to_string(),
            });
        }
        self.write_uid(file, Uid::generate())
    }

    fn write_uid(&self, file: &VaultPath, uid: Uid) -> Result<Uid> {
        let content = self.fs.read_text(file)?;
        let mut doc = NoteDocument::parse(&content)?;
        doc.frontmatter
            .set(UID_KEY, serde_json::Value::String(uid.as_str().to_string()));
        self.fs
            .write_text_atomic(file, &FrontmatterWriter::compose(&doc.frontmatter, &doc.body))?;
        self.cache.lock().put(file.clone(), uid.clone());
        Ok(uid)
    }

    /// Locate the note carrying a given UID under a folder. Scans are served
    /// from the filesystem service's listing cache.
    pub fn find_file_by_uid(&self, folder: &VaultPath, uid: &Uid) -> Result<Option<VaultPath>> {
        let listing = self.fs.list_files(folder, &ListOptions::default())?;
        for file in &listing.files {
            if self.try_get_uid(file)?.as_ref() == Some(uid) {
                return Ok(Some(file.clone()));
            }
        }
        Ok(None)
    }

    /// Scan markdown files under a folder, group by UID, and reassign fresh
    /// UIDs to every file in a group except the earliest. Tie-break: earlier
    /// creation timestamp, then lexicographically earlier path.
    pub fn resolve_collisions(&self, folder: &VaultPath) -> Result<CollisionReport> {
        let listing = self.fs.list_files(folder, &ListOptions::default())?;

        let mut by_uid: Vec<(Uid, Vec<VaultPath>)> = Vec::new();
        for file in &listing.files {
            let Some(uid) = self.try_get_uid(file)? else {
                continue;
            };
            match by_uid.iter_mut().find(|(u, _)| *u == uid) {
                Some((_, files)) => files.push(file.clone()),
                None => by_uid.push((uid, vec![file.clone()])),
            }
        }
        // Deterministic report order regardless of scan order.
        by_uid.sort_by(|(a, _), (b, _)| a.cmp(b));

        let mut report = CollisionReport::default();
        for (uid, mut files) in by_uid {
            if files.len() < 2 {
                continue;
            }
            files.sort_by(|a, b| {
                creation_stamp(&self.fs, a)
                    .cmp(&creation_stamp(&self.fs, b))
                    .then_with(|| a.cmp(b))
            });
            let kept = files.remove(0);
            debug!(uid = %uid, kept = %kept, duplicates = files.len(), "resolving uid collision");

            let mut reassigned = Vec::new();
            for file in files {
                match self.assign_new_id(&file) {
                    Ok(new_uid) => {
                        report.files_reassigned += 1;
                        reassigned.push((file, new_uid));
                    }
                    Err(e) => {
                        warn!(file = %file, error = %e, "failed to reassign colliding uid");
                    }
                }
            }
            report.collisions.push(CollisionGroup {
                uid,
                kept,
                reassigned,
            });
        }
        Ok(report)
    }

    pub fn invalidate(&self, file: &VaultPath) {
        self.cache.lock().pop(file);
    }
}

/// Creation timestamp for collision ordering; filesystems without ctime fall
/// back to mtime.
fn creation_stamp(fs: &FilesystemService, file: &VaultPath) -> SystemTime {
    let path = fs.resolve(file).to_path_buf();
    std::fs::metadata(&path)
        .and_then(|m| m.created().or_else(|_| m.modified()))
        .unwrap_or(SystemTime::UNIX_EPOCH)
}

#[cfg(test)]
mod tests;
