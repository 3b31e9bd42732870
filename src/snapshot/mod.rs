// Content-addressed snapshot store. A snapshot records the exact body the
// system last wrote for a UID; it is the baseline for three-way merges. A
// snapshot that fails its integrity check is reported as missing, never
// fabricated from vault content.

use std::fs;
use std::sync::Arc;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::error::{Result, SnapshotError};
use crate::fs::FilesystemService;
use crate::identity::Uid;
use crate::paths::SystemPath;

const SNAPSHOTS_DIR: &str = "snapshots";
const LOCK_SHARDS: usize = 16;

/// CRLF-normalized hashing input; the stored body itself stays verbatim.
pub fn canonicalize(body: &str) -> String {
    body.replace("\r\n", "\n")
}

pub fn sha256_hex(data: &str) -> String {
    let digest = Sha256::digest(data.as_bytes());
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

pub struct SnapshotStore {
    fs: Arc<FilesystemService>,
    // Per-UID write serialization, hash-sharded.
    locks: Vec<Mutex<()>>,
}

impl SnapshotStore {
    pub fn new(fs: Arc<FilesystemService>) -> Self {
        Self {
            fs,
            locks: (0..LOCK_SHARDS).map(|_| Mutex::new(())).collect(),
        }
    }

    fn path_for(&self, uid: &Uid) -> SystemPath {
        self.fs
            .plugin_data_path(&format!("{}/{}.md", SNAPSHOTS_DIR, uid))
    }

    fn shard(&self, uid: &Uid) -> &Mutex<()> {
        let mut hash = 0usize;
        for b in uid.as_str().bytes() {
            hash = hash.wrapping_mul(31).wrapping_add(b as usize);
        }
        &self.locks[hash % LOCK_SHARDS]
    }

    /// Read and verify the snapshot for a UID, returning the body verbatim.
    pub fn read(&self, uid: &Uid) -> Result<String, SnapshotError> {
        let path = self.path_for(uid).to_path_buf();
        if !path.exists() {
            return Err(SnapshotError::NotFound {
                uid: uid.as_str().to_string(),
            });
        }
        let content = fs::read_to_string(&path).map_err(|e| SnapshotError::ReadFailed {
            uid: uid.as_str().to_string(),
            source: e,
        })?;

        let Some((stored_hash, body)) = split_snapshot(&content) else {
            warn!(uid = %uid, "snapshot file is malformed, treating as missing");
            return Err(SnapshotError::IntegrityFailed {
                uid: uid.as_str().to_string(),
            });
        };

        if sha256_hex(&canonicalize(body)) != stored_hash {
            warn!(uid = %uid, "snapshot hash mismatch, treating as missing");
            return Err(SnapshotError::IntegrityFailed {
                uid: uid.as_str().to_string(),
            });
        }
        Ok(body.to_string())
    }

    /// Persist the snapshot for a UID atomically. Writes for the same UID
    /// never interleave; the rename is retried once on failure.
    pub fn write(&self, uid: &Uid, body: &str) -> Result<(), SnapshotError> {
        let _guard = self.shard(uid).lock();
        let path = self.path_for(uid);
        let content = format!("---\nsha256: {}\n---\n\n{}", sha256_hex(&canonicalize(body)), body);

        let mut attempt = self.fs.write_system_atomic(&path, &content);
        if attempt.is_err() {
            debug!(uid = %uid, "snapshot write failed, retrying once");
            attempt = self.fs.write_system_atomic(&path, &content);
        }
        attempt.map_err(|e| SnapshotError::WriteFailed {
            uid: uid.as_str().to_string(),
            source: match e {
                crate::error::CoreError::WriteFailed { source, .. } => source,
                other => std::io::Error::new(std::io::ErrorKind::Other, other.to_string()),
            },
        })
    }

    pub fn exists(&self, uid: &Uid) -> bool {
        self.path_for(uid).to_path_buf().exists()
    }

    pub fn delete(&self, uid: &Uid) -> Result<(), SnapshotError> {
        let _guard = self.shard(uid).lock();
        let path = self.path_for(uid).to_path_buf();
        if !path.exists() {
            return Ok(());
        }
        fs::remove_file(&path).map_err(|e| SnapshotError::WriteFailed {
            uid: uid.as_str().to_string(),
            source: e,
        })
    }

    /// Full reset: drop every stored snapshot.
    pub fn clear_all(&self) -> Result<(), SnapshotError> {
        let dir = self.fs.plugin_data_path(SNAPSHOTS_DIR).to_path_buf();
        if !dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&dir).map_err(|e| SnapshotError::WriteFailed {
            uid: String::new(),
            source: e,
        })
    }

    /// Rename a legacy path-hash snapshot into the UID layout. Idempotent:
    /// an already-migrated UID wins over the legacy file.
    pub fn migrate_legacy(&self, legacy_stem: &str, uid: &Uid) -> Result<(), SnapshotError> {
        let _guard = self.shard(uid).lock();
        let legacy = self
            .fs
            .plugin_data_path(&format!("{}/{}.md", SNAPSHOTS_DIR, legacy_stem))
            .to_path_buf();
        if !legacy.exists() {
            return Ok(());
        }
        let target = self.path_for(uid).to_path_buf();
        if target.exists() {
            fs::remove_file(&legacy).map_err(|e| SnapshotError::MigrationFailed {
                message: format!("removing superseded legacy snapshot {}: {}", legacy.display(), e),
            })?;
            return Ok(());
        }
        fs::rename(&legacy, &target).map_err(|e| SnapshotError::MigrationFailed {
            message: format!("renaming {} to uid layout: {}", legacy.display(), e),
        })
    }

    /// Stems of every snapshot currently on disk (UIDs after migration).
    pub fn list_stems(&self) -> Vec<String> {
        let dir = self.fs.plugin_data_path(SNAPSHOTS_DIR).to_path_buf();
        let Ok(entries) = fs::read_dir(&dir) else {
            return Vec::new();
        };
        let mut stems: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".md").map(|s| s.to_string())
            })
            .collect();
        stems.sort();
        stems
    }
}

/// Split a snapshot file into its stored hash and verbatim body.
fn split_snapshot(content: &str) -> Option<(String, &str)> {
    let rest = content.strip_prefix("---\nsha256: ")?;
    let (hash, rest) = rest.split_once('\n')?;
    let body = rest.strip_prefix("---\n\n")?;
    let hash = hash.trim();
    if hash.len() != 64 || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    Some((hash.to_string(), body))
}
