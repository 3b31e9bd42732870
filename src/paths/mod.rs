// Branded path types. A VaultPath is always relative to the vault root with
// forward slashes; a SystemPath is an absolute OS path. The two never convert
// implicitly, which keeps vault-relative bookkeeping out of OS-path code.

pub mod slug;

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// A normalized vault-relative path: forward slashes, no leading or trailing
/// slash, `.`/`..` components resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaultPath(String);

impl VaultPath {
    pub fn new(raw: &str) -> Self {
        let slashed = raw.replace('\\', "/");
        let mut components: Vec<&str> = Vec::new();
        for part in slashed.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    components.pop();
                }
                other => components.push(other),
            }
        }
        VaultPath(components.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn join(&self, segment: &str) -> VaultPath {
        if self.0.is_empty() {
            VaultPath::new(segment)
        } else {
            VaultPath::new(&format!("{}/{}", self.0, segment))
        }
    }

    pub fn parent(&self) -> Option<VaultPath> {
        self.0.rfind('/').map(|idx| VaultPath(self.0[..idx].to_string()))
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }

    pub fn file_stem(&self) -> &str {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => name,
            Some(idx) => &name[..idx],
        }
    }

    pub fn extension(&self) -> Option<&str> {
        let name = self.file_name();
        match name.rfind('.') {
            Some(0) | None => None,
            Some(idx) => Some(&name[idx + 1..]),
        }
    }

    /// Prefix check at component granularity: `Books/Kafka` contains
    /// `Books/Kafka/a.md` but not `Books/KafkaEssays/a.md`.
    pub fn starts_with(&self, prefix: &VaultPath) -> bool {
        if prefix.0.is_empty() {
            return true;
        }
        self.0 == prefix.0 || self.0.starts_with(&format!("{}/", prefix.0))
    }

    /// Swap a folder prefix, preserving the remainder. Returns None when the
    /// path is not under `old_prefix`.
    pub fn reprefix(&self, old_prefix: &VaultPath, new_prefix: &VaultPath) -> Option<VaultPath> {
        if !self.starts_with(old_prefix) {
            return None;
        }
        if self.0 == old_prefix.0 {
            return Some(new_prefix.clone());
        }
        let rest = &self.0[old_prefix.0.len() + 1..];
        Some(new_prefix.join(rest))
    }

    /// Resolve against a vault root into an OS path.
    pub fn to_system(&self, vault_root: &SystemPath) -> SystemPath {
        vault_root.join_relative(self.as_str())
    }
}

impl fmt::Display for VaultPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An absolute OS path, canonicalized to forward slashes internally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SystemPath(String);

impl SystemPath {
    pub fn new(path: &Path) -> Self {
        SystemPath(path.to_string_lossy().replace('\\', "/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_path_buf(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }

    pub fn join_relative(&self, relative: &str) -> SystemPath {
        if relative.is_empty() {
            self.clone()
        } else {
            SystemPath(format!("{}/{}", self.0.trim_end_matches('/'), relative))
        }
    }

    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or("")
    }
}

impl fmt::Display for SystemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&Path> for SystemPath {
    fn from(path: &Path) -> Self {
        SystemPath::new(path)
    }
}

impl From<PathBuf> for SystemPath {
    fn from(path: PathBuf) -> Self {
        SystemPath::new(&path)
    }
}
