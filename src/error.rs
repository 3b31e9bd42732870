// Structured error taxonomy shared by every core subsystem.

use std::path::Path;
use thiserror::Error;

/// Errors surfaced by core entry points.
///
/// Every variant carries enough context to render a human-readable reason in
/// the terminal import outcome without re-deriving state.
#[derive(Debug, Error)]
pub enum CoreError {
    /// File, folder, or row absent.
    #[error("not found: {path}")]
    NotFound { path: String },

    #[error("permission denied: {path}")]
    PermissionDenied { path: String },

    /// Frontmatter unparseable.
    #[error("frontmatter parse error: {message}")]
    YamlParse { message: String },

    /// Device metadata unparseable.
    #[error("device metadata parse error{}: {message}", match .line { Some(l) => format!(" at line {}", l), None => String::new() })]
    LuaParse { message: String, line: Option<u32> },

    #[error("failed to open index database: {message}")]
    DbOpenFailed { message: String },

    #[error("failed to persist index database: {message}")]
    DbPersistFailed { message: String },

    #[error("index database failed validation: {message}")]
    DbValidateFailed { message: String },

    #[error("index database operation failed: {message}")]
    DbOperationFailed { message: String },

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    /// Filesystem capability probing found the operation unsupported.
    #[error("filesystem capability unavailable: {capability}")]
    CapabilityUnavailable { capability: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("write failed for {path}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("read failed for {path}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl CoreError {
    /// Stable machine-readable kind for per-item outcome reporting.
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::PermissionDenied { .. } => "PERMISSION_DENIED",
            CoreError::YamlParse { .. } => "YAML_PARSE_ERROR",
            CoreError::LuaParse { .. } => "LUA_PARSE_ERROR",
            CoreError::DbOpenFailed { .. } => "DB_OPEN_FAILED",
            CoreError::DbPersistFailed { .. } => "DB_PERSIST_FAILED",
            CoreError::DbValidateFailed { .. } => "DB_VALIDATE_FAILED",
            CoreError::DbOperationFailed { .. } => "DB_OPERATION_FAILED",
            CoreError::Snapshot(e) => e.kind(),
            CoreError::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE",
            CoreError::Cancelled => "CANCELLED",
            CoreError::WriteFailed { .. } => "WRITE_FAILED",
            CoreError::ReadFailed { .. } => "READ_FAILED",
        }
    }

    /// Map an I/O error to the taxonomy, preserving the path it happened on.
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        let path = path.display().to_string();
        match source.kind() {
            std::io::ErrorKind::NotFound => CoreError::NotFound { path },
            std::io::ErrorKind::PermissionDenied => CoreError::PermissionDenied { path },
            _ => CoreError::ReadFailed { path, source },
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(e: rusqlite::Error) -> Self {
        CoreError::DbOperationFailed {
            message: e.to_string(),
        }
    }
}

/// Snapshot store failures. Integrity failures are their own kind so callers
/// can distinguish "never written" from "written but no longer trustworthy";
/// both read as a missing baseline during merge.
#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("no snapshot for uid {uid}")]
    NotFound { uid: String },

    #[error("snapshot read failed for uid {uid}")]
    ReadFailed {
        uid: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot write failed for uid {uid}")]
    WriteFailed {
        uid: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot integrity hash mismatch for uid {uid}")]
    IntegrityFailed { uid: String },

    #[error("note has no uid: {path}")]
    UidMissing { path: String },

    #[error("uid mismatch: expected {expected}, found {found}")]
    UidMismatch { expected: String, found: String },

    #[error("snapshot capability unavailable: {capability}")]
    CapabilityUnavailable { capability: String },

    #[error("target file missing: {path}")]
    TargetFileMissing { path: String },

    #[error("snapshot migration failed: {message}")]
    MigrationFailed { message: String },
}

impl SnapshotError {
    pub fn kind(&self) -> &'static str {
        match self {
            SnapshotError::NotFound { .. } => "NOT_FOUND",
            SnapshotError::ReadFailed { .. } => "READ_FAILED",
            SnapshotError::WriteFailed { .. } => "WRITE_FAILED",
            SnapshotError::IntegrityFailed { .. } => "INTEGRITY_FAILED",
            SnapshotError::UidMissing { .. } => "UID_MISSING",
            SnapshotError::UidMismatch { .. } => "UID_MISMATCH",
            SnapshotError::CapabilityUnavailable { .. } => "CAPABILITY_UNAVAILABLE",
            SnapshotError::TargetFileMissing { .. } => "TARGET_FILE_MISSING",
            SnapshotError::MigrationFailed { .. } => "MIGRATION_FAILED",
        }
    }

    /// True when the baseline should be treated as absent during merge.
    pub fn reads_as_missing(&self) -> bool {
        matches!(
            self,
            SnapshotError::NotFound { .. } | SnapshotError::IntegrityFailed { .. }
        )
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_mapping() {
        let path = Path::new("Books/missing.md");
        let err = CoreError::from_io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), "NOT_FOUND");

        let err = CoreError::from_io(
            path,
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "nope"),
        );
        assert_eq!(err.kind(), "PERMISSION_DENIED");
    }

    #[test]
    fn test_snapshot_kinds_read_as_missing() {
        assert!(SnapshotError::NotFound {
            uid: "u".to_string()
        }
        .reads_as_missing());
        assert!(SnapshotError::IntegrityFailed {
            uid: "u".to_string()
        }
        .reads_as_missing());
        assert!(!SnapshotError::UidMissing {
            path: "p".to_string()
        }
        .reads_as_missing());
    }

    #[test]
    fn test_lua_parse_message_includes_line() {
        let err = CoreError::LuaParse {
            message: "unexpected token".to_string(),
            line: Some(12),
        };
        assert!(err.to_string().contains("line 12"));
    }
}
