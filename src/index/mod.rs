// Local index: a durable relational store over book identity, vault
// location, and per-source import progress. The notes on disk remain the
// source of truth; the index is always re-materializable.

pub mod db;
pub mod migrations;

use std::path::Path;

use rusqlite::{params, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use crate::book::BookKey;
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::paths::VaultPath;

use self::db::Database;

pub const SCHEMA_VERSION: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookRow {
    pub key: BookKey,
    /// Statistics-database row id, when known.
    pub id: Option<i64>,
    pub title: String,
    pub authors: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookInstanceRow {
    pub book_key: BookKey,
    pub vault_path: VaultPath,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ImportSourceRow {
    pub source_path: String,
    pub last_processed_mtime: i64,
    pub last_processed_size: u64,
    pub newest_annotation_ts: Option<i64>,
    pub last_success_ts: Option<i64>,
    pub last_error: Option<String>,
    pub book_key: Option<BookKey>,
    pub md5: Option<String>,
}

pub struct LocalIndex {
    db: Database,
}

impl LocalIndex {
    pub fn open(path: &Path) -> Result<Self> {
        let mut db = Database::open(path)?;
        Self::ensure_schema(&mut db)?;
        Ok(Self { db })
    }

    pub fn open_in_memory() -> Result<Self> {
        let mut db = Database::open_in_memory()?;
        Self::ensure_schema(&mut db)?;
        Ok(Self { db })
    }

    // Schema setup happens once, before the database is shared.
    fn ensure_schema(db: &mut Database) -> Result<()> {
        db.with_conn_mut(|conn| {
            conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS book (\n\
                 key TEXT PRIMARY KEY,\n\
                 id INTEGER,\n\
                 title TEXT NOT NULL,\n\
                 authors TEXT NOT NULL\n\
             );\n\
             CREATE TABLE IF NOT EXISTS book_instance (\n\
                 vault_path TEXT PRIMARY KEY,\n\
                 book_key TEXT NOT NULL REFERENCES book(key)\n\
             );\n\
             CREATE INDEX IF NOT EXISTS idx_book_instance_key\n\
                 ON book_instance(book_key);\n\
             CREATE TABLE IF NOT EXISTS import_source (\n\
                 source_path TEXT PRIMARY KEY,\n\
                 last_processed_mtime INTEGER NOT NULL,\n\
                 last_processed_size INTEGER NOT NULL,\n\
                 newest_annotation_ts INTEGER,\n\
                 last_success_ts INTEGER,\n\
                 last_error TEXT,\n\
                 book_key TEXT,\n\
                 md5 TEXT\n\
             );",
            )?;
            let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
            if version < SCHEMA_VERSION {
                conn.execute_batch(&format!("PRAGMA user_version = {}", SCHEMA_VERSION))?;
            }
            Ok(())
        })
    }

    pub async fn validate(&self, cancel: &CancellationToken) -> Result<()> {
        self.db.validate(cancel).await
    }

    pub async fn find_key_by_path(
        &self,
        cancel: &CancellationToken,
        vault_path: &VaultPath,
    ) -> Result<Option<BookKey>> {
        let path = vault_path.as_str().to_string();
        self.db
            .read(cancel, move |conn| {
                conn.query_row(
                    "SELECT book_key FROM book_instance WHERE vault_path = ?1",
                    params![path],
                    |row| row.get::<_, String>(0),
                )
                .optional()
            })
            .await
            .map(|key| key.map(|k| BookKey::from_raw(&k)))
    }

    pub async fn find_paths_by_key(
        &self,
        cancel: &CancellationToken,
        key: &BookKey,
    ) -> Result<Vec<VaultPath>> {
        let key = key.as_str().to_string();
        self.db
            .read(cancel, move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT vault_path FROM book_instance\n\
                     WHERE book_key = ?1 ORDER BY vault_path",
                )?;
                let rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<Vec<String>>>()
            })
            .await
            .map(|paths| paths.iter().map(|p| VaultPath::new(p)).collect())
    }

    pub async fn get_book(
        &self,
        cancel: &CancellationToken,
        key: &BookKey,
    ) -> Result<Option<BookRow>> {
        let key = key.as_str().to_string();
        self.db
            .read(cancel, move |conn| {
                conn.query_row(
                    "SELECT key, id, title, authors FROM book WHERE key = ?1",
                    params![key],
                    book_row,
                )
                .optional()
            })
            .await
    }

    /// Upsert the book and, when a path is supplied, its instance, in one
    /// transaction.
    pub async fn upsert_book(
        &self,
        cancel: &CancellationToken,
        row: &BookRow,
        vault_path: Option<&VaultPath>,
    ) -> Result<()> {
        let row = row.clone();
        let path = vault_path.map(|p| p.as_str().to_string());
        self.db
            .write_tx(cancel, move |conn| {
                conn.execute(
                    "INSERT INTO book (key, id, title, authors)\n\
                     VALUES (?1, ?2, ?3, ?4)\n\
                     ON CONFLICT(key) DO UPDATE SET\n\
                         id = COALESCE(excluded.id, book.id),\n\
                         title = excluded.title,\n\
                         authors = excluded.authors",
                    params![row.key.as_str(), row.id, row.title, row.authors],
                )?;
                if let Some(path) = path {
                    conn.execute(
                        "INSERT INTO book_instance (vault_path, book_key)\n\
                         VALUES (?1, ?2)\n\
                         ON CONFLICT(vault_path) DO UPDATE SET\n\
                             book_key = excluded.book_key",
                        params![path, row.key.as_str()],
                    )?;
                }
                Ok(())
            })
            .await
    }

    /// Remove an instance; a book with no remaining instances and no import
    /// source referencing it is garbage collected.
    pub async fn delete_instance_by_path(
        &self,
        cancel: &CancellationToken,
        vault_path: &VaultPath,
    ) -> Result<()> {
        let path = vault_path.as_str().to_string();
        self.db
            .write_tx(cancel, move |conn| {
                let key: Option<String> = conn
                    .query_row(
                        "SELECT book_key FROM book_instance WHERE vault_path = ?1",
                        params![path],
                        |row| row.get(0),
                    )
                    .optional()?;
                conn.execute(
                    "DELETE FROM book_instance WHERE vault_path = ?1",
                    params![path],
                )?;
                if let Some(key) = key {
                    conn.execute(
                        "DELETE FROM book WHERE key = ?1\n\
                         AND NOT EXISTS (SELECT 1 FROM book_instance WHERE book_key = ?1)\n\
                         AND NOT EXISTS (SELECT 1 FROM import_source WHERE book_key = ?1)",
                        params![key],
                    )?;
                }
                Ok(())
            })
            .await
    }

    pub async fn rename_file(
        &self,
        cancel: &CancellationToken,
        old_path: &VaultPath,
        new_path: &VaultPath,
    ) -> Result<()> {
        let old = old_path.as_str().to_string();
        let new = new_path.as_str().to_string();
        self.db
            .write_tx(cancel, move |conn| {
                conn.execute(
                    "UPDATE book_instance SET vault_path = ?2 WHERE vault_path = ?1",
                    params![old, new],
                )?;
                Ok(())
            })
            .await
    }

    /// Rewrite every instance under `old_prefix/` to live under
    /// `new_prefix/`. Matching happens component-wise in Rust; SQL pattern
    /// matching over user paths is not worth the escaping rules.
    pub async fn rename_folder(
        &self,
        cancel: &CancellationToken,
        old_prefix: &VaultPath,
        new_prefix: &VaultPath,
    ) -> Result<usize> {
        let old = old_prefix.clone();
        let new = new_prefix.clone();
        self.db
            .write_tx(cancel, move |conn| {
                let mut stmt = conn.prepare("SELECT vault_path FROM book_instance")?;
                let all: Vec<String> = stmt
                    .query_map([], |row| row.get::<_, String>(0))?
                    .collect::<rusqlite::Result<_>>()?;
                drop(stmt);

                let mut renamed = 0usize;
                for path in all {
                    let vault_path = VaultPath::new(&path);
                    if let Some(updated) = vault_path.reprefix(&old, &new) {
                        conn.execute(
                            "UPDATE book_instance SET vault_path = ?2 WHERE vault_path = ?1",
                            params![path, updated.as_str()],
                        )?;
                        renamed += 1;
                    }
                }
                Ok(renamed)
            })
            .await
    }

    pub async fn upsert_import_source(
        &self,
        cancel: &CancellationToken,
        row: &ImportSourceRow,
    ) -> Result<()> {
        let row = row.clone();
        self.db
            .write_tx(cancel, move |conn| {
                conn.execute(
                    "INSERT INTO import_source (\n\
                         source_path, last_processed_mtime, last_processed_size,\n\
                         newest_annotation_ts, last_success_ts, last_error, book_key, md5\n\
                     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)\n\
                     ON CONFLICT(source_path) DO UPDATE SET\n\
                         last_processed_mtime = excluded.last_processed_mtime,\n\
                         last_processed_size = excluded.last_processed_size,\n\
                         newest_annotation_ts = excluded.newest_annotation_ts,\n\
                         last_success_ts = excluded.last_success_ts,\n\
                         last_error = excluded.last_error,\n\
                         book_key = COALESCE(excluded.book_key, import_source.book_key),\n\
                         md5 = COALESCE(excluded.md5, import_source.md5)",
                    params![
                        row.source_path,
                        row.last_processed_mtime,
                        row.last_processed_size as i64,
                        row.newest_annotation_ts,
                        row.last_success_ts,
                        row.last_error,
                        row.book_key.as_ref().map(|k| k.as_str().to_string()),
                        row.md5,
                    ],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get_import_source(
        &self,
        cancel: &CancellationToken,
        source_path: &str,
    ) -> Result<Option<ImportSourceRow>> {
        let path = source_path.to_string();
        self.db
            .read(cancel, move |conn| {
                conn.query_row(
                    "SELECT source_path, last_processed_mtime, last_processed_size,\n\
                            newest_annotation_ts, last_success_ts, last_error, book_key, md5\n\
                     FROM import_source WHERE source_path = ?1",
                    params![path],
                    import_source_row,
                )
                .optional()
            })
            .await
    }

    /// Drop every import-source row; the next import reprocesses everything.
    pub async fn clear_import_sources(&self, cancel: &CancellationToken) -> Result<()> {
        self.db
            .write_tx(cancel, |conn| {
                conn.execute("DELETE FROM import_source", [])?;
                Ok(())
            })
            .await
    }

    pub async fn all_instances(&self, cancel: &CancellationToken) -> Result<Vec<BookInstanceRow>> {
        self.db
            .read(cancel, |conn| {
                let mut stmt = conn.prepare(
                    "SELECT vault_path, book_key FROM book_instance ORDER BY vault_path",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<rusqlite::Result<Vec<_>>>()
            })
            .await
            .map(|rows| {
                rows.iter()
                    .map(|(path, key)| BookInstanceRow {
                        vault_path: VaultPath::new(path),
                        book_key: BookKey::from_raw(key),
                    })
                    .collect()
            })
    }

}

fn book_row(row: &Row<'_>) -> rusqlite::Result<BookRow> {
    Ok(BookRow {
        key: BookKey::from_raw(&row.get::<_, String>(0)?),
        id: row.get(1)?,
        title: row.get(2)?,
        authors: row.get(3)?,
    })
}

fn import_source_row(row: &Row<'_>) -> rusqlite::Result<ImportSourceRow> {
    Ok(ImportSourceRow {
        source_path: row.get(0)?,
        last_processed_mtime: row.get(1)?,
        last_processed_size: row.get::<_, i64>(2)? as u64,
        newest_annotation_ts: row.get(3)?,
        last_success_ts: row.get(4)?,
        last_error: row.get(5)?,
        book_key: row
            .get::<_, Option<String>>(6)?
            .map(|k| BookKey::from_raw(&k)),
        md5: row.get(7)?,
    })
}
