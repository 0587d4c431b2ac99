//! Metadata store: relational half of the catalog
//!
//! One `images` row per file path. The id is derived from the path, the path
//! carries a uniqueness constraint, and `content_hash` is nullable because it
//! is computed lazily (only when move detection needs it).

use crate::error::{CatalogError, Result};
use crate::storage::{image_id, ImageRecord, NewImage};
use rusqlite::{params, Connection};
use std::cell::Cell;
use std::collections::HashSet;
use std::path::Path;

/// What `upsert` actually did. `Unchanged` means the row existed with the
/// same size and mtime and no write was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

pub struct MetadataStore {
    conn: Connection,
    tx_active: Cell<bool>,
}

impl MetadataStore {
    pub fn open(db_path: &Path) -> Result<Self> {
        if let Some(dir) = db_path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        let conn = Connection::open(db_path)
            .map_err(|e| CatalogError::Connection(format!("{}: {}", db_path.display(), e)))?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS images (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL UNIQUE,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT,
                created_time INTEGER NOT NULL DEFAULT 0,
                modified_time INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )?;

        tracing::info!("Metadata store ready: {}", db_path.display());
        Ok(Self { conn, tx_active: Cell::new(false) })
    }

    /// Open a relational transaction. A second `begin` while one is active
    /// logs a warning and is a no-op; callers serialize their own usage.
    pub fn begin(&self) -> Result<()> {
        if self.tx_active.get() {
            tracing::warn!("begin ignored: a transaction is already active");
            return Ok(());
        }
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        self.tx_active.set(true);
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        if !self.tx_active.get() {
            tracing::warn!("commit ignored: no active transaction");
            return Ok(());
        }
        self.conn.execute_batch("COMMIT")?;
        self.tx_active.set(false);
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        if !self.tx_active.get() {
            tracing::warn!("rollback ignored: no active transaction");
            return Ok(());
        }
        self.conn.execute_batch("ROLLBACK")?;
        self.tx_active.set(false);
        Ok(())
    }

    pub fn in_transaction(&self) -> bool {
        self.tx_active.get()
    }

    /// Insert or refresh a record. An existing row is rewritten only when
    /// `file_size` or `modified_time` differ from the stored values, which
    /// keeps redundant relational writes (and index churn upstream) at zero.
    pub fn upsert(&self, image: &NewImage) -> Result<UpsertOutcome> {
        let id = image_id(&image.file_path);

        if let Some(existing) = self.get_by_path(&image.file_path)? {
            if existing.file_size == image.file_size
                && existing.modified_time == image.modified_time
            {
                tracing::debug!("Unchanged, skipping write: {}", image.file_path);
                return Ok(UpsertOutcome::Unchanged);
            }
            self.conn.execute(
                "UPDATE images
                 SET file_name = ?1, file_size = ?2, content_hash = ?3,
                     created_time = ?4, modified_time = ?5
                 WHERE id = ?6",
                params![
                    image.file_name,
                    image.file_size,
                    image.content_hash,
                    image.created_time,
                    image.modified_time,
                    id
                ],
            )?;
            tracing::debug!("Updated record: {}", image.file_path);
            return Ok(UpsertOutcome::Updated);
        }

        self.conn
            .execute(
                "INSERT INTO images
                     (id, file_path, file_name, file_size, content_hash,
                      created_time, modified_time)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    id,
                    image.file_path,
                    image.file_name,
                    image.file_size,
                    image.content_hash,
                    image.created_time,
                    image.modified_time
                ],
            )
            .map_err(|e| CatalogError::from_sqlite(e, &image.file_path))?;
        tracing::debug!("Inserted record: {}", image.file_path);
        Ok(UpsertOutcome::Inserted)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<ImageRecord>> {
        self.query_one("SELECT * FROM images WHERE id = ?1", id)
    }

    pub fn get_by_path(&self, file_path: &str) -> Result<Option<ImageRecord>> {
        self.query_one("SELECT * FROM images WHERE file_path = ?1", file_path)
    }

    fn query_one(&self, sql: &str, arg: &str) -> Result<Option<ImageRecord>> {
        let mut stmt = self.conn.prepare(sql)?;
        let result = stmt.query_row(params![arg], row_to_record);
        match result {
            Ok(record) => Ok(Some(record)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CatalogError::Database(e)),
        }
    }

    pub fn get_all(&self) -> Result<Vec<ImageRecord>> {
        let mut stmt = self.conn.prepare("SELECT * FROM images ORDER BY file_path")?;
        let rows = stmt.query_map([], row_to_record)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }

    pub fn all_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT id FROM images")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    pub fn delete_by_path(&self, file_path: &str) -> Result<bool> {
        let rows = self
            .conn
            .execute("DELETE FROM images WHERE file_path = ?1", params![file_path])?;
        tracing::debug!("Deleted by path: {} (rows: {})", file_path, rows);
        Ok(rows > 0)
    }

    /// Audit path: remove a relational-only orphan by id.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let rows = self.conn.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        Ok(rows > 0)
    }

    pub fn count(&self) -> Result<u64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM images", [], |row| row.get(0))?)
    }

    /// Administrative reset. Drops and recreates the `images` table.
    pub fn drop_table(&self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            DROP TABLE IF EXISTS images;
            CREATE TABLE images (
                id TEXT PRIMARY KEY,
                file_path TEXT NOT NULL UNIQUE,
                file_name TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                content_hash TEXT,
                created_time INTEGER NOT NULL DEFAULT 0,
                modified_time INTEGER NOT NULL DEFAULT 0
            );
        "#,
        )?;
        tracing::info!("Metadata store reset");
        Ok(())
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ImageRecord> {
    Ok(ImageRecord {
        id: row.get("id")?,
        file_path: row.get("file_path")?,
        file_name: row.get("file_name")?,
        file_size: row.get("file_size")?,
        content_hash: row.get("content_hash")?,
        created_time: row.get("created_time")?,
        modified_time: row.get("modified_time")?,
    })
}
