//! Semantic index: embedding half of the catalog
//!
//! Lives in its own directory with its own SQLite file, entirely separate
//! from the metadata store; the two only agree through the shared id
//! derivation and the auditor. Descriptions are embedded on write and
//! searched with sqlite-vec cosine distance.

use crate::embedding::TextEmbedder;
use crate::error::{CatalogError, Result};
use crate::storage::image_id;
use rusqlite::{params, Connection};
use std::cell::RefCell;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Once;

static REGISTER_VEC: Once = Once::new();

/// Register sqlite-vec with SQLite, once per process, before any connection
/// that needs the vec0 module is opened.
fn register_sqlite_vec_extension() -> Result<()> {
    let mut failed = false;
    REGISTER_VEC.call_once(|| {
        unsafe {
            // sqlite3_auto_extension needs the init function cast to the
            // generic extension entry-point signature.
            let result = rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute(
                sqlite_vec::sqlite3_vec_init as *const (),
            )));
            if result != rusqlite::ffi::SQLITE_OK {
                failed = true;
            }
        }
        if !failed {
            tracing::info!("Registered sqlite-vec extension");
        }
    });
    if failed {
        return Err(CatalogError::Connection(
            "failed to register sqlite-vec extension".into(),
        ));
    }
    Ok(())
}

/// One entry of the index: the description text plus identity columns.
/// The embedding itself stays internal to the store.
#[derive(Debug, Clone, PartialEq)]
pub struct DescriptionEntry {
    pub id: String,
    pub file_path: String,
    pub description: String,
}

/// A ranked similarity hit, before hydration against the metadata store.
#[derive(Debug, Clone)]
pub struct IndexHit {
    pub id: String,
    pub file_path: String,
    pub description: String,
    pub score: f32,
}

pub struct SemanticIndex {
    conn: Connection,
    embedder: RefCell<Box<dyn TextEmbedder>>,
}

impl SemanticIndex {
    /// Open (or create) the index under `dir`. The vector table is created
    /// with the embedder's dimension; reopening with a different embedder
    /// width is a caller error surfaced by sqlite-vec on insert.
    pub fn open(dir: &Path, embedder: Box<dyn TextEmbedder>) -> Result<Self> {
        register_sqlite_vec_extension()?;
        std::fs::create_dir_all(dir)?;

        let db_path = dir.join("index.db");
        let conn = Connection::open(&db_path)
            .map_err(|e| CatalogError::Connection(format!("{}: {}", db_path.display(), e)))?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS descriptions (
                entry_id INTEGER PRIMARY KEY AUTOINCREMENT,
                image_id TEXT NOT NULL UNIQUE,
                file_path TEXT NOT NULL,
                description TEXT NOT NULL
            );
        "#,
        )?;

        conn.execute_batch(&format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS description_vectors USING vec0(
                entry_id INTEGER,
                embedding float[{}] distance_metric=cosine
            )",
            embedder.dim()
        ))?;

        tracing::info!("Semantic index ready: {}", db_path.display());
        Ok(Self { conn, embedder: RefCell::new(embedder) })
    }

    /// Add a description for a path. No native upsert here: an existing
    /// entry for the same id is deleted first, then the new one inserted.
    ///
    /// The description row and its vector row are written in one index
    /// transaction, so a failed vector insert cannot leave behind a
    /// searchless description row the auditor would never flag (its id
    /// would still be present in both stores).
    pub fn add(&self, file_path: &str, description: &str) -> Result<String> {
        let id = image_id(file_path);

        let embedding = {
            let mut embedder = self.embedder.borrow_mut();
            let mut vectors = embedder.embed(&[description])?;
            vectors
                .pop()
                .ok_or_else(|| CatalogError::Embedding("embedder returned no vector".into()))?
        };
        let bytes: Vec<u8> = bytemuck::cast_slice(&embedding).to_vec();

        let tx = self.conn.unchecked_transaction()?;
        if let Some(entry_id) = entry_id_for(&tx, &id)? {
            tracing::debug!("Replacing existing index entry: {}", file_path);
            remove_entry(&tx, entry_id)?;
        }
        tx.execute(
            "INSERT INTO descriptions (image_id, file_path, description) VALUES (?1, ?2, ?3)",
            params![id, file_path, description],
        )?;
        let entry_id = tx.last_insert_rowid();
        tx.execute(
            "INSERT INTO description_vectors (entry_id, embedding) VALUES (?1, ?2)",
            params![entry_id, bytes],
        )?;
        tx.commit()?;

        tracing::debug!("Indexed description for: {}", file_path);
        Ok(id)
    }

    pub fn delete(&self, file_path: &str) -> Result<bool> {
        self.delete_by_id(&image_id(file_path))
    }

    /// Audit path: remove an index-only orphan by id. Both rows of the
    /// entry go in one index transaction.
    pub fn delete_by_id(&self, id: &str) -> Result<bool> {
        let tx = self.conn.unchecked_transaction()?;
        let Some(entry_id) = entry_id_for(&tx, id)? else {
            return Ok(false);
        };
        remove_entry(&tx, entry_id)?;
        tx.commit()?;
        tracing::debug!("Removed index entry: {}", &id[..8.min(id.len())]);
        Ok(true)
    }

    pub fn get(&self, id: &str) -> Result<Option<DescriptionEntry>> {
        let result = self.conn.query_row(
            "SELECT image_id, file_path, description FROM descriptions WHERE image_id = ?1",
            params![id],
            |row| {
                Ok(DescriptionEntry {
                    id: row.get(0)?,
                    file_path: row.get(1)?,
                    description: row.get(2)?,
                })
            },
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(CatalogError::Database(e)),
        }
    }

    /// Nearest descriptions to a text query, best first.
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<IndexHit>> {
        let embedding = {
            let mut embedder = self.embedder.borrow_mut();
            let mut vectors = embedder.embed(&[query])?;
            vectors
                .pop()
                .ok_or_else(|| CatalogError::Embedding("embedder returned no vector".into()))?
        };
        let bytes: Vec<u8> = bytemuck::cast_slice(&embedding).to_vec();

        let sql = "SELECT d.image_id, d.file_path, d.description, v.distance
                   FROM (SELECT entry_id, distance FROM description_vectors
                         WHERE embedding MATCH ?1 ORDER BY distance ASC LIMIT ?2) v
                   JOIN descriptions d ON d.entry_id = v.entry_id
                   ORDER BY v.distance ASC";
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![bytes, limit], |row| {
            let distance: f32 = row.get(3)?;
            Ok(IndexHit {
                id: row.get(0)?,
                file_path: row.get(1)?,
                description: row.get(2)?,
                score: 1.0 - distance,
            })
        })?;

        let mut hits = Vec::new();
        for row in rows {
            hits.push(row?);
        }
        Ok(hits)
    }

    pub fn all_ids(&self) -> Result<HashSet<String>> {
        let mut stmt = self.conn.prepare("SELECT image_id FROM descriptions")?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        let mut ids = HashSet::new();
        for row in rows {
            ids.insert(row?);
        }
        Ok(ids)
    }

    pub fn clear_all(&self) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        tx.execute("DELETE FROM description_vectors", [])?;
        tx.execute("DELETE FROM descriptions", [])?;
        tx.commit()?;
        tracing::info!("Semantic index cleared");
        Ok(())
    }

    pub fn count(&self) -> Result<u64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM descriptions", [], |row| row.get(0))?)
    }
}

fn entry_id_for(conn: &Connection, id: &str) -> Result<Option<i64>> {
    let result = conn.query_row(
        "SELECT entry_id FROM descriptions WHERE image_id = ?1",
        params![id],
        |row| row.get(0),
    );
    match result {
        Ok(entry_id) => Ok(Some(entry_id)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(CatalogError::Database(e)),
    }
}

fn remove_entry(conn: &Connection, entry_id: i64) -> Result<()> {
    conn.execute(
        "DELETE FROM description_vectors WHERE entry_id = ?1",
        params![entry_id],
    )?;
    conn.execute("DELETE FROM descriptions WHERE entry_id = ?1", params![entry_id])?;
    Ok(())
}
