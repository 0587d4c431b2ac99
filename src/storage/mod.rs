// FILE: src/storage/mod.rs
pub mod metadata;
pub mod semantic;

pub use metadata::{MetadataStore, UpsertOutcome};
pub use semantic::{DescriptionEntry, IndexHit, SemanticIndex};

use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::Path;

/// Catalog record for a single image file.
///
/// `id` is derived from `file_path`, not from content: a moved file gets a
/// new id, and moves are detected separately via `content_hash` equality.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub id: String,
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_hash: Option<String>,
    pub created_time: i64,
    pub modified_time: i64,
}

impl std::fmt::Display for ImageRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (id: {}, size: {})", self.file_path, &self.id[..8], self.file_size)
    }
}

/// Input for an upsert. The id is not part of the input; the store derives
/// it from `file_path` so the two stores can never disagree on derivation.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub file_path: String,
    pub file_name: String,
    pub file_size: u64,
    pub content_hash: Option<String>,
    pub created_time: i64,
    pub modified_time: i64,
}

impl NewImage {
    /// Build from a live filesystem entry. Does NOT hash the content;
    /// callers attach a hash only when they have one.
    pub fn from_fs(path: &Path) -> crate::error::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let to_secs = |t: std::io::Result<std::time::SystemTime>| {
            t.ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
        };
        Ok(Self {
            file_path: path.to_string_lossy().to_string(),
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
            file_size: meta.len(),
            content_hash: None,
            created_time: to_secs(meta.created()),
            modified_time: to_secs(meta.modified()),
        })
    }
}

/// Derive the catalog id for a file path. Shared by both stores.
pub fn image_id(file_path: &str) -> String {
    hex::encode(Sha256::digest(file_path.as_bytes()))
}

/// Streaming content digest, used only for move/duplicate detection.
pub fn hash_file_content(path: &Path) -> crate::error::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_deterministic_and_path_derived() {
        assert_eq!(image_id("/photos/a.jpg"), image_id("/photos/a.jpg"));
        assert_ne!(image_id("/photos/a.jpg"), image_id("/photos/b.jpg"));
    }

    #[test]
    fn content_hash_tracks_bytes_not_path() {
        let dir = tempfile::tempdir().unwrap();
        let p1 = dir.path().join("a.jpg");
        let p2 = dir.path().join("b.jpg");
        std::fs::write(&p1, b"same bytes").unwrap();
        std::fs::write(&p2, b"same bytes").unwrap();
        assert_eq!(hash_file_content(&p1).unwrap(), hash_file_content(&p2).unwrap());
    }
}
