//! Text embedding seam for the semantic index
//!
//! The index only needs "text in, fixed-width vector out", so the model sits
//! behind a trait. The default implementation wraps fastembed; the hashing
//! implementation is deterministic and model-free, used in tests and as an
//! offline fallback.

use crate::error::{CatalogError, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use sha2::{Digest, Sha256};

pub trait TextEmbedder: Send {
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Vector width. Fixed for the lifetime of the index directory.
    fn dim(&self) -> usize;
}

/// fastembed-backed embedder (BAAI/bge-small-en-v1.5, 384 dimensions).
///
/// Construction downloads the model on first use and can take a while.
pub struct FastEmbedder {
    model: TextEmbedding,
}

impl FastEmbedder {
    pub const DIM: usize = 384;

    pub fn new() -> Result<Self> {
        let model = TextEmbedding::try_new(InitOptions::new(EmbeddingModel::BGESmallENV15))
            .map_err(|e| CatalogError::Embedding(format!("failed to load model: {}", e)))?;
        tracing::info!("Embedding model loaded (bge-small-en-v1.5, {} dims)", Self::DIM);
        Ok(Self { model })
    }
}

impl TextEmbedder for FastEmbedder {
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        self.model
            .embed(texts.to_vec(), None)
            .map_err(|e| CatalogError::Embedding(format!("failed to embed text: {}", e)))
    }

    fn dim(&self) -> usize {
        Self::DIM
    }
}

/// Deterministic bag-of-tokens embedder. Each token is hashed into a bucket
/// and the vector is L2-normalized, so identical descriptions always land on
/// the same point and shared vocabulary pulls descriptions together.
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl TextEmbedder for HashingEmbedder {
    fn embed(&mut self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let mut vec = vec![0f32; self.dim];
            for token in text.split_whitespace() {
                let digest = Sha256::digest(token.to_lowercase().as_bytes());
                let bucket = u32::from_le_bytes([digest[0], digest[1], digest[2], digest[3]])
                    as usize
                    % self.dim;
                vec[bucket] += 1.0;
            }
            let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
            if norm > 0.0 {
                for v in vec.iter_mut() {
                    *v /= norm;
                }
            }
            out.push(vec);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashing_embedder_is_deterministic() {
        let mut embedder = HashingEmbedder::new(64);
        let a = embedder.embed(&["a dog on a beach"]).unwrap();
        let b = embedder.embed(&["a dog on a beach"]).unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].len(), 64);
    }

    #[test]
    fn related_text_scores_closer_than_unrelated() {
        let mut embedder = HashingEmbedder::new(64);
        let vecs = embedder
            .embed(&["dog on beach", "a dog on the beach", "spreadsheet quarterly report"])
            .unwrap();
        let dot = |a: &[f32], b: &[f32]| a.iter().zip(b).map(|(x, y)| x * y).sum::<f32>();
        assert!(dot(&vecs[0], &vecs[1]) > dot(&vecs[0], &vecs[2]));
    }
}
