//! Brute-force nearest-neighbour index.
//!
//! [`FlatIndex`] keeps every vector next to its [`Document`] and answers
//! queries by scanning all of them. Distance is cosine distance
//! (`1 − cosine`), so results are bounded in `[0, 2]` and `1 − distance`
//! is a usable similarity once clamped to `[0, 1]`.
//!
//! The vector half of the index serializes to a compact binary layout:
//!
//! ```text
//! b"IQAV" | version: u32 | dims: u32 | count: u64 | count × dims × f32 (LE)
//! ```
//!
//! Documents are persisted separately by the caller; [`FlatIndex::from_parts`]
//! rejects a vector/document count mismatch.

use thiserror::Error;

use crate::embedding::{blob_to_vec, cosine_distance, vec_to_blob};
use crate::models::Document;

const MAGIC: &[u8; 4] = b"IQAV";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

#[derive(Debug, Error, PartialEq)]
pub enum IndexError {
    #[error("dimension mismatch: index has {expected} dims, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("vector count ({vectors}) does not match document count ({documents})")]
    CountMismatch { vectors: usize, documents: usize },

    #[error("corrupt index data: {0}")]
    Corrupt(String),
}

/// Minimal nearest-neighbour store interface.
pub trait VectorIndex: Send + Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn dims(&self) -> usize;

    /// Append vectors with their documents. Both slices must be the same
    /// length and every vector must match the index dimensionality.
    fn add(&mut self, vectors: Vec<Vec<f32>>, documents: Vec<Document>) -> Result<(), IndexError>;

    /// The `k` nearest documents with their distances, nearest first.
    fn search(&self, query: &[f32], k: usize) -> Vec<(Document, f32)>;
}

/// Exhaustive cosine-distance index.
#[derive(Debug, Clone, Default)]
pub struct FlatIndex {
    dims: usize,
    vectors: Vec<Vec<f32>>,
    documents: Vec<Document>,
}

impl FlatIndex {
    /// An empty index. `dims == 0` adopts the width of the first vector added.
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            vectors: Vec::new(),
            documents: Vec::new(),
        }
    }

    pub fn from_parts(
        dims: usize,
        vectors: Vec<Vec<f32>>,
        documents: Vec<Document>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(dims);
        index.add(vectors, documents)?;
        Ok(index)
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn into_parts(self) -> (usize, Vec<Vec<f32>>, Vec<Document>) {
        (self.dims, self.vectors, self.documents)
    }

    /// Serialize the vectors (not the documents).
    pub fn vectors_to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_LEN + self.vectors.len() * self.dims * 4);
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&(self.dims as u32).to_le_bytes());
        out.extend_from_slice(&(self.vectors.len() as u64).to_le_bytes());
        for v in &self.vectors {
            out.extend_from_slice(&vec_to_blob(v));
        }
        out
    }

    /// Parse bytes written by [`FlatIndex::vectors_to_bytes`] into
    /// `(dims, vectors)`.
    pub fn vectors_from_bytes(bytes: &[u8]) -> Result<(usize, Vec<Vec<f32>>), IndexError> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::Corrupt(format!(
                "file too short ({} bytes)",
                bytes.len()
            )));
        }
        if &bytes[0..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".into()));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {}",
                version
            )));
        }
        let dims = u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]) as usize;
        let mut count_bytes = [0u8; 8];
        count_bytes.copy_from_slice(&bytes[12..20]);
        let count = u64::from_le_bytes(count_bytes) as usize;
        if dims == 0 && count > 0 {
            return Err(IndexError::Corrupt(format!(
                "{} vectors declared with zero dimensions",
                count
            )));
        }

        let body = &bytes[HEADER_LEN..];
        let expected = count
            .checked_mul(dims)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupt("header overflow".into()))?;
        if body.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "expected {} vector bytes, found {}",
                expected,
                body.len()
            )));
        }

        let vectors = if dims == 0 {
            Vec::new()
        } else {
            body.chunks_exact(dims * 4).map(blob_to_vec).collect()
        };
        Ok((dims, vectors))
    }
}

impl VectorIndex for FlatIndex {
    fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dims(&self) -> usize {
        self.dims
    }

    fn add(&mut self, vectors: Vec<Vec<f32>>, documents: Vec<Document>) -> Result<(), IndexError> {
        if vectors.len() != documents.len() {
            return Err(IndexError::CountMismatch {
                vectors: vectors.len(),
                documents: documents.len(),
            });
        }
        if self.dims == 0 {
            if let Some(first) = vectors.first() {
                self.dims = first.len();
            }
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: bad.len(),
            });
        }
        self.vectors.extend(vectors);
        self.documents.extend(documents);
        Ok(())
    }

    fn search(&self, query: &[f32], k: usize) -> Vec<(Document, f32)> {
        if k == 0 || query.len() != self.dims {
            return Vec::new();
        }
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(i, v)| (i, cosine_distance(query, v)))
            .collect();
        scored.sort_by(|a, b| a.1.total_cmp(&b.1));
        scored
            .into_iter()
            .take(k)
            .map(|(i, d)| (self.documents[i].clone(), d))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    fn doc(text: &str) -> Document {
        Document::text(text, Map::new())
    }

    #[test]
    fn test_search_orders_by_distance() {
        let mut idx = FlatIndex::new(2);
        idx.add(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.7, 0.7]],
            vec![doc("x"), doc("y"), doc("xy")],
        )
        .unwrap();
        let hits = idx.search(&[1.0, 0.1], 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0.page_content, "x");
        assert_eq!(hits[1].0.page_content, "xy");
        assert!(hits[0].1 <= hits[1].1);
    }

    #[test]
    fn test_search_bounds() {
        let idx = FlatIndex::from_parts(2, vec![vec![1.0, 0.0]], vec![doc("a")]).unwrap();
        assert_eq!(idx.search(&[1.0, 0.0], 10).len(), 1);
        assert!(idx.search(&[1.0, 0.0], 0).is_empty());
        assert!(idx.search(&[1.0], 1).is_empty());
    }

    #[test]
    fn test_add_validates_shape() {
        let mut idx = FlatIndex::new(0);
        idx.add(vec![vec![1.0, 2.0, 3.0]], vec![doc("a")]).unwrap();
        assert_eq!(idx.dims(), 3);
        assert_eq!(
            idx.add(vec![vec![1.0]], vec![doc("b")]),
            Err(IndexError::DimensionMismatch { expected: 3, got: 1 })
        );
        assert!(matches!(
            idx.add(vec![], vec![doc("c")]),
            Err(IndexError::CountMismatch { .. })
        ));
        assert_eq!(idx.len(), 1);
    }

    #[test]
    fn test_bytes_roundtrip_and_corruption() {
        let idx = FlatIndex::from_parts(
            2,
            vec![vec![0.5, -1.0], vec![2.0, 0.25]],
            vec![doc("a"), doc("b")],
        )
        .unwrap();
        let bytes = idx.vectors_to_bytes();
        let (dims, vectors) = FlatIndex::vectors_from_bytes(&bytes).unwrap();
        assert_eq!(dims, 2);
        assert_eq!(vectors, vec![vec![0.5, -1.0], vec![2.0, 0.25]]);

        assert!(FlatIndex::vectors_from_bytes(&bytes[..bytes.len() - 3]).is_err());
        assert!(FlatIndex::vectors_from_bytes(b"nope").is_err());
        let mut bad = bytes.clone();
        bad[0] = b'X';
        assert!(matches!(
            FlatIndex::vectors_from_bytes(&bad),
            Err(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_zero_dims_header_rejects_vectors() {
        let empty = FlatIndex::new(0).vectors_to_bytes();
        let (dims, vectors) = FlatIndex::vectors_from_bytes(&empty).unwrap();
        assert_eq!(dims, 0);
        assert!(vectors.is_empty());

        let mut forged = empty.clone();
        forged[12..20].copy_from_slice(&u64::MAX.to_le_bytes());
        assert!(matches!(
            FlatIndex::vectors_from_bytes(&forged),
            Err(IndexError::Corrupt(_))
        ));
    }
}
