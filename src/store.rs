//! Persisted vector store: a [`FlatIndex`] bound to the embedding
//! provider that produced its vectors.
//!
//! # On-disk layout
//!
//! ```text
//! <index_dir>/
//! ├── index.vec       binary vectors (see intel_qa_core::index)
//! └── docstore.json   { "model": ..., "dims": ..., "documents": [...] }
//! ```
//!
//! Both files are written through [`write_atomic`](crate::persist::write_atomic).
//! The store format is trusted input: it is only ever produced by this
//! pipeline.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use intel_qa_core::embedding::EmbeddingProvider;
use intel_qa_core::index::{FlatIndex, IndexError, VectorIndex};
use intel_qa_core::models::Document;

use crate::persist::{read_json, write_atomic, write_json_atomic};

pub const INDEX_FILE: &str = "index.vec";
pub const DOCSTORE_FILE: &str = "docstore.json";

#[derive(Debug, Serialize, Deserialize)]
struct DocStore {
    model: String,
    dims: usize,
    documents: Vec<Document>,
}

/// Vectors plus documents, searchable by query text.
pub struct VectorStore {
    index: FlatIndex,
    provider: Arc<dyn EmbeddingProvider>,
}

impl VectorStore {
    /// An empty store. Its dimensionality is fixed by the first batch added.
    pub fn empty(provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index: FlatIndex::new(0),
            provider,
        }
    }

    /// Embed `documents` and build a fresh store from them.
    pub async fn build(
        provider: Arc<dyn EmbeddingProvider>,
        documents: Vec<Document>,
    ) -> Result<Self> {
        let mut store = Self::empty(provider);
        store.add_documents(documents).await?;
        Ok(store)
    }

    /// Embed and append `documents`. Returns the number added.
    pub async fn add_documents(&mut self, documents: Vec<Document>) -> Result<usize> {
        if documents.is_empty() {
            return Ok(0);
        }
        let texts: Vec<String> = documents.iter().map(|d| d.page_content.clone()).collect();
        let vectors = self
            .provider
            .embed(&texts)
            .await
            .with_context(|| format!("Failed to embed {} documents", texts.len()))?;
        let added = documents.len();
        self.index.add(vectors, documents)?;
        debug!(added, total = self.index.len(), "documents added to vector store");
        Ok(added)
    }

    /// The `k` nearest documents to `query` with their cosine distances,
    /// nearest first.
    pub async fn similarity_search_with_score(
        &self,
        query: &str,
        k: usize,
    ) -> Result<Vec<(Document, f32)>> {
        if self.index.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vector = self.provider.embed_one(query).await?;
        Ok(self.index.search(&vector, k))
    }

    pub fn vector_count(&self) -> usize {
        self.index.len()
    }

    pub fn dims(&self) -> usize {
        self.index.dims()
    }

    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        self.provider.clone()
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn documents(&self) -> &[Document] {
        self.index.documents()
    }

    /// Whether `dir` holds a saved store.
    pub fn exists(dir: &Path) -> bool {
        dir.join(INDEX_FILE).is_file() && dir.join(DOCSTORE_FILE).is_file()
    }

    pub fn save(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create index directory: {}", dir.display()))?;
        write_atomic(&dir.join(INDEX_FILE), &self.index.vectors_to_bytes())?;
        let docstore = DocStore {
            model: self.provider.model_name().to_string(),
            dims: self.index.dims(),
            documents: self.index.documents().to_vec(),
        };
        write_json_atomic(&dir.join(DOCSTORE_FILE), &docstore)?;
        info!(
            dir = %dir.display(),
            vectors = self.index.len(),
            dims = self.index.dims(),
            "vector store saved"
        );
        Ok(())
    }

    /// Load a saved store. Fails on missing files or any inconsistency
    /// between the two halves; callers treat that as "no index".
    pub fn load(dir: &Path, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let index_path = dir.join(INDEX_FILE);
        let bytes = std::fs::read(&index_path)
            .with_context(|| format!("Failed to read {}", index_path.display()))?;
        let (dims, vectors) = FlatIndex::vectors_from_bytes(&bytes)
            .with_context(|| format!("Invalid vector file {}", index_path.display()))?;
        let docstore: DocStore = read_json(&dir.join(DOCSTORE_FILE))?;

        if docstore.documents.len() != vectors.len() {
            return Err(IndexError::Corrupt(format!(
                "{} vectors but {} documents",
                vectors.len(),
                docstore.documents.len()
            ))
            .into());
        }
        if docstore.dims != dims {
            return Err(IndexError::Corrupt(format!(
                "docstore says {} dims, vector file has {}",
                docstore.dims, dims
            ))
            .into());
        }
        if docstore.model != provider.model_name() {
            warn!(
                stored = %docstore.model,
                configured = provider.model_name(),
                "index was built with a different embedding model; results may be meaningless"
            );
        }

        let index = FlatIndex::from_parts(dims, vectors, docstore.documents)?;
        info!(dir = %dir.display(), vectors = index.len(), dims, "vector store loaded");
        Ok(Self { index, provider })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use serde_json::Map;

    fn provider() -> Arc<dyn EmbeddingProvider> {
        Arc::new(HashProvider::new(64))
    }

    fn docs() -> Vec<Document> {
        vec![
            Document::text("CREM 計算企業的網路風險指數 (CRI)", Map::new()),
            Document::text("Ransomware attacks rose sharply", Map::new()),
        ]
    }

    #[tokio::test]
    async fn test_build_and_search() {
        let store = VectorStore::build(provider(), docs()).await.unwrap();
        assert_eq!(store.vector_count(), 2);
        assert_eq!(store.dims(), 64);

        let hits = store.similarity_search_with_score("什麼是 CRI", 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].0.page_content.contains("CRI"));
        assert!(hits[0].1 < 1.0);
    }

    #[tokio::test]
    async fn test_empty_store_search_is_empty() {
        let store = VectorStore::empty(provider());
        assert!(store.similarity_search_with_score("x", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = VectorStore::build(provider(), docs()).await.unwrap();
        store
            .add_documents(vec![Document::table("表格標題: T", Map::new())])
            .await
            .unwrap();
        store.save(dir.path()).unwrap();
        assert!(VectorStore::exists(dir.path()));

        let loaded = VectorStore::load(dir.path(), provider()).unwrap();
        assert_eq!(loaded.vector_count(), 3);
        assert_eq!(loaded.documents()[2].page_content, "表格標題: T");
    }

    #[tokio::test]
    async fn test_load_rejects_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let store = VectorStore::build(provider(), docs()).await.unwrap();
        store.save(dir.path()).unwrap();

        let docstore = DocStore {
            model: "feature-hash-v1".into(),
            dims: 64,
            documents: docs()[..1].to_vec(),
        };
        write_json_atomic(&dir.path().join(DOCSTORE_FILE), &docstore).unwrap();

        let err = VectorStore::load(dir.path(), provider()).err().unwrap();
        assert!(matches!(
            err.downcast_ref::<IndexError>(),
            Some(IndexError::Corrupt(_))
        ));
    }

    #[test]
    fn test_load_missing_dir_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!VectorStore::exists(dir.path()));
        assert!(VectorStore::load(&dir.path().join("nope"), provider()).is_err());
    }
}
