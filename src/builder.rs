//! One-shot knowledge-base builds.
//!
//! Unlike the [updater](crate::updater), the builder ignores the manifest
//! and always writes a fresh index:
//!
//! ```text
//! chunks.json ──┐
//!               ├──▶ embed ──▶ VectorStore::build ──▶ save ──▶ validate
//! source dir ───┘
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use intel_qa_core::embedding::EmbeddingProvider;
use intel_qa_core::models::{Document, CONTENT_TYPE_KEY, CONTENT_TYPE_TEXT};

use crate::config::Config;
use crate::persist::read_json;
use crate::store::VectorStore;
use crate::updater::IncrementalUpdater;

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub vector_count: usize,
    pub vector_dim: usize,
    pub doc_count: usize,
    pub build_date: String,
}

pub struct KnowledgeBaseBuilder {
    config: Config,
    index_dir: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    doc_count: usize,
}

impl KnowledgeBaseBuilder {
    pub fn new(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            config: config.clone(),
            index_dir: config.paths.index_dir(),
            provider,
            doc_count: 0,
        }
    }

    /// Load a chunks file (`[{content, metadata}, ...]`). Chunks without a
    /// `content_type` are marked as text.
    pub fn load_chunks(path: &Path) -> Result<Vec<Document>> {
        let mut documents: Vec<Document> = read_json(path)?;
        for doc in &mut documents {
            doc.metadata
                .entry(CONTENT_TYPE_KEY)
                .or_insert_with(|| Value::from(CONTENT_TYPE_TEXT));
        }
        info!(path = %path.display(), count = documents.len(), "chunks loaded");
        Ok(documents)
    }

    pub async fn build_from_chunks_file(&mut self, path: &Path) -> Result<BuildSummary> {
        let documents = Self::load_chunks(path)?;
        self.build(documents).await
    }

    /// Process every source file and build an index from the result. The
    /// manifest is neither read nor written.
    pub async fn build_from_source_dir(&mut self) -> Result<BuildSummary> {
        let documents =
            IncrementalUpdater::detached(&self.config, self.provider.clone())?.process_all_sources()?;
        self.build(documents).await
    }

    async fn build(&mut self, documents: Vec<Document>) -> Result<BuildSummary> {
        if documents.is_empty() {
            bail!("No documents to build a knowledge base from");
        }
        self.doc_count = documents.len();
        info!(count = self.doc_count, "embedding documents");
        let store = VectorStore::build(self.provider.clone(), documents).await?;
        store.save(&self.index_dir)?;
        Ok(BuildSummary {
            vector_count: store.vector_count(),
            vector_dim: store.dims(),
            doc_count: self.doc_count,
            build_date: Utc::now().to_rfc3339(),
        })
    }

    /// Reload the saved index and check it holds one vector per document
    /// of the last build.
    pub fn validate(&self) -> Result<BuildSummary> {
        let store = VectorStore::load(&self.index_dir, self.provider.clone())?;
        if store.vector_count() != self.doc_count {
            bail!(
                "Index holds {} vectors but {} documents were built",
                store.vector_count(),
                self.doc_count
            );
        }
        let summary = BuildSummary {
            vector_count: store.vector_count(),
            vector_dim: store.dims(),
            doc_count: self.doc_count,
            build_date: Utc::now().to_rfc3339(),
        };
        info!(
            vectors = summary.vector_count,
            dims = summary.vector_dim,
            "knowledge base validated"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use intel_qa_core::models::ContentKind;

    fn builder(config: &Config) -> KnowledgeBaseBuilder {
        KnowledgeBaseBuilder::new(config, Arc::new(HashProvider::new(32)))
    }

    #[tokio::test]
    async fn test_build_from_chunks_file_and_validate() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let chunks = dir.path().join("text_chunks.json");
        std::fs::write(
            &chunks,
            r#"[
                {"content": "CREM 計算企業的網路風險指數", "metadata": {"source": "a.pdf"}},
                {"content": "Rank: 1, Event: Phishing", "metadata": {"source": "b.pdf", "content_type": "structured_table"}}
            ]"#,
        )
        .unwrap();

        let docs = KnowledgeBaseBuilder::load_chunks(&chunks).unwrap();
        assert_eq!(docs[0].kind(), ContentKind::Text);
        assert_eq!(docs[1].kind(), ContentKind::Table);

        let mut b = builder(&config);
        let summary = b.build_from_chunks_file(&chunks).await.unwrap();
        assert_eq!(summary.vector_count, 2);
        assert_eq!(summary.vector_dim, 32);
        assert_eq!(summary.doc_count, 2);
        assert_eq!(b.validate().unwrap().vector_count, 2);
    }

    #[tokio::test]
    async fn test_build_from_source_dir_leaves_manifest_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let src = config.paths.source_dir();
        std::fs::create_dir_all(&src).unwrap();
        std::fs::write(
            src.join("notes.txt"),
            "零信任架構要求每一次存取都必須經過驗證，並持續監控所有端點的風險狀態與行為。",
        )
        .unwrap();

        let summary = builder(&config).build_from_source_dir().await.unwrap();
        assert!(summary.vector_count >= 1);
        assert!(!config.paths.manifest().exists());
        let leftovers: Vec<_> = std::fs::read_dir(config.paths.index_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains("manifest"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_empty_build_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_data_dir(dir.path());
        let chunks = dir.path().join("empty.json");
        std::fs::write(&chunks, "[]").unwrap();
        assert!(builder(&config).build_from_chunks_file(&chunks).await.is_err());
    }
}
