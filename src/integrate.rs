//! Table vector integration: merge a table-texts artifact into the
//! vector store.
//!
//! Each [`TableText`] becomes one `structured_table` [`Document`]. The
//! documents are appended to the saved store when one loads, otherwise a
//! new store is built from the tables alone.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::{info, warn};

use intel_qa_core::embedding::EmbeddingProvider;
use intel_qa_core::models::{Document, TableText};
use intel_qa_core::table_text::TableTextsArtifact;

use crate::persist::read_json;
use crate::store::VectorStore;

/// Outcome of one integration run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrationStats {
    pub total_tables: usize,
    pub integrated_tables: usize,
    pub vector_count_before: usize,
    pub vector_count_after: usize,
    pub integration_date: String,
}

/// Index document for one rendered table.
///
/// Returns `None` when the table has no `source_file`, since a hit that
/// cannot be attributed is useless as a citation.
pub fn table_document(table_text: &TableText) -> Option<Document> {
    let meta = &table_text.metadata;
    let source = meta.get("source_file").and_then(Value::as_str)?;
    let field = |key: &str| meta.get(key).cloned().unwrap_or(Value::Null);

    let mut metadata = Map::new();
    metadata.insert("source".into(), Value::from(source));
    metadata.insert("source_type".into(), Value::from("table"));
    metadata.insert("table_id".into(), Value::from(table_text.table_id.clone()));
    metadata.insert("table_type".into(), field("table_type"));
    metadata.insert("source_page".into(), field("source_page"));
    metadata.insert("confidence".into(), field("confidence"));
    metadata.insert("extractor_method".into(), field("extractor_method"));
    metadata.insert("processed_date".into(), field("conversion_date"));
    Some(Document::table(table_text.content.clone(), metadata))
}

pub struct TableVectorIntegrator {
    index_dir: std::path::PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
}

impl TableVectorIntegrator {
    pub fn new(index_dir: impl Into<std::path::PathBuf>, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index_dir: index_dir.into(),
            provider,
        }
    }

    /// Map table texts to documents, skipping unattributable ones.
    pub fn to_documents(table_texts: &[TableText]) -> Vec<Document> {
        table_texts
            .iter()
            .filter_map(|tt| {
                let doc = table_document(tt);
                if doc.is_none() {
                    warn!(table_id = %tt.table_id, "table text has no source_file, skipped");
                }
                doc
            })
            .collect()
    }

    /// Integrate the artifact at `table_texts_path`. With `force_rebuild`
    /// the saved store is ignored and replaced by the tables alone.
    pub async fn integrate(&self, table_texts_path: &Path, force_rebuild: bool) -> Result<IntegrationStats> {
        let artifact: TableTextsArtifact = read_json(table_texts_path)?;
        self.integrate_texts(&artifact.table_texts, force_rebuild).await
    }

    pub async fn integrate_texts(
        &self,
        table_texts: &[TableText],
        force_rebuild: bool,
    ) -> Result<IntegrationStats> {
        let mut stats = IntegrationStats {
            total_tables: table_texts.len(),
            integration_date: Utc::now().to_rfc3339(),
            ..Default::default()
        };

        let existing = if force_rebuild {
            info!("force rebuild: ignoring saved vector store");
            None
        } else {
            self.load_existing()
        };
        stats.vector_count_before = existing.as_ref().map_or(0, VectorStore::vector_count);

        let documents = Self::to_documents(table_texts);
        stats.integrated_tables = documents.len();
        if documents.is_empty() {
            warn!("no table documents to integrate");
            stats.vector_count_after = stats.vector_count_before;
            return Ok(stats);
        }

        let store = match existing {
            Some(mut store) => {
                store.add_documents(documents).await?;
                store
            }
            None => VectorStore::build(self.provider.clone(), documents).await?,
        };
        store.save(&self.index_dir)?;
        stats.vector_count_after = store.vector_count();

        info!(
            integrated = stats.integrated_tables,
            before = stats.vector_count_before,
            after = stats.vector_count_after,
            "table integration complete"
        );
        Ok(stats)
    }

    fn load_existing(&self) -> Option<VectorStore> {
        if !VectorStore::exists(&self.index_dir) {
            info!(dir = %self.index_dir.display(), "no saved vector store, building a new one");
            return None;
        }
        match VectorStore::load(&self.index_dir, self.provider.clone()) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(error = %e, "failed to load vector store, building a new one");
                None
            }
        }
    }
}
