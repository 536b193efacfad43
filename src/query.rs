//! Unified query engine over the combined text and table index.
//!
//! # Query flow
//!
//! ```text
//! question ──▶ lazy store load ──▶ similarity search (k × overfetch)
//!                                        │
//!                                        ▼
//!                         type filter ──▶ first k ──▶ QueryResult[]
//! ```
//!
//! The search over-fetches because filtering by content type happens
//! after the nearest-neighbour search. Results keep the index's relevance
//! order.
//!
//! The engine never fails a query: a store that cannot be loaded or a
//! search that errors yields an empty list, which callers treat as "no
//! results".

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use intel_qa_core::embedding::EmbeddingProvider;
use intel_qa_core::models::{ContentKind, FilterType, QueryResult};
use intel_qa_core::search::{select_hits, DisplayOptions};

use crate::config::Config;
use crate::store::VectorStore;

/// Running counters since process start.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryStats {
    pub total_queries: u64,
    pub text_results: u64,
    pub table_results: u64,
    pub last_query_time: Option<String>,
    pub vector_count: usize,
}

pub struct QueryEngine {
    index_dir: PathBuf,
    provider: Arc<dyn EmbeddingProvider>,
    store: RwLock<Option<VectorStore>>,
    stats: Mutex<QueryStats>,
    display: DisplayOptions,
    overfetch_factor: usize,
}

impl QueryEngine {
    /// An engine that loads its store from `[paths].index_dir` on first use.
    pub fn new(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            index_dir: config.paths.index_dir(),
            provider,
            store: RwLock::new(None),
            stats: Mutex::new(QueryStats::default()),
            display: DisplayOptions {
                text_chars: config.retrieval.display_chars,
                table_preview_lines: config.retrieval.table_preview_lines,
            },
            overfetch_factor: config.retrieval.overfetch_factor.max(1),
        }
    }

    /// An engine over an already built store.
    pub fn with_store(config: &Config, store: VectorStore) -> Self {
        let engine = Self::new(config, store.provider());
        Self {
            store: RwLock::new(Some(store)),
            ..engine
        }
    }

    pub fn provider(&self) -> Arc<dyn EmbeddingProvider> {
        self.provider.clone()
    }

    /// Load the store if none is held. Returns whether one is available.
    pub async fn ensure_loaded(&self) -> bool {
        if self.store.read().await.is_some() {
            return true;
        }
        let mut guard = self.store.write().await;
        if guard.is_some() {
            return true;
        }
        match VectorStore::load(&self.index_dir, self.provider.clone()) {
            Ok(store) => {
                *guard = Some(store);
                true
            }
            Err(e) => {
                warn!(dir = %self.index_dir.display(), error = %e, "vector store unavailable");
                false
            }
        }
    }

    /// Drop the held store and load it again from disk.
    pub async fn reload(&self) -> bool {
        self.store.write().await.take();
        let loaded = self.ensure_loaded().await;
        info!(loaded, "query engine reloaded");
        loaded
    }

    pub async fn is_loaded(&self) -> bool {
        self.store.read().await.is_some()
    }

    pub async fn vector_count(&self) -> usize {
        self.store
            .read()
            .await
            .as_ref()
            .map_or(0, VectorStore::vector_count)
    }

    /// The `k` best hits of the requested content type.
    pub async fn query(&self, question: &str, k: usize, filter: FilterType) -> Vec<QueryResult> {
        let results = self.search(question, k, filter).await;

        let mut stats = self.stats.lock().await;
        stats.total_queries += 1;
        for r in &results {
            match r.content_type {
                ContentKind::Text => stats.text_results += 1,
                ContentKind::Table => stats.table_results += 1,
            }
        }
        stats.last_query_time = Some(Utc::now().to_rfc3339());
        results
    }

    async fn search(&self, question: &str, k: usize, filter: FilterType) -> Vec<QueryResult> {
        if k == 0 || question.trim().is_empty() {
            return Vec::new();
        }
        if !self.ensure_loaded().await {
            return Vec::new();
        }
        let guard = self.store.read().await;
        let Some(store) = guard.as_ref() else {
            return Vec::new();
        };

        let fetch = k.saturating_mul(self.overfetch_factor);
        match store.similarity_search_with_score(question, fetch).await {
            Ok(hits) => {
                let results = select_hits(&hits, filter, k, &self.display);
                debug!(
                    filter = %filter,
                    fetched = hits.len(),
                    returned = results.len(),
                    "query complete"
                );
                results
            }
            Err(e) => {
                warn!(error = %e, "similarity search failed");
                Vec::new()
            }
        }
    }

    pub async fn search_tables_only(&self, question: &str, k: usize) -> Vec<QueryResult> {
        self.query(question, k, FilterType::Table).await
    }

    pub async fn search_text_only(&self, question: &str, k: usize) -> Vec<QueryResult> {
        self.query(question, k, FilterType::Text).await
    }

    pub async fn stats(&self) -> QueryStats {
        let mut stats = self.stats.lock().await.clone();
        stats.vector_count = self.vector_count().await;
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashProvider;
    use intel_qa_core::models::Document;
    use serde_json::{json, Map};

    fn meta(source: &str) -> Map<String, serde_json::Value> {
        let mut m = Map::new();
        m.insert("source".into(), json!(source));
        m
    }

    async fn engine() -> QueryEngine {
        let provider: Arc<dyn EmbeddingProvider> = Arc::new(HashProvider::new(128));
        let mut table_meta = meta("risk.pdf");
        table_meta.insert("table_type".into(), json!("general"));
        table_meta.insert("source_page".into(), json!(2));
        table_meta.insert("confidence".into(), json!(0.9));
        let docs = vec![
            Document::text("CREM 計算企業的網路風險指數 (CRI)", meta("crem.txt")),
            Document::text("Phishing remains the top initial access vector", meta("notes.txt")),
            Document::table(
                "表格標題: Research-Risk-Report-2025\n表格內容:\n  Rank: 1, Event: Phishing\n  Rank: 2, Event: Ransomware",
                table_meta,
            ),
        ];
        let store = VectorStore::build(provider, docs).await.unwrap();
        QueryEngine::with_store(&Config::minimal(), store)
    }

    #[tokio::test]
    async fn test_filters_by_type_and_bounds_k() {
        let e = engine().await;
        let tables = e.search_tables_only("top risk events phishing", 5).await;
        assert!(!tables.is_empty());
        assert!(tables.iter().all(|r| r.content_type == ContentKind::Table));
        assert!(tables[0].content.contains("Research-Risk-Report-2025"));

        let text = e.search_text_only("phishing", 5).await;
        assert!(text.iter().all(|r| r.content_type == ContentKind::Text));

        assert!(e.query("phishing", 1, FilterType::All).await.len() <= 1);
        assert!(e.query("phishing", 0, FilterType::All).await.is_empty());
    }

    #[tokio::test]
    async fn test_text_query_finds_source() {
        let e = engine().await;
        let results = e.query("什麼是 CRI", 3, FilterType::Text).await;
        assert_eq!(results[0].source, "crem.txt");
        assert!(results[0].confidence > 0.0);
        assert_eq!(results[0].rank, 1);
    }

    #[tokio::test]
    async fn test_stats_accumulate() {
        let e = engine().await;
        e.query("phishing", 3, FilterType::All).await;
        e.query("CRI", 1, FilterType::Text).await;
        let stats = e.stats().await;
        assert_eq!(stats.total_queries, 2);
        assert_eq!(stats.vector_count, 3);
        assert!(stats.text_results >= 1);
        assert!(stats.last_query_time.is_some());
    }

    #[tokio::test]
    async fn test_missing_index_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let e = QueryEngine::new(
            &Config::with_data_dir(dir.path()),
            Arc::new(HashProvider::new(16)),
        );
        assert!(e.query("anything", 5, FilterType::All).await.is_empty());
        assert!(!e.is_loaded().await);
        assert_eq!(e.stats().await.total_queries, 1);
    }
}
