//! Incremental knowledge-base updates.
//!
//! The updater keeps a manifest of every source file it has ingested
//! (`processed_files.json`) and only reprocesses files whose content hash
//! changed since the last run.
//!
//! # Per-file lifecycle
//!
//! ```text
//!  untracked ──▶ new ──▶ processed ──▶ tracked(v=1)
//!                                          │
//!            content hash differs ──▶ modified ──▶ processed ──▶ tracked(v+1)
//!            content hash equal   ──▶ unchanged (skipped)
//! ```
//!
//! Files that vanish from the source directory stay in the manifest and
//! their vectors stay in the index. Modified files are appended: vectors
//! from the previous version are not retracted.
//!
//! # Failure handling
//!
//! | Failure | Effect |
//! |---------|--------|
//! | Saved index missing or unreadable | Fresh index built from this run's content; manifest kept |
//! | One file fails to process | Logged and skipped; its manifest entry is untouched so the next run retries |
//! | Table extraction finds nothing | Text chunks are still indexed |

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use intel_qa_core::embedding::EmbeddingProvider;
use intel_qa_core::models::Document;
use intel_qa_core::table_text::TableTextConverter;
use intel_qa_core::text::TextProcessor;

use crate::config::Config;
use crate::extract::{extract_document_text, file_label, SourceKind, StrategyRegistry};
use crate::integrate::table_document;
use crate::persist::{read_json, write_json_atomic};
use crate::store::VectorStore;

/// Ingestion state of one source file, persisted in the manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileRecord {
    pub filename: String,
    /// Hex SHA-256 of the file content.
    pub file_hash: String,
    pub file_size: u64,
    pub last_modified: String,
    pub processed_date: String,
    /// Text chunks plus table documents indexed for this version.
    pub chunk_count: usize,
    pub source_type: String,
    #[serde(default = "default_version")]
    pub version: u32,
}

fn default_version() -> u32 {
    1
}

/// Manifest: manifest key → record. Ordered for stable JSON output.
pub type Manifest = BTreeMap<String, FileRecord>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeStatus {
    NotFound,
    New,
    Modified,
    Unchanged,
}

/// Current on-disk facts about a file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub file_hash: String,
    pub file_size: u64,
    pub last_modified: String,
}

/// Result of [`IncrementalUpdater::detect_file_changes`].
#[derive(Debug, Clone, Serialize)]
pub struct FileChange {
    pub status: ChangeStatus,
    pub reasons: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current: Option<FileInfo>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version: Option<u32>,
}

impl FileChange {
    pub fn needs_processing(&self) -> bool {
        matches!(self.status, ChangeStatus::New | ChangeStatus::Modified)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    Updated,
    NoUpdatesNeeded,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdateSummary {
    pub status: UpdateStatus,
    pub processed_files: usize,
    pub new_chunks: usize,
    pub total_files: usize,
    pub vector_count: usize,
    pub vector_dim: usize,
    pub file_changes: BTreeMap<String, FileChange>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemInfo {
    pub total_files: usize,
    pub total_chunks: usize,
    pub vector_count: usize,
    pub vector_dim: usize,
    pub files: Vec<FileRecord>,
}

/// SHA-256 of a file, streamed.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Hash, size and modification time of `path`.
pub fn file_info(path: &Path) -> Result<FileInfo> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let last_modified = meta
        .modified()
        .map(|t| DateTime::<Utc>::from(t).to_rfc3339())
        .unwrap_or_default();
    Ok(FileInfo {
        file_hash: hash_file(path)?,
        file_size: meta.len(),
        last_modified,
    })
}

/// Globs match case-insensitively, so `REPORT.PDF` counts as a PDF.
fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = GlobBuilder::new(pattern)
            .case_insensitive(true)
            .build()
            .with_context(|| format!("Invalid glob: {}", pattern))?;
        builder.add(glob);
    }
    Ok(builder.build()?)
}

pub struct IncrementalUpdater {
    source_dir: PathBuf,
    index_dir: PathBuf,
    /// `None` for a detached updater, which never persists its manifest.
    manifest_path: Option<PathBuf>,
    include: GlobSet,
    exclude: GlobSet,
    processor: TextProcessor,
    registry: Option<StrategyRegistry>,
    provider: Arc<dyn EmbeddingProvider>,
    manifest: Manifest,
}

impl IncrementalUpdater {
    /// Build an updater from config and load the manifest. A missing
    /// manifest starts empty; an unparsable one is an error so it is
    /// never silently overwritten.
    pub fn new(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let manifest_path = config.paths.manifest();
        let manifest = if manifest_path.exists() {
            read_json(&manifest_path)?
        } else {
            Manifest::new()
        };
        let mut updater = Self::detached(config, provider)?;
        updater.manifest_path = Some(manifest_path);
        updater.manifest = manifest;
        Ok(updater)
    }

    /// An updater that neither reads nor writes the manifest. Every run
    /// sees every source file as new.
    pub fn detached(config: &Config, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let processor = TextProcessor::new(
            config.text.technical_terms.clone(),
            config.chunking.chunk_size,
            config.chunking.chunk_overlap,
        )?
        .with_min_chunk_chars(config.text.min_chunk_chars);
        let registry = config
            .tables
            .enabled
            .then(|| StrategyRegistry::from_config(&config.tables));

        Ok(Self {
            source_dir: config.paths.source_dir(),
            index_dir: config.paths.index_dir(),
            manifest_path: None,
            include: build_globset(&config.source.include_globs)?,
            exclude: build_globset(&config.source.exclude_globs)?,
            processor,
            registry,
            provider,
            manifest: Manifest::new(),
        })
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Manifest key for a file: its path relative to the source directory.
    fn key_for(&self, path: &Path) -> String {
        path.strip_prefix(&self.source_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Source files matching the include globs and not the exclude globs,
    /// in file-name order.
    pub fn scan_sources(&self) -> Result<Vec<PathBuf>> {
        if !self.source_dir.exists() {
            warn!(dir = %self.source_dir.display(), "source directory missing, creating it");
            std::fs::create_dir_all(&self.source_dir)?;
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&self.source_dir).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = self.key_for(entry.path());
            if self.exclude.is_match(&rel) || !self.include.is_match(&rel) {
                continue;
            }
            files.push(entry.into_path());
        }
        Ok(files)
    }

    /// Compare a file against its manifest record.
    ///
    /// The content hash decides: equal hashes mean `unchanged` even when
    /// size or mtime moved, and those differences are reported as reasons.
    pub fn detect_file_changes(&self, path: &Path) -> Result<FileChange> {
        if !path.is_file() {
            return Ok(FileChange {
                status: ChangeStatus::NotFound,
                reasons: vec!["文件不存在".into()],
                current: None,
                previous_version: None,
            });
        }
        let current = file_info(path)?;
        let Some(previous) = self.manifest.get(&self.key_for(path)) else {
            return Ok(FileChange {
                status: ChangeStatus::New,
                reasons: vec!["新文件".into()],
                current: Some(current),
                previous_version: None,
            });
        };

        let mut reasons = Vec::new();
        if current.file_hash != previous.file_hash {
            reasons.push("文件內容已變更".to_string());
        }
        if current.file_size != previous.file_size {
            reasons.push("檔案大小已變更".to_string());
        }
        if current.last_modified != previous.last_modified {
            reasons.push("修改時間已變更".to_string());
        }

        let status = if current.file_hash != previous.file_hash {
            ChangeStatus::Modified
        } else {
            if reasons.is_empty() {
                reasons.push("文件未變更".into());
            }
            ChangeStatus::Unchanged
        };
        Ok(FileChange {
            status,
            reasons,
            current: Some(current),
            previous_version: Some(previous.version),
        })
    }

    /// Turn one source file into index documents: text chunks, plus
    /// table documents for PDFs.
    pub fn process_file(&self, path: &Path, version: u32) -> Result<Vec<Document>> {
        let Some(kind) = SourceKind::of(path) else {
            bail!("Unsupported source file: {}", path.display());
        };
        let source = file_label(path);
        let processed_date = Utc::now().to_rfc3339();
        info!(file = %source, version, "processing source file");

        let raw = extract_document_text(path)?;
        let chunks = self.processor.process(&raw, &source);

        let mut documents: Vec<Document> = chunks
            .into_iter()
            .map(|chunk| {
                let mut metadata = Map::new();
                metadata.insert("source".into(), Value::from(source.clone()));
                metadata.insert("source_type".into(), Value::from(kind.as_str()));
                metadata.insert("chunk_id".into(), Value::from(chunk.chunk_id.clone()));
                metadata.insert("chunk_index".into(), Value::from(chunk.chunk_index));
                metadata.insert("chunk_size".into(), Value::from(chunk.chunk_size()));
                metadata.insert(
                    "technical_terms".into(),
                    Value::from(chunk.technical_terms.clone()),
                );
                metadata.insert("processed_date".into(), Value::from(processed_date.clone()));
                metadata.insert("file_version".into(), Value::from(version));
                Document::text(chunk.content, metadata)
            })
            .collect();
        let text_count = documents.len();

        if let (SourceKind::Pdf, Some(registry)) = (kind, &self.registry) {
            let tables = registry.extract_tables(path);
            let texts = TableTextConverter::new().convert_records(&tables);
            documents.extend(texts.iter().filter_map(table_document).map(|mut doc| {
                doc.metadata.insert("file_version".into(), Value::from(version));
                doc
            }));
        }

        debug!(
            file = %source,
            text_chunks = text_count,
            table_documents = documents.len() - text_count,
            "source file processed"
        );
        Ok(documents)
    }

    /// Process every scanned source file at version 1. Files that fail
    /// are logged and skipped; the manifest is untouched.
    pub fn process_all_sources(&self) -> Result<Vec<Document>> {
        let mut documents = Vec::new();
        for path in self.scan_sources()? {
            match self.process_file(&path, 1) {
                Ok(docs) => documents.extend(docs),
                Err(e) => warn!(file = %path.display(), error = %e, "skipping source file"),
            }
        }
        Ok(documents)
    }

    fn load_existing_store(&self) -> Option<VectorStore> {
        if !VectorStore::exists(&self.index_dir) {
            info!(dir = %self.index_dir.display(), "no saved vector store found");
            return None;
        }
        match VectorStore::load(&self.index_dir, self.provider.clone()) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!(
                    error = %e,
                    "failed to load vector store; building a new one and keeping the manifest"
                );
                None
            }
        }
    }

    /// Scan the source directory and ingest new and modified files.
    ///
    /// With `force_rebuild` the manifest and the saved store are
    /// discarded first, so every file is processed as new.
    pub async fn update_knowledge_base(&mut self, force_rebuild: bool) -> Result<UpdateSummary> {
        info!(force_rebuild, "starting incremental update");

        let mut store = if force_rebuild {
            info!("force rebuild: clearing manifest and ignoring saved index");
            self.manifest.clear();
            None
        } else {
            self.load_existing_store()
        };

        let mut file_changes = BTreeMap::new();
        let mut to_process = Vec::new();
        for path in self.scan_sources()? {
            let key = self.key_for(&path);
            match self.detect_file_changes(&path) {
                Ok(change) => {
                    if change.needs_processing() {
                        info!(file = %key, reasons = %change.reasons.join(", "), "change detected");
                        to_process.push((path, key.clone(), change.clone()));
                    } else {
                        debug!(file = %key, "unchanged");
                    }
                    file_changes.insert(key, change);
                }
                Err(e) => warn!(file = %key, error = %e, "change detection failed, skipping"),
            }
        }

        if to_process.is_empty() && !force_rebuild {
            info!("no files need processing");
            return Ok(UpdateSummary {
                status: UpdateStatus::NoUpdatesNeeded,
                processed_files: 0,
                new_chunks: 0,
                total_files: self.manifest.len(),
                vector_count: store.as_ref().map_or(0, VectorStore::vector_count),
                vector_dim: store.as_ref().map_or(0, VectorStore::dims),
                file_changes,
            });
        }

        let mut new_documents = Vec::new();
        let mut processed = 0;
        for (path, key, change) in to_process {
            let version = change.previous_version.map_or(1, |v| v + 1);
            let documents = match self.process_file(&path, version) {
                Ok(docs) => docs,
                Err(e) => {
                    warn!(file = %key, error = %e, "failed to process file, will retry next run");
                    continue;
                }
            };
            let Some(current) = change.current else {
                continue;
            };
            info!(file = %key, version, chunks = documents.len(), "file processed");
            self.manifest.insert(
                key.clone(),
                FileRecord {
                    filename: key,
                    file_hash: current.file_hash,
                    file_size: current.file_size,
                    last_modified: current.last_modified,
                    processed_date: Utc::now().to_rfc3339(),
                    chunk_count: documents.len(),
                    source_type: SourceKind::of(&path)
                        .map_or("unknown", |k| k.as_str())
                        .to_string(),
                    version,
                },
            );
            new_documents.extend(documents);
            processed += 1;
        }

        let new_chunks = new_documents.len();
        if new_chunks > 0 || force_rebuild {
            let merged = match store.take() {
                Some(mut existing) => {
                    info!(count = new_chunks, "appending to existing vector store");
                    existing.add_documents(new_documents).await?;
                    existing
                }
                None => {
                    info!(count = new_chunks, "building new vector store");
                    VectorStore::build(self.provider.clone(), new_documents).await?
                }
            };
            merged.save(&self.index_dir)?;
            store = Some(merged);
        }
        if let (Some(path), true) = (&self.manifest_path, processed > 0 || force_rebuild) {
            write_json_atomic(path, &self.manifest)?;
        }

        let summary = UpdateSummary {
            status: UpdateStatus::Updated,
            processed_files: processed,
            new_chunks,
            total_files: self.manifest.len(),
            vector_count: store.as_ref().map_or(0, VectorStore::vector_count),
            vector_dim: store.as_ref().map_or(0, VectorStore::dims),
            file_changes,
        };
        info!(
            processed = summary.processed_files,
            new_chunks = summary.new_chunks,
            vectors = summary.vector_count,
            "incremental update complete"
        );
        Ok(summary)
    }

    /// Manifest contents plus the saved index's size.
    pub fn get_system_info(&self) -> SystemInfo {
        let store = self.load_existing_store();
        SystemInfo {
            total_files: self.manifest.len(),
            total_chunks: self.manifest.values().map(|r| r.chunk_count).sum(),
            vector_count: store.as_ref().map_or(0, VectorStore::vector_count),
            vector_dim: store.as_ref().map_or(0, VectorStore::dims),
            files: self.manifest.values().cloned().collect(),
        }
    }
}
