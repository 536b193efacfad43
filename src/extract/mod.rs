//! PDF and plain-text extraction, and the multi-strategy table extractor.
//!
//! # Table extraction
//!
//! Tables are found by a chain of pluggable [`TableStrategy`]
//! implementations held by a [`StrategyRegistry`]. Availability is probed
//! once when the registry is built, and the chain order comes from
//! `[tables].strategies`:
//!
//! ```text
//!   layout ──► text_flow ──► text_pattern ──┐   (each failure logged, skipped)
//!                                           ▼
//!                         fewer than fallback_min_tables?
//!                                           │ yes
//!                                           ▼
//!                                    whole_document
//!                                           │
//!                                           ▼
//!                   accept ─► classify_table ─► deduplicate
//! ```
//!
//! # Document text
//!
//! [`extract_document_text`] dispatches on file extension: PDFs go
//! through [`pdf_text::extract_pdf_text`] (pdf-extract, then lopdf), plain
//! text files are read directly.

pub mod layout;
pub mod pdf_text;
pub mod text;

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, info, warn};

use intel_qa_core::models::TableRecord;
use intel_qa_core::tables::{accept, classify_table, deduplicate, ExtractionReport, TablesArtifact};

use crate::config::TablesConfig;
use crate::persist::write_json_atomic;

pub use pdf_text::extract_pdf_text;

#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("PDF extraction failed: {0}")]
    Pdf(String),

    #[error("strategy '{strategy}' failed: {message}")]
    Strategy { strategy: String, message: String },

    #[error("unsupported file type: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// File name used as the `source` of everything extracted from `path`.
pub fn file_label(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Which processor handles a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Pdf,
    Text,
}

impl SourceKind {
    pub fn of(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "pdf" => Some(SourceKind::Pdf),
            "txt" | "md" => Some(SourceKind::Text),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Pdf => "pdf",
            SourceKind::Text => "text",
        }
    }
}

/// Raw text of a source document. PDF text carries `=== Page N ===`
/// markers.
pub fn extract_document_text(path: &Path) -> Result<String, ExtractError> {
    match SourceKind::of(path) {
        Some(SourceKind::Pdf) => extract_pdf_text(path),
        Some(SourceKind::Text) => {
            let bytes = std::fs::read(path)?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        None => Err(ExtractError::Unsupported(path.display().to_string())),
    }
}

// ============ Strategies ============

/// One table extraction backend.
///
/// Implementations must not panic on malformed input; they return an
/// error and the registry moves on to the next strategy.
pub trait TableStrategy: Send + Sync {
    /// Identifier recorded as `extractor_method` on produced tables.
    fn name(&self) -> &str;

    /// Whether this backend can run in the current environment. Probed
    /// once, when the registry is built.
    fn is_available(&self) -> bool {
        true
    }

    /// Fallback strategies only run when the primary chain found fewer
    /// than `fallback_min_tables` tables.
    fn fallback_only(&self) -> bool {
        false
    }

    fn extract(&self, path: &Path) -> Result<Vec<TableRecord>, ExtractError>;
}

/// Build a strategy by its configured name.
pub fn strategy_by_name(name: &str) -> Option<Box<dyn TableStrategy>> {
    match name {
        "layout" => Some(Box::new(layout::LayoutStrategy)),
        "text_flow" => Some(Box::new(text::TextFlowStrategy)),
        "text_pattern" => Some(Box::new(text::TextPatternStrategy)),
        "whole_document" => Some(Box::new(text::WholeDocumentStrategy)),
        _ => None,
    }
}

/// Tuning for the extraction pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractionSettings {
    pub min_accuracy: f64,
    pub dedup_threshold: f64,
    pub fallback_min_tables: usize,
}

impl From<&TablesConfig> for ExtractionSettings {
    fn from(config: &TablesConfig) -> Self {
        Self {
            min_accuracy: config.min_accuracy,
            dedup_threshold: config.dedup_threshold,
            fallback_min_tables: config.fallback_min_tables,
        }
    }
}

impl Default for ExtractionSettings {
    fn default() -> Self {
        Self::from(&TablesConfig::default())
    }
}

/// Ordered, availability-filtered chain of table strategies.
pub struct StrategyRegistry {
    primary: Vec<Box<dyn TableStrategy>>,
    fallback: Vec<Box<dyn TableStrategy>>,
    settings: ExtractionSettings,
}

impl StrategyRegistry {
    /// Register `strategies` in order, dropping any that report
    /// themselves unavailable.
    pub fn new(strategies: Vec<Box<dyn TableStrategy>>, settings: ExtractionSettings) -> Self {
        let mut primary = Vec::new();
        let mut fallback = Vec::new();
        for strategy in strategies {
            if !strategy.is_available() {
                info!(strategy = strategy.name(), "table strategy unavailable, skipping");
                continue;
            }
            if strategy.fallback_only() {
                fallback.push(strategy);
            } else {
                primary.push(strategy);
            }
        }
        Self {
            primary,
            fallback,
            settings,
        }
    }

    pub fn from_config(config: &TablesConfig) -> Self {
        let strategies = config
            .strategies
            .iter()
            .filter_map(|name| {
                let strategy = strategy_by_name(name);
                if strategy.is_none() {
                    warn!(strategy = %name, "unknown table strategy ignored");
                }
                strategy
            })
            .collect();
        Self::new(strategies, ExtractionSettings::from(config))
    }

    /// Names of the registered strategies, primary chain first.
    pub fn names(&self) -> Vec<&str> {
        self.primary
            .iter()
            .chain(self.fallback.iter())
            .map(|s| s.name())
            .collect()
    }

    fn run(strategy: &dyn TableStrategy, path: &Path, out: &mut Vec<TableRecord>) {
        match strategy.extract(path) {
            Ok(tables) => {
                debug!(
                    strategy = strategy.name(),
                    path = %path.display(),
                    count = tables.len(),
                    "strategy finished"
                );
                out.extend(tables);
            }
            Err(e) => {
                warn!(
                    strategy = strategy.name(),
                    path = %path.display(),
                    error = %e,
                    "table strategy failed, continuing"
                );
            }
        }
    }

    /// Extract, filter, classify and deduplicate the tables of one PDF.
    /// Never fails: strategy errors are logged and skipped.
    pub fn extract_tables(&self, path: &Path) -> Vec<TableRecord> {
        let mut found = Vec::new();
        for strategy in &self.primary {
            Self::run(strategy.as_ref(), path, &mut found);
        }
        for strategy in &self.fallback {
            if found.len() >= self.settings.fallback_min_tables {
                break;
            }
            Self::run(strategy.as_ref(), path, &mut found);
        }

        let accepted: Vec<TableRecord> = found
            .into_iter()
            .filter(|t| accept(t, self.settings.min_accuracy))
            .map(|mut t| {
                t.table_type = classify_table(&t.headers, &t.rows);
                t
            })
            .collect();
        let unique = deduplicate(accepted, self.settings.dedup_threshold);
        info!(path = %path.display(), tables = unique.len(), "table extraction complete");
        unique
    }

    /// Extract from several PDFs, concatenating results in input order.
    pub fn extract_many(&self, paths: &[PathBuf]) -> Vec<TableRecord> {
        paths.iter().flat_map(|p| self.extract_tables(p)).collect()
    }
}

/// Persist tables as the extracted-tables artifact and return its report.
pub fn save_tables(path: &Path, tables: Vec<TableRecord>) -> anyhow::Result<ExtractionReport> {
    let report = ExtractionReport::from_tables(&tables);
    write_json_atomic(path, &TablesArtifact::new(tables))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use intel_qa_core::models::TableType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Fixed {
        name: &'static str,
        tables: Vec<TableRecord>,
        fallback: bool,
        calls: Arc<AtomicUsize>,
    }

    impl TableStrategy for Fixed {
        fn name(&self) -> &str {
            self.name
        }
        fn fallback_only(&self) -> bool {
            self.fallback
        }
        fn extract(&self, _path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.tables.clone())
        }
    }

    struct Failing;

    impl TableStrategy for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn extract(&self, _path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
            Err(ExtractError::Strategy {
                strategy: "failing".into(),
                message: "backend exploded".into(),
            })
        }
    }

    struct Unavailable;

    impl TableStrategy for Unavailable {
        fn name(&self) -> &str {
            "unavailable"
        }
        fn is_available(&self) -> bool {
            false
        }
        fn extract(&self, _path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
            panic!("must never be called");
        }
    }

    fn table(method: &str, confidence: f64) -> TableRecord {
        TableRecord {
            title: format!("{}_table", method),
            headers: vec!["Rank".into(), "Event".into()],
            rows: vec![
                vec!["1".into(), "Phishing".into()],
                vec!["2".into(), "Ransomware".into()],
            ],
            source_page: 2,
            source_file: "risk.pdf".into(),
            confidence,
            extractor_method: method.into(),
            ..Default::default()
        }
    }

    fn fixed(name: &'static str, tables: Vec<TableRecord>, fallback: bool) -> (Box<dyn TableStrategy>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Box::new(Fixed {
                name,
                tables,
                fallback,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    #[test]
    fn test_duplicates_across_strategies_collapse() {
        let (a, _) = fixed("layout", vec![table("layout", 0.9)], false);
        let (b, _) = fixed("text_flow", vec![table("text_flow", 0.8)], false);
        let registry = StrategyRegistry::new(vec![a, b], ExtractionSettings::default());
        let tables = registry.extract_tables(Path::new("risk.pdf"));
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].extractor_method, "layout");
        assert_eq!(tables[0].table_type, TableType::General);
    }

    #[test]
    fn test_failing_strategy_is_skipped() {
        let (ok, _) = fixed("layout", vec![table("layout", 0.9)], false);
        let registry = StrategyRegistry::new(
            vec![Box::new(Failing), ok, Box::new(Unavailable)],
            ExtractionSettings::default(),
        );
        assert_eq!(registry.names(), vec!["failing", "layout"]);
        assert_eq!(registry.extract_tables(Path::new("x.pdf")).len(), 1);
    }

    #[test]
    fn test_fallback_only_when_short() {
        let (primary, _) = fixed("layout", vec![table("layout", 0.9)], false);
        let mut other = table("whole_document", 0.7);
        other.headers = vec!["Year".into(), "CRI".into()];
        other.rows = vec![vec!["2024".into(), "1.5".into()]];
        let (fb, fb_calls) = fixed("whole_document", vec![other], true);
        let registry = StrategyRegistry::new(vec![primary, fb], ExtractionSettings::default());
        let tables = registry.extract_tables(Path::new("x.pdf"));
        assert_eq!(fb_calls.load(Ordering::SeqCst), 1);
        assert_eq!(tables.len(), 2);

        let (p1, _) = fixed("layout", vec![table("layout", 0.9)], false);
        let mut second = table("text_flow", 0.8);
        second.source_page = 5;
        let (p2, _) = fixed("text_flow", vec![second], false);
        let (fb, fb_calls) = fixed("whole_document", vec![], true);
        let registry = StrategyRegistry::new(vec![p1, p2, fb], ExtractionSettings::default());
        registry.extract_tables(Path::new("x.pdf"));
        assert_eq!(fb_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_low_confidence_rejected() {
        let (a, _) = fixed("layout", vec![table("layout", 0.4)], false);
        let registry = StrategyRegistry::new(vec![a], ExtractionSettings::default());
        assert!(registry.extract_tables(Path::new("x.pdf")).is_empty());
    }

    #[test]
    fn test_registry_from_config_order() {
        let registry = StrategyRegistry::from_config(&TablesConfig::default());
        assert_eq!(
            registry.names(),
            vec!["layout", "text_flow", "text_pattern", "whole_document"]
        );
    }

    #[test]
    fn test_source_kind_and_text_read() {
        assert_eq!(SourceKind::of(Path::new("a/Report.PDF")), Some(SourceKind::Pdf));
        assert_eq!(SourceKind::of(Path::new("notes.txt")), Some(SourceKind::Text));
        assert_eq!(SourceKind::of(Path::new("image.png")), None);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "CREM 計算企業的網路風險指數 (CRI)").unwrap();
        assert!(extract_document_text(&path).unwrap().contains("CRI"));
        assert!(matches!(
            extract_document_text(&dir.path().join("a.png")),
            Err(ExtractError::Unsupported(_))
        ));
    }

    #[test]
    fn test_save_tables_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extracted_tables.json");
        let report = save_tables(&path, vec![table("layout", 0.9)]).unwrap();
        assert_eq!(report.total_tables, 1);
        assert_eq!(report.pages_with_tables, vec![2]);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"total_tables\": 1"));
    }
}
