//! Core data models shared by the ingestion and retrieval pipeline.
//!
//! These types are the canonical in-memory representation of the
//! knowledge base: extracted tables, their rendered text form, cleaned
//! text chunks, indexed documents, and per-query results.
//!
//! # Data Flow
//!
//! ```text
//! PDF ──▶ TableRecord ──▶ TableText ──┐
//!  │                                  ├──▶ Document ──▶ FlatIndex ──▶ QueryResult
//!  └────▶ TextChunk ──────────────────┘
//! ```
//!
//! The `content_type` metadata key on every [`Document`] is the only
//! discriminator retrieval uses to tell tables from text. Both ingestion
//! paths set it through [`Document::text`] / [`Document::table`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// `content_type` value stored on text chunks.
pub const CONTENT_TYPE_TEXT: &str = "text";
/// `content_type` value stored on rendered tables.
pub const CONTENT_TYPE_TABLE: &str = "structured_table";

/// Metadata key carrying the content discriminator.
pub const CONTENT_TYPE_KEY: &str = "content_type";

/// Classification assigned to an extracted table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TableType {
    TimeSeries,
    Comparison,
    Statistical,
    General,
    #[default]
    Unknown,
}

impl TableType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TableType::TimeSeries => "time_series",
            TableType::Comparison => "comparison",
            TableType::Statistical => "statistical",
            TableType::General => "general",
            TableType::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A canonical table produced by one of the extraction strategies.
///
/// Rows are not guaranteed to have `headers.len()` cells. Consumers
/// must tolerate both short and long rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TableRecord {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// 1-based page number.
    pub source_page: u32,
    pub source_file: String,
    pub table_type: TableType,
    /// Extraction confidence in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Identifier of the strategy that produced the table.
    pub extractor_method: String,
    pub metadata: Map<String, Value>,
}

/// A table rendered into search-ready text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableText {
    pub table_id: String,
    pub content: String,
    pub metadata: Map<String, Value>,
}

/// A window of cleaned document text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextChunk {
    pub chunk_id: String,
    /// Originating file name.
    pub source: String,
    /// 0-based position within the source document.
    pub chunk_index: usize,
    pub content: String,
    /// Glossary terms present in `content`.
    pub technical_terms: Vec<String>,
}

impl TextChunk {
    /// Length in characters (not bytes).
    pub fn chunk_size(&self) -> usize {
        self.content.chars().count()
    }
}

fn new_document_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A unit of indexed content: text plus its full metadata map.
///
/// Also the on-disk shape of a chunks file (`[{content, metadata}]`),
/// hence the `content` alias and the generated default id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default = "new_document_id")]
    pub id: String,
    #[serde(alias = "content")]
    pub page_content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Document {
    pub fn new(page_content: impl Into<String>, metadata: Map<String, Value>) -> Self {
        Self {
            id: new_document_id(),
            page_content: page_content.into(),
            metadata,
        }
    }

    /// Build a text document, forcing `content_type = "text"`.
    pub fn text(page_content: impl Into<String>, mut metadata: Map<String, Value>) -> Self {
        metadata.insert(CONTENT_TYPE_KEY.into(), Value::from(CONTENT_TYPE_TEXT));
        Self::new(page_content, metadata)
    }

    /// Build a table document, forcing `content_type = "structured_table"`.
    pub fn table(page_content: impl Into<String>, mut metadata: Map<String, Value>) -> Self {
        metadata.insert(CONTENT_TYPE_KEY.into(), Value::from(CONTENT_TYPE_TABLE));
        Self::new(page_content, metadata)
    }

    pub fn kind(&self) -> ContentKind {
        ContentKind::of(&self.metadata)
    }

    /// The `source` metadata value, or `"unknown"`.
    pub fn source(&self) -> &str {
        self.metadata
            .get("source")
            .and_then(Value::as_str)
            .unwrap_or("unknown")
    }
}

/// Retrieval-side view of a document's content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Text,
    Table,
}

impl ContentKind {
    /// Classify by the `content_type` metadata key. Only the exact table
    /// marker counts as a table; anything else (including absence) is text.
    pub fn of(metadata: &Map<String, Value>) -> Self {
        match metadata.get(CONTENT_TYPE_KEY).and_then(Value::as_str) {
            Some(CONTENT_TYPE_TABLE) => ContentKind::Table,
            _ => ContentKind::Text,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentKind::Text => "text",
            ContentKind::Table => "table",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which content subset a query should return.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterType {
    #[default]
    All,
    Text,
    Table,
}

impl FilterType {
    pub fn accepts(&self, kind: ContentKind) -> bool {
        match self {
            FilterType::All => true,
            FilterType::Text => kind == ContentKind::Text,
            FilterType::Table => kind == ContentKind::Table,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::All => "all",
            FilterType::Text => "text",
            FilterType::Table => "table",
        }
    }
}

impl fmt::Display for FilterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" | "" => Ok(FilterType::All),
            "text" => Ok(FilterType::Text),
            "table" | "tables" => Ok(FilterType::Table),
            other => Err(format!(
                "unknown filter type '{}': expected all, text, or table",
                other
            )),
        }
    }
}

/// One ranked, typed hit returned by a query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResult {
    /// 1-based rank within the filtered list.
    pub rank: usize,
    pub content_type: ContentKind,
    /// Display rendering (table preview or truncated text).
    pub content: String,
    pub source: String,
    /// Approximate similarity in `[0.0, 1.0]`; not a calibrated probability.
    pub confidence: f64,
    pub metadata: Map<String, Value>,
    /// Untruncated indexed content, used for citations.
    #[serde(skip_serializing)]
    pub full_content: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_kind_requires_exact_marker() {
        let mut meta = Map::new();
        assert_eq!(ContentKind::of(&meta), ContentKind::Text);
        meta.insert(CONTENT_TYPE_KEY.into(), Value::from("table"));
        assert_eq!(ContentKind::of(&meta), ContentKind::Text);
        meta.insert(CONTENT_TYPE_KEY.into(), Value::from(CONTENT_TYPE_TABLE));
        assert_eq!(ContentKind::of(&meta), ContentKind::Table);
    }

    #[test]
    fn test_document_constructors_set_content_type() {
        let t = Document::table("x", Map::new());
        assert_eq!(t.kind(), ContentKind::Table);
        let mut meta = Map::new();
        meta.insert(CONTENT_TYPE_KEY.into(), Value::from(CONTENT_TYPE_TABLE));
        let d = Document::text("y", meta);
        assert_eq!(d.kind(), ContentKind::Text);
    }

    #[test]
    fn test_filter_type_parse() {
        assert_eq!("TABLE".parse::<FilterType>().unwrap(), FilterType::Table);
        assert_eq!("text".parse::<FilterType>().unwrap(), FilterType::Text);
        assert_eq!("all".parse::<FilterType>().unwrap(), FilterType::All);
        assert!("images".parse::<FilterType>().is_err());
    }

    #[test]
    fn test_table_record_lenient_deserialize() {
        let t: TableRecord = serde_json::from_str(r#"{"title":"T"}"#).unwrap();
        assert_eq!(t.title, "T");
        assert!(t.headers.is_empty());
        assert_eq!(t.table_type, TableType::Unknown);
    }

    #[test]
    fn test_chunks_file_shape_deserializes() {
        let docs: Vec<Document> =
            serde_json::from_str(r#"[{"content":"hello","metadata":{"source":"a.txt"}}]"#)
                .unwrap();
        assert_eq!(docs[0].page_content, "hello");
        assert_eq!(docs[0].source(), "a.txt");
        assert!(!docs[0].id.is_empty());
    }
}
