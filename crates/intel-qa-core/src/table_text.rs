//! Table-to-text rendering.
//!
//! Turns a table into one text block that a text-embedding search can
//! match on. Headers are kept as field labels on every row, so a row
//! renders as `Rank: 1, Event: Phishing` instead of a bare cell list.
//!
//! Rendering is total. Input that cannot be read as a table (a non-object
//! JSON value, for instance) degrades to the one-line `表格: {title}`
//! form, and nothing here panics on short, long, or missing rows.
//!
//! # Layout
//!
//! ```text
//! 表格標題: Research-Risk-Report-2025
//! 表格類型: general
//! 來源頁面: 第3頁
//! 資料提取方法: layout
//! 信心度: 85.0%
//! 表格欄位: Rank, Event
//! 表格內容:
//!   Rank: 1, Event: Phishing
//!   Rank: 2, Event: Ransomware
//! 搜尋關鍵字: Rank, Event, Phishing, Ransomware
//! ```

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::models::{TableRecord, TableText};

/// Cap on the generated keyword list.
pub const MAX_KEYWORDS: usize = 10;
/// Rows sampled for keyword cells.
const KEYWORD_ROWS: usize = 3;
/// Exclusive upper bound on a keyword cell's length in characters.
const KEYWORD_CELL_MAX_CHARS: usize = 20;

/// Title given to tables that have none ("untitled table").
pub const UNTITLED_TABLE_TITLE: &str = "未命名表格";
const UNKNOWN: &str = "未知";

fn type_vocabulary(table_type: &str) -> &'static [&'static str] {
    match table_type {
        "comparison" => &["比較", "對比", "分析"],
        "statistical" => &["統計", "數據", "數字"],
        "time_series" => &["時間", "日期", "趨勢"],
        "timeline" => &["時間", "日期", "歷程"],
        "financial" => &["財務", "金額", "成本"],
        _ => &[],
    }
}

/// Loosely-typed view of a table, tolerant of whatever shape the input had.
struct TableView {
    title: String,
    table_type: String,
    page: String,
    method: String,
    confidence: f64,
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn cell_to_string(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    }
}

fn string_list(v: Option<&Value>) -> Vec<String> {
    match v {
        Some(Value::Array(items)) => items.iter().map(cell_to_string).collect(),
        Some(Value::Null) | None => Vec::new(),
        Some(other) => vec![cell_to_string(other)],
    }
}

fn title_of(v: &Value) -> String {
    v.get("title")
        .map(cell_to_string)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED_TABLE_TITLE.to_string())
}

impl TableView {
    fn from_value(v: &Value) -> Option<Self> {
        let obj = v.as_object()?;
        let text_field = |key: &str, default: &str| {
            obj.get(key)
                .map(cell_to_string)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| default.to_string())
        };

        let rows = match obj.get("rows") {
            Some(Value::Array(rows)) => rows
                .iter()
                .map(|r| match r {
                    Value::Array(_) => string_list(Some(r)),
                    Value::Object(cells) => cells.values().map(cell_to_string).collect(),
                    other => vec![cell_to_string(other)],
                })
                .collect(),
            _ => Vec::new(),
        };

        Some(TableView {
            title: title_of(v),
            table_type: text_field("table_type", "general"),
            page: text_field("source_page", UNKNOWN),
            method: text_field("extractor_method", UNKNOWN),
            confidence: obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.0),
            headers: string_list(obj.get("headers")),
            rows,
        })
    }

    fn render(&self) -> String {
        let mut parts = vec![
            format!("表格標題: {}", self.title),
            format!("表格類型: {}", self.table_type),
            format!("來源頁面: 第{}頁", self.page),
            format!("資料提取方法: {}", self.method),
            format!("信心度: {:.1}%", self.confidence * 100.0),
        ];

        let named: Vec<&str> = self
            .headers
            .iter()
            .map(String::as_str)
            .filter(|h| !h.is_empty())
            .collect();
        if !named.is_empty() {
            parts.push(format!("表格欄位: {}", named.join(", ")));
        }

        if !self.rows.is_empty() {
            parts.push("表格內容:".to_string());
            for row in &self.rows {
                let line = self.render_row(row);
                if !line.is_empty() {
                    parts.push(format!("  {}", line));
                }
            }
        }

        let keywords = self.keywords();
        if !keywords.is_empty() {
            parts.push(format!("搜尋關鍵字: {}", keywords.join(", ")));
        }

        parts.join("\n")
    }

    fn render_row(&self, row: &[String]) -> String {
        if self.headers.is_empty() {
            return row
                .iter()
                .filter(|c| !c.is_empty())
                .cloned()
                .collect::<Vec<_>>()
                .join(", ");
        }
        // Cells past the last header have no label and are dropped.
        self.headers
            .iter()
            .zip(row.iter())
            .filter(|(h, c)| !h.is_empty() && !c.is_empty())
            .map(|(h, c)| format!("{}: {}", h, c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn keywords(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        let mut push = |kw: &str| {
            if out.len() < MAX_KEYWORDS && !out.iter().any(|k| k == kw) {
                out.push(kw.to_string());
            }
        };

        for kw in type_vocabulary(&self.table_type).iter().copied() {
            push(kw);
        }
        for h in &self.headers {
            if h.chars().count() > 1 {
                push(h.as_str());
            }
        }
        for row in self.rows.iter().take(KEYWORD_ROWS) {
            for cell in row {
                let len = cell.chars().count();
                if len > 1 && len < KEYWORD_CELL_MAX_CHARS {
                    push(cell.as_str());
                }
            }
        }
        out
    }
}

fn minimal_text(title: &str) -> String {
    format!("表格: {}", title)
}

/// Render any JSON value as table text. Never fails; non-table input
/// yields the minimal `表格: {title}` line.
pub fn convert_value(table: &Value) -> String {
    match TableView::from_value(table) {
        Some(view) => view.render(),
        None => minimal_text(UNTITLED_TABLE_TITLE),
    }
}

/// Render a typed table.
pub fn convert_table(table: &TableRecord) -> String {
    match serde_json::to_value(table) {
        Ok(v) => convert_value(&v),
        Err(_) => minimal_text(&table.title),
    }
}

/// Aggregate counters for a batch conversion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversionStats {
    pub total_tables: usize,
    pub converted_tables: usize,
    /// Sum of rendered lengths in characters.
    pub total_text_length: usize,
}

/// Persisted output of a batch conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableTextsArtifact {
    pub conversion_date: String,
    pub total_tables: usize,
    pub conversion_stats: ConversionStats,
    pub table_texts: Vec<TableText>,
}

/// Batch converter that tracks per-table outcomes.
#[derive(Debug, Default)]
pub struct TableTextConverter {
    stats: ConversionStats,
}

impl TableTextConverter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> &ConversionStats {
        &self.stats
    }

    /// Convert every table. A table that cannot be read still yields a
    /// minimal [`TableText`] but is not counted as converted.
    pub fn convert_batch(&mut self, tables: &[Value]) -> Vec<TableText> {
        self.stats = ConversionStats {
            total_tables: tables.len(),
            ..Default::default()
        };
        let now = Utc::now().to_rfc3339();

        tables
            .iter()
            .enumerate()
            .map(|(i, table)| {
                let title = title_of(table);
                let content = match TableView::from_value(table) {
                    Some(view) => {
                        let text = view.render();
                        self.stats.converted_tables += 1;
                        self.stats.total_text_length += text.chars().count();
                        text
                    }
                    None => {
                        tracing::warn!(index = i + 1, "table is not an object; emitting title only");
                        minimal_text(&title)
                    }
                };

                let mut metadata = Map::new();
                metadata.insert("original_table_data".into(), table.clone());
                for key in [
                    "source_page",
                    "source_file",
                    "table_type",
                    "confidence",
                    "extractor_method",
                ] {
                    metadata.insert(
                        key.into(),
                        table.get(key).cloned().unwrap_or(Value::Null),
                    );
                }
                metadata.insert("conversion_date".into(), Value::from(now.clone()));

                TableText {
                    table_id: format!("table_{}_{}", i + 1, title),
                    content,
                    metadata,
                }
            })
            .collect()
    }

    /// Convert typed tables.
    pub fn convert_records(&mut self, tables: &[TableRecord]) -> Vec<TableText> {
        let values: Vec<Value> = tables
            .iter()
            .map(|t| serde_json::to_value(t).unwrap_or(Value::Null))
            .collect();
        self.convert_batch(&values)
    }

    /// Wrap converted texts with the current stats for persistence.
    pub fn artifact(&self, table_texts: Vec<TableText>) -> TableTextsArtifact {
        TableTextsArtifact {
            conversion_date: Utc::now().to_rfc3339(),
            total_tables: self.stats.total_tables,
            conversion_stats: self.stats.clone(),
            table_texts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TableType;
    use serde_json::json;

    fn risk_table() -> TableRecord {
        TableRecord {
            title: "Research-Risk-Report-2025".into(),
            headers: vec!["Rank".into(), "Event".into()],
            rows: vec![
                vec!["1".into(), "Phishing".into()],
                vec!["2".into(), "Ransomware".into()],
            ],
            source_page: 3,
            source_file: "risk.pdf".into(),
            table_type: TableType::General,
            confidence: 0.85,
            extractor_method: "layout".into(),
            metadata: Map::new(),
        }
    }

    #[test]
    fn test_render_field_value_rows() {
        let text = convert_table(&risk_table());
        assert!(text.contains("表格標題: Research-Risk-Report-2025"));
        assert!(text.contains("Rank: 1, Event: Phishing"));
        assert!(text.contains("Rank: 2, Event: Ransomware"));
        assert!(text.contains("來源頁面: 第3頁"));
        assert!(text.contains("信心度: 85.0%"));
        assert!(text.contains("表格欄位: Rank, Event"));
    }

    #[test]
    fn test_keywords_capped_and_deduped() {
        let table = json!({
            "title": "T",
            "table_type": "comparison",
            "headers": ["Alpha", "Beta", "Gamma", "Delta"],
            "rows": [["Alpha", "b1", "c1", "d1"], ["a2", "b2", "c2", "d2"]]
        });
        let text = convert_value(&table);
        let line = text.lines().last().unwrap();
        assert!(line.starts_with("搜尋關鍵字: 比較, 對比, 分析, Alpha"));
        let count = line.trim_start_matches("搜尋關鍵字: ").split(", ").count();
        assert_eq!(count, MAX_KEYWORDS);
        assert_eq!(line.matches("Alpha").count(), 1);
    }

    #[test]
    fn test_missing_keys_never_fail() {
        let text = convert_value(&json!({}));
        assert!(text.contains("表格標題: 未命名表格"));
        let text = convert_value(&json!({"title": "Only"}));
        assert!(text.starts_with("表格標題: Only"));
    }

    #[test]
    fn test_blank_title_uses_untitled_placeholder() {
        let mut table = risk_table();
        table.title = "   ".into();
        let out = TableTextConverter::new().convert_records(&[table]);
        assert!(out[0]
            .content
            .starts_with(&format!("表格標題: {}", UNTITLED_TABLE_TITLE)));
        assert_eq!(out[0].table_id, format!("table_1_{}", UNTITLED_TABLE_TITLE));
    }

    #[test]
    fn test_misaligned_rows() {
        let table = json!({
            "title": "Skew",
            "headers": ["A", "B", "C"],
            "rows": [["1"], ["1", "2", "3", "4"], [], null]
        });
        let text = convert_value(&table);
        assert!(text.contains("  A: 1\n"));
        assert!(text.contains("  A: 1, B: 2, C: 3"));
        assert!(!text.contains("4,"));
    }

    #[test]
    fn test_headerless_rows_joined() {
        let text = convert_value(&json!({"title": "N", "rows": [["x", "", "y"]]}));
        assert!(text.contains("  x, y"));
    }

    #[test]
    fn test_non_object_input_minimal() {
        assert_eq!(convert_value(&json!([1, 2])), "表格: 未命名表格");
        assert_eq!(convert_value(&json!("str")), "表格: 未命名表格");
        assert!(!convert_value(&Value::Null).is_empty());
    }

    #[test]
    fn test_batch_stats_and_ids() {
        let mut conv = TableTextConverter::new();
        let tables = vec![serde_json::to_value(risk_table()).unwrap(), json!(42)];
        let out = conv.convert_batch(&tables);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].table_id, "table_1_Research-Risk-Report-2025");
        assert_eq!(out[1].table_id, "table_2_未命名表格");
        assert_eq!(conv.stats().total_tables, 2);
        assert_eq!(conv.stats().converted_tables, 1);
        assert_eq!(
            conv.stats().total_text_length,
            out[0].content.chars().count()
        );
        assert_eq!(out[0].metadata["source_page"], json!(3));
        assert_eq!(out[0].metadata["table_type"], json!("general"));
        assert!(out[0].metadata.contains_key("original_table_data"));

        let artifact = conv.artifact(out);
        assert_eq!(artifact.total_tables, 2);
        assert_eq!(artifact.conversion_stats.converted_tables, 1);
    }
}
