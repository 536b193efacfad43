//! Type-aware result selection over raw nearest-neighbour hits.
//!
//! The index returns `(document, distance)` pairs in relevance order. This
//! module turns them into [`QueryResult`]s: it classifies each hit as text
//! or table, drops hits the filter rejects, stops after `k` accepted hits,
//! and renders display content. Relevance order is never re-sorted.
//!
//! # Confidence
//!
//! `confidence = clamp(1 − distance, 0, 1)`. With cosine distance this is
//! the cosine similarity floored at zero. It is an approximation and not a
//! calibrated probability.

use serde_json::{Map, Value};

use crate::models::{ContentKind, Document, FilterType, QueryResult};

/// Display rendering knobs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayOptions {
    /// Text hits longer than this (in characters) are truncated.
    pub text_chars: usize,
    /// Maximum preview lines shown for a table hit.
    pub table_preview_lines: usize,
}

impl Default for DisplayOptions {
    fn default() -> Self {
        Self {
            text_chars: 300,
            table_preview_lines: 5,
        }
    }
}

/// `structured_table` is a table; anything else, including a missing
/// `content_type`, is text.
pub fn content_kind(metadata: &Map<String, Value>) -> ContentKind {
    ContentKind::of(metadata)
}

/// Lines scanned after the title when building a table preview.
const TABLE_PREVIEW_SCAN: usize = 7;

/// Convert a raw distance to a similarity in `[0, 1]`.
pub fn confidence_from_distance(distance: f32) -> f64 {
    let c = 1.0 - distance as f64;
    if c.is_nan() {
        0.0
    } else {
        c.clamp(0.0, 1.0)
    }
}

/// Truncate to `max_chars` characters, appending `...` when cut.
pub fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push_str("...");
    out
}

fn meta_display(metadata: &Map<String, Value>, key: &str, default: &str) -> String {
    match metadata.get(key) {
        Some(Value::String(s)) if !s.is_empty() => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => default.to_string(),
    }
}

/// Render a table hit as a short annotated preview.
///
/// ```text
/// 📊 Research-Risk-Report-2025
///    類型: general | 頁面: 3 | 信心度: 85.0%
///    內容預覽:
///      表格類型: general
///      ...
/// ```
pub fn format_table_display(
    content: &str,
    metadata: &Map<String, Value>,
    preview_lines: usize,
) -> String {
    let mut lines = content.lines();
    let title = lines
        .next()
        .map(|l| l.trim_start_matches("表格標題:").trim())
        .filter(|t| !t.is_empty())
        .unwrap_or("未知表格");
    let confidence = metadata
        .get("confidence")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);

    let mut parts = vec![
        format!("📊 {}", title),
        format!(
            "   類型: {} | 頁面: {} | 信心度: {:.1}%",
            meta_display(metadata, "table_type", "general"),
            meta_display(metadata, "source_page", "unknown"),
            confidence * 100.0
        ),
    ];

    let preview: Vec<&str> = lines
        .take(TABLE_PREVIEW_SCAN)
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect();
    if !preview.is_empty() {
        parts.push("   內容預覽:".to_string());
        for line in preview.iter().take(preview_lines) {
            parts.push(format!("     {}", line));
        }
        if preview.len() > preview_lines {
            parts.push("     ...".to_string());
        }
    }
    parts.join("\n")
}

/// Build one result from a hit.
pub fn to_result(doc: &Document, distance: f32, rank: usize, display: &DisplayOptions) -> QueryResult {
    let kind = content_kind(&doc.metadata);
    let content = match kind {
        ContentKind::Table => {
            format_table_display(&doc.page_content, &doc.metadata, display.table_preview_lines)
        }
        ContentKind::Text => truncate_text(&doc.page_content, display.text_chars),
    };
    QueryResult {
        rank,
        content_type: kind,
        content,
        source: doc.source().to_string(),
        confidence: confidence_from_distance(distance),
        metadata: doc.metadata.clone(),
        full_content: doc.page_content.clone(),
    }
}

/// Filter hits by type and keep the first `k`, preserving input order.
pub fn select_hits(
    hits: &[(Document, f32)],
    filter: FilterType,
    k: usize,
    display: &DisplayOptions,
) -> Vec<QueryResult> {
    hits.iter()
        .filter(|(doc, _)| filter.accepts(content_kind(&doc.metadata)))
        .take(k)
        .enumerate()
        .map(|(i, (doc, distance))| to_result(doc, *distance, i + 1, display))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn text_doc(s: &str) -> Document {
        let mut m = Map::new();
        m.insert("source".into(), json!("notes.txt"));
        Document::text(s, m)
    }

    fn table_doc(s: &str) -> Document {
        let mut m = Map::new();
        m.insert("source".into(), json!("risk.pdf"));
        m.insert("table_type".into(), json!("general"));
        m.insert("source_page".into(), json!(3));
        m.insert("confidence".into(), json!(0.85));
        Document::table(s, m)
    }

    fn mixed_hits() -> Vec<(Document, f32)> {
        vec![
            (text_doc("t1"), 0.1),
            (table_doc("表格標題: A\nx"), 0.2),
            (text_doc("t2"), 0.3),
            (table_doc("表格標題: B\ny"), 0.4),
            (text_doc("t3"), 1.5),
        ]
    }

    #[test]
    fn test_filter_table_only() {
        let out = select_hits(&mixed_hits(), FilterType::Table, 5, &DisplayOptions::default());
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|r| r.content_type == ContentKind::Table));
        assert_eq!(out[0].rank, 1);
        assert!(out[0].content.starts_with("📊 A"));
    }

    #[test]
    fn test_filter_text_only_preserves_order() {
        let out = select_hits(&mixed_hits(), FilterType::Text, 5, &DisplayOptions::default());
        let contents: Vec<&str> = out.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(contents, vec!["t1", "t2", "t3"]);
        assert!(out.iter().all(|r| r.content_type == ContentKind::Text));
    }

    #[test]
    fn test_result_count_bounded_by_k() {
        for k in 0..7 {
            let out = select_hits(&mixed_hits(), FilterType::All, k, &DisplayOptions::default());
            assert!(out.len() <= k);
        }
    }

    #[test]
    fn test_confidence_clamped() {
        let out = select_hits(&mixed_hits(), FilterType::All, 5, &DisplayOptions::default());
        assert!((out[0].confidence - 0.9).abs() < 1e-6);
        assert_eq!(out[4].confidence, 0.0);
        assert_eq!(confidence_from_distance(-0.5), 1.0);
    }

    #[test]
    fn test_truncate_text() {
        assert_eq!(truncate_text("short", 300), "short");
        let long = "風".repeat(301);
        let t = truncate_text(&long, 300);
        assert_eq!(t.chars().count(), 303);
        assert!(t.ends_with("..."));
    }

    #[test]
    fn test_table_display_preview() {
        let content = "表格標題: Risk\nl1\nl2\n\nl3\nl4\nl5\nl6\nl7\nl8";
        let doc = table_doc(content);
        let out = format_table_display(&doc.page_content, &doc.metadata, 5);
        assert!(out.starts_with("📊 Risk\n   類型: general | 頁面: 3 | 信心度: 85.0%"));
        assert!(out.contains("     l5"));
        assert!(!out.contains("     l6"));
        assert!(out.ends_with("     ..."));
    }

    #[test]
    fn test_full_content_kept() {
        let long = "x".repeat(500);
        let out = select_hits(&[(text_doc(&long), 0.0)], FilterType::All, 1, &DisplayOptions::default());
        assert_eq!(out[0].full_content.len(), 500);
        assert_eq!(out[0].source, "notes.txt");
    }
}
