//! Table strategies that work on extracted page text rather than layout.
//!
//! | Strategy         | Text source           | Confidence            |
//! |------------------|-----------------------|-----------------------|
//! | `text_flow`      | pdf-extract, per page | fixed 0.8             |
//! | `text_pattern`   | lopdf, per page       | pattern heuristic     |
//! | `whole_document` | pdf-extract, all text | fixed 0.7, page 1     |
//!
//! All three find column-aligned blocks with
//! [`find_table_patterns`](intel_qa_core::tables::find_table_patterns).
//! `whole_document` is a fallback and only runs when the other strategies
//! came up short.

use std::path::Path;

use lopdf::Document;

use intel_qa_core::models::TableRecord;
use intel_qa_core::tables::{clean_table, find_table_patterns};

use super::pdf_text::{pages_via_lopdf, pages_via_pdf_extract};
use super::{file_label, ExtractError, TableStrategy};

const TEXT_FLOW_CONFIDENCE: f64 = 0.8;
const WHOLE_DOCUMENT_CONFIDENCE: f64 = 0.7;

/// Turn the pattern blocks of one page into records.
///
/// `fixed_confidence` overrides the per-block heuristic when set.
fn tables_from_text(
    text: &str,
    page: u32,
    source_file: &str,
    method: &str,
    title_prefix: &str,
    fixed_confidence: Option<f64>,
) -> Vec<TableRecord> {
    find_table_patterns(text)
        .into_iter()
        .enumerate()
        .filter_map(|(i, block)| {
            let mut all = vec![block.headers];
            all.extend(block.rows);
            let mut cleaned = clean_table(&all).into_iter();
            let headers = cleaned.next()?;
            let rows: Vec<Vec<String>> = cleaned.collect();
            if rows.is_empty() {
                return None;
            }
            Some(TableRecord {
                title: format!("{}_{}_{}", title_prefix, page, i + 1),
                headers,
                rows,
                source_page: page,
                source_file: source_file.to_string(),
                confidence: fixed_confidence.unwrap_or(block.confidence),
                extractor_method: method.to_string(),
                ..Default::default()
            })
        })
        .collect()
}

/// Column-aligned blocks in pdf-extract's per-page text.
#[derive(Debug, Default)]
pub struct TextFlowStrategy;

impl TableStrategy for TextFlowStrategy {
    fn name(&self) -> &str {
        "text_flow"
    }

    fn extract(&self, path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let pages = pages_via_pdf_extract(&bytes)?;
        let source_file = file_label(path);
        Ok(pages
            .iter()
            .enumerate()
            .flat_map(|(i, text)| {
                tables_from_text(
                    text,
                    i as u32 + 1,
                    &source_file,
                    self.name(),
                    "TextFlow_Table",
                    Some(TEXT_FLOW_CONFIDENCE),
                )
            })
            .collect())
    }
}

/// Regex line patterns over lopdf's per-page text.
#[derive(Debug, Default)]
pub struct TextPatternStrategy;

impl TableStrategy for TextPatternStrategy {
    fn name(&self) -> &str {
        "text_pattern"
    }

    fn extract(&self, path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
        let doc = Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let source_file = file_label(path);
        Ok(pages_via_lopdf(&doc)
            .into_iter()
            .flat_map(|(page, text)| {
                tables_from_text(
                    &text,
                    page,
                    &source_file,
                    self.name(),
                    "Pattern_Table",
                    None,
                )
            })
            .collect())
    }
}

/// Last resort: scan the whole document as one page.
#[derive(Debug, Default)]
pub struct WholeDocumentStrategy;

impl TableStrategy for WholeDocumentStrategy {
    fn name(&self) -> &str {
        "whole_document"
    }

    fn fallback_only(&self) -> bool {
        true
    }

    fn extract(&self, path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
        let bytes = std::fs::read(path)?;
        let text = pages_via_pdf_extract(&bytes)?.join("\n");
        Ok(tables_from_text(
            &text,
            1,
            &file_label(path),
            self.name(),
            "Document_Table",
            Some(WHOLE_DOCUMENT_CONFIDENCE),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = "Top events in 2025\n\
                        Rank    Event         Share 2025\n\
                        1       Phishing      41%\n\
                        2       Ransomware    23%\n\
                        \n\
                        Closing remarks.";

    #[test]
    fn test_tables_from_text_fixed_confidence() {
        let tables = tables_from_text(PAGE, 3, "risk.pdf", "text_flow", "TextFlow_Table", Some(0.8));
        assert_eq!(tables.len(), 1);
        let t = &tables[0];
        assert_eq!(t.title, "TextFlow_Table_3_1");
        assert_eq!(t.headers, vec!["Rank", "Event", "Share 2025"]);
        assert_eq!(t.rows[1], vec!["2", "Ransomware", "23%"]);
        assert_eq!(t.source_page, 3);
        assert_eq!(t.confidence, 0.8);
        assert_eq!(t.extractor_method, "text_flow");
    }

    #[test]
    fn test_tables_from_text_heuristic_confidence() {
        let tables = tables_from_text(PAGE, 1, "risk.pdf", "text_pattern", "Pattern_Table", None);
        assert_eq!(tables.len(), 1);
        assert!(tables[0].confidence > 0.7 && tables[0].confidence <= 1.0);
    }

    #[test]
    fn test_no_tables_in_prose() {
        let tables = tables_from_text(
            "CREM 計算企業的網路風險指數。\n沒有表格。",
            1,
            "a.pdf",
            "text_flow",
            "TextFlow_Table",
            Some(0.8),
        );
        assert!(tables.is_empty());
    }
}
