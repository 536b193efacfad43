//! Table classification, text-pattern detection, deduplication, and
//! extraction reporting.
//!
//! This is the pure half of table extraction. The PDF-reading strategies
//! live in the application crate and hand their raw grids to the
//! functions here, so every strategy is filtered, classified, and
//! deduplicated by the same rules.
//!
//! # Classification
//!
//! Checked in order, first match wins:
//!
//! | Type | Rule |
//! |------|------|
//! | `time_series` | > 30% of first-column cells contain a year or a `d/m/y` date |
//! | `comparison` | ≥ 2 columns where > 50% of cells parse as numbers |
//! | `statistical` | any header or cell contains an aggregation keyword |
//! | `general` | otherwise |
//! | `unknown` | no headers and no rows |
//!
//! # Deduplication
//!
//! Two tables are duplicates when they share page, row count, and header
//! count, and [`table_similarity`] exceeds the threshold. The first table
//! seen is kept.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::OnceLock;

use crate::models::{TableRecord, TableType};

/// Aggregation vocabulary that marks a table as `statistical`. CJK terms
/// match as substrings, ASCII terms as whole words.
pub const STATISTICAL_KEYWORDS: &[&str] = &[
    "總計", "平均", "最大", "最小", "標準差", "mean", "average", "total", "sum", "max", "min",
];

/// Share of first-column cells that must look temporal.
const TIME_SERIES_RATIO: f64 = 0.3;
/// Share of a column's cells that must be numeric.
const NUMERIC_COLUMN_RATIO: f64 = 0.5;

fn year_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(?:20\d{2}|19\d{2})\b").ok())
        .as_ref()
}

fn date_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b\d{1,2}[/-]\d{1,2}[/-]\d{2,4}\b").ok())
        .as_ref()
}

fn matches(pattern: Option<&Regex>, text: &str) -> bool {
    pattern.map(|re| re.is_match(text)).unwrap_or(false)
}

/// Parse a cell as a number, tolerating thousands separators, a leading
/// currency sign, and a trailing percent sign.
pub fn parse_numeric(cell: &str) -> Option<f64> {
    let trimmed = cell.trim();
    let trimmed = trimmed.strip_suffix('%').unwrap_or(trimmed);
    let trimmed = trimmed.strip_prefix('$').unwrap_or(trimmed);
    let cleaned: String = trimmed.chars().filter(|c| *c != ',').collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

/// Classify a table by its header and row content.
pub fn classify_table(headers: &[String], rows: &[Vec<String>]) -> TableType {
    if headers.is_empty() && rows.is_empty() {
        return TableType::Unknown;
    }
    if is_time_series(rows) {
        TableType::TimeSeries
    } else if is_comparison(headers, rows) {
        TableType::Comparison
    } else if is_statistical(headers, rows) {
        TableType::Statistical
    } else {
        TableType::General
    }
}

fn is_time_series(rows: &[Vec<String>]) -> bool {
    if rows.is_empty() {
        return false;
    }
    let first_col: Vec<&str> = rows
        .iter()
        .map(|r| r.first().map(String::as_str).unwrap_or(""))
        .collect();
    let total = first_col.len() as f64;
    let years = first_col
        .iter()
        .filter(|c| matches(year_pattern(), c))
        .count() as f64;
    let dates = first_col
        .iter()
        .filter(|c| matches(date_pattern(), c))
        .count() as f64;
    years / total > TIME_SERIES_RATIO || dates / total > TIME_SERIES_RATIO
}

fn is_comparison(headers: &[String], rows: &[Vec<String>]) -> bool {
    if rows.is_empty() {
        return false;
    }
    let width = rows
        .iter()
        .map(Vec::len)
        .max()
        .unwrap_or(0)
        .max(headers.len());
    let numeric_cols = (0..width)
        .filter(|&col| {
            let numeric = rows
                .iter()
                .filter(|r| r.get(col).and_then(|c| parse_numeric(c)).is_some())
                .count();
            numeric as f64 > rows.len() as f64 * NUMERIC_COLUMN_RATIO
        })
        .count();
    numeric_cols >= 2
}

fn is_statistical(headers: &[String], rows: &[Vec<String>]) -> bool {
    let text = headers
        .iter()
        .chain(rows.iter().flatten())
        .map(|c| c.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");
    let words: HashSet<&str> = text
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();
    STATISTICAL_KEYWORDS.iter().any(|kw| {
        if kw.is_ascii() {
            words.contains(kw)
        } else {
            text.contains(kw)
        }
    })
}

/// Trim cells and drop rows and columns that are entirely empty.
pub fn clean_table(rows: &[Vec<String>]) -> Vec<Vec<String>> {
    let trimmed: Vec<Vec<String>> = rows
        .iter()
        .map(|r| r.iter().map(|c| c.trim().to_string()).collect::<Vec<_>>())
        .filter(|r: &Vec<String>| r.iter().any(|c| !c.is_empty()))
        .collect();

    let width = trimmed.iter().map(Vec::len).max().unwrap_or(0);
    let keep: Vec<usize> = (0..width)
        .filter(|&col| {
            trimmed
                .iter()
                .any(|r| r.get(col).map(|c| !c.is_empty()).unwrap_or(false))
        })
        .collect();

    trimmed
        .into_iter()
        .map(|r| {
            keep.iter()
                .filter_map(|&col| r.get(col).cloned())
                .collect()
        })
        .collect()
}

/// Split a line on runs of two or more spaces, or on tabs.
pub fn split_columns(line: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;

    for ch in line.chars() {
        match ch {
            '\t' => {
                parts.push(std::mem::take(&mut current));
                spaces = 0;
            }
            c if c.is_whitespace() => spaces += 1,
            c => {
                if spaces >= 2 {
                    parts.push(std::mem::take(&mut current));
                } else if spaces == 1 {
                    current.push(' ');
                }
                spaces = 0;
                current.push(c);
            }
        }
    }
    parts.push(current);

    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

/// A line looks tabular if it has at least two wide-gap separated parts
/// and at least one of them contains a digit.
pub fn is_table_line(line: &str) -> bool {
    let parts = split_columns(line);
    parts.len() >= 2
        && parts
            .iter()
            .any(|p| p.chars().any(|c| c.is_ascii_digit()))
}

/// A table candidate found in free text.
#[derive(Debug, Clone, PartialEq)]
pub struct TextTable {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub confidence: f64,
}

/// Scan plain text for runs of more than two consecutive table lines.
/// The first line of each run becomes the header row.
pub fn find_table_patterns(text: &str) -> Vec<TextTable> {
    let mut tables = Vec::new();
    let mut current: Vec<&str> = Vec::new();

    fn flush(block: &mut Vec<&str>, out: &mut Vec<TextTable>) {
        if block.len() > 2 {
            out.push(parse_text_table(block));
        }
        block.clear();
    }

    for line in text.lines() {
        let line = line.trim();
        if !line.is_empty() && is_table_line(line) {
            current.push(line);
        } else {
            flush(&mut current, &mut tables);
        }
    }
    flush(&mut current, &mut tables);
    tables
}

fn parse_text_table(lines: &[&str]) -> TextTable {
    let all: Vec<Vec<String>> = lines.iter().map(|l| split_columns(l)).collect();
    let confidence = text_pattern_confidence(&all);
    let mut iter = all.into_iter();
    let headers = iter.next().unwrap_or_default();
    TextTable {
        headers,
        rows: iter.collect(),
        confidence,
    }
}

/// Heuristic confidence for a text-detected grid (header row included).
///
/// Base 0.5, +0.2 when every row has the same width, +0.3 × share of
/// cells containing a digit. Capped at 1.0.
pub fn text_pattern_confidence(rows: &[Vec<String>]) -> f64 {
    if rows.len() < 2 {
        return 0.0;
    }
    let mut confidence = 0.5;

    let widths: HashSet<usize> = rows.iter().map(Vec::len).collect();
    if widths.len() == 1 {
        confidence += 0.2;
    }

    let total: usize = rows.iter().map(Vec::len).sum();
    if total > 0 {
        let numeric = rows
            .iter()
            .flatten()
            .filter(|c| c.chars().any(|ch| ch.is_ascii_digit()))
            .count();
        confidence += numeric as f64 / total as f64 * 0.3;
    }

    f64::min(confidence, 1.0)
}

/// Whether a table meets the minimum bar to be kept: a header row, at
/// least one data row, and confidence above `min_accuracy`.
pub fn accept(table: &TableRecord, min_accuracy: f64) -> bool {
    !table.headers.is_empty() && !table.rows.is_empty() && table.confidence > min_accuracy
}

fn token_jaccard(a: &str, b: &str) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    let set_a: HashSet<&str> = a.split_whitespace().collect();
    let set_b: HashSet<&str> = b.split_whitespace().collect();
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    if set_a.is_empty() || set_b.is_empty() {
        return 0.0;
    }
    let inter = set_a.intersection(&set_b).count() as f64;
    let union = set_a.union(&set_b).count() as f64;
    inter / union
}

/// Mean of header token overlap and first-row token overlap.
pub fn table_similarity(a: &TableRecord, b: &TableRecord) -> f64 {
    let headers = token_jaccard(&a.headers.join(" "), &b.headers.join(" "));
    let first_row = match (a.rows.first(), b.rows.first()) {
        (Some(ra), Some(rb)) => token_jaccard(&ra.join(" "), &rb.join(" ")),
        _ => 0.0,
    };
    (headers + first_row) / 2.0
}

pub fn is_duplicate(table: &TableRecord, existing: &[TableRecord], threshold: f64) -> bool {
    existing.iter().any(|e| {
        e.source_page == table.source_page
            && e.rows.len() == table.rows.len()
            && e.headers.len() == table.headers.len()
            && table_similarity(table, e) > threshold
    })
}

/// Drop later duplicates, keeping the first occurrence of each table.
pub fn deduplicate(tables: Vec<TableRecord>, threshold: f64) -> Vec<TableRecord> {
    let mut unique: Vec<TableRecord> = Vec::with_capacity(tables.len());
    for table in tables {
        if !is_duplicate(&table, &unique, threshold) {
            unique.push(table);
        }
    }
    unique
}

/// Confidence histogram buckets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceDistribution {
    /// confidence > 0.8
    pub high: usize,
    /// 0.5 ≤ confidence ≤ 0.8
    pub medium: usize,
    /// confidence < 0.5
    pub low: usize,
}

/// Summary of one extraction run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionReport {
    pub total_tables: usize,
    pub extraction_methods: BTreeMap<String, usize>,
    pub table_types: BTreeMap<String, usize>,
    pub confidence_distribution: ConfidenceDistribution,
    pub pages_with_tables: Vec<u32>,
    pub average_confidence: f64,
}

impl ExtractionReport {
    pub fn from_tables(tables: &[TableRecord]) -> Self {
        let mut report = ExtractionReport {
            total_tables: tables.len(),
            ..Default::default()
        };
        let mut pages = BTreeSet::new();
        let mut total_confidence = 0.0;

        for t in tables {
            *report
                .extraction_methods
                .entry(t.extractor_method.clone())
                .or_insert(0) += 1;
            *report
                .table_types
                .entry(t.table_type.to_string())
                .or_insert(0) += 1;

            let dist = &mut report.confidence_distribution;
            if t.confidence > 0.8 {
                dist.high += 1;
            } else if t.confidence >= 0.5 {
                dist.medium += 1;
            } else {
                dist.low += 1;
            }

            pages.insert(t.source_page);
            total_confidence += t.confidence;
        }

        if !tables.is_empty() {
            report.average_confidence = total_confidence / tables.len() as f64;
        }
        report.pages_with_tables = pages.into_iter().collect();
        report
    }
}

/// Persisted form of an extraction run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TablesArtifact {
    pub extraction_date: String,
    pub total_tables: usize,
    pub tables: Vec<TableRecord>,
}

impl TablesArtifact {
    pub fn new(tables: Vec<TableRecord>) -> Self {
        Self {
            extraction_date: Utc::now().to_rfc3339(),
            total_tables: tables.len(),
            tables,
        }
    }
}
