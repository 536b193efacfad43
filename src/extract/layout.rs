//! Coordinate-based table detection from PDF content streams.
//!
//! Walks each page's operators with lopdf, tracking the text line origin
//! through `BT`, `Td`, `TD`, `TL`, `Tm`, `T*`, `'` and `"`, and records
//! every shown string as a positioned [`TextRun`]. Runs are grouped into
//! rows by baseline, and consecutive multi-run rows form a candidate grid
//! whose columns are clustered by x position.
//!
//! Accuracy is the share of grid cells that received text.

use std::path::Path;

use lopdf::{Document, Object, ObjectId};
use serde_json::{Map, Value};

use intel_qa_core::models::TableRecord;
use intel_qa_core::tables::clean_table;

use super::pdf_text::decode_pdf_bytes;
use super::{file_label, ExtractError, TableStrategy};

/// Baselines closer than this (in user-space units) share a row.
const ROW_TOLERANCE: f32 = 3.0;
/// Runs whose x positions are closer than this share a column.
const COLUMN_TOLERANCE: f32 = 15.0;
/// A grid needs a header row plus at least one data row.
const MIN_GRID_ROWS: usize = 2;

/// A string shown at a text-space origin.
#[derive(Debug, Clone, PartialEq)]
pub struct TextRun {
    pub x: f32,
    pub y: f32,
    pub text: String,
}

fn number(obj: &Object) -> Option<f32> {
    match obj {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn shown_text(obj: &Object) -> String {
    match obj {
        Object::String(bytes, _) => decode_pdf_bytes(bytes).unwrap_or_default(),
        Object::Array(items) => items.iter().map(shown_text).collect(),
        _ => String::new(),
    }
}

/// Positioned text runs for one page, in content-stream order.
pub fn page_text_runs(doc: &Document, page_id: ObjectId) -> Vec<TextRun> {
    let operations = doc
        .get_page_content(page_id)
        .ok()
        .and_then(|content| lopdf::content::Content::decode(&content).ok())
        .map(|c| c.operations)
        .unwrap_or_default();

    let mut runs = Vec::new();
    let mut current: Option<TextRun> = None;
    let (mut x, mut y, mut leading) = (0.0f32, 0.0f32, 0.0f32);

    let flush = |current: &mut Option<TextRun>, runs: &mut Vec<TextRun>| {
        if let Some(run) = current.take() {
            if !run.text.trim().is_empty() {
                runs.push(TextRun {
                    text: run.text.trim().to_string(),
                    ..run
                });
            }
        }
    };

    for op in operations {
        let operand = |i: usize| op.operands.get(i).and_then(number);
        match op.operator.as_str() {
            "BT" => {
                flush(&mut current, &mut runs);
                x = 0.0;
                y = 0.0;
            }
            "ET" => flush(&mut current, &mut runs),
            "Td" | "TD" => {
                flush(&mut current, &mut runs);
                let (tx, ty) = (operand(0).unwrap_or(0.0), operand(1).unwrap_or(0.0));
                x += tx;
                y += ty;
                if op.operator == "TD" {
                    leading = -ty;
                }
            }
            "TL" => leading = operand(0).unwrap_or(leading),
            "Tm" => {
                flush(&mut current, &mut runs);
                x = operand(4).unwrap_or(x);
                y = operand(5).unwrap_or(y);
            }
            "T*" => {
                flush(&mut current, &mut runs);
                y -= leading;
            }
            "Tj" | "TJ" | "'" | "\"" => {
                if op.operator == "'" || op.operator == "\"" {
                    flush(&mut current, &mut runs);
                    y -= leading;
                }
                let text = op.operands.last().map(shown_text).unwrap_or_default();
                current
                    .get_or_insert_with(|| TextRun {
                        x,
                        y,
                        text: String::new(),
                    })
                    .text
                    .push_str(&text);
            }
            _ => {}
        }
    }
    flush(&mut current, &mut runs);
    runs
}

/// Group runs into rows (top of page first), each sorted left to right.
pub fn group_rows(mut runs: Vec<TextRun>) -> Vec<Vec<TextRun>> {
    runs.sort_by(|a, b| b.y.total_cmp(&a.y).then(a.x.total_cmp(&b.x)));
    let mut rows: Vec<Vec<TextRun>> = Vec::new();
    for run in runs {
        match rows.last_mut() {
            Some(row) if (row[0].y - run.y).abs() <= ROW_TOLERANCE => row.push(run),
            _ => rows.push(vec![run]),
        }
    }
    for row in &mut rows {
        row.sort_by(|a, b| a.x.total_cmp(&b.x));
    }
    rows
}

/// A grid found on one page.
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutGrid {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub accuracy: f64,
}

fn column_anchors(block: &[Vec<TextRun>]) -> Vec<f32> {
    let mut xs: Vec<f32> = block.iter().flatten().map(|r| r.x).collect();
    xs.sort_by(|a, b| a.total_cmp(b));
    let mut anchors: Vec<f32> = Vec::new();
    for x in xs {
        match anchors.last() {
            Some(last) if x - last <= COLUMN_TOLERANCE => {}
            _ => anchors.push(x),
        }
    }
    anchors
}

fn nearest(anchors: &[f32], x: f32) -> usize {
    anchors
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| (*a - x).abs().total_cmp(&(*b - x).abs()))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn block_to_grid(block: &[Vec<TextRun>]) -> Option<LayoutGrid> {
    let anchors = column_anchors(block);
    if anchors.len() < 2 {
        return None;
    }
    let mut grid = vec![vec![String::new(); anchors.len()]; block.len()];
    for (r, row) in block.iter().enumerate() {
        for run in row {
            let cell = &mut grid[r][nearest(&anchors, run.x)];
            if !cell.is_empty() {
                cell.push(' ');
            }
            cell.push_str(&run.text);
        }
    }

    let total = block.len() * anchors.len();
    let filled = grid.iter().flatten().filter(|c| !c.is_empty()).count();
    let accuracy = filled as f64 / total as f64;

    let mut cleaned = clean_table(&grid).into_iter();
    let headers = cleaned.next()?;
    let rows: Vec<Vec<String>> = cleaned.collect();
    if rows.is_empty() {
        return None;
    }
    Some(LayoutGrid {
        headers,
        rows,
        accuracy,
    })
}

/// Find grids among grouped rows: maximal runs of consecutive rows that
/// each hold at least two text runs.
pub fn find_grids(rows: &[Vec<TextRun>]) -> Vec<LayoutGrid> {
    let mut grids = Vec::new();
    let mut start = 0;
    while start < rows.len() {
        if rows[start].len() < 2 {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < rows.len() && rows[end].len() >= 2 {
            end += 1;
        }
        if end - start >= MIN_GRID_ROWS {
            if let Some(grid) = block_to_grid(&rows[start..end]) {
                grids.push(grid);
            }
        }
        start = end;
    }
    grids
}

/// Table strategy reading text positions from content streams.
#[derive(Debug, Default)]
pub struct LayoutStrategy;

impl TableStrategy for LayoutStrategy {
    fn name(&self) -> &str {
        "layout"
    }

    fn extract(&self, path: &Path) -> Result<Vec<TableRecord>, ExtractError> {
        let doc = Document::load(path).map_err(|e| ExtractError::Pdf(e.to_string()))?;
        let source_file = file_label(path);
        let mut tables = Vec::new();

        for (page_num, page_id) in doc.get_pages() {
            let rows = group_rows(page_text_runs(&doc, page_id));
            for (i, grid) in find_grids(&rows).into_iter().enumerate() {
                let mut metadata = Map::new();
                metadata.insert("columns".into(), Value::from(grid.headers.len()));
                tables.push(TableRecord {
                    title: format!("Layout_Table_{}_{}", page_num, i + 1),
                    headers: grid.headers,
                    rows: grid.rows,
                    source_page: page_num,
                    source_file: source_file.clone(),
                    confidence: grid.accuracy,
                    extractor_method: self.name().to_string(),
                    metadata,
                    ..Default::default()
                });
            }
        }
        Ok(tables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(x: f32, y: f32, text: &str) -> TextRun {
        TextRun {
            x,
            y,
            text: text.into(),
        }
    }

    #[test]
    fn test_group_rows_by_baseline() {
        let rows = group_rows(vec![
            run(200.0, 700.0, "Event"),
            run(100.0, 680.0, "1"),
            run(100.0, 701.0, "Rank"),
            run(200.0, 679.0, "Phishing"),
        ]);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0].text, "Rank");
        assert_eq!(rows[0][1].text, "Event");
        assert_eq!(rows[1][1].text, "Phishing");
    }

    #[test]
    fn test_find_grid_with_gap() {
        let rows = group_rows(vec![
            run(50.0, 760.0, "Heading paragraph"),
            run(100.0, 700.0, "Rank"),
            run(200.0, 700.0, "Event"),
            run(100.0, 680.0, "1"),
            run(200.0, 680.0, "Phishing"),
            run(100.0, 660.0, "2"),
        ]);
        let grids = find_grids(&rows);
        assert_eq!(grids.len(), 1);
        let grid = &grids[0];
        assert_eq!(grid.headers, vec!["Rank", "Event"]);
        assert_eq!(grid.rows[0], vec!["1", "Phishing"]);
        // only the first data row forms part of the grid; "2" sits alone
        assert_eq!(grid.rows.len(), 1);
        assert!((grid.accuracy - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_sparse_grid_accuracy() {
        let rows = vec![
            vec![run(100.0, 700.0, "A"), run(200.0, 700.0, "B"), run(300.0, 700.0, "C")],
            vec![run(100.0, 680.0, "1"), run(300.0, 680.0, "3")],
        ];
        let grids = find_grids(&rows);
        assert_eq!(grids.len(), 1);
        assert!((grids[0].accuracy - 5.0 / 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_single_column_is_not_a_grid() {
        let rows = vec![
            vec![run(100.0, 700.0, "a"), run(105.0, 700.0, "b")],
            vec![run(100.0, 680.0, "c"), run(104.0, 680.0, "d")],
        ];
        assert!(find_grids(&rows).is_empty());
    }
}
