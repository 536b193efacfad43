//! Plain-text extraction from PDFs.
//!
//! `pdf-extract` handles font encodings well but can fail (or panic) on
//! malformed files; lopdf is more tolerant of broken structure. The
//! primary path is pdf-extract per page, and the fallback is lopdf.
//!
//! Pages are separated by `=== Page N ===` marker lines, which the text
//! processor strips before chunking.

use std::path::Path;

use lopdf::Document;
use tracing::{debug, warn};

use super::layout::{group_rows, page_text_runs};
use super::ExtractError;

/// Decode PDF string bytes. PDF strings can be UTF-16BE (with or without
/// BOM), UTF-16LE, UTF-8 or PDFDocEncoding; the last is approximated as
/// Latin-1. Control characters other than space are dropped.
pub fn decode_pdf_bytes(bytes: &[u8]) -> Option<String> {
    if bytes.is_empty() {
        return None;
    }

    let keep = |s: String| -> Option<String> {
        let cleaned: String = s.chars().filter(|c| !c.is_control() || *c == ' ').collect();
        if cleaned.is_empty() {
            None
        } else {
            Some(cleaned)
        }
    };
    let utf16 = |data: &[u8], be: bool| -> Option<String> {
        let units: Vec<u16> = data
            .chunks_exact(2)
            .map(|c| {
                if be {
                    u16::from_be_bytes([c[0], c[1]])
                } else {
                    u16::from_le_bytes([c[0], c[1]])
                }
            })
            .collect();
        String::from_utf16(&units).ok()
    };

    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        return utf16(&bytes[2..], true).and_then(keep);
    }

    if bytes.len() >= 4 {
        let pairs = || bytes.chunks(2).take(4);
        if pairs().all(|c| c.len() == 2 && c[1] == 0 && c[0] < 128) {
            if let Some(s) = utf16(bytes, false).and_then(keep) {
                return Some(s);
            }
        }
        if pairs().all(|c| c.len() == 2 && c[0] == 0 && c[1] < 128) {
            if let Some(s) = utf16(bytes, true).and_then(keep) {
                return Some(s);
            }
        }
    }

    if let Ok(s) = String::from_utf8(bytes.to_vec()) {
        if let Some(s) = keep(s) {
            return Some(s);
        }
    }

    keep(bytes.iter().map(|&b| b as char).collect())
}

fn with_page_markers<I: IntoIterator<Item = String>>(pages: I) -> String {
    let mut out = String::new();
    for (i, text) in pages.into_iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        out.push_str(&format!("=== Page {} ===\n", i + 1));
        out.push_str(text.trim_end());
        out.push('\n');
    }
    out
}

/// Per-page text via pdf-extract. Panics inside the library are caught
/// and reported as errors.
pub fn pages_via_pdf_extract(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        pdf_extract::extract_text_from_mem_by_pages(bytes)
    }));
    match result {
        Ok(Ok(pages)) => Ok(pages),
        Ok(Err(e)) => Err(ExtractError::Pdf(e.to_string())),
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            Err(ExtractError::Pdf(format!("pdf-extract panicked: {}", msg)))
        }
    }
}

/// Per-page text via lopdf, keyed by 1-based page number.
pub fn pages_via_lopdf(doc: &Document) -> Vec<(u32, String)> {
    doc.get_pages()
        .into_iter()
        .map(|(page_num, page_id)| {
            let text = match doc.extract_text(&[page_num]) {
                Ok(t) if !t.trim().is_empty() => t,
                _ => group_rows(page_text_runs(doc, page_id))
                    .into_iter()
                    .map(|row| {
                        row.into_iter()
                            .map(|run| run.text)
                            .collect::<Vec<_>>()
                            .join("  ")
                    })
                    .collect::<Vec<_>>()
                    .join("\n"),
            };
            (page_num, text)
        })
        .collect()
}

/// Extract the full text of a PDF with page markers.
pub fn extract_pdf_text(path: &Path) -> Result<String, ExtractError> {
    let bytes = std::fs::read(path)?;

    match pages_via_pdf_extract(&bytes) {
        Ok(pages) if pages.iter().any(|p| !p.trim().is_empty()) => {
            debug!(path = %path.display(), pages = pages.len(), "extracted text via pdf-extract");
            return Ok(with_page_markers(pages));
        }
        Ok(_) => {
            debug!(path = %path.display(), "pdf-extract found no text, trying lopdf");
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "pdf-extract failed, trying lopdf fallback");
        }
    }

    let doc = Document::load_mem(&bytes).map_err(|e| ExtractError::Pdf(e.to_string()))?;
    let pages = pages_via_lopdf(&doc);
    Ok(with_page_markers(pages.into_iter().map(|(_, t)| t)))
}
