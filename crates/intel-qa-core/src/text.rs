//! Text cleaning, chunking, and chunk-quality scoring.
//!
//! [`TextProcessor`] prepares raw extracted document text for embedding.
//! Cleaning runs these steps in order:
//!
//! 1. Drop `=== Page N ===` markers.
//! 2. Collapse whitespace runs (paragraph breaks survive as `\n\n`).
//! 3. Strip characters outside word characters and common punctuation.
//! 4. Swap glossary terms for placeholder characters.
//! 5. Insert a missing space after punctuation that precedes a letter.
//! 6. Collapse repeated punctuation runs to their first character.
//! 7. Remove consecutive duplicate sentences.
//! 8. Restore glossary terms in their canonical spelling.
//! 9. Make sure the text ends with terminal punctuation.
//!
//! Term matching is case-insensitive and only matches whole terms: a
//! term must not touch an ASCII letter or digit on either side, so `AI`
//! matches in `AI技術` but not in `maintain`.
//!
//! Chunking is a sliding character window. Each chunk ends at the best
//! boundary found in the second half of the window (paragraph, then
//! sentence, then whitespace, then a hard cut) and the next chunk starts
//! `overlap` characters before that boundary.

use anyhow::{bail, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::TextChunk;

/// Built-in glossary of domain terms protected during cleaning.
pub const DEFAULT_TECHNICAL_TERMS: &[&str] = &[
    "CREM",
    "CRI",
    "Cyber Risk",
    "Risk Management",
    "AI",
    "Machine Learning",
    "XDR",
    "EDR",
    "SAE",
    "Trend Vision One",
    "Exposure Management",
    "Threat Detection",
    "Security Operations",
    "SOC",
    "Incident Response",
    "Vulnerability Management",
    "Compliance",
    "Governance",
    "Automation",
];

/// Placeholders live in the Unicode private-use area; cleaning strips any
/// such characters from the input before they are introduced.
const PLACEHOLDER_BASE: u32 = 0xE000;

const SENTENCE_END: &[char] = &['.', '!', '?', '。', '！', '？'];

/// Chunks shorter than this count as "small" in quality scoring.
const SMALL_CHUNK_CHARS: usize = 200;
/// Chunks longer than this count as "large" in quality scoring.
const LARGE_CHUNK_CHARS: usize = 800;
const MAX_AVG_CHUNK_CHARS: f64 = 1000.0;

/// Cleans, chunks, and scores document text.
#[derive(Debug, Clone)]
pub struct TextProcessor {
    terms: Vec<String>,
    /// `terms` as char vectors, index-aligned.
    term_chars: Vec<Vec<char>>,
    /// Term indices ordered longest-first so longer terms win overlaps.
    match_order: Vec<usize>,
    chunk_size: usize,
    chunk_overlap: usize,
    min_chunk_chars: usize,
    page_marker: Regex,
    disallowed: Regex,
    missing_space: Regex,
    repeated_punct: Regex,
}

impl TextProcessor {
    /// Build a processor. `chunk_size` must be positive and larger than
    /// `chunk_overlap`.
    pub fn new(terms: Vec<String>, chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            bail!("chunk_size must be > 0");
        }
        if chunk_overlap >= chunk_size {
            bail!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap,
                chunk_size
            );
        }
        let terms: Vec<String> = terms
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        if terms.len() > 0x1000 {
            bail!("technical term glossary is too large ({} terms)", terms.len());
        }
        let term_chars: Vec<Vec<char>> = terms.iter().map(|t| t.chars().collect()).collect();
        let mut match_order: Vec<usize> = (0..terms.len()).collect();
        match_order.sort_by_key(|&i| std::cmp::Reverse(term_chars[i].len()));

        Ok(Self {
            terms,
            term_chars,
            match_order,
            chunk_size,
            chunk_overlap,
            min_chunk_chars: 0,
            page_marker: Regex::new(r"=== Page \d+ ===\n?")?,
            disallowed: Regex::new(
                r#"[^\w\s.,;:!?\-()\[\]{}"'%。，、！？：；（）「」]"#,
            )?,
            missing_space: Regex::new(r"([^\s.,;:!?])([.,;:!?])([A-Za-z\x{E000}-\x{EFFF}])")?,
            repeated_punct: Regex::new(r"([.,;:!?])[.,;:!?]+")?,
        })
    }

    /// Processor with the built-in glossary.
    pub fn with_defaults(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        Self::new(
            DEFAULT_TECHNICAL_TERMS.iter().map(|t| t.to_string()).collect(),
            chunk_size,
            chunk_overlap,
        )
    }

    /// Drop chunks shorter than `min` characters when a document yields
    /// more than one chunk.
    pub fn with_min_chunk_chars(mut self, min: usize) -> Self {
        self.min_chunk_chars = min;
        self
    }

    pub fn terms(&self) -> &[String] {
        &self.terms
    }

    // ============ Cleaning ============

    /// Run the full cleaning pipeline.
    pub fn clean(&self, raw: &str) -> String {
        if raw.trim().is_empty() {
            return String::new();
        }
        let text = self.page_marker.replace_all(raw, "");
        let text = collapse_whitespace(&text);
        let text = collapse_whitespace(&self.disallowed.replace_all(&text, ""));
        let text = self.protect_terms(&text);
        let text = self.missing_space.replace_all(&text, "$1$2 $3");
        let text = self.repeated_punct.replace_all(&text, "$1");
        let text = remove_duplicate_sentences(&text);
        let text = self.restore_terms(&text);
        ensure_terminal_punctuation(text.trim())
    }

    fn protect_terms(&self, text: &str) -> String {
        let chars: Vec<char> = text.chars().collect();
        let mut out = String::with_capacity(text.len());
        let mut i = 0;
        'outer: while i < chars.len() {
            for &idx in &self.match_order {
                let term = &self.term_chars[idx];
                if term_matches_at(&chars, i, term) {
                    out.push(placeholder(idx));
                    i += term.len();
                    continue 'outer;
                }
            }
            out.push(chars[i]);
            i += 1;
        }
        out
    }

    fn restore_terms(&self, text: &str) -> String {
        text.chars()
            .fold(String::with_capacity(text.len()), |mut out, c| {
                match placeholder_index(c).and_then(|i| self.terms.get(i)) {
                    Some(term) => out.push_str(term),
                    None => out.push(c),
                }
                out
            })
    }

    /// Glossary terms present in `text`, in glossary order.
    pub fn extract_technical_terms(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        self.terms
            .iter()
            .zip(&self.term_chars)
            .filter(|(_, term)| (0..chars.len()).any(|i| term_matches_at(&chars, i, term)))
            .map(|(term, _)| term.clone())
            .collect()
    }

    // ============ Chunking ============

    /// Split cleaned text into overlapping chunks tagged with `source`.
    pub fn chunk(&self, text: &str, source: &str) -> Vec<TextChunk> {
        let pieces = self.split_windows(text);
        pieces
            .into_iter()
            .enumerate()
            .map(|(i, content)| TextChunk {
                chunk_id: format!("{}#{}", source, i),
                source: source.to_string(),
                chunk_index: i,
                technical_terms: self.extract_technical_terms(&content),
                content,
            })
            .collect()
    }

    /// Clean then chunk.
    pub fn process(&self, raw: &str, source: &str) -> Vec<TextChunk> {
        let cleaned = self.clean(raw);
        let mut chunks = self.chunk(&cleaned, source);
        if chunks.len() > 1 && self.min_chunk_chars > 0 {
            chunks.retain(|c| c.chunk_size() >= self.min_chunk_chars);
            for (i, c) in chunks.iter_mut().enumerate() {
                c.chunk_index = i;
                c.chunk_id = format!("{}#{}", source, i);
            }
        }
        chunks
    }

    fn split_windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut out = Vec::new();
        if n == 0 {
            return out;
        }

        let spans = self.term_spans(&chars);
        let mut start = 0usize;
        loop {
            let window_end = usize::min(start + self.chunk_size, n);
            if window_end == n {
                push_piece(&mut out, &chars[start..n]);
                break;
            }

            let min_split = start + usize::max(self.chunk_size / 2, 1);
            let split = find_split(&chars, min_split, window_end);
            let split = avoid_term_split(&spans, split, min_split);

            push_piece(&mut out, &chars[start..split]);
            start = usize::max(split.saturating_sub(self.chunk_overlap), start + 1);
        }
        out
    }

    fn term_spans(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let mut spans = Vec::new();
        for term in &self.term_chars {
            for i in 0..chars.len() {
                if term_matches_at(chars, i, term) {
                    spans.push((i, i + term.len()));
                }
            }
        }
        spans
    }

    // ============ Quality ============

    /// Score a batch of chunks in `[0, 100]`. Advisory only.
    pub fn validate_quality(&self, chunks: &[TextChunk]) -> QualityReport {
        if chunks.is_empty() {
            return QualityReport {
                issues: vec!["no_chunks".to_string()],
                ..Default::default()
            };
        }

        let total_chunks = chunks.len();
        let sizes: Vec<usize> = chunks.iter().map(TextChunk::chunk_size).collect();
        let total_length: usize = sizes.iter().sum();
        let average_length = total_length as f64 / total_chunks as f64;
        let technical_terms_count: usize = chunks.iter().map(|c| c.technical_terms.len()).sum();
        let chunks_with_terms = chunks
            .iter()
            .filter(|c| !c.technical_terms.is_empty())
            .count();

        let size_distribution = SizeDistribution {
            small: sizes.iter().filter(|&&s| s < SMALL_CHUNK_CHARS).count(),
            medium: sizes
                .iter()
                .filter(|&&s| (SMALL_CHUNK_CHARS..=LARGE_CHUNK_CHARS).contains(&s))
                .count(),
            large: sizes.iter().filter(|&&s| s > LARGE_CHUNK_CHARS).count(),
        };

        let mut score: i32 = 100;
        let mut issues = Vec::new();
        if average_length < SMALL_CHUNK_CHARS as f64 {
            score -= 20;
            issues.push("average_length_too_short".to_string());
        } else if average_length > MAX_AVG_CHUNK_CHARS {
            score -= 10;
            issues.push("average_length_too_long".to_string());
        }
        if (chunks_with_terms as f64) < total_chunks as f64 * 0.5 {
            score -= 15;
            issues.push("low_technical_term_coverage".to_string());
        }
        if size_distribution.small as f64 > total_chunks as f64 * 0.3 {
            score -= 10;
            issues.push("too_many_short_chunks".to_string());
        }

        QualityReport {
            quality_score: score.max(0) as u32,
            total_chunks,
            total_length,
            average_length,
            technical_terms_count,
            chunks_with_terms,
            size_distribution,
            issues,
        }
    }
}

/// Chunk-size histogram.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SizeDistribution {
    /// < 200 chars
    pub small: usize,
    /// 200–800 chars
    pub medium: usize,
    /// > 800 chars
    pub large: usize,
}

/// Result of [`TextProcessor::validate_quality`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub quality_score: u32,
    pub total_chunks: usize,
    pub total_length: usize,
    pub average_length: f64,
    pub technical_terms_count: usize,
    pub chunks_with_terms: usize,
    pub size_distribution: SizeDistribution,
    pub issues: Vec<String>,
}

fn placeholder(idx: usize) -> char {
    char::from_u32(PLACEHOLDER_BASE + idx as u32).unwrap_or('\u{FFFD}')
}

fn placeholder_index(c: char) -> Option<usize> {
    let code = c as u32;
    (PLACEHOLDER_BASE..PLACEHOLDER_BASE + 0x1000)
        .contains(&code)
        .then(|| (code - PLACEHOLDER_BASE) as usize)
}

fn is_ascii_word(c: char) -> bool {
    c.is_ascii_alphanumeric()
}

/// Case-insensitive whole-term match of `term` at `chars[i..]`.
fn term_matches_at(chars: &[char], i: usize, term: &[char]) -> bool {
    if term.is_empty() || i + term.len() > chars.len() {
        return false;
    }
    let matched = chars[i..i + term.len()]
        .iter()
        .zip(term)
        .all(|(a, b)| a.to_lowercase().eq(b.to_lowercase()));
    if !matched {
        return false;
    }
    let before_ok = i == 0 || !is_ascii_word(chars[i - 1]);
    let after = i + term.len();
    let after_ok = after == chars.len() || !is_ascii_word(chars[after]);
    before_ok && after_ok
}

/// Collapse whitespace runs to one space, keeping blank-line paragraph
/// breaks as `\n\n`.
fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut run_newlines = 0usize;
    let mut in_run = false;

    for c in text.chars() {
        if c.is_whitespace() {
            in_run = true;
            if c == '\n' {
                run_newlines += 1;
            }
            continue;
        }
        if in_run && !out.is_empty() {
            out.push_str(if run_newlines >= 2 { "\n\n" } else { " " });
        }
        in_run = false;
        run_newlines = 0;
        out.push(c);
    }
    out
}

/// Split into sentences, each keeping its terminator. ASCII terminators
/// only end a sentence before whitespace, so `3.5` stays whole.
fn sentences(paragraph: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut iter = paragraph.char_indices().peekable();
    while let Some((i, c)) = iter.next() {
        let ends = match c {
            '。' | '！' | '？' => true,
            '.' | '!' | '?' => iter.peek().map(|(_, n)| n.is_whitespace()).unwrap_or(true),
            _ => false,
        };
        if ends {
            let end = i + c.len_utf8();
            out.push(&paragraph[start..end]);
            start = end;
        }
    }
    if start < paragraph.len() {
        out.push(&paragraph[start..]);
    }
    out
}

fn remove_duplicate_sentences(text: &str) -> String {
    text.split("\n\n")
        .map(|para| {
            let mut kept: Vec<&str> = Vec::new();
            let mut prev = "";
            for s in sentences(para) {
                let s = s.trim();
                if s.is_empty() || s == prev {
                    continue;
                }
                kept.push(s);
                prev = s;
            }
            kept.join(" ")
        })
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

fn ensure_terminal_punctuation(text: &str) -> String {
    let mut out = text.to_string();
    if let Some(last) = out.chars().last() {
        if !SENTENCE_END.contains(&last) {
            out.push('.');
        }
    }
    out
}

fn push_piece(out: &mut Vec<String>, chars: &[char]) {
    let piece: String = chars.iter().collect();
    let piece = piece.trim();
    if !piece.is_empty() {
        out.push(piece.to_string());
    }
}

/// Best split position in `(min_split, window_end]`, as an exclusive end.
fn find_split(chars: &[char], min_split: usize, window_end: usize) -> usize {
    let range = min_split..window_end;

    // paragraph break
    for i in range.clone().rev() {
        if i + 1 < chars.len() && chars[i] == '\n' && chars[i + 1] == '\n' {
            return i + 2;
        }
    }
    // sentence end, followed by whitespace for ASCII terminators
    for i in range.clone().rev() {
        let c = chars[i];
        let next_is_space = chars.get(i + 1).map(|n| n.is_whitespace()).unwrap_or(true);
        if matches!(c, '。' | '！' | '？') || (matches!(c, '.' | '!' | '?') && next_is_space) {
            return i + 1;
        }
    }
    // any whitespace
    for i in range.rev() {
        if chars[i].is_whitespace() {
            return i + 1;
        }
    }
    window_end
}

/// Move a split that lands inside a term to the term's start, when that
/// still leaves a chunk of at least `min_split`.
fn avoid_term_split(spans: &[(usize, usize)], split: usize, min_split: usize) -> usize {
    for &(s, e) in spans {
        if s < split && split < e && s > min_split {
            return s;
        }
    }
    split
}

#[cfg(test)]
mod tests {
    use super::*;

    fn processor() -> TextProcessor {
        TextProcessor::with_defaults(800, 120).unwrap()
    }

    #[test]
    fn test_rejects_bad_window() {
        assert!(TextProcessor::with_defaults(0, 0).is_err());
        assert!(TextProcessor::with_defaults(100, 100).is_err());
    }

    #[test]
    fn test_clean_removes_markers_and_symbols() {
        let p = processor();
        let out = p.clean("=== Page 1 ===\nRisk   score ★ rises\tsharply");
        assert_eq!(out, "Risk score rises sharply.");
    }

    #[test]
    fn test_clean_keeps_cjk_and_parentheses() {
        let p = processor();
        let out = p.clean("CREM 計算企業的網路風險指數 (CRI)");
        assert_eq!(out, "CREM 計算企業的網路風險指數 (CRI).");
    }

    #[test]
    fn test_clean_fixes_spacing_and_punctuation() {
        let p = processor();
        let out = p.clean("Risk rose.Then it fell!!! Ratio is 3.5 today");
        assert_eq!(out, "Risk rose. Then it fell! Ratio is 3.5 today.");
    }

    #[test]
    fn test_clean_removes_consecutive_duplicates() {
        let p = processor();
        let out = p.clean("Patch now. Patch now. Then verify.");
        assert_eq!(out, "Patch now. Then verify.");
    }

    #[test]
    fn test_clean_protects_and_normalizes_terms() {
        let p = processor();
        let out = p.clean("trend vision one.xdr coverage");
        assert_eq!(out, "Trend Vision One. XDR coverage.");
        let out = p.clean("we maintain uptime");
        assert_eq!(out, "we maintain uptime.");
    }

    #[test]
    fn test_clean_keeps_paragraph_breaks() {
        let p = processor();
        let out = p.clean("First part.\n\n\n  Second part.");
        assert_eq!(out, "First part.\n\nSecond part.");
    }

    #[test]
    fn test_custom_glossary_longest_term_wins() {
        let p = TextProcessor::new(
            vec![" Vision ".into(), "Trend Vision One".into(), "".into()],
            800,
            120,
        )
        .unwrap();
        assert_eq!(p.terms(), ["Vision", "Trend Vision One"]);
        assert_eq!(p.clean("trend vision one rollout"), "Trend Vision One rollout.");
        assert_eq!(
            p.extract_technical_terms("Trend Vision One"),
            vec!["Vision".to_string(), "Trend Vision One".to_string()]
        );
    }

    #[test]
    fn test_extract_terms_whole_word() {
        let p = processor();
        let terms = p.extract_technical_terms("AI技術 and EDR, not maintain");
        assert_eq!(terms, vec!["AI".to_string(), "EDR".to_string()]);
    }

    #[test]
    fn test_short_text_single_chunk() {
        let p = processor();
        let chunks = p.chunk("CREM 計算企業的網路風險指數 (CRI).", "crem.txt");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].source, "crem.txt");
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].technical_terms, vec!["CREM", "CRI"]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(processor().chunk("", "x").is_empty());
        assert!(processor().process("   ", "x").is_empty());
    }

    #[test]
    fn test_chunks_overlap() {
        let p = TextProcessor::with_defaults(200, 50).unwrap();
        let text = (0..40)
            .map(|i| format!("Sentence number {} talks about exposure.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = p.chunk(&text, "doc.txt");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let head: String = pair[1].content.chars().take(20).collect();
            assert!(
                pair[0].content.contains(&head),
                "chunk {} does not overlap its predecessor",
                pair[1].chunk_index
            );
            assert!(pair[0].chunk_size() <= 200);
        }
    }

    #[test]
    fn test_chunks_prefer_paragraphs() {
        let p = TextProcessor::with_defaults(100, 10).unwrap();
        let para = "word ".repeat(12);
        let text = format!("{}\n\n{}", para.trim(), para.trim());
        let chunks = p.chunk(&text, "p.txt");
        assert!(chunks.len() >= 2);
        assert!(!chunks[0].content.contains("\n\n"));
    }

    #[test]
    fn test_chunks_do_not_cut_terms() {
        let p = TextProcessor::with_defaults(40, 5).unwrap();
        let text = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa Trend Vision One rules";
        let chunks = p.chunk(text, "t.txt");
        assert!(chunks.iter().any(|c| c.content.contains("Trend Vision One")));
    }

    #[test]
    fn test_quality_scoring() {
        let p = processor();
        assert_eq!(p.validate_quality(&[]).issues, vec!["no_chunks"]);

        let short = p.chunk("tiny note.", "a.txt");
        let report = p.validate_quality(&short);
        assert_eq!(report.quality_score, 55);
        assert!(report.issues.contains(&"average_length_too_short".to_string()));
        assert!(report.issues.contains(&"low_technical_term_coverage".to_string()));
        assert!(report.issues.contains(&"too_many_short_chunks".to_string()));
        assert_eq!(report.size_distribution.small, 1);

        let good = format!("CRI {}", "x".repeat(400));
        let chunks = p.chunk(&good, "b.txt");
        let report = p.validate_quality(&chunks);
        assert_eq!(report.quality_score, 100);
        assert!(report.issues.is_empty());
        assert_eq!(report.size_distribution.medium, 1);
    }
}
