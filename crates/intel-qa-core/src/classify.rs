//! Query-type auto detection.
//!
//! When a caller does not pin a [`FilterType`], the answer composer asks a
//! [`QueryClassifier`] which content type the question is most likely
//! answered by. The shipped [`KeywordClassifier`] is a plain vocabulary
//! match; a misclassification only narrows recall, since `all` is always
//! the fallback.

use crate::models::FilterType;

/// Decides which content type a question should be searched against.
pub trait QueryClassifier: Send + Sync {
    fn classify(&self, question: &str) -> FilterType;
}

const TABLE_KEYWORDS: &[&str] = &[
    "ranking",
    "statistics",
    "comparison",
    "top",
    "排名",
    "統計",
    "比較",
    "數據",
    "前幾",
    "百分比",
];

const TEXT_KEYWORDS: &[&str] = &[
    "policy",
    "explain",
    "how",
    "what is",
    "definition",
    "政策",
    "說明",
    "如何",
    "什麼是",
    "定義",
];

const GENERAL_KEYWORDS: &[&str] = &["trend", "status", "assessment", "趨勢", "狀況", "評估"];

/// Ordered keyword families, first match wins.
#[derive(Debug, Clone)]
pub struct KeywordClassifier {
    families: Vec<(FilterType, Vec<String>)>,
}

impl Default for KeywordClassifier {
    fn default() -> Self {
        let owned = |words: &[&str]| words.iter().map(|w| w.to_string()).collect();
        Self {
            families: vec![
                (FilterType::Table, owned(TABLE_KEYWORDS)),
                (FilterType::Text, owned(TEXT_KEYWORDS)),
                (FilterType::All, owned(GENERAL_KEYWORDS)),
            ],
        }
    }
}

impl KeywordClassifier {
    /// A classifier with custom families, checked in the given order.
    /// Keywords are matched case-insensitively.
    pub fn with_families(families: Vec<(FilterType, Vec<String>)>) -> Self {
        let families = families
            .into_iter()
            .map(|(f, words)| (f, words.into_iter().map(|w| w.to_lowercase()).collect()))
            .collect();
        Self { families }
    }
}

impl QueryClassifier for KeywordClassifier {
    fn classify(&self, question: &str) -> FilterType {
        let q = question.to_lowercase();
        for (filter, words) in &self.families {
            if words.iter().any(|w| q.contains(w.as_str())) {
                return *filter;
            }
        }
        FilterType::All
    }
}
