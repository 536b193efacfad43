//! Answer composition: question in, grounded answer with citations out.
//!
//! # Flow
//!
//! ```text
//! question ──▶ filter (explicit or classified) ──▶ QueryEngine::query
//!                                                      │
//!                              no hits ◀───────────────┤
//!                                 │                    ▼
//!                            NoResults          context assembly
//!                                                      │
//!                          model configured? ──yes──▶ generate ──err──┐
//!                                 │no                  │ok            │
//!                                 ▼                    ▼              ▼
//!                      structured template     llm_generated   fallback_structured
//! ```
//!
//! [`QaSystem::ask_question`] never returns an error: every outcome is an
//! [`Answer`] variant, and generation failures only show up in
//! `generation_method`.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;
use tracing::{info, warn};

use intel_qa_core::classify::{KeywordClassifier, QueryClassifier};
use intel_qa_core::models::{ContentKind, FilterType, QueryResult};
use intel_qa_core::search::truncate_text;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::llm::{create_model, render_prompt, GenerativeModel, DEFAULT_QA_PROMPT};
use crate::query::{QueryEngine, QueryStats};
use crate::updater::{IncrementalUpdater, UpdateSummary};

pub const SYSTEM_TYPE: &str = "IntelQaSystem";

const CITATION_COUNT: usize = 3;
const SOURCE_PREVIEW_CHARS: usize = 100;
const STRUCTURED_PRIMARY_CHARS: usize = 600;
const STRUCTURED_SECONDARY_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    LlmGenerated,
    StructuredFormatted,
    FallbackStructured,
    Error,
}

impl GenerationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMethod::LlmGenerated => "llm_generated",
            GenerationMethod::StructuredFormatted => "structured_formatted",
            GenerationMethod::FallbackStructured => "fallback_structured",
            GenerationMethod::Error => "error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    pub rank: usize,
    pub source: String,
    pub content_type: ContentKind,
    /// Untruncated indexed content.
    pub content: String,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnswerBody {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub citations: Vec<Citation>,
    pub result_count: usize,
    pub text_results: usize,
    pub table_results: usize,
    pub filter_type: FilterType,
    pub generation_method: GenerationMethod,
    pub llm_available: bool,
    pub llm_model: Option<String>,
    pub system_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct NoResultsBody {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub result_count: usize,
    pub filter_type: FilterType,
    pub vector_count: usize,
    pub llm_available: bool,
    pub system_type: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub question: String,
    pub answer: String,
    pub sources: Vec<String>,
    pub generation_method: GenerationMethod,
    pub system_type: String,
}

/// Response to one question, tagged by `status`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Answer {
    Success(AnswerBody),
    NoResults(NoResultsBody),
    Error(ErrorBody),
}

impl Answer {
    pub fn status(&self) -> &'static str {
        match self {
            Answer::Success(_) => "success",
            Answer::NoResults(_) => "no_results",
            Answer::Error(_) => "error",
        }
    }

    pub fn answer_text(&self) -> &str {
        match self {
            Answer::Success(b) => &b.answer,
            Answer::NoResults(b) => &b.answer,
            Answer::Error(b) => &b.answer,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SystemStats {
    pub system_type: String,
    pub vector_count: usize,
    pub llm_available: bool,
    pub llm_model: Option<String>,
    pub capabilities: Vec<String>,
    pub query_stats: QueryStats,
}

/// Rounds to four decimals so confidences print cleanly in JSON.
fn portable_confidence(c: f64) -> f64 {
    if c.is_finite() {
        (c * 10_000.0).round() / 10_000.0
    } else {
        0.0
    }
}

/// `[表格資料 N] 來源: …` / `[文字資料 N] 來源: …` blocks, one per hit.
pub fn build_context(results: &[QueryResult]) -> String {
    results
        .iter()
        .map(|r| {
            let label = match r.content_type {
                ContentKind::Table => "表格資料",
                ContentKind::Text => "文字資料",
            };
            format!("[{} {}] 來源: {}\n{}", label, r.rank, r.source, r.full_content)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Template answer from the top one or two hits.
pub fn structured_answer(results: &[QueryResult]) -> String {
    let Some(best) = results.first() else {
        return String::new();
    };
    let mut out = match best.content_type {
        ContentKind::Table => format!(
            "📊 根據 {} 的表格資料：\n\n{}",
            best.source, best.content
        ),
        ContentKind::Text => format!(
            "📋 根據 {} 的內容：\n\n{}",
            best.source,
            truncate_text(&best.full_content, STRUCTURED_PRIMARY_CHARS)
        ),
    };
    if let Some(second) = results.get(1) {
        out.push_str(&format!(
            "\n\n🔍 補充資料（{}，{}）：\n{}",
            second.source,
            match second.content_type {
                ContentKind::Table => "表格",
                ContentKind::Text => "文字",
            },
            truncate_text(&second.full_content, STRUCTURED_SECONDARY_CHARS)
        ));
    }
    out.push_str(&format!(
        "\n\n📚 資料來源: {}（信心度 {:.1}%）",
        best.source,
        best.confidence * 100.0
    ));
    out
}

fn no_results_message(question: &str) -> String {
    format!(
        "抱歉，在知識庫中找不到與「{}」相關的資料。\n\n建議：\n1. 換個說法或使用更具體的關鍵字（例如 CRI、CREM、勒索軟體）\n2. 改用不同的搜尋類型（全部、文字或表格）\n3. 確認相關報告已加入來源目錄並執行知識庫更新",
        question.trim()
    )
}

pub struct QaSystem {
    engine: Arc<QueryEngine>,
    model: Option<Arc<dyn GenerativeModel>>,
    classifier: Box<dyn QueryClassifier>,
    prompt_template: String,
    default_k: usize,
    config: Config,
}

impl QaSystem {
    pub fn new(
        engine: Arc<QueryEngine>,
        model: Option<Arc<dyn GenerativeModel>>,
        classifier: Box<dyn QueryClassifier>,
        config: &Config,
    ) -> Self {
        Self {
            engine,
            model,
            classifier,
            prompt_template: config
                .llm
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_QA_PROMPT.to_string()),
            default_k: config.retrieval.default_k,
            config: config.clone(),
        }
    }

    /// Wire every collaborator from config. An LLM that cannot be
    /// configured leaves the system in structured-answer mode.
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = create_provider(&config.embedding)?;
        let engine = Arc::new(QueryEngine::new(config, provider));
        let model = match create_model(&config.llm) {
            Ok(model) => model,
            Err(e) => {
                warn!(error = %e, "generative model unavailable, using structured answers");
                None
            }
        };
        Ok(Self::new(
            engine,
            model,
            Box::new(KeywordClassifier::default()),
            config,
        ))
    }

    pub fn engine(&self) -> &Arc<QueryEngine> {
        &self.engine
    }

    pub fn llm_available(&self) -> bool {
        self.model.is_some()
    }

    fn llm_model(&self) -> Option<String> {
        self.model.as_ref().map(|m| m.model_name().to_string())
    }

    /// Answer `question`. `filter` defaults to the classifier's choice and
    /// `k` to `[retrieval].default_k`.
    pub async fn ask_question(
        &self,
        question: &str,
        filter: Option<FilterType>,
        k: Option<usize>,
    ) -> Answer {
        match self.try_answer(question, filter, k).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "answer flow failed");
                Answer::Error(ErrorBody {
                    question: question.to_string(),
                    answer: format!("抱歉，處理您的問題時發生錯誤: {}", e),
                    sources: Vec::new(),
                    generation_method: GenerationMethod::Error,
                    system_type: SYSTEM_TYPE.to_string(),
                })
            }
        }
    }

    async fn try_answer(
        &self,
        question: &str,
        filter: Option<FilterType>,
        k: Option<usize>,
    ) -> Result<Answer> {
        let filter = filter.unwrap_or_else(|| self.classifier.classify(question));
        let k = k.unwrap_or(self.default_k);
        info!(filter = %filter, k, "question received");

        let results = if question.trim().is_empty() {
            Vec::new()
        } else {
            self.engine.query(question, k, filter).await
        };

        if results.is_empty() {
            return Ok(Answer::NoResults(NoResultsBody {
                question: question.to_string(),
                answer: no_results_message(question),
                sources: Vec::new(),
                result_count: 0,
                filter_type: filter,
                vector_count: self.engine.vector_count().await,
                llm_available: self.llm_available(),
                system_type: SYSTEM_TYPE.to_string(),
            }));
        }

        let (answer, generation_method) = self.compose(question, &results).await;

        let text_results = results
            .iter()
            .filter(|r| r.content_type == ContentKind::Text)
            .count();
        let sources = results
            .iter()
            .map(|r| {
                format!(
                    "{} - {}",
                    r.source,
                    truncate_text(&r.full_content, SOURCE_PREVIEW_CHARS)
                )
            })
            .collect();
        let citations = results
            .iter()
            .take(CITATION_COUNT)
            .map(|r| Citation {
                rank: r.rank,
                source: r.source.clone(),
                content_type: r.content_type,
                content: r.full_content.clone(),
                confidence: portable_confidence(r.confidence),
            })
            .collect();

        Ok(Answer::Success(AnswerBody {
            question: question.to_string(),
            answer,
            sources,
            citations,
            result_count: results.len(),
            text_results,
            table_results: results.len() - text_results,
            filter_type: filter,
            generation_method,
            llm_available: self.llm_available(),
            llm_model: self.llm_model(),
            system_type: SYSTEM_TYPE.to_string(),
        }))
    }

    async fn compose(&self, question: &str, results: &[QueryResult]) -> (String, GenerationMethod) {
        let Some(model) = &self.model else {
            return (structured_answer(results), GenerationMethod::StructuredFormatted);
        };
        let prompt = render_prompt(
            &self.prompt_template,
            &build_context(results),
            question,
            results.len(),
        );
        match model.generate(&prompt).await {
            Ok(text) => (text, GenerationMethod::LlmGenerated),
            Err(e) => {
                warn!(model = model.model_name(), error = %e, "generation failed, using structured answer");
                (structured_answer(results), GenerationMethod::FallbackStructured)
            }
        }
    }

    pub async fn get_system_stats(&self) -> SystemStats {
        self.engine.ensure_loaded().await;
        let mut capabilities = vec![
            "text_search".to_string(),
            "table_search".to_string(),
            "query_classification".to_string(),
            "structured_answers".to_string(),
            "incremental_update".to_string(),
        ];
        if self.llm_available() {
            capabilities.push("llm_generation".to_string());
        }
        let query_stats = self.engine.stats().await;
        SystemStats {
            system_type: SYSTEM_TYPE.to_string(),
            vector_count: query_stats.vector_count,
            llm_available: self.llm_available(),
            llm_model: self.llm_model(),
            capabilities,
            query_stats,
        }
    }

    /// Run an incremental update, then point the engine at the new index.
    pub async fn update_knowledge_base(&self, force_rebuild: bool) -> Result<UpdateSummary> {
        let mut updater = IncrementalUpdater::new(&self.config, self.engine.provider())?;
        let summary = updater.update_knowledge_base(force_rebuild).await?;
        self.engine.reload().await;
        Ok(summary)
    }
}
