//! # intel-qa CLI (`iqa`)
//!
//! Command-line interface for building the knowledge base and asking
//! questions against it.
//!
//! ## Usage
//!
//! ```bash
//! iqa --config ./config/iqa.toml <command>
//! ```
//!
//! Without `--config`, `./config/iqa.toml` is used when it exists and the
//! built-in defaults (data under `./data`) otherwise.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `iqa update` | Incrementally ingest new and modified source files |
//! | `iqa build` | Build a fresh index from a chunks file or the source directory |
//! | `iqa extract-tables <pdf>...` | Extract tables and write the tables artifact |
//! | `iqa convert-tables` | Render extracted tables as search text |
//! | `iqa integrate-tables` | Add rendered tables to the index |
//! | `iqa process-text <file>` | Clean and chunk one file, print the quality report |
//! | `iqa query "<q>"` | Similarity search with type filtering |
//! | `iqa ask "<q>"` | Answer a question with citations |
//! | `iqa stats` | System and query statistics |
//!
//! Results go to stdout; logs go to stderr (`RUST_LOG` overrides
//! `[logging].level`).

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use intel_qa::builder::KnowledgeBaseBuilder;
use intel_qa::config::{self, Config};
use intel_qa::embedding::create_provider;
use intel_qa::extract::{extract_document_text, file_label, save_tables, StrategyRegistry};
use intel_qa::integrate::TableVectorIntegrator;
use intel_qa::persist::{read_json, write_json_atomic};
use intel_qa::qa::{Answer, QaSystem};
use intel_qa::query::QueryEngine;
use intel_qa::updater::IncrementalUpdater;
use intel_qa_core::models::{FilterType, CONTENT_TYPE_KEY, CONTENT_TYPE_TEXT};
use intel_qa_core::table_text::TableTextConverter;
use intel_qa_core::text::TextProcessor;

const DEFAULT_CONFIG: &str = "./config/iqa.toml";

/// intel-qa: question answering over security-intelligence reports.
#[derive(Parser)]
#[command(
    name = "iqa",
    about = "Retrieval-augmented QA over security-intelligence PDF reports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML). Defaults to `./config/iqa.toml`
    /// when present, built-in defaults otherwise.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest new and modified files from the source directory.
    ///
    /// Unchanged files (same content hash) are skipped. New vectors are
    /// appended to the saved index.
    Update {
        /// Forget the manifest and the saved index, reprocess everything.
        #[arg(long)]
        force_rebuild: bool,

        /// Print the manifest and index summary after updating.
        #[arg(long)]
        show_info: bool,
    },

    /// Build a fresh index, ignoring the manifest.
    Build {
        /// Chunks JSON (`[{content, metadata}]`). Without it the source
        /// directory is processed.
        #[arg(long)]
        chunks: Option<PathBuf>,
    },

    /// Extract tables from PDFs and write the extracted-tables artifact.
    ExtractTables {
        /// PDF files to scan.
        #[arg(required = true)]
        pdfs: Vec<PathBuf>,

        /// Output path. Defaults to `[paths].tables_file`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Render an extracted-tables artifact as search text.
    ConvertTables {
        /// Defaults to `[paths].tables_file`.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Defaults to `[paths].table_texts_file`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Add rendered tables to the vector index.
    IntegrateTables {
        /// Defaults to `[paths].table_texts_file`.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Replace the saved index with the tables alone.
        #[arg(long)]
        force_rebuild: bool,
    },

    /// Clean and chunk one document and print its quality report.
    ProcessText {
        file: PathBuf,

        /// Write the chunks as a chunks JSON usable by `iqa build --chunks`.
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Similarity search over the index.
    Query {
        query: String,

        /// Number of results.
        #[arg(long)]
        k: Option<usize>,

        /// `all`, `text` or `table`.
        #[arg(long, default_value = "all")]
        filter: FilterType,

        /// Print results as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer a question with citations.
    Ask {
        question: String,

        /// Number of results to ground the answer on.
        #[arg(long)]
        k: Option<usize>,

        /// `all`, `text` or `table`. Detected from the question when omitted.
        #[arg(long)]
        filter: Option<FilterType>,

        /// Print the full response as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Show system and query statistics.
    Stats,
}

fn resolve_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => config::load_config(p),
        None if Path::new(DEFAULT_CONFIG).exists() => config::load_config(Path::new(DEFAULT_CONFIG)),
        None => Ok(Config::minimal()),
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ChunkEntry {
    content: String,
    metadata: Map<String, Value>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let cfg = resolve_config(cli.config.as_deref())?;
    init_tracing(&cfg.logging.level);

    match cli.command {
        Commands::Update {
            force_rebuild,
            show_info,
        } => {
            let provider = create_provider(&cfg.embedding)?;
            let mut updater = IncrementalUpdater::new(&cfg, provider)?;
            let summary = updater.update_knowledge_base(force_rebuild).await?;
            print_json(&summary)?;
            if show_info {
                print_json(&updater.get_system_info())?;
            }
        }
        Commands::Build { chunks } => {
            let provider = create_provider(&cfg.embedding)?;
            let mut builder = KnowledgeBaseBuilder::new(&cfg, provider);
            match chunks {
                Some(path) => builder.build_from_chunks_file(&path).await?,
                None => builder.build_from_source_dir().await?,
            };
            print_json(&builder.validate()?)?;
        }
        Commands::ExtractTables { pdfs, output } => {
            for pdf in &pdfs {
                if !pdf.is_file() {
                    bail!("PDF not found: {}", pdf.display());
                }
            }
            let registry = StrategyRegistry::from_config(&cfg.tables);
            tracing::info!(strategies = ?registry.names(), "table strategies");
            let tables = registry.extract_many(&pdfs);
            let output = output.unwrap_or_else(|| cfg.paths.tables_file());
            let report = save_tables(&output, tables)?;
            print_json(&report)?;
        }
        Commands::ConvertTables { input, output } => {
            let input = input.unwrap_or_else(|| cfg.paths.tables_file());
            let artifact: Value = read_json(&input)?;
            let tables = artifact
                .get("tables")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            let mut converter = TableTextConverter::new();
            let texts = converter.convert_batch(&tables);
            let output = output.unwrap_or_else(|| cfg.paths.table_texts_file());
            write_json_atomic(&output, &converter.artifact(texts))?;
            print_json(converter.stats())?;
        }
        Commands::IntegrateTables {
            input,
            force_rebuild,
        } => {
            let provider = create_provider(&cfg.embedding)?;
            let input = input.unwrap_or_else(|| cfg.paths.table_texts_file());
            let integrator = TableVectorIntegrator::new(cfg.paths.index_dir(), provider);
            let stats = integrator.integrate(&input, force_rebuild).await?;
            print_json(&stats)?;
        }
        Commands::ProcessText { file, output } => {
            let processor = TextProcessor::new(
                cfg.text.technical_terms.clone(),
                cfg.chunking.chunk_size,
                cfg.chunking.chunk_overlap,
            )?
            .with_min_chunk_chars(cfg.text.min_chunk_chars);
            let raw = extract_document_text(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let chunks = processor.process(&raw, &file_label(&file));
            print_json(&processor.validate_quality(&chunks))?;

            if let Some(output) = output {
                let entries: Vec<ChunkEntry> = chunks
                    .into_iter()
                    .map(|c| {
                        let mut metadata = Map::new();
                        metadata.insert("source".into(), Value::from(c.source.clone()));
                        metadata.insert("chunk_id".into(), Value::from(c.chunk_id.clone()));
                        metadata.insert("chunk_index".into(), Value::from(c.chunk_index));
                        metadata.insert("chunk_size".into(), Value::from(c.chunk_size()));
                        metadata.insert(
                            "technical_terms".into(),
                            Value::from(c.technical_terms.clone()),
                        );
                        metadata.insert(CONTENT_TYPE_KEY.into(), Value::from(CONTENT_TYPE_TEXT));
                        ChunkEntry {
                            content: c.content,
                            metadata,
                        }
                    })
                    .collect();
                write_json_atomic(&output, &entries)?;
                eprintln!("Wrote {} chunks to {}", entries.len(), output.display());
            }
        }
        Commands::Query {
            query,
            k,
            filter,
            json,
        } => {
            let provider = create_provider(&cfg.embedding)?;
            let engine = QueryEngine::new(&cfg, provider);
            let k = k.unwrap_or(cfg.retrieval.default_k);
            let results = engine.query(&query, k, filter).await;
            if json {
                print_json(&results)?;
            } else if results.is_empty() {
                println!("No results.");
            } else {
                for r in &results {
                    println!(
                        "{}. [{}] {} (confidence {:.3})",
                        r.rank, r.content_type, r.source, r.confidence
                    );
                    println!("{}", r.content);
                    println!();
                }
            }
        }
        Commands::Ask {
            question,
            k,
            filter,
            json,
        } => {
            let qa = QaSystem::from_config(&cfg)?;
            let answer = qa.ask_question(&question, filter, k).await;
            if json {
                print_json(&answer)?;
            } else {
                println!("{}", answer.answer_text());
                if let Answer::Success(body) = &answer {
                    println!();
                    println!(
                        "[{} | filter {} | {} results]",
                        body.generation_method.as_str(),
                        body.filter_type,
                        body.result_count
                    );
                    for c in &body.citations {
                        println!(
                            "  {}. {} ({}, confidence {:.3})",
                            c.rank, c.source, c.content_type, c.confidence
                        );
                    }
                }
            }
        }
        Commands::Stats => {
            let qa = QaSystem::from_config(&cfg)?;
            print_json(&qa.get_system_stats().await)?;
        }
    }

    Ok(())
}
