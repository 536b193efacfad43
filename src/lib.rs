//! # intel-qa
//!
//! Retrieval-augmented question answering over security-intelligence
//! reports. PDF and text sources are split into two kinds of searchable
//! content, prose chunks and rendered tables, which share one vector
//! index. Questions are answered from that index by a generative model
//! when one is configured, and by a structured template otherwise.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌────────────────────┐   ┌─────────────┐
//! │ data/source  │──▶│ IncrementalUpdater │──▶│ VectorStore │
//! │  PDF / text  │   │ text + tables      │   │ index.vec + │
//! └──────────────┘   └────────────────────┘   │ docstore    │
//!                                             └──────┬──────┘
//!                                                    ▼
//!                      ┌──────────┐          ┌─────────────┐
//!                      │ QaSystem │◀─────────│ QueryEngine │
//!                      │ LLM /    │          │ type filter │
//!                      │ template │          └─────────────┘
//!                      └────┬─────┘
//!                           ▼
//!                       CLI (iqa)
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! iqa update                       # ingest data/source
//! iqa query "top risk events" --filter table
//! iqa ask "什麼是 CRI"
//! iqa stats
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`extract`] | PDF text and multi-strategy table extraction |
//! | [`embedding`] | Embedding providers |
//! | [`llm`] | Generative model clients and the answer prompt |
//! | [`http`] | JSON POST with retry and backoff |
//! | [`store`] | Persisted vector store |
//! | [`updater`] | Manifest-driven incremental ingestion |
//! | [`builder`] | One-shot index builds |
//! | [`integrate`] | Merging table texts into the index |
//! | [`query`] | Type-aware similarity search |
//! | [`qa`] | Answer composition |
//! | [`persist`] | Atomic JSON and binary writes |
//!
//! Pure algorithms (table classification and dedup, table rendering, text
//! cleaning and chunking, the flat index) live in `intel-qa-core`.

pub mod builder;
pub mod config;
pub mod embedding;
pub mod extract;
pub mod http;
pub mod integrate;
pub mod llm;
pub mod persist;
pub mod qa;
pub mod query;
pub mod store;
pub mod updater;
