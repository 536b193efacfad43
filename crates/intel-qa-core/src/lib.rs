//! # Intel QA Core
//!
//! Pure data model and algorithms for the security-intelligence QA
//! pipeline: table classification and deduplication, table-to-text
//! rendering, text cleaning and chunking, a flat vector index, typed query
//! results, and query-type classification.
//!
//! This crate does no network, PDF, or filesystem I/O. Everything that
//! touches the outside world lives in the `intel-qa` app crate:
//!
//! ```text
//! PDF / TXT ──► extract (app) ──► tables ──► table_text ──┐
//!          └──► text ──────────────────────────────────────┤
//!                                                          ▼
//!                       embedding (app providers) ──► index ──► search ──► qa (app)
//! ```

pub mod classify;
pub mod embedding;
pub mod index;
pub mod models;
pub mod search;
pub mod table_text;
pub mod tables;
pub mod text;
