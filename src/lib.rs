//! # Clinical RAG
//!
//! Retrieval-augmented question answering over a corpus of synthetic
//! clinical notes.
//!
//! Notes are chunked and embedded once into a SQLite index. At serve time the
//! index is loaded into memory; each question is embedded, matched against
//! the chunks (plain similarity or diversity re-ranking, optionally filtered
//! by risk level or patient), routed to a prompt template by keyword, and
//! answered by a remote chat-completions model grounded on the retrieved
//! chunks.
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────┐   ┌──────────────┐   ┌───────────┐
//! │ Notes file │──▶│ Chunk+Embed  │──▶│  SQLite   │
//! │ (or synth) │   │   (build)    │   │  index    │
//! └────────────┘   └──────────────┘   └─────┬─────┘
//!                                           │ load once
//!                                           ▼
//!                 ┌──────────┐  ┌────────────────────────┐  ┌─────────┐
//!                 │ Browser  │─▶│ HTTP API               │─▶│ LLM API │
//!                 │ UI       │  │ retrieve→route→generate│  └─────────┘
//!                 └──────────┘  └────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`notes`] | Notes file parsing and formatting |
//! | [`synth`] | Synthetic note generation |
//! | [`chunk`] | Overlapping character windows |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`index`] | Index build and in-memory snapshot |
//! | [`retrieve`] | Similarity and diverse retrieval, risk aggregation |
//! | [`prompt`] | Prompt templates and context formatting |
//! | [`routing`] | Keyword routing to templates |
//! | [`generate`] | LLM provider abstraction |
//! | [`pipeline`] | Request orchestration |
//! | [`server`] | HTTP API |
//! | [`ui`] | Browser UI server |
//! | [`launch`] | Build-then-serve startup sequence |
//! | [`db`] | Database connection |
//! | [`migrate`] | Index schema |

pub mod ask;
pub mod build_cmd;
pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod generate;
pub mod index;
pub mod launch;
pub mod migrate;
pub mod models;
pub mod notes;
pub mod pipeline;
pub mod prompt;
pub mod retrieve;
pub mod routing;
pub mod search;
pub mod server;
pub mod stats;
pub mod synth;
pub mod ui;

#[cfg(test)]
mod test_support;
