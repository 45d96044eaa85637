//! # docrag
//!
//! Tooling for a research documentation workflow: a retrieval-augmented
//! generation (RAG) index over project documents, a loader for a
//! pre-chunked research corpus, a Mermaid diagram checker, and a report
//! drafter backed by a hosted completion API.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐   ┌───────────────┐
//! │ docs / PDFs  │──▶│ split+embed  │──▶│ index.sqlite  │
//! │ corpus JSON  │   │ (Embedder)   │   │ (VectorStore) │
//! └──────────────┘   └──────────────┘   └──────┬────────┘
//!                                              │
//!                        ┌─────────────────────┤
//!                        ▼                     ▼
//!                  ┌──────────┐         ┌────────────┐
//!                  │  query   │         │ chat API   │
//!                  └──────────┘         └────────────┘
//! ```
//!
//! Pure logic (models, splitting, ranking, templating) lives in the
//! `docrag-core` crate; this crate wires it to the filesystem, SQLite,
//! HTTP services, and the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and secrets |
//! | [`error`] | Error taxonomy |
//! | [`extract`] | Source discovery and document loading |
//! | [`ingest`] | Ingestion pipeline and manifest |
//! | [`retrieve`] | Index loading, retrieval, chat endpoint |
//! | [`corpus`] | Research corpus loader |
//! | [`collection`] | Collection get-or-create, upsert, query |
//! | [`embedding`] | OpenAI, Ollama, and local embedders |
//! | [`sqlite_store`] | SQLite vector store |
//! | [`diagrams`] | Mermaid syntax checker |
//! | [`report`] | Template merge and completion call |
//! | [`progress`] | Ingestion progress on stderr |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod collection;
pub mod config;
pub mod corpus;
pub mod db;
pub mod diagrams;
pub mod embedding;
pub mod error;
pub mod extract;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod progress;
pub mod report;
pub mod retrieve;
pub mod sqlite_store;
