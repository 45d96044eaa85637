//! # docrag core
//!
//! Shared, I/O-free logic for docrag: data models, the recursive text
//! splitter, the embedding and vector store traits, retrieval, and prompt
//! assembly.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem access. The
//! `docrag` app crate supplies the concrete embedders and the SQLite store.

pub mod chunk;
pub mod embedding;
pub mod models;
pub mod prompt;
pub mod retrieval;
pub mod store;
pub mod template;
