//! Vector collection storage abstraction.
//!
//! The [`VectorStore`] trait defines every storage operation the corpus,
//! ingestion, and retrieval pipelines need, enabling pluggable backends
//! (SQLite in the app crate, in-memory for tests).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{CollectionInfo, QueryMatch, VectorRecord};

/// Abstract storage backend holding named collections of
/// `(id, text, metadata, vector)` records.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get_collection`](VectorStore::get_collection) | Look up a collection by name |
/// | [`create_collection`](VectorStore::create_collection) | Create a collection bound to a model |
/// | [`bind_embedding_model`](VectorStore::bind_embedding_model) | Rebind the model of an existing collection |
/// | [`clear_collection`](VectorStore::clear_collection) | Delete every record of a collection |
/// | [`upsert`](VectorStore::upsert) | Insert or overwrite records by id |
/// | [`query`](VectorStore::query) | Top-k cosine similarity search |
/// | [`count`](VectorStore::count) | Number of records in a collection |
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Returns `None` when no collection with this name exists.
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>>;

    /// Create a new collection. Fails if it already exists.
    async fn create_collection(
        &self,
        name: &str,
        embedding_model: Option<&str>,
    ) -> Result<CollectionInfo>;

    /// Record a new embedding model for an existing collection.
    async fn bind_embedding_model(&self, name: &str, embedding_model: &str) -> Result<()>;

    /// Remove all records from a collection, keeping the collection itself.
    async fn clear_collection(&self, name: &str) -> Result<()>;

    /// Insert records, overwriting any existing record with the same id.
    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()>;

    /// Return up to `k` records most similar to `query_vec`, best first.
    async fn query(&self, collection: &str, query_vec: &[f32], k: usize)
        -> Result<Vec<QueryMatch>>;

    async fn count(&self, collection: &str) -> Result<usize>;
}

/// Rank scored matches best first (ties broken by id) and keep `k`.
pub fn rank_matches(mut matches: Vec<QueryMatch>, k: usize) -> Vec<QueryMatch> {
    matches.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    matches.truncate(k);
    matches
}
