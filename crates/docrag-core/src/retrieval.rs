//! Similarity retrieval over a persisted collection and context formatting.
//!
//! A [`VectorIndex`] pairs a store collection with the embedder that built
//! it. [`VectorIndex::as_retriever`] yields a [`Retriever`] returning the
//! top-`k` documents for a query; [`format_context`] renders them into a
//! prompt-friendly string.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::embedding::{embed_query, Embedder};
use crate::models::Metadata;
use crate::store::VectorStore;

/// A matched document: text plus metadata, in similarity order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedDocument {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

impl RetrievedDocument {
    /// The `source` metadata entry rendered as text, or `"unknown"`.
    pub fn source(&self) -> String {
        match self.metadata.get("source") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => "unknown".to_string(),
            Some(other) => other.to_string(),
        }
    }
}

/// Anything that can answer "which documents are relevant to this query".
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn relevant_documents(&self, query: &str) -> Result<Vec<RetrievedDocument>>;
}

/// A loaded, queryable collection.
#[derive(Clone)]
pub struct VectorIndex {
    store: Arc<dyn VectorStore>,
    collection: String,
    embedder: Arc<dyn Embedder>,
}

impl VectorIndex {
    pub fn new(
        store: Arc<dyn VectorStore>,
        collection: impl Into<String>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        Self {
            store,
            collection: collection.into(),
            embedder,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Top-`k` documents most similar to `query`, best first.
    pub async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<RetrievedDocument>> {
        let query_vec = embed_query(self.embedder.as_ref(), query).await?;
        let matches = self.store.query(&self.collection, &query_vec, k).await?;
        Ok(matches
            .into_iter()
            .map(|m| RetrievedDocument {
                id: m.id,
                text: m.text,
                metadata: m.metadata,
            })
            .collect())
    }

    pub fn as_retriever(&self, k: usize) -> IndexRetriever {
        IndexRetriever {
            index: self.clone(),
            k,
        }
    }
}

/// [`Retriever`] over a [`VectorIndex`] returning at most `k` documents.
pub struct IndexRetriever {
    index: VectorIndex,
    k: usize,
}

#[async_trait]
impl Retriever for IndexRetriever {
    async fn relevant_documents(&self, query: &str) -> Result<Vec<RetrievedDocument>> {
        self.index.similarity_search(query, self.k).await
    }
}

/// Render documents as numbered `[n] Source: <source>` blocks joined by a
/// blank line, in input order.
pub fn format_context(documents: &[RetrievedDocument]) -> String {
    documents
        .iter()
        .enumerate()
        .map(|(i, doc)| format!("[{}] Source: {}\n{}", i + 1, doc.source(), doc.text.trim()))
        .collect::<Vec<_>>()
        .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VectorRecord;
    use crate::store::memory::InMemoryStore;
    use serde_json::json;

    fn doc(source: Option<&str>, text: &str) -> RetrievedDocument {
        let mut metadata = Metadata::new();
        if let Some(s) = source {
            metadata.insert("source".to_string(), json!(s));
        }
        RetrievedDocument {
            id: "x".to_string(),
            text: text.to_string(),
            metadata,
        }
    }

    #[test]
    fn test_format_context_empty() {
        assert_eq!(format_context(&[]), "");
    }

    #[test]
    fn test_format_context_single_block() {
        let out = format_context(&[doc(Some("docs/a.md"), "  alpha text \n")]);
        assert_eq!(out, "[1] Source: docs/a.md\nalpha text");
    }

    #[test]
    fn test_format_context_numbering_and_default_source() {
        let out = format_context(&[doc(Some("a.md"), "one"), doc(None, "two")]);
        assert_eq!(out, "[1] Source: a.md\none\n\n[2] Source: unknown\ntwo");
    }

    /// Embeds "x…" texts along the first axis and everything else along the second.
    struct AxisEmbedder;

    #[async_trait]
    impl Embedder for AxisEmbedder {
        fn model_name(&self) -> &str {
            "axis"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.starts_with('x') {
                        vec![1.0, 0.0]
                    } else {
                        vec![0.0, 1.0]
                    }
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_retriever_returns_at_most_k_best_first() {
        let store = Arc::new(InMemoryStore::new());
        store.create_collection("docs", Some("axis")).await.unwrap();
        let records: Vec<VectorRecord> = [
            ("1", "xray", vec![1.0, 0.0]),
            ("2", "yak", vec![0.0, 1.0]),
            ("3", "xylo", vec![0.9, 0.1]),
        ]
        .into_iter()
        .map(|(id, text, vector)| VectorRecord {
            id: id.to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            vector,
        })
        .collect();
        store.upsert("docs", &records).await.unwrap();

        let index = VectorIndex::new(store, "docs", Arc::new(AxisEmbedder));
        let hits = index.as_retriever(2).relevant_documents("xenon").await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["1", "3"]);
    }
}
