//! Core data models shared by the ingestion, corpus, and retrieval pipelines.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Free-form metadata attached to documents and index records.
pub type Metadata = Map<String, Value>;

/// One unit of loaded text plus its metadata.
///
/// Produced by the file loaders (one per text file, one per PDF page) and
/// by the splitter (one per chunk). Loaders always set `source`.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub text: String,
    pub metadata: Metadata,
}

impl Document {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// The `source` metadata entry, if it is a string.
    pub fn source(&self) -> Option<&str> {
        self.metadata.get("source").and_then(Value::as_str)
    }
}

/// A pre-chunked research corpus entry ready for upsert.
///
/// `doc_id` is the upsert key: writing the same id twice overwrites.
#[derive(Debug, Clone, PartialEq)]
pub struct CorpusDocument {
    pub doc_id: String,
    pub text: String,
    pub source: String,
    pub tags: Vec<String>,
    pub metadata: Metadata,
}

impl CorpusDocument {
    /// Metadata stored alongside the vector: `source`, `tags`, then the
    /// free-form fields (which win on key collision).
    pub fn record_metadata(&self) -> Metadata {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), Value::String(self.source.clone()));
        meta.insert(
            "tags".to_string(),
            Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
        );
        for (k, v) in &self.metadata {
            meta.insert(k.clone(), v.clone());
        }
        meta
    }
}

/// Provenance of one chunk produced by an ingestion run.
///
/// Serialized in field order into the manifest JSON array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub source: String,
    pub chunk_id: String,
    pub chunk_index: usize,
    pub num_tokens: usize,
    pub created_at: String,
}

/// Identifier assigned to the chunk at `index` within one ingestion run.
pub fn chunk_id(index: usize) -> String {
    format!("chunk-{:05}", index)
}

/// Whitespace token count used for manifest bookkeeping.
pub fn count_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// A stored `(id, text, metadata, vector)` entry of a collection.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub vector: Vec<f32>,
}

/// A nearest-neighbor hit, most similar first when returned in a list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryMatch {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    #[serde(skip)]
    pub score: f32,
}

/// Collection-level information kept by a [`VectorStore`](crate::store::VectorStore).
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    /// Identifier of the embedding model bound to this collection, if any.
    pub embedding_model: Option<String>,
}
