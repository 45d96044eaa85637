//! Named collections of corpus documents: get-or-create, batched upsert,
//! and similarity query.

use std::sync::Arc;

use anyhow::Result;
use serde::Serialize;

use docrag_core::embedding::{embed_query, Embedder};
use docrag_core::models::{CorpusDocument, Metadata, VectorRecord};
use docrag_core::store::VectorStore;

use crate::config::EmbeddingConfig;
use crate::embedding::create_embedder;
use crate::error::RagError;

/// An open collection plus the embedder used to write and query it.
pub struct Collection {
    store: Arc<dyn VectorStore>,
    name: String,
    embedder: Option<Arc<dyn Embedder>>,
}

impl std::fmt::Debug for Collection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field(
                "embedder",
                &self.embedder.as_ref().map(|e| e.model_name().to_string()),
            )
            .finish()
    }
}

impl Collection {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn embedder(&self) -> Option<&Arc<dyn Embedder>> {
        self.embedder.as_ref()
    }

    fn require_embedder(&self) -> Result<&Arc<dyn Embedder>> {
        self.embedder.as_ref().ok_or_else(|| {
            RagError::config(format!(
                "Collection {} has no embedding model; pass --embed-model",
                self.name
            ))
            .into()
        })
    }
}

/// Outcome of [`build_collection`].
#[derive(Debug)]
pub enum CollectionHandle {
    /// The collection already existed.
    Found(Collection),
    /// The collection was created by this call.
    Created(Collection),
}

impl CollectionHandle {
    pub fn into_inner(self) -> Collection {
        match self {
            CollectionHandle::Found(c) | CollectionHandle::Created(c) => c,
        }
    }

    pub fn was_created(&self) -> bool {
        matches!(self, CollectionHandle::Created(_))
    }
}

/// Get or create the collection `name`.
///
/// When `embed_model` is given the embedder is resolved first (an unknown
/// model fails before the store is touched) and bound to the collection,
/// rebinding an existing one.
pub async fn build_collection(
    store: Arc<dyn VectorStore>,
    name: &str,
    embed_model: Option<&str>,
    openai_api_key: Option<&str>,
    settings: &EmbeddingConfig,
) -> Result<CollectionHandle> {
    let embedder = embed_model
        .map(|model| create_embedder(model, settings, openai_api_key))
        .transpose()?;
    attach_collection(store, name, embedder).await
}

/// [`build_collection`] with an already constructed embedder.
pub async fn attach_collection(
    store: Arc<dyn VectorStore>,
    name: &str,
    embedder: Option<Arc<dyn Embedder>>,
) -> Result<CollectionHandle> {
    match store.get_collection(name).await? {
        Some(info) => {
            if let Some(e) = &embedder {
                if info.embedding_model.as_deref() != Some(e.model_name()) {
                    tracing::info!(
                        collection = name,
                        from = ?info.embedding_model,
                        to = e.model_name(),
                        "rebinding embedding model"
                    );
                }
                store.bind_embedding_model(name, e.model_name()).await?;
            }
            Ok(CollectionHandle::Found(Collection {
                store,
                name: name.to_string(),
                embedder,
            }))
        }
        None => {
            store
                .create_collection(name, embedder.as_ref().map(|e| e.model_name()))
                .await?;
            tracing::info!(collection = name, "created collection");
            Ok(CollectionHandle::Created(Collection {
                store,
                name: name.to_string(),
                embedder,
            }))
        }
    }
}

/// Upsert `documents` in input order, `batch_size` at a time.
/// Returns the number of documents written.
pub async fn upsert_documents(
    collection: &Collection,
    documents: &[CorpusDocument],
    batch_size: usize,
) -> Result<usize> {
    if batch_size == 0 {
        return Err(RagError::config("batch size must be > 0").into());
    }
    if documents.is_empty() {
        return Ok(0);
    }
    let embedder = collection.require_embedder()?;

    for batch in documents.chunks(batch_size) {
        flush_batch(collection, embedder.as_ref(), batch).await?;
    }
    Ok(documents.len())
}

async fn flush_batch(
    collection: &Collection,
    embedder: &dyn Embedder,
    batch: &[CorpusDocument],
) -> Result<()> {
    let texts: Vec<String> = batch.iter().map(|d| d.text.clone()).collect();
    let vectors = embedder.embed(&texts).await?;

    let records: Vec<VectorRecord> = batch
        .iter()
        .zip(vectors)
        .map(|(doc, vector)| VectorRecord {
            id: doc.doc_id.clone(),
            text: doc.text.clone(),
            metadata: doc.record_metadata(),
            vector,
        })
        .collect();

    tracing::debug!(collection = collection.name(), n = records.len(), "upserting batch");
    collection.store.upsert(&collection.name, &records).await
}

/// One query hit as returned to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Match {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Top `n_results` matches for `query_text`, most similar first.
pub async fn query(collection: &Collection, query_text: &str, n_results: usize) -> Result<Vec<Match>> {
    let embedder = collection.require_embedder()?;
    let query_vec = embed_query(embedder.as_ref(), query_text).await?;
    let hits = collection
        .store
        .query(&collection.name, &query_vec, n_results)
        .await?;
    Ok(hits
        .into_iter()
        .map(|m| Match {
            id: m.id,
            text: m.text,
            metadata: m.metadata,
        })
        .collect())
}
