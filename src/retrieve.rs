//! Loading a persisted index for retrieval and forwarding retrieved context
//! to the knowledge-base chat endpoint.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use docrag_core::embedding::Embedder;
use docrag_core::prompt::{build_chat_messages, ChatMessage};
use docrag_core::retrieval::{RetrievedDocument, Retriever, VectorIndex};
use docrag_core::store::VectorStore;

use crate::config::{ChatConfig, Config, Secrets};
use crate::embedding::create_embedder;
use crate::error::RagError;
use crate::sqlite_store::{index_path, SqliteStore};

/// Open the index under `persist_dir` for querying `collection`.
///
/// Fails with [`RagError::IndexNotFound`] when nothing has been ingested
/// there yet.
pub async fn load_vector_store(
    persist_dir: &Path,
    collection: &str,
    embedder: Arc<dyn Embedder>,
) -> Result<VectorIndex> {
    if !persist_dir.is_dir() || !index_path(persist_dir).is_file() {
        return Err(RagError::IndexNotFound(persist_dir.to_path_buf()).into());
    }

    let store = SqliteStore::open(persist_dir, false).await?;
    let info = store
        .get_collection(collection)
        .await?
        .ok_or_else(|| RagError::IndexNotFound(persist_dir.to_path_buf()))?;

    if let Some(bound) = info.embedding_model.as_deref() {
        if bound != embedder.model_name() {
            tracing::warn!(
                collection,
                index_model = bound,
                query_model = embedder.model_name(),
                "querying with a different embedding model than the index was built with"
            );
        }
    }

    let store: Arc<dyn VectorStore> = Arc::new(store);
    Ok(VectorIndex::new(store, collection, embedder))
}

/// Top-`k` documents for `query`, most similar first.
///
/// Without a `retriever`, one is built from the configured index and
/// embedding model.
pub async fn retrieve_context(
    query: &str,
    retriever: Option<&dyn Retriever>,
    k: usize,
    config: &Config,
    secrets: &Secrets,
) -> Result<Vec<RetrievedDocument>> {
    if let Some(retriever) = retriever {
        return retriever.relevant_documents(query).await;
    }

    let embedder = create_embedder(
        &config.embedding.model,
        &config.embedding,
        secrets.openai_api_key.as_deref(),
    )?;
    let index = load_vector_store(
        &config.paths.vectorstore_dir,
        &config.retrieval.collection,
        embedder,
    )
    .await?;
    index.as_retriever(k).relevant_documents(query).await
}

/// Where and how to reach the chat endpoint.
#[derive(Debug, Clone)]
pub struct ChatSettings {
    pub url: String,
    /// Sent as a bearer token when present.
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl ChatSettings {
    pub fn new(config: &ChatConfig, api_key: Option<String>) -> Self {
        Self {
            url: config.url.clone(),
            api_key,
            timeout_secs: config.timeout_secs,
        }
    }
}

/// Send `prompt` with its retrieved context and prior `history` as one chat
/// request. Non-success statuses become [`RagError::Remote`]; otherwise the
/// raw response is returned for the caller to read.
pub async fn call_chat_api(
    settings: &ChatSettings,
    prompt: &str,
    context_documents: &[RetrievedDocument],
    history: &[ChatMessage],
) -> Result<reqwest::Response> {
    let messages = build_chat_messages(prompt, context_documents, history);
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.timeout_secs))
        .build()?;

    let mut request = client
        .post(&settings.url)
        .json(&serde_json::json!({ "messages": messages }));
    if let Some(key) = &settings.api_key {
        request = request.bearer_auth(key);
    }

    tracing::debug!(url = %settings.url, messages = messages.len(), "calling chat endpoint");
    let response = request
        .send()
        .await
        .with_context(|| format!("Chat request to {} failed", settings.url))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(RagError::Remote {
            service: "Chat API",
            status: status.as_u16(),
            body,
        }
        .into());
    }
    Ok(response)
}

/// Read a conversation history file: a JSON array of `{role, content}`.
pub fn read_history(path: &Path) -> Result<Vec<ChatMessage>> {
    if !path.exists() {
        return Err(RagError::missing("History", path).into());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}
