//! Embedding backends and model resolution.
//!
//! A model identifier selects its backend:
//! - **`text-embedding*`** → [`OpenAIEmbedder`], the OpenAI embeddings API
//!   (requires an API key).
//! - **`ollama/<model>`** → [`OllamaEmbedder`], a local Ollama instance's
//!   `/api/embed` endpoint.
//! - **sentence-transformers style names** (`all-MiniLM-L6-v2`, `bge-*`,
//!   `nomic-embed-text-*`, `multilingual-e5-*`) → `LocalEmbedder`, in-process
//!   inference via fastembed. No network calls after the model download.
//!
//! Anything else is rejected with [`RagError::UnsupportedModel`].
//!
//! # Retry Strategy
//!
//! The HTTP backends retry transient failures `max_retries` times:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use docrag_core::embedding::Embedder;

use crate::config::EmbeddingConfig;
use crate::error::RagError;

/// Backend family a model identifier resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModelFamily {
    OpenAI,
    /// Carries the model name with the `ollama/` prefix removed.
    Ollama(String),
    /// Carries the canonical local model key (e.g. `all-minilm-l6-v2`).
    Local(&'static str),
}

const LOCAL_MODELS: &[(&str, usize)] = &[
    ("all-minilm-l6-v2", 384),
    ("bge-small-en-v1.5", 384),
    ("bge-base-en-v1.5", 768),
    ("bge-large-en-v1.5", 1024),
    ("nomic-embed-text-v1", 768),
    ("nomic-embed-text-v1.5", 768),
    ("multilingual-e5-small", 384),
    ("multilingual-e5-base", 768),
    ("multilingual-e5-large", 1024),
];

impl ModelFamily {
    /// Resolve a model identifier, or `None` if no backend serves it.
    ///
    /// Local names are matched case-insensitively with any organisation
    /// prefix (`sentence-transformers/`, `BAAI/`, ...) removed.
    pub fn classify(model: &str) -> Option<Self> {
        if model.starts_with("text-embedding") {
            return Some(ModelFamily::OpenAI);
        }
        if let Some(name) = model.strip_prefix("ollama/") {
            if name.is_empty() {
                return None;
            }
            return Some(ModelFamily::Ollama(name.to_string()));
        }
        let key = model.rsplit('/').next().unwrap_or(model).to_lowercase();
        LOCAL_MODELS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(name, _)| ModelFamily::Local(name))
    }
}

fn openai_dims(model: &str) -> usize {
    match model {
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

fn local_dims(key: &str) -> usize {
    LOCAL_MODELS
        .iter()
        .find(|(name, _)| *name == key)
        .map(|(_, dims)| *dims)
        .unwrap_or(384)
}

/// Build the embedder serving `model`.
///
/// `openai_api_key` is only consulted for OpenAI models, where its absence
/// is a [`RagError::Config`] error.
pub fn create_embedder(
    model: &str,
    config: &EmbeddingConfig,
    openai_api_key: Option<&str>,
) -> Result<Arc<dyn Embedder>> {
    let family = ModelFamily::classify(model)
        .ok_or_else(|| RagError::UnsupportedModel(model.to_string()))?;

    match family {
        ModelFamily::OpenAI => {
            let api_key = openai_api_key.ok_or_else(|| {
                RagError::config(format!(
                    "OPENAI_API_KEY is required for embedding model {}",
                    model
                ))
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(model, config, api_key)?))
        }
        ModelFamily::Ollama(name) => Ok(Arc::new(OllamaEmbedder::new(model, &name, config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        ModelFamily::Local(key) => Ok(Arc::new(LocalEmbedder::new(model, key, config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        ModelFamily::Local(_) => Err(RagError::config(format!(
            "Local embedding model {} requires --features local-embeddings-fastembed",
            model
        ))
        .into()),
    }
}

// ============ HTTP retry ============

/// Send a JSON POST, retrying 429/5xx and network failures with backoff.
/// Returns the parsed JSON body of the first successful response.
async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &Value,
    max_retries: u32,
    service: &'static str,
) -> Result<Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tracing::debug!(service, attempt, ?delay, "retrying embedding request");
            tokio::time::sleep(delay).await;
        }

        let mut request = client.post(url).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        match request.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return Ok(response.json().await?);
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = RagError::Remote {
                    service,
                    status: status.as_u16(),
                    body: body_text,
                };

                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err.into());
                    continue;
                }
                return Err(err.into());
            }
            Err(e) => {
                last_err = Some(anyhow::anyhow!("{} connection error ({}): {}", service, url, e));
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("{} request failed after retries", service)))
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn json_vector(value: &Value, service: &'static str) -> Result<Vec<f32>> {
    let items = value.as_array().ok_or_else(|| RagError::UnexpectedResponse {
        service,
        detail: "embedding is not an array".to_string(),
    })?;
    Ok(items
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect())
}

fn check_count(vectors: &[Vec<f32>], expected: usize, service: &'static str) -> Result<()> {
    if vectors.len() != expected {
        return Err(RagError::UnexpectedResponse {
            service,
            detail: format!("expected {} embeddings, got {}", expected, vectors.len()),
        }
        .into());
    }
    Ok(())
}

// ============ OpenAI ============

/// Embedder backed by the OpenAI `POST /v1/embeddings` endpoint.
pub struct OpenAIEmbedder {
    model: String,
    dims: usize,
    api_key: String,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIEmbedder {
    pub fn new(model: &str, config: &EmbeddingConfig, api_key: &str) -> Result<Self> {
        Ok(Self {
            model: model.to_string(),
            dims: config.dims.unwrap_or_else(|| openai_dims(model)),
            api_key: api_key.to_string(),
            url: config.openai_url.clone(),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            Some(&self.api_key),
            &body,
            self.max_retries,
            "OpenAI",
        )
        .await?;
        let vectors = parse_openai_response(&json)?;
        check_count(&vectors, texts.len(), "OpenAI")?;
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` field.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| RagError::UnexpectedResponse {
            service: "OpenAI",
            detail: "missing data array".to_string(),
        })?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let embedding = item.get("embedding").ok_or_else(|| RagError::UnexpectedResponse {
            service: "OpenAI",
            detail: "missing embedding".to_string(),
        })?;
        let index = item
            .get("index")
            .and_then(Value::as_u64)
            .map(|i| i as usize)
            .unwrap_or(position);
        indexed.push((index, json_vector(embedding, "OpenAI")?));
    }
    indexed.sort_by_key(|(index, _)| *index);

    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder backed by a local Ollama instance (`POST /api/embed`).
pub struct OllamaEmbedder {
    model_id: String,
    name: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaEmbedder {
    pub fn new(model_id: &str, name: &str, config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model_id: model_id.to_string(),
            name: name.to_string(),
            dims: config.dims.unwrap_or(768),
            url: format!("{}/api/embed", config.ollama_url.trim_end_matches('/')),
            max_retries: config.max_retries,
            client: http_client(config.timeout_secs)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model_id
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let body = serde_json::json!({
            "model": self.name,
            "input": texts,
        });
        let json = post_json_with_retry(
            &self.client,
            &self.url,
            None,
            &body,
            self.max_retries,
            "Ollama",
        )
        .await?;
        let vectors = parse_ollama_response(&json)?;
        check_count(&vectors, texts.len(), "Ollama")?;
        Ok(vectors)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| RagError::UnexpectedResponse {
            service: "Ollama",
            detail: "missing embeddings array".to_string(),
        })?;

    embeddings
        .iter()
        .map(|e| json_vector(e, "Ollama"))
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;

    use docrag_core::embedding::Embedder;

    use crate::config::EmbeddingConfig;

    use super::local_dims;

    fn fastembed_model(key: &str) -> Result<fastembed::EmbeddingModel> {
        use fastembed::EmbeddingModel::*;
        Ok(match key {
            "all-minilm-l6-v2" => AllMiniLML6V2,
            "bge-small-en-v1.5" => BGESmallENV15,
            "bge-base-en-v1.5" => BGEBaseENV15,
            "bge-large-en-v1.5" => BGELargeENV15,
            "nomic-embed-text-v1" => NomicEmbedTextV1,
            "nomic-embed-text-v1.5" => NomicEmbedTextV15,
            "multilingual-e5-small" => MultilingualE5Small,
            "multilingual-e5-base" => MultilingualE5Base,
            "multilingual-e5-large" => MultilingualE5Large,
            other => return Err(anyhow!("Unknown local embedding model: {}", other)),
        })
    }

    /// In-process embedder. The model is loaded (and downloaded on first
    /// use) the first time `embed` runs, then reused.
    pub struct LocalEmbedder {
        model_id: String,
        model: fastembed::EmbeddingModel,
        dims: usize,
        batch_size: usize,
        loaded: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(model_id: &str, key: &str, config: &EmbeddingConfig) -> Result<Self> {
            Ok(Self {
                model_id: model_id.to_string(),
                model: fastembed_model(key)?,
                dims: config.dims.unwrap_or_else(|| local_dims(key)),
                batch_size: config.batch_size,
                loaded: Arc::new(Mutex::new(None)),
            })
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_id
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            let texts = texts.to_vec();
            let model = self.model.clone();
            let batch_size = self.batch_size;
            let loaded = Arc::clone(&self.loaded);

            tokio::task::spawn_blocking(move || {
                let mut guard = loaded
                    .lock()
                    .map_err(|_| anyhow!("local embedding model lock poisoned"))?;
                if guard.is_none() {
                    let embedding = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(model).with_show_download_progress(false),
                    )
                    .map_err(|e| anyhow!("Failed to initialize local embedding model: {}", e))?;
                    *guard = Some(embedding);
                }
                let embedding = guard
                    .as_mut()
                    .ok_or_else(|| anyhow!("local embedding model not loaded"))?;
                embedding
                    .embed(texts, Some(batch_size))
                    .map_err(|e| anyhow!("Local embedding failed: {}", e))
            })
            .await?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::json;

    #[test]
    fn test_classify_families() {
        assert_eq!(
            ModelFamily::classify("text-embedding-3-small"),
            Some(ModelFamily::OpenAI)
        );
        assert_eq!(
            ModelFamily::classify("ollama/nomic-embed-text"),
            Some(ModelFamily::Ollama("nomic-embed-text".to_string()))
        );
        assert_eq!(
            ModelFamily::classify("sentence-transformers/all-MiniLM-L6-v2"),
            Some(ModelFamily::Local("all-minilm-l6-v2"))
        );
        assert_eq!(
            ModelFamily::classify("BAAI/bge-small-en-v1.5"),
            Some(ModelFamily::Local("bge-small-en-v1.5"))
        );
        assert_eq!(ModelFamily::classify("ollama/"), None);
        assert_eq!(ModelFamily::classify("gpt-4o"), None);
    }

    #[test]
    fn test_dims_tables() {
        assert_eq!(openai_dims("text-embedding-3-small"), 1536);
        assert_eq!(openai_dims("text-embedding-3-large"), 3072);
        assert_eq!(openai_dims("text-embedding-ada-002"), 1536);
        assert_eq!(local_dims("bge-large-en-v1.5"), 1024);
    }

    #[test]
    fn test_unsupported_model_rejected() {
        let err = create_embedder("word2vec", &EmbeddingConfig::default(), None)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::UnsupportedModel(m)) if m == "word2vec"
        ));
    }

    #[test]
    fn test_openai_requires_key() {
        let err = create_embedder("text-embedding-3-small", &EmbeddingConfig::default(), None)
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Config(_))
        ));
    }

    #[test]
    fn test_parse_openai_response_orders_by_index() {
        let json = json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&json!({"oops": true})).is_err());
    }

    #[test]
    fn test_parse_ollama_response() {
        let json = json!({"embeddings": [[0.5, 0.5], [1.0, 0.0]]});
        assert_eq!(parse_ollama_response(&json).unwrap().len(), 2);
        assert!(parse_ollama_response(&json!({"embeddings": [1]})).is_err());
    }

    async fn spawn(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[tokio::test]
    async fn test_openai_embedder_sends_bearer_and_batch() {
        let app = Router::new().route(
            "/v1/embeddings",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer sk-test");
                assert_eq!(body["model"], "text-embedding-3-small");
                let data: Vec<Value> = body["input"]
                    .as_array()
                    .unwrap()
                    .iter()
                    .enumerate()
                    .map(|(i, _)| json!({"index": i, "embedding": [i as f64, 1.0]}))
                    .collect();
                Json(json!({ "data": data }))
            }),
        );
        let base = spawn(app).await;

        let config = EmbeddingConfig {
            openai_url: format!("{}/v1/embeddings", base),
            ..EmbeddingConfig::default()
        };
        let embedder =
            create_embedder("text-embedding-3-small", &config, Some("sk-test")).unwrap();
        assert_eq!(embedder.dims(), 1536);
        let out = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();
        assert_eq!(out, vec![vec![0.0, 1.0], vec![1.0, 1.0]]);
    }

    #[tokio::test]
    async fn test_client_error_is_not_retried() {
        let app = Router::new().route(
            "/api/embed",
            post(|| async { (axum::http::StatusCode::BAD_REQUEST, "bad model") }),
        );
        let base = spawn(app).await;

        let config = EmbeddingConfig {
            ollama_url: base,
            max_retries: 3,
            ..EmbeddingConfig::default()
        };
        let embedder = create_embedder("ollama/nomic-embed-text", &config, None).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Remote { status: 400, .. })
        ));
    }
}
