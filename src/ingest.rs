//! Ingestion pipeline: discover → load → split → embed → index → manifest.
//!
//! Every run is a full rebuild: the target collection is cleared before the
//! new chunks are written, and the manifest is overwritten.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use docrag_core::chunk::TextSplitter;
use docrag_core::embedding::Embedder;
use docrag_core::models::{chunk_id, count_tokens, Document, DocumentRecord, VectorRecord};
use docrag_core::store::VectorStore;

use crate::collection::attach_collection;
use crate::config::Config;
use crate::error::RagError;
use crate::extract::collect_documents;
use crate::progress::{IngestProgressEvent, ProgressReporter};
use crate::sqlite_store::SqliteStore;

/// Settings for one ingestion run.
#[derive(Debug, Clone)]
pub struct IngestOptions {
    pub source_dirs: Vec<PathBuf>,
    pub repo_root: PathBuf,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub collection: String,
    /// Chunks per embedding request.
    pub batch_size: usize,
}

impl IngestOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            source_dirs: config.paths.source_dirs.clone(),
            repo_root: config.paths.repo_root.clone(),
            chunk_size: config.chunking.chunk_size,
            chunk_overlap: config.chunking.chunk_overlap,
            output_dir: config.paths.vectorstore_dir.clone(),
            manifest_path: config.paths.manifest.clone(),
            collection: config.retrieval.collection.clone(),
            batch_size: config.embedding.batch_size,
        }
    }
}

/// Documents discovered and split, ready to embed.
#[derive(Debug, Clone)]
pub struct PreparedIngest {
    pub documents: usize,
    pub chunks: Vec<Document>,
}

impl fmt::Display for PreparedIngest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Loaded {} documents → {} chunks.",
            self.documents,
            self.chunks.len()
        )
    }
}

/// What an ingestion run produced.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
    pub output_dir: PathBuf,
    pub manifest_path: PathBuf,
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Saved vector index to {}", self.output_dir.display())?;
        write!(
            f,
            "Wrote manifest with {} entries to {}",
            self.chunks,
            self.manifest_path.display()
        )
    }
}

/// Run a full ingestion into `options.output_dir`.
///
/// Fails with [`RagError::NoDocuments`] before anything is written when no
/// supported file is found.
pub async fn build_vector_store(
    options: &IngestOptions,
    embedder: Arc<dyn Embedder>,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    let prepared = prepare_documents(options, progress)?;
    index_chunks(options, &prepared, embedder, progress).await
}

/// Discover, load, and split the source documents. Nothing is written.
pub fn prepare_documents(
    options: &IngestOptions,
    progress: &dyn ProgressReporter,
) -> Result<PreparedIngest> {
    let splitter = TextSplitter::new(options.chunk_size, options.chunk_overlap)
        .map_err(|e| RagError::config(format!("chunking: {}", e)))?;
    if options.batch_size == 0 {
        return Err(RagError::config("embedding batch size must be > 0").into());
    }

    progress.report(IngestProgressEvent::Discovering {
        dirs: options.source_dirs.len(),
    });
    let documents = collect_documents(&options.source_dirs, &options.repo_root)?;
    if documents.is_empty() {
        return Err(RagError::NoDocuments.into());
    }

    progress.report(IngestProgressEvent::Splitting {
        documents: documents.len() as u64,
    });
    let chunks = splitter.split_documents(&documents);
    tracing::info!(
        documents = documents.len(),
        chunks = chunks.len(),
        "split documents"
    );
    Ok(PreparedIngest {
        documents: documents.len(),
        chunks,
    })
}

/// Rebuild the collection from `prepared` chunks and write the manifest.
pub async fn index_chunks(
    options: &IngestOptions,
    prepared: &PreparedIngest,
    embedder: Arc<dyn Embedder>,
    progress: &dyn ProgressReporter,
) -> Result<IngestSummary> {
    if options.batch_size == 0 {
        return Err(RagError::config("embedding batch size must be > 0").into());
    }
    let chunks = &prepared.chunks;

    let store = Arc::new(SqliteStore::open(&options.output_dir, true).await?);
    let dyn_store: Arc<dyn VectorStore> = store.clone();
    attach_collection(dyn_store.clone(), &options.collection, Some(embedder.clone())).await?;
    dyn_store.clear_collection(&options.collection).await?;

    let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false);
    let total = chunks.len() as u64;
    let mut records = Vec::with_capacity(chunks.len());

    for (batch_no, batch) in chunks.chunks(options.batch_size).enumerate() {
        let offset = batch_no * options.batch_size;
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let vectors = embedder.embed(&texts).await?;
        if vectors.len() != batch.len() {
            return Err(RagError::UnexpectedResponse {
                service: "embedding",
                detail: format!("expected {} vectors, got {}", batch.len(), vectors.len()),
            }
            .into());
        }

        let vector_records: Vec<VectorRecord> = batch
            .iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (chunk, vector))| {
                let index = offset + i;
                records.push(manifest_record(chunk, index, &created_at));
                let mut metadata = chunk.metadata.clone();
                metadata.insert("chunk_index".to_string(), Value::from(index));
                VectorRecord {
                    id: chunk_id(index),
                    text: chunk.text.clone(),
                    metadata,
                    vector,
                }
            })
            .collect();
        dyn_store
            .upsert(&options.collection, &vector_records)
            .await?;

        progress.report(IngestProgressEvent::Embedding {
            n: (offset + batch.len()) as u64,
            total,
        });
    }
    store.close().await;

    write_manifest(&options.manifest_path, &records)?;

    Ok(IngestSummary {
        documents: prepared.documents,
        chunks: chunks.len(),
        output_dir: options.output_dir.clone(),
        manifest_path: options.manifest_path.clone(),
    })
}

fn manifest_record(chunk: &Document, index: usize, created_at: &str) -> DocumentRecord {
    DocumentRecord {
        source: chunk.source().unwrap_or("unknown").to_string(),
        chunk_id: chunk_id(index),
        chunk_index: index,
        num_tokens: count_tokens(&chunk.text),
        created_at: created_at.to_string(),
    }
}

/// Write `records` as a pretty-printed JSON array, replacing any prior file.
pub fn write_manifest(path: &Path, records: &[DocumentRecord]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write manifest {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_summary_lines() {
        let summary = IngestSummary {
            documents: 2,
            chunks: 5,
            output_dir: PathBuf::from("out"),
            manifest_path: PathBuf::from("m.json"),
        };
        assert_eq!(
            summary.to_string(),
            "Saved vector index to out\nWrote manifest with 5 entries to m.json"
        );
    }

    #[test]
    fn test_prepare_reports_counts_without_writing() {
        let tmp = TempDir::new().unwrap();
        let docs = tmp.path().join("docs");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("a.md"), "First paragraph.\n\nSecond paragraph.").unwrap();
        std::fs::write(docs.join("b.txt"), "tiny").unwrap();
        let options = IngestOptions {
            source_dirs: vec![docs],
            repo_root: tmp.path().to_path_buf(),
            chunk_size: 20,
            chunk_overlap: 0,
            output_dir: tmp.path().join("vs"),
            manifest_path: tmp.path().join("m.json"),
            collection: "docs".to_string(),
            batch_size: 4,
        };

        let prepared = prepare_documents(&options, &NoProgress).unwrap();
        assert_eq!(prepared.documents, 2);
        assert_eq!(prepared.chunks.len(), 3);
        assert_eq!(prepared.to_string(), "Loaded 2 documents → 3 chunks.");
        assert!(!options.output_dir.exists());
        assert!(!options.manifest_path.exists());
    }

    #[test]
    fn test_manifest_record_defaults_source() {
        let rec = manifest_record(&Document::new("a b  c"), 3, "ts");
        assert_eq!(rec.source, "unknown");
        assert_eq!(rec.chunk_id, "chunk-00003");
        assert_eq!(rec.num_tokens, 3);
    }

    #[test]
    fn test_write_manifest_pretty_and_overwrites() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested/manifest.json");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, "stale").unwrap();

        let mut doc = Document::new("one two");
        doc.metadata.insert("source".to_string(), json!("docs/a.md"));
        write_manifest(&path, &[manifest_record(&doc, 0, "2024-01-01T00:00:00.000000+00:00")])
            .unwrap();

        let written = std::fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("[\n  {\n    \"source\": \"docs/a.md\""));
        let parsed: Vec<DocumentRecord> = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed[0].num_tokens, 2);
    }
}
