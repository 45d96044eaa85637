//! Source discovery and document loading for ingestion.
//!
//! Text formats (`.md`, `.mdx`, `.txt`) load as one [`Document`] per file;
//! PDFs load as one [`Document`] per page with a zero-based `page` entry.
//! Every document carries a `source` path relative to the repository root.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;
use walkdir::WalkDir;

use docrag_core::models::Document;

/// File extensions the loader understands (compared case-insensitively).
pub const SUPPORTED_EXTENSIONS: &[&str] = &["md", "txt", "pdf", "mdx"];

#[derive(Debug)]
pub enum ExtractError {
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

fn extension(path: &Path) -> Option<String> {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn is_supported(path: &Path) -> bool {
    extension(path)
        .map(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

/// Supported files under every existing directory, recursively, in sorted
/// order per directory. Missing directories are skipped.
pub fn discover_files(source_dirs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for dir in source_dirs {
        if !dir.exists() {
            tracing::debug!(dir = %dir.display(), "source directory missing, skipping");
            continue;
        }
        let mut found = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = entry?;
            if entry.file_type().is_file() && is_supported(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found.sort();
        files.extend(found);
    }
    Ok(files)
}

/// `path` relative to `repo_root` when it lies beneath it, else as given.
pub fn relative_source(path: &Path, repo_root: &Path) -> String {
    let canonical_root = repo_root.canonicalize().ok();
    let canonical_path = path.canonicalize().ok();
    if let (Some(root), Some(full)) = (canonical_root, canonical_path) {
        if let Ok(rel) = full.strip_prefix(&root) {
            return rel.to_string_lossy().to_string();
        }
    }
    path.to_string_lossy().to_string()
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    pdf_extract::extract_text_from_mem_by_pages(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Load one file into documents. Unsupported extensions yield nothing.
pub fn load_file(path: &Path, repo_root: &Path) -> Result<Vec<Document>> {
    let Some(ext) = extension(path).filter(|_| is_supported(path)) else {
        return Ok(Vec::new());
    };

    let mut docs = if ext == "pdf" {
        let bytes =
            std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
        let pages =
            extract_pdf_pages(&bytes).with_context(|| format!("Failed to load {}", path.display()))?;
        pages
            .into_iter()
            .enumerate()
            .map(|(page, text)| {
                let mut doc = Document::new(text);
                doc.metadata.insert("page".to_string(), Value::from(page));
                doc
            })
            .collect()
    } else {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {} as UTF-8", path.display()))?;
        vec![Document::new(text)]
    };

    let source = relative_source(path, repo_root);
    for doc in &mut docs {
        doc.metadata
            .entry("source")
            .or_insert_with(|| Value::String(source.clone()));
    }
    Ok(docs)
}

/// Discover and load every supported file under `source_dirs`.
pub fn collect_documents(source_dirs: &[PathBuf], repo_root: &Path) -> Result<Vec<Document>> {
    let mut documents = Vec::new();
    for path in discover_files(source_dirs)? {
        let loaded = load_file(&path, repo_root)?;
        tracing::debug!(path = %path.display(), units = loaded.len(), "loaded");
        documents.extend(loaded);
    }
    Ok(documents)
}
