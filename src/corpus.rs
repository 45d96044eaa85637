//! Research corpus loading.
//!
//! A processed corpus is a directory of JSON chunk files, optionally
//! described by an index manifest:
//!
//! ```json
//! [{"id": "pmid-1-0", "path": "processed/pmid-1-0.json", "source": "pubmed", "tags": ["adhd"], "year": 2021}]
//! ```
//!
//! With a manifest, each entry names its chunk file (only the file name of
//! `path` is used, resolved under the processed directory) and supplies the
//! document id, source, tags, and any extra metadata. Without one, every
//! `*.json` file in the directory becomes a document keyed by its file stem.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde_json::Value;

use docrag_core::models::{CorpusDocument, Metadata};

use crate::error::RagError;

/// Keys of a manifest entry that are not copied into document metadata.
const INDEX_RESERVED: &[&str] = &["id", "path", "source", "tags"];
/// Keys of a standalone chunk file that are not copied into metadata.
const CHUNK_RESERVED: &[&str] = &["text", "source", "tags"];

fn read_json(path: &Path) -> Result<Value> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

fn read_object(path: &Path) -> Result<Metadata> {
    match read_json(path)? {
        Value::Object(map) => Ok(map),
        _ => Err(RagError::config(format!(
            "{} must contain a JSON object",
            path.display()
        ))
        .into()),
    }
}

/// String form of a loosely typed field; null and absent read as `""`.
fn text_of(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Tags as strings. Nulls are dropped and other scalars are stringified;
/// a bare string counts as a single tag.
fn tags_of(value: Option<&Value>) -> Vec<String> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .filter(|v| !v.is_null())
            .map(|v| text_of(Some(v)))
            .collect(),
        Some(other) => vec![text_of(Some(other))],
    }
}

fn metadata_without(map: &Metadata, reserved: &[&str]) -> Metadata {
    map.iter()
        .filter(|(k, _)| !reserved.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

fn require_id(doc_id: String, origin: &Path) -> Result<String> {
    if doc_id.is_empty() {
        return Err(RagError::config(format!(
            "Empty document id in {}",
            origin.display()
        ))
        .into());
    }
    Ok(doc_id)
}

/// Load corpus documents from `processed_dir`, driven by `index_path`
/// when it is given and exists.
pub fn load_corpus(processed_dir: &Path, index_path: Option<&Path>) -> Result<Vec<CorpusDocument>> {
    match index_path.filter(|p| p.exists()) {
        Some(index) => load_indexed(processed_dir, index),
        None => load_directory(processed_dir),
    }
}

fn load_indexed(processed_dir: &Path, index_path: &Path) -> Result<Vec<CorpusDocument>> {
    let entries = match read_json(index_path)? {
        Value::Array(entries) => entries,
        _ => {
            return Err(RagError::config(format!(
                "{} must contain a JSON array",
                index_path.display()
            ))
            .into())
        }
    };
    let mut documents = Vec::with_capacity(entries.len());

    for entry in entries {
        let Value::Object(entry) = entry else {
            return Err(RagError::config(format!(
                "Index entries in {} must be JSON objects",
                index_path.display()
            ))
            .into());
        };
        let path = text_of(entry.get("path"));
        let Some(file_name) = Path::new(&path).file_name() else {
            tracing::warn!(path = %path, "index entry has no file name, skipping");
            continue;
        };
        let chunk_path = processed_dir.join(file_name);
        if !chunk_path.exists() {
            tracing::debug!(path = %chunk_path.display(), "chunk file missing, skipping");
            continue;
        }
        let chunk = read_object(&chunk_path)?;
        let text = match chunk.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => {
                return Err(RagError::config(format!(
                    "{} has no text field",
                    chunk_path.display()
                ))
                .into())
            }
        };

        // `chunk_id` stands in for a missing `id` but always stays in metadata.
        let id = match entry.get("id") {
            None | Some(Value::Null) => text_of(entry.get("chunk_id")),
            id => text_of(id),
        };
        documents.push(CorpusDocument {
            doc_id: require_id(id, index_path)?,
            text,
            source: text_of(entry.get("source")),
            tags: tags_of(entry.get("tags")),
            metadata: metadata_without(&entry, INDEX_RESERVED),
        });
    }

    Ok(documents)
}

fn load_directory(processed_dir: &Path) -> Result<Vec<CorpusDocument>> {
    if !processed_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut files: Vec<PathBuf> = std::fs::read_dir(processed_dir)
        .with_context(|| format!("Failed to list {}", processed_dir.display()))?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some("json"))
        .collect();
    files.sort();

    let mut documents = Vec::with_capacity(files.len());
    for file in files {
        let payload = read_object(&file)?;
        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        documents.push(CorpusDocument {
            doc_id: require_id(stem, &file)?,
            text: text_of(payload.get("text")),
            source: text_of(payload.get("source")),
            tags: tags_of(payload.get("tags")),
            metadata: metadata_without(&payload, CHUNK_RESERVED),
        });
    }
    Ok(documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn write(path: &Path, value: serde_json::Value) {
        std::fs::write(path, serde_json::to_string(&value).unwrap()).unwrap();
    }

    #[test]
    fn test_directory_fallback_uses_file_stem() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("x.json"),
            json!({"text": "hello", "tags": ["a"]}),
        );

        let docs = load_corpus(tmp.path(), None).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "x");
        assert_eq!(docs[0].text, "hello");
        assert_eq!(docs[0].source, "");
        assert_eq!(docs[0].tags, vec!["a".to_string()]);
        assert!(docs[0].metadata.is_empty());
    }

    #[test]
    fn test_directory_fallback_sorted_with_extra_metadata() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("b.json"), json!({"text": "B", "year": 2020}));
        write(&tmp.path().join("a.json"), json!({"source": "pubmed"}));
        std::fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();

        let docs = load_corpus(tmp.path(), None).unwrap();
        let ids: Vec<&str> = docs.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(docs[0].text, "");
        assert_eq!(docs[0].source, "pubmed");
        assert_eq!(docs[1].metadata["year"], json!(2020));
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let tmp = TempDir::new().unwrap();
        assert!(load_corpus(&tmp.path().join("none"), None).unwrap().is_empty());
    }

    #[test]
    fn test_index_drives_loading_and_skips_missing_chunks() {
        let tmp = TempDir::new().unwrap();
        let processed = tmp.path().join("processed");
        std::fs::create_dir_all(&processed).unwrap();
        write(&processed.join("c1.json"), json!({"text": "first chunk"}));
        let index = tmp.path().join("index.json");
        write(
            &index,
            json!([
                {"id": "c1", "path": "elsewhere/c1.json", "source": "pubmed", "tags": ["t"], "year": 2021},
                {"chunk_id": "c2", "path": "c2.json"}
            ]),
        );

        let docs = load_corpus(&processed, Some(&index)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "c1");
        assert_eq!(docs[0].text, "first chunk");
        assert_eq!(docs[0].source, "pubmed");
        let keys: Vec<&str> = docs[0].metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["year"]);
    }

    #[test]
    fn test_index_accepts_chunk_id_alias() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("c2.json"), json!({"text": "t"}));
        let index = tmp.path().join("index.json");
        write(&index, json!([{"chunk_id": "c2", "path": "c2.json"}]));

        let docs = load_corpus(tmp.path(), Some(&index)).unwrap();
        assert_eq!(docs[0].doc_id, "c2");
        assert_eq!(docs[0].tags, Vec::<String>::new());
    }

    #[test]
    fn test_index_entry_with_id_and_chunk_id() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("c.json"), json!({"text": "t"}));
        let index = tmp.path().join("index.json");
        write(
            &index,
            json!([{"id": "c", "chunk_id": "c-0", "path": "c.json", "page": 3}]),
        );

        let docs = load_corpus(tmp.path(), Some(&index)).unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].doc_id, "c");
        assert_eq!(docs[0].metadata["chunk_id"], json!("c-0"));
        let keys: Vec<&str> = docs[0].metadata.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["chunk_id", "page"]);
    }

    #[test]
    fn test_index_tolerates_null_source_and_mixed_tags() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("c.json"), json!({"text": "t"}));
        let index = tmp.path().join("index.json");
        write(
            &index,
            json!([{"id": "c", "path": "c.json", "source": null, "tags": ["x", 1, null, true]}]),
        );

        let docs = load_corpus(tmp.path(), Some(&index)).unwrap();
        assert_eq!(docs[0].source, "");
        assert_eq!(docs[0].tags, vec!["x", "1", "true"]);
        assert!(docs[0].metadata.is_empty());
    }

    #[test]
    fn test_directory_fallback_tolerates_loose_types() {
        let tmp = TempDir::new().unwrap();
        write(
            &tmp.path().join("d.json"),
            json!({"text": "t", "source": null, "tags": [2021, "adhd"], "doi": null}),
        );

        let docs = load_corpus(tmp.path(), None).unwrap();
        assert_eq!(docs[0].source, "");
        assert_eq!(docs[0].tags, vec!["2021", "adhd"]);
        assert_eq!(docs[0].metadata["doi"], json!(null));
    }

    #[test]
    fn test_nonexistent_index_falls_back_to_directory() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("solo.json"), json!({"text": "s"}));
        let docs = load_corpus(tmp.path(), Some(&tmp.path().join("nope.json"))).unwrap();
        assert_eq!(docs[0].doc_id, "solo");
    }

    #[test]
    fn test_malformed_json_names_file() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("broken.json"), "{not json").unwrap();
        let err = load_corpus(tmp.path(), None).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.json"));
    }

    #[test]
    fn test_empty_id_rejected() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("c.json"), json!({"text": "t"}));
        let index = tmp.path().join("index.json");
        write(&index, json!([{"id": "", "path": "c.json"}]));
        let err = load_corpus(tmp.path(), Some(&index)).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RagError>(),
            Some(RagError::Config(_))
        ));
    }

    #[test]
    fn test_indexed_chunk_requires_text() {
        let tmp = TempDir::new().unwrap();
        write(&tmp.path().join("c.json"), json!({"body": "t"}));
        let index = tmp.path().join("index.json");
        write(&index, json!([{"id": "c", "path": "c.json"}]));
        assert!(load_corpus(tmp.path(), Some(&index)).is_err());
    }
}
