//! SQLite-backed [`VectorStore`] implementation.
//!
//! One database file per persist directory (`<dir>/index.sqlite`) holds any
//! number of named collections. Vectors are stored as little-endian f32
//! BLOBs and searched by brute-force cosine similarity.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use docrag_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use docrag_core::models::{CollectionInfo, Metadata, QueryMatch, VectorRecord};
use docrag_core::store::{rank_matches, VectorStore};

use crate::db;
use crate::migrate;

/// File name of the index inside a persist directory.
pub const INDEX_FILE: &str = "index.sqlite";

/// Path of the index database for a persist directory.
pub fn index_path(persist_dir: &Path) -> PathBuf {
    persist_dir.join(INDEX_FILE)
}

/// SQLite implementation of the [`VectorStore`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating when `create` is set) the index under `persist_dir`
    /// and bring its schema up to date.
    pub async fn open(persist_dir: &Path, create: bool) -> Result<Self> {
        let path = index_path(persist_dir);
        let pool = db::connect(&path, create)
            .await
            .with_context(|| format!("Failed to open vector index {}", path.display()))?;
        migrate::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let row = sqlx::query("SELECT name, embedding_model FROM collections WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|row| CollectionInfo {
            name: row.get("name"),
            embedding_model: row.get("embedding_model"),
        }))
    }

    async fn create_collection(
        &self,
        name: &str,
        embedding_model: Option<&str>,
    ) -> Result<CollectionInfo> {
        if self.get_collection(name).await?.is_some() {
            bail!("Collection already exists: {}", name);
        }
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            "INSERT INTO collections (name, embedding_model, created_at, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(name)
        .bind(embedding_model)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(CollectionInfo {
            name: name.to_string(),
            embedding_model: embedding_model.map(str::to_string),
        })
    }

    async fn bind_embedding_model(&self, name: &str, embedding_model: &str) -> Result<()> {
        let result = sqlx::query(
            "UPDATE collections SET embedding_model = ?, updated_at = ? WHERE name = ?",
        )
        .bind(embedding_model)
        .bind(chrono::Utc::now().timestamp())
        .bind(name)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("Collection does not exist: {}", name);
        }
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<()> {
        sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(name)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        if self.get_collection(collection).await?.is_none() {
            bail!("Collection does not exist: {}", collection);
        }

        let mut tx = self.pool.begin().await?;
        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)?;
            sqlx::query(
                r#"
                INSERT INTO records (collection, id, text, metadata_json, embedding, dims)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    dims = excluded.dims
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(vec_to_blob(&record.vector))
            .bind(record.vector.len() as i64)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM records WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in &rows {
            let blob: Vec<u8> = row.get("embedding");
            let metadata_json: String = row.get("metadata_json");
            let metadata: Metadata = serde_json::from_str(&metadata_json)
                .with_context(|| format!("Corrupt metadata in collection {}", collection))?;
            matches.push(QueryMatch {
                id: row.get("id"),
                text: row.get("text"),
                metadata,
                score: cosine_similarity(query_vec, &blob_to_vec(&blob)),
            });
        }

        Ok(rank_matches(matches, k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(n as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn record(id: &str, vector: Vec<f32>) -> VectorRecord {
        let mut metadata = Metadata::new();
        metadata.insert("source".to_string(), json!(format!("{}.md", id)));
        VectorRecord {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata,
            vector,
        }
    }

    #[tokio::test]
    async fn test_open_without_create_fails_on_missing_index() {
        let tmp = TempDir::new().unwrap();
        assert!(SqliteStore::open(&tmp.path().join("nope"), false)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_collection_lifecycle_persists() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("store");

        let store = SqliteStore::open(&dir, true).await.unwrap();
        assert!(store.get_collection("docs").await.unwrap().is_none());
        store.create_collection("docs", Some("m1")).await.unwrap();
        assert!(store.create_collection("docs", None).await.is_err());
        store.bind_embedding_model("docs", "m2").await.unwrap();
        store
            .upsert("docs", &[record("a", vec![1.0, 0.0]), record("b", vec![0.0, 1.0])])
            .await
            .unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&dir, false).await.unwrap();
        let info = reopened.get_collection("docs").await.unwrap().unwrap();
        assert_eq!(info.embedding_model.as_deref(), Some("m2"));
        assert_eq!(reopened.count("docs").await.unwrap(), 2);

        let hits = reopened.query("docs", &[0.1, 0.9], 1).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
        assert_eq!(hits[0].metadata["source"], json!("b.md"));
    }

    #[tokio::test]
    async fn test_upsert_overwrites_and_clear_empties() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(tmp.path(), true).await.unwrap();
        store.create_collection("c", None).await.unwrap();

        store.upsert("c", &[record("x", vec![1.0])]).await.unwrap();
        let mut updated = record("x", vec![1.0]);
        updated.text = "new".to_string();
        store.upsert("c", &[updated]).await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 1);
        let hits = store.query("c", &[1.0], 4).await.unwrap();
        assert_eq!(hits[0].text, "new");

        store.clear_collection("c").await.unwrap();
        assert_eq!(store.count("c").await.unwrap(), 0);
        assert!(store.get_collection("c").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_upsert_into_missing_collection_fails() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(tmp.path(), true).await.unwrap();
        assert!(store.upsert("ghost", &[record("a", vec![1.0])]).await.is_err());
    }
}
