//! In-memory [`VectorStore`] implementation for tests.
//!
//! Uses `HashMap` and `Vec` behind `std::sync::RwLock` for thread safety.
//! Query is brute-force cosine similarity over every stored vector.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::{CollectionInfo, QueryMatch, VectorRecord};

use super::{rank_matches, VectorStore};

struct StoredCollection {
    info: CollectionInfo,
    records: Vec<VectorRecord>,
}

/// In-memory store; contents vanish with the value.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, StoredCollection>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: T) -> anyhow::Error {
    anyhow!("in-memory store lock poisoned")
}

#[async_trait]
impl VectorStore for InMemoryStore {
    async fn get_collection(&self, name: &str) -> Result<Option<CollectionInfo>> {
        let guard = self.collections.read().map_err(poisoned)?;
        Ok(guard.get(name).map(|c| c.info.clone()))
    }

    async fn create_collection(
        &self,
        name: &str,
        embedding_model: Option<&str>,
    ) -> Result<CollectionInfo> {
        let mut guard = self.collections.write().map_err(poisoned)?;
        if guard.contains_key(name) {
            bail!("Collection already exists: {}", name);
        }
        let info = CollectionInfo {
            name: name.to_string(),
            embedding_model: embedding_model.map(str::to_string),
        };
        guard.insert(
            name.to_string(),
            StoredCollection {
                info: info.clone(),
                records: Vec::new(),
            },
        );
        Ok(info)
    }

    async fn bind_embedding_model(&self, name: &str, embedding_model: &str) -> Result<()> {
        let mut guard = self.collections.write().map_err(poisoned)?;
        let coll = guard
            .get_mut(name)
            .ok_or_else(|| anyhow!("Collection does not exist: {}", name))?;
        coll.info.embedding_model = Some(embedding_model.to_string());
        Ok(())
    }

    async fn clear_collection(&self, name: &str) -> Result<()> {
        let mut guard = self.collections.write().map_err(poisoned)?;
        if let Some(coll) = guard.get_mut(name) {
            coll.records.clear();
        }
        Ok(())
    }

    async fn upsert(&self, collection: &str, records: &[VectorRecord]) -> Result<()> {
        let mut guard = self.collections.write().map_err(poisoned)?;
        let coll = guard
            .get_mut(collection)
            .ok_or_else(|| anyhow!("Collection does not exist: {}", collection))?;
        for rec in records {
            match coll.records.iter_mut().find(|r| r.id == rec.id) {
                Some(existing) => *existing = rec.clone(),
                None => coll.records.push(rec.clone()),
            }
        }
        Ok(())
    }

    async fn query(
        &self,
        collection: &str,
        query_vec: &[f32],
        k: usize,
    ) -> Result<Vec<QueryMatch>> {
        let guard = self.collections.read().map_err(poisoned)?;
        let coll = guard
            .get(collection)
            .ok_or_else(|| anyhow!("Collection does not exist: {}", collection))?;
        let matches = coll
            .records
            .iter()
            .map(|r| QueryMatch {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                score: cosine_similarity(query_vec, &r.vector),
            })
            .collect();
        Ok(rank_matches(matches, k))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let guard = self.collections.read().map_err(poisoned)?;
        Ok(guard.get(collection).map(|c| c.records.len()).unwrap_or(0))
    }
}
