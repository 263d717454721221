//! In-memory [`Store`] implementation for tests.
//!
//! Uses `HashMap`s behind `std::sync::RwLock` for thread safety.
//! Nearest-neighbour search is a brute-force scan over all records.

use std::collections::HashMap;
use std::sync::RwLock;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;

use super::{closest, CollectionInfo, DistanceMetric, Neighbor, Record, Store, StoredEmbedding};

/// Process-local store. Contents vanish with the value.
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, CollectionInfo>>,
    records: RwLock<HashMap<String, HashMap<String, Record>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
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
impl Store for InMemoryStore {
    async fn ensure_collection(&self, info: &CollectionInfo) -> Result<CollectionInfo> {
        let mut collections = self.collections.write().map_err(poisoned)?;
        let stored = collections
            .entry(info.name.clone())
            .or_insert_with(|| info.clone())
            .clone();
        self.records
            .write()
            .map_err(poisoned)?
            .entry(info.name.clone())
            .or_default();
        Ok(stored)
    }

    async fn upsert_records(&self, collection: &str, records: &[Record]) -> Result<()> {
        let mut all = self.records.write().map_err(poisoned)?;
        let Some(stored) = all.get_mut(collection) else {
            bail!("collection not found: {}", collection);
        };
        for record in records {
            stored.insert(record.id.clone(), record.clone());
        }
        Ok(())
    }

    async fn stored_embeddings(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<HashMap<String, StoredEmbedding>> {
        let all = self.records.read().map_err(poisoned)?;
        let Some(stored) = all.get(collection) else {
            bail!("collection not found: {}", collection);
        };
        Ok(ids
            .iter()
            .filter_map(|id| stored.get(id))
            .map(|r| {
                (
                    r.id.clone(),
                    StoredEmbedding {
                        content_hash: r.content_hash.clone(),
                        embedding: r.embedding.clone(),
                    },
                )
            })
            .collect())
    }

    async fn nearest(
        &self,
        collection: &str,
        query: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let all = self.records.read().map_err(poisoned)?;
        let Some(stored) = all.get(collection) else {
            bail!("collection not found: {}", collection);
        };
        let candidates = stored
            .values()
            .map(|r| Neighbor {
                id: r.id.clone(),
                text: r.text.clone(),
                metadata: r.metadata.clone(),
                distance: metric.distance(query, &r.embedding),
            })
            .collect();
        Ok(closest(candidates, limit))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let all = self.records.read().map_err(poisoned)?;
        Ok(all.get(collection).map(|r| r.len()).unwrap_or(0))
    }

    async fn clear(&self, collection: &str) -> Result<usize> {
        let mut all = self.records.write().map_err(poisoned)?;
        Ok(all
            .get_mut(collection)
            .map(|r| {
                let removed = r.len();
                r.clear();
                removed
            })
            .unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    fn info() -> CollectionInfo {
        CollectionInfo {
            name: "chat_history".to_string(),
            metric: DistanceMetric::Cosine,
            model: "hashing".to_string(),
            dims: 2,
        }
    }

    fn record(id: &str, text: &str, embedding: Vec<f32>) -> Record {
        Record::new(id.to_string(), text.to_string(), Metadata::new(), embedding)
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryStore::new();
        store.ensure_collection(&info()).await.unwrap();
        store
            .upsert_records("chat_history", &[record("a", "first", vec![1.0, 0.0])])
            .await
            .unwrap();
        store
            .upsert_records("chat_history", &[record("a", "second", vec![0.0, 1.0])])
            .await
            .unwrap();

        assert_eq!(store.count("chat_history").await.unwrap(), 1);
        let hits = store
            .nearest("chat_history", &[0.0, 1.0], DistanceMetric::Cosine, 5)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "second");
    }

    #[tokio::test]
    async fn test_ensure_collection_keeps_original_settings() {
        let store = InMemoryStore::new();
        store.ensure_collection(&info()).await.unwrap();
        let mut other = info();
        other.dims = 99;
        let stored = store.ensure_collection(&other).await.unwrap();
        assert_eq!(stored.dims, 2);
    }

    #[tokio::test]
    async fn test_upsert_into_missing_collection_fails() {
        let store = InMemoryStore::new();
        let err = store
            .upsert_records("nope", &[record("a", "x", vec![1.0])])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("collection not found"));
    }

    #[tokio::test]
    async fn test_clear_reports_removed() {
        let store = InMemoryStore::new();
        store.ensure_collection(&info()).await.unwrap();
        store
            .upsert_records(
                "chat_history",
                &[record("a", "x", vec![1.0, 0.0]), record("b", "y", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        assert_eq!(store.clear("chat_history").await.unwrap(), 2);
        assert_eq!(store.count("chat_history").await.unwrap(), 0);
    }
}
