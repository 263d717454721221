//! SQLite-backed [`Store`] implementation.
//!
//! Records live in a single `records` table keyed by `(collection, id)`;
//! embeddings are stored as little-endian f32 BLOBs and scanned in full for
//! nearest-neighbour queries.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::migrate;
use crate::models::Metadata;

use super::{closest, CollectionInfo, DistanceMetric, Neighbor, Record, Store, StoredEmbedding};

/// Ids per `IN (...)` lookup, well under SQLite's bound-parameter limit.
const ID_LOOKUP_CHUNK: usize = 500;

/// SQLite implementation of the [`Store`] trait.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Connect to the configured database and apply migrations.
    pub async fn open(config: &Config) -> Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn ensure_collection(&self, info: &CollectionInfo) -> Result<CollectionInfo> {
        let now = chrono::Utc::now().timestamp();

        sqlx::query(
            r#"
            INSERT INTO collections (name, metric, model, dims, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(name) DO NOTHING
            "#,
        )
        .bind(&info.name)
        .bind(info.metric.as_str())
        .bind(&info.model)
        .bind(info.dims as i64)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query("SELECT name, metric, model, dims FROM collections WHERE name = ?")
            .bind(&info.name)
            .fetch_one(&self.pool)
            .await?;

        let metric: String = row.get("metric");
        let dims: i64 = row.get("dims");

        Ok(CollectionInfo {
            name: row.get("name"),
            metric: metric.parse()?,
            model: row.get("model"),
            dims: dims as usize,
        })
    }

    async fn upsert_records(&self, collection: &str, records: &[Record]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            let metadata_json = serde_json::to_string(&record.metadata)?;
            let blob = vec_to_blob(&record.embedding);

            sqlx::query(
                r#"
                INSERT INTO records (collection, id, text, metadata_json, embedding, content_hash)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(collection, id) DO UPDATE SET
                    text = excluded.text,
                    metadata_json = excluded.metadata_json,
                    embedding = excluded.embedding,
                    content_hash = excluded.content_hash
                "#,
            )
            .bind(collection)
            .bind(&record.id)
            .bind(&record.text)
            .bind(&metadata_json)
            .bind(&blob)
            .bind(&record.content_hash)
            .execute(&mut *tx)
            .await
            .with_context(|| format!("Failed to store record {}", record.id))?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn stored_embeddings(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<HashMap<String, StoredEmbedding>> {
        let mut found = HashMap::new();

        for chunk in ids.chunks(ID_LOOKUP_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "SELECT id, content_hash, embedding FROM records \
                 WHERE collection = ? AND id IN ({})",
                placeholders
            );

            let mut query = sqlx::query(&sql).bind(collection);
            for id in chunk {
                query = query.bind(id);
            }

            for row in query.fetch_all(&self.pool).await? {
                let blob: Vec<u8> = row.get("embedding");
                found.insert(
                    row.get("id"),
                    StoredEmbedding {
                        content_hash: row.get("content_hash"),
                        embedding: blob_to_vec(&blob),
                    },
                );
            }
        }

        Ok(found)
    }

    async fn nearest(
        &self,
        collection: &str,
        query: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<Neighbor>> {
        let rows = sqlx::query(
            "SELECT id, text, metadata_json, embedding FROM records WHERE collection = ?",
        )
        .bind(collection)
        .fetch_all(&self.pool)
        .await?;

        let candidates = rows
            .iter()
            .map(|row| {
                let id: String = row.get("id");
                let blob: Vec<u8> = row.get("embedding");
                let metadata_json: String = row.get("metadata_json");
                let metadata = serde_json::from_str::<Metadata>(&metadata_json)
                    .with_context(|| format!("Corrupt metadata for record {}", id))?;
                Ok(Neighbor {
                    id,
                    text: row.get("text"),
                    metadata,
                    distance: metric.distance(query, &blob_to_vec(&blob)),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(closest(candidates, limit))
    }

    async fn count(&self, collection: &str) -> Result<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM records WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn clear(&self, collection: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM records WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> Config {
        let mut config = Config::default();
        config.db.path = dir.path().join("data").join("rag.sqlite");
        config
    }

    fn info(dims: usize) -> CollectionInfo {
        CollectionInfo {
            name: "chat_history".to_string(),
            metric: DistanceMetric::Cosine,
            model: "hashing".to_string(),
            dims,
        }
    }

    fn record(id: &str, text: &str, embedding: Vec<f32>) -> Record {
        let mut metadata = Metadata::new();
        metadata.insert("role".to_string(), serde_json::json!("user"));
        metadata.insert("messageIndex".to_string(), serde_json::json!(0));
        Record::new(id.to_string(), text.to_string(), metadata, embedding)
    }

    #[tokio::test]
    async fn test_records_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        let config = config_in(&tmp);

        let store = SqliteStore::open(&config).await.unwrap();
        store.ensure_collection(&info(2)).await.unwrap();
        store
            .upsert_records(
                "chat_history",
                &[record("a", "alpha", vec![1.0, 0.0]), record("b", "beta", vec![0.0, 1.0])],
            )
            .await
            .unwrap();
        store.close().await;

        let reopened = SqliteStore::open(&config).await.unwrap();
        assert_eq!(reopened.count("chat_history").await.unwrap(), 2);

        let hits = reopened
            .nearest("chat_history", &[0.9, 0.1], DistanceMetric::Cosine, 1)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].metadata["role"], "user");
    }

    #[tokio::test]
    async fn test_ensure_collection_returns_existing_dims() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&config_in(&tmp)).await.unwrap();
        store.ensure_collection(&info(384)).await.unwrap();
        let stored = store.ensure_collection(&info(768)).await.unwrap();
        assert_eq!(stored.dims, 384);
        assert_eq!(stored.metric, DistanceMetric::Cosine);
    }

    #[tokio::test]
    async fn test_duplicate_ids_upsert() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&config_in(&tmp)).await.unwrap();
        store.ensure_collection(&info(2)).await.unwrap();

        let batch = [record("dup", "old", vec![1.0, 0.0]), record("dup", "new", vec![1.0, 0.0])];
        store.upsert_records("chat_history", &batch).await.unwrap();
        store.upsert_records("chat_history", &batch).await.unwrap();

        assert_eq!(store.count("chat_history").await.unwrap(), 1);
        let hits = store
            .nearest("chat_history", &[1.0, 0.0], DistanceMetric::Cosine, 3)
            .await
            .unwrap();
        assert_eq!(hits[0].text, "new");
    }

    #[tokio::test]
    async fn test_clear_empties_collection() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&config_in(&tmp)).await.unwrap();
        store.ensure_collection(&info(2)).await.unwrap();
        store
            .upsert_records("chat_history", &[record("a", "alpha", vec![1.0, 0.0])])
            .await
            .unwrap();

        assert_eq!(store.clear("chat_history").await.unwrap(), 1);
        let hits = store
            .nearest("chat_history", &[1.0, 0.0], DistanceMetric::Cosine, 3)
            .await
            .unwrap();
        assert!(hits.is_empty());
    }

    #[tokio::test]
    async fn test_stored_embeddings_returns_known_ids_only() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&config_in(&tmp)).await.unwrap();
        store.ensure_collection(&info(2)).await.unwrap();
        store
            .upsert_records("chat_history", &[record("a", "alpha", vec![1.0, 0.5])])
            .await
            .unwrap();

        let found = store
            .stored_embeddings("chat_history", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["a"].embedding, vec![1.0, 0.5]);
        assert_eq!(found["a"].content_hash, crate::store::content_hash("alpha"));
    }

    #[tokio::test]
    async fn test_corrupt_metadata_fails_nearest() {
        let tmp = TempDir::new().unwrap();
        let store = SqliteStore::open(&config_in(&tmp)).await.unwrap();
        store.ensure_collection(&info(2)).await.unwrap();
        store
            .upsert_records("chat_history", &[record("a", "alpha", vec![1.0, 0.0])])
            .await
            .unwrap();

        sqlx::query("UPDATE records SET metadata_json = 'not json' WHERE id = 'a'")
            .execute(&store.pool)
            .await
            .unwrap();

        let err = store
            .nearest("chat_history", &[1.0, 0.0], DistanceMetric::Cosine, 1)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Corrupt metadata for record a"));
    }
}
