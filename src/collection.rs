//! The collection handle shared by the server and CLI.
//!
//! A [`Collection`] binds a named collection in a [`Store`] to the
//! [`EmbeddingProvider`] that produced its vectors. Callers hand it raw text;
//! it embeds, stores, and scores.

use std::sync::Arc;

use anyhow::{bail, Result};

use crate::config::Config;
use crate::embedding::{create_provider, embed_query, EmbeddingProvider};
use crate::models::Metadata;
use crate::store::sqlite::SqliteStore;
use crate::store::{content_hash, CollectionInfo, DistanceMetric, Record, Store};

/// Parallel result arrays from [`Collection::query`], closest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub ids: Vec<String>,
    pub documents: Vec<String>,
    pub metadatas: Vec<Metadata>,
    pub distances: Vec<f32>,
}

impl QueryResult {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

pub struct Collection {
    info: CollectionInfo,
    store: Arc<dyn Store>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Collection {
    /// Get or create `name` in `store`.
    ///
    /// Fails if the collection already exists with a different embedding
    /// model, dimensionality, or metric.
    pub async fn open(
        store: Arc<dyn Store>,
        embedder: Arc<dyn EmbeddingProvider>,
        name: &str,
        metric: DistanceMetric,
    ) -> Result<Self> {
        let wanted = CollectionInfo {
            name: name.to_string(),
            metric,
            model: embedder.model_name().to_string(),
            dims: embedder.dims(),
        };
        let stored = store.ensure_collection(&wanted).await?;

        if stored.model != wanted.model || stored.dims != wanted.dims {
            bail!(
                "collection '{}' was created with model {} ({} dims) but the configured \
                 embedding provider is {} ({} dims); use a new collection name or database path, or change [embedding]",
                name,
                stored.model,
                stored.dims,
                wanted.model,
                wanted.dims
            );
        }
        if stored.metric != wanted.metric {
            bail!(
                "collection '{}' uses the {} metric, configured metric is {}",
                name,
                stored.metric,
                wanted.metric
            );
        }

        tracing::debug!(collection = name, model = %stored.model, dims = stored.dims, "collection opened");

        Ok(Self {
            info: stored,
            store,
            embedder,
        })
    }

    /// Open the configured collection in the SQLite store, running
    /// migrations first.
    pub async fn from_config(config: &Config) -> Result<Self> {
        let store = SqliteStore::open(config).await?;
        let embedder = create_provider(&config.embedding)?;
        Self::open(
            Arc::new(store),
            embedder,
            &config.collection.name,
            config.collection.metric,
        )
        .await
    }

    pub fn info(&self) -> &CollectionInfo {
        &self.info
    }

    pub fn name(&self) -> &str {
        &self.info.name
    }

    pub fn metric(&self) -> DistanceMetric {
        self.info.metric
    }

    /// Embed and store documents. Ids already present are replaced.
    ///
    /// Unlike an add-only vector store, an existing id is overwritten and a
    /// repeated id within one batch keeps its last occurrence.
    ///
    /// The three lists are parallel. Records whose text hash matches the
    /// stored one keep their stored embedding; the remaining texts go to the
    /// embedding provider in one call and all records to the store in one
    /// transaction.
    pub async fn add(
        &self,
        ids: Vec<String>,
        documents: Vec<String>,
        metadatas: Vec<Metadata>,
    ) -> Result<()> {
        if ids.len() != documents.len() || ids.len() != metadatas.len() {
            bail!(
                "ids, documents and metadatas must have the same length (got {}, {}, {})",
                ids.len(),
                documents.len(),
                metadatas.len()
            );
        }
        if ids.is_empty() {
            return Ok(());
        }
        if let Some(pos) = ids.iter().position(|id| id.is_empty()) {
            bail!("document at index {} has an empty id", pos);
        }
        for (id, metadata) in ids.iter().zip(metadatas.iter()) {
            validate_metadata(id, metadata)?;
        }

        let hashes: Vec<String> = documents.iter().map(|text| content_hash(text)).collect();
        let mut stored = self.store.stored_embeddings(&self.info.name, &ids).await?;

        let mut embeddings: Vec<Option<Vec<f32>>> = ids
            .iter()
            .zip(hashes.iter())
            .map(|(id, hash)| {
                stored
                    .remove(id)
                    .filter(|s| &s.content_hash == hash && s.embedding.len() == self.info.dims)
                    .map(|s| s.embedding)
            })
            .collect();

        let pending: Vec<usize> = (0..embeddings.len())
            .filter(|&i| embeddings[i].is_none())
            .collect();
        if !pending.is_empty() {
            let texts: Vec<String> = pending.iter().map(|&i| documents[i].clone()).collect();
            let fresh = self.embedder.embed(&texts).await?;
            if fresh.len() != texts.len() {
                bail!(
                    "embedding provider returned {} vectors for {} documents",
                    fresh.len(),
                    texts.len()
                );
            }
            if let Some(bad) = fresh.iter().find(|v| v.len() != self.info.dims) {
                bail!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.info.dims,
                    bad.len()
                );
            }
            for (i, vector) in pending.iter().zip(fresh) {
                embeddings[*i] = Some(vector);
            }
        }
        tracing::debug!(
            documents = ids.len(),
            embedded = pending.len(),
            "embeddings resolved"
        );

        let mut records = Vec::with_capacity(ids.len());
        for ((((id, text), metadata), embedding), hash) in ids
            .into_iter()
            .zip(documents)
            .zip(metadatas)
            .zip(embeddings)
            .zip(hashes)
        {
            let embedding =
                embedding.ok_or_else(|| anyhow::anyhow!("no embedding resolved for {}", id))?;
            records.push(Record {
                id,
                text,
                metadata,
                embedding,
                content_hash: hash,
            });
        }

        self.store.upsert_records(&self.info.name, &records).await
    }

    /// Return up to `n_results` stored documents closest to `query_text`.
    pub async fn query(&self, query_text: &str, n_results: usize) -> Result<QueryResult> {
        if n_results == 0 {
            bail!("n_results must be at least 1");
        }

        let query_vec = embed_query(self.embedder.as_ref(), query_text).await?;
        if query_vec.len() != self.info.dims {
            bail!(
                "embedding dimension mismatch: expected {}, got {}",
                self.info.dims,
                query_vec.len()
            );
        }

        let neighbors = self
            .store
            .nearest(&self.info.name, &query_vec, self.info.metric, n_results)
            .await?;

        let mut result = QueryResult::default();
        for n in neighbors {
            result.ids.push(n.id);
            result.documents.push(n.text);
            result.metadatas.push(n.metadata);
            result.distances.push(n.distance);
        }
        Ok(result)
    }

    pub async fn count(&self) -> Result<usize> {
        self.store.count(&self.info.name).await
    }

    /// Delete every record, keeping the collection and its settings.
    pub async fn reset(&self) -> Result<usize> {
        self.store.clear(&self.info.name).await
    }
}

/// Metadata values must be strings, numbers, or booleans.
fn validate_metadata(id: &str, metadata: &Metadata) -> Result<()> {
    for (key, value) in metadata {
        match value {
            serde_json::Value::String(_)
            | serde_json::Value::Number(_)
            | serde_json::Value::Bool(_) => {}
            other => bail!(
                "metadata value for key '{}' of document {} must be a string, number, or boolean, got {}",
                key,
                id,
                json_kind(other)
            ),
        }
    }
    Ok(())
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
