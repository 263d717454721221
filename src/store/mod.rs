//! Storage abstraction for chat-rag collections.
//!
//! The [`Store`] trait defines the operations a [`Collection`](crate::collection::Collection)
//! needs from its backend: persisting embedded records and scanning them for
//! nearest neighbours. Two implementations ship with the crate:
//!
//! - [`sqlite::SqliteStore`]: persistent, used by the server and CLI
//! - [`memory::InMemoryStore`]: process-local, used by tests
//!
//! Implementations must be `Send + Sync` to be shared across request handlers.

pub mod memory;
pub mod sqlite;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::models::Metadata;

/// How distance between two embeddings is measured. Lower is always closer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// `1 - cos(a, b)`
    #[default]
    Cosine,
    /// Squared Euclidean distance.
    L2,
    /// `1 - a·b`
    Ip,
}

impl DistanceMetric {
    pub fn as_str(&self) -> &'static str {
        match self {
            DistanceMetric::Cosine => "cosine",
            DistanceMetric::L2 => "l2",
            DistanceMetric::Ip => "ip",
        }
    }

    pub fn distance(&self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            DistanceMetric::Cosine => 1.0 - cosine_similarity(a, b),
            DistanceMetric::L2 => a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum(),
            DistanceMetric::Ip => 1.0 - a.iter().zip(b.iter()).map(|(x, y)| x * y).sum::<f32>(),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DistanceMetric {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "cosine" => Ok(DistanceMetric::Cosine),
            "l2" => Ok(DistanceMetric::L2),
            "ip" => Ok(DistanceMetric::Ip),
            other => bail!("Unknown distance metric: '{}'. Must be cosine, l2, or ip.", other),
        }
    }
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`:
/// - `1.0` = identical direction
/// - `0.0` = orthogonal (unrelated)
/// - `-1.0` = opposite direction
///
/// Returns `0.0` for empty vectors, zero vectors, or vectors of different lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }

    dot / denom
}

/// Identity of a collection: its name plus the embedding space it was created in.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionInfo {
    pub name: String,
    pub metric: DistanceMetric,
    pub model: String,
    pub dims: usize,
}

/// A document ready for storage, with its embedding attached.
#[derive(Debug, Clone)]
pub struct Record {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub embedding: Vec<f32>,
    /// Hex SHA-256 of `text`.
    pub content_hash: String,
}

/// Hex SHA-256 of a document's text.
pub fn content_hash(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

impl Record {
    pub fn new(id: String, text: String, metadata: Metadata, embedding: Vec<f32>) -> Self {
        let content_hash = content_hash(&text);
        Self {
            id,
            text,
            metadata,
            embedding,
            content_hash,
        }
    }
}

/// The embedding already stored for an id, with the hash of the text it was computed from.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEmbedding {
    pub content_hash: String,
    pub embedding: Vec<f32>,
}

/// A stored record scored against a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    pub distance: f32,
}

/// Sort by ascending distance (ties by id) and keep the closest `limit`.
pub(crate) fn closest(mut candidates: Vec<Neighbor>, limit: usize) -> Vec<Neighbor> {
    candidates.sort_by(|a, b| {
        a.distance
            .partial_cmp(&b.distance)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.id.cmp(&b.id))
    });
    candidates.truncate(limit);
    candidates
}

/// Abstract storage backend for collections.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_collection`](Store::ensure_collection) | Get-or-create a named collection |
/// | [`upsert_records`](Store::upsert_records) | Insert or replace records by id, atomically |
/// | [`stored_embeddings`](Store::stored_embeddings) | Existing hashes and vectors for a set of ids |
/// | [`nearest`](Store::nearest) | Closest records to a query vector |
/// | [`count`](Store::count) | Number of records in a collection |
/// | [`clear`](Store::clear) | Delete every record, keeping the collection |
#[async_trait]
pub trait Store: Send + Sync {
    /// Create the collection if it does not exist.
    ///
    /// Returns the stored identity, which differs from `info` when the
    /// collection already existed with other settings.
    async fn ensure_collection(&self, info: &CollectionInfo) -> Result<CollectionInfo>;

    /// Insert or replace records. Later records win over earlier ones with the same id.
    async fn upsert_records(&self, collection: &str, records: &[Record]) -> Result<()>;

    /// Look up the ids that are already stored. Missing ids are absent from the map.
    async fn stored_embeddings(
        &self,
        collection: &str,
        ids: &[String],
    ) -> Result<HashMap<String, StoredEmbedding>>;

    /// Return up to `limit` records closest to `query`, closest first.
    async fn nearest(
        &self,
        collection: &str,
        query: &[f32],
        metric: DistanceMetric,
        limit: usize,
    ) -> Result<Vec<Neighbor>>;

    async fn count(&self, collection: &str) -> Result<usize>;

    /// Delete all records in the collection, returning how many were removed.
    async fn clear(&self, collection: &str) -> Result<usize>;
}
