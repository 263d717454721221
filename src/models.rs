//! Core data models used throughout chat-rag.
//!
//! These types represent the chat messages that flow into a collection and
//! the hits that flow back out of a similarity query.

use serde::{Deserialize, Serialize};

/// Free-form document metadata, stored verbatim.
///
/// Chat clients send `{role, chatId, title, timestamp, messageIndex}`.
pub type Metadata = serde_json::Map<String, serde_json::Value>;

/// A single chat message submitted for ingestion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatDocument {
    /// Caller-supplied identifier, e.g. `"<chatId>_<messageIndex>"`.
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
}

/// Body of `POST /ingest`, also the file format read by `chat-rag ingest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestBatch {
    pub documents: Vec<ChatDocument>,
}

/// One similarity-query result as returned over HTTP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryHit {
    pub id: String,
    pub text: String,
    pub metadata: Metadata,
    /// Distance under the collection metric; lower is more similar.
    pub distance: f32,
}
