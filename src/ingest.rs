//! Document ingestion.
//!
//! Shared by `POST /ingest` and the `chat-rag ingest <file>` command. A batch
//! is split into parallel id/text/metadata lists and handed to the
//! collection in a single call; there is no chunking and no partial success.

use anyhow::{Context, Result};
use std::path::Path;

use crate::collection::Collection;
use crate::models::{ChatDocument, IngestBatch};

/// Add `documents` to the collection, returning how many were submitted.
pub async fn ingest_documents(collection: &Collection, documents: Vec<ChatDocument>) -> Result<usize> {
    let count = documents.len();

    let mut ids = Vec::with_capacity(count);
    let mut texts = Vec::with_capacity(count);
    let mut metadatas = Vec::with_capacity(count);
    for doc in documents {
        ids.push(doc.id);
        texts.push(doc.text);
        metadatas.push(doc.metadata);
    }

    collection.add(ids, texts, metadatas).await?;
    Ok(count)
}

/// Read an `{"documents": [...]}` file as exported by the chat client.
pub fn read_batch(path: &Path) -> Result<IngestBatch> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read ingest file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Invalid ingest file (expected {{\"documents\": [...]}}): {}", path.display()))
}

/// CLI entry point for `chat-rag ingest`.
pub async fn run_ingest(collection: &Collection, path: &Path) -> Result<()> {
    let batch = read_batch(path)?;
    let count = ingest_documents(collection, batch.documents).await?;
    let total = collection.count().await?;

    println!("ingest {}", path.display());
    println!("  documents submitted: {}", count);
    println!("  collection {}: {} records", collection.name(), total);
    println!("ok");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use crate::store::memory::InMemoryStore;
    use crate::store::DistanceMetric;
    use std::sync::Arc;
    use tempfile::TempDir;

    async fn collection() -> Collection {
        Collection::open(
            Arc::new(InMemoryStore::new()),
            Arc::new(HashingProvider::new(64)),
            "chat_history",
            DistanceMetric::Cosine,
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_ingest_file_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("export.json");
        std::fs::write(
            &path,
            r#"{"documents": [
                {"id": "chat-1_0", "text": "hello", "metadata": {"role": "user", "chatId": "chat-1", "title": "Greeting", "timestamp": "2025-03-01T10:00:00", "messageIndex": 0}},
                {"id": "chat-1_1", "text": "hi there", "metadata": {"role": "assistant", "chatId": "chat-1", "title": "Greeting", "timestamp": "2025-03-01T10:00:05", "messageIndex": 1}}
            ]}"#,
        )
        .unwrap();

        let batch = read_batch(&path).unwrap();
        let collection = collection().await;
        let count = ingest_documents(&collection, batch.documents).await.unwrap();
        assert_eq!(count, 2);
        assert_eq!(collection.count().await.unwrap(), 2);
    }

    #[test]
    fn test_read_batch_without_documents_key_fails() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        std::fs::write(&path, r#"{"messages": []}"#).unwrap();
        let err = read_batch(&path).unwrap_err();
        assert!(err.to_string().contains("Invalid ingest file"));
    }

    #[tokio::test]
    async fn test_empty_batch_is_a_no_op() {
        let collection = collection().await;
        assert_eq!(ingest_documents(&collection, Vec::new()).await.unwrap(), 0);
        assert_eq!(collection.count().await.unwrap(), 0);
    }
}
