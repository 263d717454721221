//! Similarity queries.
//!
//! Shared by `POST /query` and the `chat-rag query` command.

use anyhow::Result;

use crate::collection::{Collection, QueryResult};
use crate::models::QueryHit;

/// Zips a collection's parallel result arrays into one object per hit.
pub fn to_hits(result: QueryResult) -> Vec<QueryHit> {
    result
        .ids
        .into_iter()
        .zip(result.documents)
        .zip(result.metadatas)
        .zip(result.distances)
        .map(|(((id, text), metadata), distance)| QueryHit {
            id,
            text,
            metadata,
            distance,
        })
        .collect()
}

pub async fn query_hits(collection: &Collection, query: &str, n_results: usize) -> Result<Vec<QueryHit>> {
    let result = collection.query(query, n_results).await?;
    Ok(to_hits(result))
}

/// CLI entry point for `chat-rag query`.
pub async fn run_query(collection: &Collection, query: &str, n_results: usize, json: bool) -> Result<()> {
    let hits = query_hits(collection, query, n_results).await?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "success": true,
                "results": hits,
            }))?
        );
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }

    for (i, hit) in hits.iter().enumerate() {
        let title = hit
            .metadata
            .get("title")
            .and_then(|t| t.as_str())
            .unwrap_or("(untitled)");
        let role = hit
            .metadata
            .get("role")
            .and_then(|r| r.as_str())
            .unwrap_or("?");

        println!("{}. [{:.4}] {} / {}", i + 1, hit.distance, title, role);
        println!("    text: \"{}\"", hit.text.replace('\n', " ").trim());
        println!("    id: {}", hit.id);
        println!();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;

    #[test]
    fn test_to_hits_zips_parallel_arrays() {
        let mut m = Metadata::new();
        m.insert("role".into(), serde_json::json!("user"));
        let hits = to_hits(QueryResult {
            ids: vec!["a".into(), "b".into()],
            documents: vec!["first".into(), "second".into()],
            metadatas: vec![m, Metadata::new()],
            distances: vec![0.25, 0.5],
        });
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "a");
        assert_eq!(hits[0].metadata["role"], "user");
        assert_eq!(hits[1].text, "second");
        assert_eq!(hits[1].distance, 0.5);
    }

    #[test]
    fn test_to_hits_empty() {
        assert!(to_hits(QueryResult::default()).is_empty());
    }
}
