//! crates/tutor_core/src/retrieval.rs
//!
//! The degrade-to-empty combinator shared by every read of the vector index.
//! Retrieval results are never cached; each call queries the index afresh.

use std::sync::Arc;
use tracing::{debug, error};

use crate::ports::{MetadataFilter, RetrievedChunk, VectorIndex};

/// Queries `collection`, turning a missing index, a missing collection name or
/// any store error into "no context".
pub async fn retrieve_or_empty(
    index: Option<&Arc<dyn VectorIndex>>,
    collection: Option<&str>,
    query: &str,
    k: usize,
    filter: Option<&MetadataFilter>,
) -> Vec<RetrievedChunk> {
    let (Some(index), Some(collection)) = (index, collection) else {
        debug!("No vector collection available, continuing without context");
        return Vec::new();
    };

    match index.query(collection, query, k, filter).await {
        Ok(hits) => {
            debug!("Retrieved {} chunks from '{}'", hits.len(), collection);
            hits
        }
        Err(e) => {
            error!("Vector query on '{}' failed, continuing without context: {}", collection, e);
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{DeleteSelector, Metadata, PortError, PortResult};
    use async_trait::async_trait;

    struct BrokenIndex;

    #[async_trait]
    impl VectorIndex for BrokenIndex {
        async fn get_or_create_collection(&self, _name: &str) -> PortResult<()> {
            Err(PortError::Unavailable("down".into()))
        }
        async fn upsert(
            &self,
            _collection: &str,
            _ids: &[String],
            _texts: &[String],
            _metadatas: &[Metadata],
        ) -> PortResult<()> {
            Err(PortError::Unavailable("down".into()))
        }
        async fn existing_ids(&self, _collection: &str, _ids: &[String]) -> PortResult<Vec<String>> {
            Err(PortError::Unavailable("down".into()))
        }
        async fn query(
            &self,
            _collection: &str,
            _text: &str,
            _k: usize,
            _filter: Option<&MetadataFilter>,
        ) -> PortResult<Vec<RetrievedChunk>> {
            Err(PortError::ConnectTimeout("chroma".into()))
        }
        async fn delete(&self, _collection: &str, _selector: DeleteSelector) -> PortResult<()> {
            Err(PortError::Unavailable("down".into()))
        }
        async fn count(&self, _collection: &str) -> PortResult<usize> {
            Err(PortError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn errors_and_missing_pieces_yield_no_context() {
        let index: Arc<dyn VectorIndex> = Arc::new(BrokenIndex);
        assert!(retrieve_or_empty(Some(&index), Some("c"), "q", 3, None).await.is_empty());
        assert!(retrieve_or_empty(Some(&index), None, "q", 3, None).await.is_empty());
        assert!(retrieve_or_empty(None, Some("c"), "q", 3, None).await.is_empty());
    }
}
