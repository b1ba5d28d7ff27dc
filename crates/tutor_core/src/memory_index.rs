//! crates/tutor_core/src/memory_index.rs
//!
//! An embedded `VectorIndex` kept in process memory. It is the last step of the
//! connection cascade when no vector server is reachable, and a convenient
//! index for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::ports::{
    DeleteSelector, Embedder, Metadata, MetadataFilter, PortError, PortResult, RetrievedChunk,
    VectorIndex,
};

#[derive(Debug, Clone)]
struct StoredChunk {
    text: String,
    metadata: Metadata,
    embedding: Vec<f32>,
}

/// Insertion order is kept so ties in distance rank stably.
#[derive(Debug, Default)]
struct Collection {
    order: Vec<String>,
    chunks: HashMap<String, StoredChunk>,
}

impl Collection {
    fn put(&mut self, id: String, chunk: StoredChunk) {
        if self.chunks.insert(id.clone(), chunk).is_none() {
            self.order.push(id);
        }
    }

    fn retain(&mut self, keep: impl Fn(&str, &StoredChunk) -> bool) {
        let chunks = &mut self.chunks;
        self.order.retain(|id| {
            let kept = chunks.get(id).is_some_and(|chunk| keep(id, chunk));
            if !kept {
                chunks.remove(id);
            }
            kept
        });
    }
}

pub struct InMemoryVectorIndex {
    embedder: Arc<dyn Embedder>,
    collections: RwLock<HashMap<String, Collection>>,
}

impl InMemoryVectorIndex {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            collections: RwLock::new(HashMap::new()),
        }
    }
}

/// `1 - cos(a, b)`; zero vectors are maximally distant.
pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - dot / (norm_a * norm_b)
}

fn missing(collection: &str) -> PortError {
    PortError::NotFound(format!("collection '{}'", collection))
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn get_or_create_collection(&self, name: &str) -> PortResult<()> {
        self.collections
            .write()
            .await
            .entry(name.to_string())
            .or_default();
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        texts: &[String],
        metadatas: &[Metadata],
    ) -> PortResult<()> {
        if ids.len() != texts.len() || ids.len() != metadatas.len() {
            return Err(PortError::Unexpected(format!(
                "upsert length mismatch: {} ids, {} texts, {} metadatas",
                ids.len(),
                texts.len(),
                metadatas.len()
            )));
        }

        // Embed before taking the lock.
        let embeddings = self.embedder.embed(texts).await?;
        if embeddings.len() != texts.len() {
            return Err(PortError::Unexpected(
                "embedder returned a different number of vectors".to_string(),
            ));
        }

        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        for (((id, text), metadata), embedding) in ids.iter().zip(texts).zip(metadatas).zip(embeddings) {
            target.put(
                id.clone(),
                StoredChunk {
                    text: text.clone(),
                    metadata: metadata.clone(),
                    embedding,
                },
            );
        }
        Ok(())
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> PortResult<Vec<String>> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(ids
            .iter()
            .filter(|id| target.chunks.contains_key(*id))
            .cloned()
            .collect())
    }

    async fn query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> PortResult<Vec<RetrievedChunk>> {
        let query = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Unexpected("embedder returned no vector".to_string()))?;

        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;

        let mut hits: Vec<RetrievedChunk> = target
            .order
            .iter()
            .filter_map(|id| target.chunks.get(id))
            .filter(|chunk| filter.map_or(true, |f| f.matches(&chunk.metadata)))
            .map(|chunk| RetrievedChunk {
                text: chunk.text.clone(),
                metadata: chunk.metadata.clone(),
                distance: cosine_distance(&query, &chunk.embedding),
            })
            .collect();

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> PortResult<()> {
        let mut collections = self.collections.write().await;
        let target = collections
            .get_mut(collection)
            .ok_or_else(|| missing(collection))?;
        match selector {
            DeleteSelector::Ids(ids) => target.retain(|id, _| !ids.iter().any(|d| d == id)),
            DeleteSelector::Filter(filter) => target.retain(|_, chunk| !filter.matches(&chunk.metadata)),
        }
        Ok(())
    }

    async fn count(&self, collection: &str) -> PortResult<usize> {
        let collections = self.collections.read().await;
        let target = collections.get(collection).ok_or_else(|| missing(collection))?;
        Ok(target.order.len())
    }
}
