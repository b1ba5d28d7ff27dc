//! services/api/src/adapters/chroma.rs
//!
//! A `VectorIndex` backed by a Chroma server over its HTTP API. Chroma stores
//! vectors, so texts are embedded here before upserts and queries.
//!
//! `connect` picks the first backend that answers: the tenant-scoped v2 API,
//! the legacy v1 API, then the embedded in-memory index.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use tutor_core::ports::{
    DeleteSelector, Embedder, Metadata, MetadataFilter, PortError, PortResult, RetrievedChunk,
    VectorIndex,
};
use tutor_core::InMemoryVectorIndex;

use super::ollama::{check_status, transport_error};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChromaApi {
    V2 { tenant: String, database: String },
    V1,
}

#[derive(Debug, Clone)]
pub struct ChromaSettings {
    pub host: String,
    pub port: u16,
    pub tenant: String,
    pub database: String,
    /// Fall back to an in-process index when no server answers.
    pub embedded_fallback: bool,
}

//=========================================================================================
// Wire Types
//=========================================================================================

#[derive(Debug, Deserialize)]
struct CollectionRecord {
    id: String,
}

#[derive(Debug, Serialize)]
struct UpsertBody<'a> {
    ids: &'a [String],
    embeddings: Vec<Vec<f32>>,
    documents: &'a [String],
    metadatas: &'a [Metadata],
}

#[derive(Debug, Deserialize)]
struct GetResult {
    #[serde(default)]
    ids: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryResult {
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Metadata>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f32>>>>,
}

fn first_query<T>(columns: Option<Vec<Vec<Option<T>>>>) -> Vec<Option<T>> {
    columns.and_then(|c| c.into_iter().next()).unwrap_or_default()
}

impl QueryResult {
    /// Flattens the first (and only) query's columns into ranked hits.
    fn into_chunks(self) -> Vec<RetrievedChunk> {
        let documents = first_query(self.documents);
        let metadatas = first_query(self.metadatas);
        let distances = first_query(self.distances);

        documents
            .into_iter()
            .enumerate()
            .filter_map(|(i, text)| {
                Some(RetrievedChunk {
                    text: text?,
                    metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
                    distance: distances.get(i).copied().flatten().unwrap_or(1.0),
                })
            })
            .collect()
    }
}

//=========================================================================================
// The Adapter
//=========================================================================================

pub struct ChromaAdapter {
    client: Client,
    server: String,
    api: ChromaApi,
    embedder: Arc<dyn Embedder>,
    /// Collection name to server-side id.
    collection_ids: RwLock<HashMap<String, String>>,
}

impl ChromaAdapter {
    pub fn new(server: impl Into<String>, api: ChromaApi, embedder: Arc<dyn Embedder>) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            server: server.into().trim_end_matches('/').to_string(),
            api,
            embedder,
            collection_ids: RwLock::new(HashMap::new()),
        })
    }

    pub fn api(&self) -> &ChromaApi {
        &self.api
    }

    fn collections_url(&self) -> String {
        match &self.api {
            ChromaApi::V2 { tenant, database } => format!(
                "{}/api/v2/tenants/{}/databases/{}/collections",
                self.server, tenant, database
            ),
            ChromaApi::V1 => format!("{}/api/v1/collections", self.server),
        }
    }

    fn heartbeat_url(&self) -> String {
        match &self.api {
            ChromaApi::V2 { .. } => format!("{}/api/v2/heartbeat", self.server),
            ChromaApi::V1 => format!("{}/api/v1/heartbeat", self.server),
        }
    }

    /// Succeeds when the server answers on this API version and, for v2, the
    /// tenant and database exist.
    pub async fn heartbeat(&self) -> PortResult<()> {
        let response = self
            .client
            .get(self.heartbeat_url())
            .send()
            .await
            .map_err(|e| transport_error(e, "chroma"))?;
        check_status(response, "chroma heartbeat").await?;

        if let ChromaApi::V2 { tenant, database } = &self.api {
            let url = format!("{}/api/v2/tenants/{}/databases/{}", self.server, tenant, database);
            let response = self
                .client
                .get(url)
                .send()
                .await
                .map_err(|e| transport_error(e, "chroma"))?;
            check_status(response, "chroma database").await?;
        }
        Ok(())
    }

    async fn read_json<T: DeserializeOwned>(response: Response, what: &str) -> PortResult<T> {
        check_status(response, what)
            .await?
            .json()
            .await
            .map_err(|e| transport_error(e, "chroma"))
    }

    async fn post(&self, url: String, body: &Value) -> PortResult<Response> {
        self.client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| transport_error(e, "chroma"))
    }

    async fn collection_id(&self, name: &str) -> PortResult<String> {
        if let Some(id) = self.collection_ids.read().await.get(name) {
            return Ok(id.clone());
        }
        let response = self
            .client
            .get(format!("{}/{}", self.collections_url(), name))
            .send()
            .await
            .map_err(|e| transport_error(e, "chroma"))?;
        let record: CollectionRecord = Self::read_json(response, &format!("collection {}", name)).await?;
        self.collection_ids
            .write()
            .await
            .insert(name.to_string(), record.id.clone());
        Ok(record.id)
    }

    async fn collection_url(&self, name: &str, operation: &str) -> PortResult<String> {
        let id = self.collection_id(name).await?;
        Ok(format!("{}/{}/{}", self.collections_url(), id, operation))
    }
}

#[async_trait]
impl VectorIndex for ChromaAdapter {
    async fn get_or_create_collection(&self, name: &str) -> PortResult<()> {
        let body = json!({
            "name": name,
            "metadata": { "hnsw:space": "cosine" },
            "get_or_create": true,
        });
        let response = self.post(self.collections_url(), &body).await?;
        let record: CollectionRecord = Self::read_json(response, &format!("collection {}", name)).await?;
        debug!("Collection {} has id {}", name, record.id);
        self.collection_ids.write().await.insert(name.to_string(), record.id);
        Ok(())
    }

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        texts: &[String],
        metadatas: &[Metadata],
    ) -> PortResult<()> {
        let embeddings = self.embedder.embed(texts).await?;
        let body = UpsertBody {
            ids,
            embeddings,
            documents: texts,
            metadatas,
        };
        let body = serde_json::to_value(&body).map_err(|e| PortError::Unexpected(e.to_string()))?;
        let url = self.collection_url(collection, "upsert").await?;
        let response = self.post(url, &body).await?;
        check_status(response, &format!("upsert into {}", collection)).await?;
        Ok(())
    }

    async fn existing_ids(&self, collection: &str, ids: &[String]) -> PortResult<Vec<String>> {
        let url = self.collection_url(collection, "get").await?;
        let response = self.post(url, &json!({ "ids": ids, "include": [] })).await?;
        let result: GetResult = Self::read_json(response, &format!("get from {}", collection)).await?;
        Ok(result.ids)
    }

    async fn query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> PortResult<Vec<RetrievedChunk>> {
        let embedding = self
            .embedder
            .embed(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Unexpected("embedder returned no vector".to_string()))?;

        let mut body = json!({
            "query_embeddings": [embedding],
            "n_results": k,
            "include": ["documents", "metadatas", "distances"],
        });
        if let Some(filter) = filter {
            body["where"] = filter.to_where_clause();
        }

        let url = self.collection_url(collection, "query").await?;
        let response = self.post(url, &body).await?;
        let result: QueryResult = Self::read_json(response, &format!("query on {}", collection)).await?;
        Ok(result.into_chunks())
    }

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> PortResult<()> {
        let body = match selector {
            DeleteSelector::Ids(ids) => json!({ "ids": ids }),
            DeleteSelector::Filter(filter) => json!({ "where": filter.to_where_clause() }),
        };
        let url = self.collection_url(collection, "delete").await?;
        let response = self.post(url, &body).await?;
        check_status(response, &format!("delete from {}", collection)).await?;
        Ok(())
    }

    async fn count(&self, collection: &str) -> PortResult<usize> {
        let url = self.collection_url(collection, "count").await?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport_error(e, "chroma"))?;
        Self::read_json(response, &format!("count of {}", collection)).await
    }
}

//=========================================================================================
// Connection Cascade
//=========================================================================================

/// Returns the first vector index that works, or `None` when the feature is
/// unavailable. Callers must treat `None` as "no retrieval", never as fatal.
pub async fn connect(settings: &ChromaSettings, embedder: Arc<dyn Embedder>) -> Option<Arc<dyn VectorIndex>> {
    let server = format!("http://{}:{}", settings.host, settings.port);
    let candidates = [
        ChromaApi::V2 {
            tenant: settings.tenant.clone(),
            database: settings.database.clone(),
        },
        ChromaApi::V1,
    ];

    for api in candidates {
        let adapter = match ChromaAdapter::new(server.clone(), api.clone(), embedder.clone()) {
            Ok(adapter) => adapter,
            Err(e) => {
                warn!("Could not build Chroma client: {}", e);
                continue;
            }
        };
        match adapter.heartbeat().await {
            Ok(()) => {
                info!("Connected to Chroma at {} using {:?}", server, api);
                return Some(Arc::new(adapter));
            }
            Err(e) => warn!("Chroma at {} not usable with {:?}: {}", server, api, e),
        }
    }

    if settings.embedded_fallback {
        warn!("No Chroma server reachable, using the embedded in-memory index");
        return Some(Arc::new(InMemoryVectorIndex::new(embedder)));
    }
    warn!("No vector index available, retrieval is disabled");
    None
}
