//! crates/tutor_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases,
//! vector stores or model servers.

use async_trait::async_trait;
use futures::Stream;
use serde_json::{Map, Value};
use std::pin::Pin;

use crate::domain::{
    ChatMessage, ChatSession, Document, DocumentProcessing, Exercise, ExerciseStatus,
    GeneratedQuestion, Section, SubmissionSummary, User,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// The transport variants are distinct so callers can pick the right degraded message.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Unauthorized")]
    Unauthorized,
    #[error("Timed out while connecting to {0}")]
    ConnectTimeout(String),
    #[error("Timed out while waiting for {0}")]
    ReadTimeout(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Backend returned HTTP {status}: {message}")]
    Backend { status: u16, message: String },
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Persistence
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Users and Sections ---
    async fn get_user(&self, user_id: i64) -> PortResult<User>;

    async fn get_section(&self, section_id: i64) -> PortResult<Section>;

    // --- Documents ---
    async fn get_document(&self, document_id: i64) -> PortResult<Document>;

    async fn list_section_documents(&self, section_id: i64) -> PortResult<Vec<Document>>;

    /// Records a processing transition and returns the updated document.
    async fn update_document_processing(
        &self,
        document_id: i64,
        update: DocumentProcessing,
    ) -> PortResult<Document>;

    async fn delete_document(&self, document_id: i64) -> PortResult<()>;

    // --- Chat ---
    async fn create_chat_session(&self, user_id: i64, section_id: i64) -> PortResult<ChatSession>;

    async fn get_chat_session(&self, session_id: i64) -> PortResult<ChatSession>;

    async fn list_user_sessions(&self, user_id: i64) -> PortResult<Vec<ChatSession>>;

    async fn delete_chat_session(&self, session_id: i64) -> PortResult<()>;

    async fn list_session_messages(&self, session_id: i64) -> PortResult<Vec<ChatMessage>>;

    async fn count_session_messages(&self, session_id: i64) -> PortResult<usize>;

    async fn save_user_message(&self, session_id: i64, content: &str) -> PortResult<ChatMessage>;

    /// Inserts the assistant message, bumps the session's last activity and
    /// optionally sets its title, all in one transaction.
    async fn complete_exchange(
        &self,
        session_id: i64,
        assistant_content: &str,
        title: Option<&str>,
    ) -> PortResult<ChatMessage>;

    // --- Exercises ---
    /// Creates an exercise in the `Generating` state.
    async fn create_exercise(
        &self,
        section_id: i64,
        generation_params: Value,
    ) -> PortResult<Exercise>;

    /// Stores the questions and moves the exercise to `Pending`.
    async fn finish_exercise(
        &self,
        exercise_id: i64,
        questions: &[GeneratedQuestion],
        source_documents: &[i64],
    ) -> PortResult<Exercise>;

    async fn set_exercise_status(&self, exercise_id: i64, status: ExerciseStatus) -> PortResult<()>;

    // --- Student activity ---
    async fn list_student_submissions(
        &self,
        section_id: i64,
        student_id: i64,
    ) -> PortResult<Vec<SubmissionSummary>>;

    /// Messages of every session the student opened in the section, oldest first.
    async fn list_student_chat_messages(
        &self,
        section_id: i64,
        student_id: i64,
    ) -> PortResult<Vec<ChatMessage>>;
}

//=========================================================================================
// Vector Index
//=========================================================================================

/// Metadata attached to an indexed chunk.
pub type Metadata = Map<String, Value>;

/// A restriction on chunk metadata, understood by every index implementation.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataFilter {
    Eq { key: String, value: Value },
    In { key: String, values: Vec<Value> },
}

impl MetadataFilter {
    /// Chunks of a single document. Document ids are stored as strings.
    pub fn document(document_id: i64) -> Self {
        Self::Eq {
            key: "document_id".to_string(),
            value: Value::String(document_id.to_string()),
        }
    }

    /// Chunks of any of the given documents.
    pub fn documents(document_ids: &[i64]) -> Self {
        Self::In {
            key: "document_id".to_string(),
            values: document_ids
                .iter()
                .map(|id| Value::String(id.to_string()))
                .collect(),
        }
    }

    /// Renders the filter in the `where` syntax of Chroma-style stores.
    pub fn to_where_clause(&self) -> Value {
        let mut clause = Map::new();
        match self {
            Self::Eq { key, value } => {
                clause.insert(key.clone(), value.clone());
            }
            Self::In { key, values } => {
                let mut inner = Map::new();
                inner.insert("$in".to_string(), Value::Array(values.clone()));
                clause.insert(key.clone(), Value::Object(inner));
            }
        }
        Value::Object(clause)
    }

    pub fn matches(&self, metadata: &Metadata) -> bool {
        match self {
            Self::Eq { key, value } => metadata.get(key) == Some(value),
            Self::In { key, values } => metadata.get(key).is_some_and(|v| values.contains(v)),
        }
    }
}

/// Which chunks a delete removes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteSelector {
    Ids(Vec<String>),
    Filter(MetadataFilter),
}

/// One ranked hit of a nearest-neighbour query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedChunk {
    pub text: String,
    pub metadata: Metadata,
    pub distance: f32,
}

impl RetrievedChunk {
    pub fn document_id(&self) -> Option<i64> {
        match self.metadata.get("document_id")? {
            Value::String(s) => s.parse().ok(),
            Value::Number(n) => n.as_i64(),
            _ => None,
        }
    }
}

/// An opaque nearest-neighbour service holding one collection per section.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn get_or_create_collection(&self, name: &str) -> PortResult<()>;

    async fn upsert(
        &self,
        collection: &str,
        ids: &[String],
        texts: &[String],
        metadatas: &[Metadata],
    ) -> PortResult<()>;

    /// Returns the subset of `ids` already present in the collection.
    async fn existing_ids(&self, collection: &str, ids: &[String]) -> PortResult<Vec<String>>;

    /// Hits ranked ascending by distance.
    async fn query(
        &self,
        collection: &str,
        text: &str,
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> PortResult<Vec<RetrievedChunk>>;

    async fn delete(&self, collection: &str, selector: DeleteSelector) -> PortResult<()>;

    async fn count(&self, collection: &str) -> PortResult<usize>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each text, preserving order.
    async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>>;
}

//=========================================================================================
// Language Model Backend
//=========================================================================================

/// Sampling options forwarded to the generation backend.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SamplingOptions {
    pub temperature: Option<f32>,
    pub num_predict: Option<u32>,
    pub top_p: Option<f32>,
    pub top_k: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    /// Sent as a separate system field; most callers fold it into `prompt` instead.
    pub system: Option<String>,
    pub options: SamplingOptions,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            options: SamplingOptions::default(),
        }
    }
}

/// A finite, single-use stream of generated text fragments.
pub type TokenStream = Pin<Box<dyn Stream<Item = PortResult<String>> + Send>>;

#[async_trait]
pub trait LanguageModel: Send + Sync {
    fn model_name(&self) -> &str;

    /// Succeeds when the backend is reachable and lists the configured model.
    async fn health_check(&self) -> PortResult<()>;

    async fn generate(&self, request: &CompletionRequest) -> PortResult<String>;

    async fn generate_stream(&self, request: &CompletionRequest) -> PortResult<TokenStream>;
}

//=========================================================================================
// Text Extraction
//=========================================================================================

#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extracts the plain text of a stored document file.
    async fn extract(&self, document: &Document) -> PortResult<String>;
}
