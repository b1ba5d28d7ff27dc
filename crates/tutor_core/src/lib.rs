pub mod chunker;
pub mod conversation;
pub mod domain;
pub mod error;
pub mod feedback;
pub mod generation;
pub mod indexer;
pub mod llm;
pub mod memory_index;
pub mod ports;
pub mod relevance;
pub mod retrieval;

pub use chunker::TextChunker;
pub use conversation::{ChatEvent, ChatEventStream, ConversationEngine};
pub use domain::{
    ChatMessage, ChatSession, Document, Exercise, ExerciseStatus, GenerationMode, GenerationRequest, Role,
    Section, User,
};
pub use error::{CoreError, CoreResult};
pub use feedback::FeedbackComposer;
pub use generation::{ExerciseService, GenerationConfig, GenerationReport, StructuredGenerator};
pub use indexer::DocumentIndexer;
pub use llm::LanguageModelClient;
pub use memory_index::InMemoryVectorIndex;
pub use ports::{
    DatabaseService, Embedder, LanguageModel, PortError, PortResult, TextExtractor, VectorIndex,
};
pub use relevance::RelevanceGate;
