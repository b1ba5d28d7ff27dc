//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use std::sync::Arc;
use tutor_core::ports::DatabaseService;
use tutor_core::{ConversationEngine, DocumentIndexer, ExerciseService, FeedbackComposer, LanguageModelClient};

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub llm: LanguageModelClient,
    pub conversation: ConversationEngine,
    pub indexer: Arc<DocumentIndexer>,
    pub exercises: Arc<ExerciseService>,
    pub feedback: Arc<FeedbackComposer>,
}
