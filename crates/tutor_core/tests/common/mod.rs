//! In-memory fakes of every port, shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use futures::stream;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tutor_core::domain::{
    ChatMessage, ChatSession, Document, DocumentProcessing, DocumentStatus, DocumentType, Exercise,
    ExerciseStatus, GeneratedQuestion, Role, Section, SubmissionSummary, User,
};
use tutor_core::ports::{
    CompletionRequest, DatabaseService, Embedder, LanguageModel, PortError, PortResult, TextExtractor,
    TokenStream,
};

pub const TEACHER_ID: i64 = 1;
pub const STUDENT_ID: i64 = 2;
pub const ADMIN_ID: i64 = 3;
pub const SECTION_ID: i64 = 10;
pub const COLLECTION: &str = "section_10";

/// Routes core logs to the test harness. Safe to call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("tutor_core=debug")
        .with_test_writer()
        .try_init();
}

pub fn user(id: i64, role: Role) -> User {
    User {
        id,
        full_name: format!("User {}", id),
        email: format!("user{}@uqar.ca", id),
        role,
    }
}

pub fn teacher() -> User {
    user(TEACHER_ID, Role::Teacher)
}

pub fn student() -> User {
    user(STUDENT_ID, Role::Student)
}

pub fn admin() -> User {
    user(ADMIN_ID, Role::Admin)
}

pub fn section() -> Section {
    Section {
        id: SECTION_ID,
        name: "Programmation Python".to_string(),
        description: Some("Boucles, fonctions et listes".to_string()),
        teacher_id: TEACHER_ID,
        collection_name: Some(COLLECTION.to_string()),
    }
}

pub fn document(id: i64, extracted_text: Option<&str>) -> Document {
    Document {
        id,
        section_id: SECTION_ID,
        original_filename: format!("cours{}.txt", id),
        file_path: PathBuf::from(format!("/tmp/cours{}.txt", id)),
        document_type: DocumentType::Txt,
        status: DocumentStatus::Uploaded,
        extracted_text: extracted_text.map(str::to_string),
        is_vectorized: false,
        vector_count: 0,
        processing_error: None,
    }
}

//=========================================================================================
// Persistence
//=========================================================================================

#[derive(Default)]
pub struct State {
    pub users: HashMap<i64, User>,
    pub sections: HashMap<i64, Section>,
    pub documents: HashMap<i64, Document>,
    pub sessions: HashMap<i64, ChatSession>,
    pub messages: Vec<ChatMessage>,
    pub exercises: HashMap<i64, Exercise>,
    pub submissions: Vec<(i64, i64, SubmissionSummary)>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        100 + self.next_id
    }
}

#[derive(Default)]
pub struct FakeDb {
    pub state: Mutex<State>,
    pub fail_finish: AtomicBool,
}

impl FakeDb {
    /// The three users and the section, nothing else.
    pub fn seeded() -> Arc<Self> {
        let db = Self::default();
        {
            let mut state = db.state.lock().unwrap();
            for u in [teacher(), student(), admin()] {
                state.users.insert(u.id, u);
            }
            state.sections.insert(SECTION_ID, section());
        }
        Arc::new(db)
    }

    pub fn add_document(&self, document: Document) {
        self.state.lock().unwrap().documents.insert(document.id, document);
    }

    pub fn document(&self, id: i64) -> Option<Document> {
        self.state.lock().unwrap().documents.get(&id).cloned()
    }

    pub fn session(&self, id: i64) -> Option<ChatSession> {
        self.state.lock().unwrap().sessions.get(&id).cloned()
    }

    pub fn messages_of(&self, session_id: i64) -> Vec<ChatMessage> {
        self.state
            .lock()
            .unwrap()
            .messages
            .iter()
            .filter(|m| m.session_id == session_id)
            .cloned()
            .collect()
    }

    pub fn exercises(&self) -> Vec<Exercise> {
        self.state.lock().unwrap().exercises.values().cloned().collect()
    }

    fn push_message(&self, session_id: i64, content: &str, is_assistant: bool) -> PortResult<ChatMessage> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let now = Utc::now();
        let session = state
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| PortError::NotFound(format!("session {}", session_id)))?;
        session.message_count += 1;
        if is_assistant {
            session.last_message_at = Some(now);
        }
        let message = ChatMessage {
            id,
            session_id,
            content: content.to_string(),
            is_assistant,
            created_at: now,
        };
        state.messages.push(message.clone());
        Ok(message)
    }
}

fn not_found(what: &str, id: i64) -> PortError {
    PortError::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl DatabaseService for FakeDb {
    async fn get_user(&self, user_id: i64) -> PortResult<User> {
        self.state.lock().unwrap().users.get(&user_id).cloned().ok_or_else(|| not_found("user", user_id))
    }

    async fn get_section(&self, section_id: i64) -> PortResult<Section> {
        self.state
            .lock()
            .unwrap()
            .sections
            .get(&section_id)
            .cloned()
            .ok_or_else(|| not_found("section", section_id))
    }

    async fn get_document(&self, document_id: i64) -> PortResult<Document> {
        self.document(document_id).ok_or_else(|| not_found("document", document_id))
    }

    async fn list_section_documents(&self, section_id: i64) -> PortResult<Vec<Document>> {
        let mut documents: Vec<Document> = self
            .state
            .lock()
            .unwrap()
            .documents
            .values()
            .filter(|d| d.section_id == section_id)
            .cloned()
            .collect();
        documents.sort_by_key(|d| d.id);
        Ok(documents)
    }

    async fn update_document_processing(
        &self,
        document_id: i64,
        update: DocumentProcessing,
    ) -> PortResult<Document> {
        let mut state = self.state.lock().unwrap();
        let document = state
            .documents
            .get_mut(&document_id)
            .ok_or_else(|| not_found("document", document_id))?;
        match update {
            DocumentProcessing::Started => document.status = DocumentStatus::Processing,
            DocumentProcessing::Completed {
                extracted_text,
                vector_count,
                is_vectorized,
            } => {
                document.status = DocumentStatus::Processed;
                document.extracted_text = Some(extracted_text);
                document.vector_count = vector_count;
                document.is_vectorized = is_vectorized;
                document.processing_error = None;
            }
            DocumentProcessing::Failed { message } => {
                document.status = DocumentStatus::Error;
                document.processing_error = Some(message);
            }
        }
        Ok(document.clone())
    }

    async fn delete_document(&self, document_id: i64) -> PortResult<()> {
        self.state
            .lock()
            .unwrap()
            .documents
            .remove(&document_id)
            .map(|_| ())
            .ok_or_else(|| not_found("document", document_id))
    }

    async fn create_chat_session(&self, user_id: i64, section_id: i64) -> PortResult<ChatSession> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let session = ChatSession {
            id,
            user_id,
            section_id,
            title: None,
            created_at: Utc::now(),
            last_message_at: None,
            message_count: 0,
        };
        state.sessions.insert(id, session.clone());
        Ok(session)
    }

    async fn get_chat_session(&self, session_id: i64) -> PortResult<ChatSession> {
        self.session(session_id).ok_or_else(|| not_found("session", session_id))
    }

    async fn list_user_sessions(&self, user_id: i64) -> PortResult<Vec<ChatSession>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .sessions
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_chat_session(&self, session_id: i64) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        state.sessions.remove(&session_id).ok_or_else(|| not_found("session", session_id))?;
        state.messages.retain(|m| m.session_id != session_id);
        Ok(())
    }

    async fn list_session_messages(&self, session_id: i64) -> PortResult<Vec<ChatMessage>> {
        Ok(self.messages_of(session_id))
    }

    async fn count_session_messages(&self, session_id: i64) -> PortResult<usize> {
        Ok(self.messages_of(session_id).len())
    }

    async fn save_user_message(&self, session_id: i64, content: &str) -> PortResult<ChatMessage> {
        self.push_message(session_id, content, false)
    }

    async fn complete_exchange(
        &self,
        session_id: i64,
        assistant_content: &str,
        title: Option<&str>,
    ) -> PortResult<ChatMessage> {
        let message = self.push_message(session_id, assistant_content, true)?;
        if let Some(title) = title {
            if let Some(session) = self.state.lock().unwrap().sessions.get_mut(&session_id) {
                session.title = Some(title.to_string());
            }
        }
        Ok(message)
    }

    async fn create_exercise(&self, section_id: i64, generation_params: Value) -> PortResult<Exercise> {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id();
        let exercise = Exercise {
            id,
            section_id,
            status: ExerciseStatus::Generating,
            generation_params,
            source_documents: Vec::new(),
            questions: Vec::new(),
            created_at: Utc::now(),
        };
        state.exercises.insert(id, exercise.clone());
        Ok(exercise)
    }

    async fn finish_exercise(
        &self,
        exercise_id: i64,
        questions: &[GeneratedQuestion],
        source_documents: &[i64],
    ) -> PortResult<Exercise> {
        if self.fail_finish.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("database went away".to_string()));
        }
        let mut state = self.state.lock().unwrap();
        let exercise = state
            .exercises
            .get_mut(&exercise_id)
            .ok_or_else(|| not_found("exercise", exercise_id))?;
        exercise.questions = questions.to_vec();
        exercise.source_documents = source_documents.to_vec();
        exercise.status = ExerciseStatus::Pending;
        Ok(exercise.clone())
    }

    async fn set_exercise_status(&self, exercise_id: i64, status: ExerciseStatus) -> PortResult<()> {
        let mut state = self.state.lock().unwrap();
        let exercise = state
            .exercises
            .get_mut(&exercise_id)
            .ok_or_else(|| not_found("exercise", exercise_id))?;
        exercise.status = status;
        Ok(())
    }

    async fn list_student_submissions(
        &self,
        section_id: i64,
        student_id: i64,
    ) -> PortResult<Vec<SubmissionSummary>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .submissions
            .iter()
            .filter(|(section, student, _)| *section == section_id && *student == student_id)
            .map(|(_, _, summary)| summary.clone())
            .collect())
    }

    async fn list_student_chat_messages(
        &self,
        section_id: i64,
        student_id: i64,
    ) -> PortResult<Vec<ChatMessage>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .messages
            .iter()
            .filter(|m| {
                state
                    .sessions
                    .get(&m.session_id)
                    .is_some_and(|s| s.section_id == section_id && s.user_id == student_id)
            })
            .cloned()
            .collect())
    }
}

//=========================================================================================
// Language model
//=========================================================================================

/// Replies are consumed in order; each `generate` call takes the next one.
#[derive(Default)]
pub struct ScriptedModel {
    pub unhealthy: AtomicBool,
    /// When set, `generate` records the request and never resolves.
    pub stalled: AtomicBool,
    replies: Mutex<VecDeque<PortResult<String>>>,
    streams: Mutex<VecDeque<Vec<PortResult<String>>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedModel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, text: &str) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(&self, err: PortError) -> &Self {
        self.replies.lock().unwrap().push_back(Err(err));
        self
    }

    pub fn stream(&self, fragments: Vec<PortResult<String>>) -> &Self {
        self.streams.lock().unwrap().push_back(fragments);
        self
    }

    pub fn generate_calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn health_check(&self) -> PortResult<()> {
        if self.unhealthy.load(Ordering::SeqCst) {
            return Err(PortError::Unavailable("scripted model is down".to_string()));
        }
        Ok(())
    }

    async fn generate(&self, request: &CompletionRequest) -> PortResult<String> {
        self.requests.lock().unwrap().push(request.clone());
        if self.stalled.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortError::Unexpected("no scripted reply left".to_string())))
    }

    async fn generate_stream(&self, _request: &CompletionRequest) -> PortResult<TokenStream> {
        let fragments = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| PortError::Unavailable("no scripted stream left".to_string()))?;
        Ok(Box::pin(stream::iter(fragments)))
    }
}

//=========================================================================================
// Embeddings and extraction
//=========================================================================================

/// Letter-frequency vectors: texts sharing vocabulary end up close.
pub struct LetterEmbedder;

#[async_trait]
impl Embedder for LetterEmbedder {
    async fn embed(&self, texts: &[String]) -> PortResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0; 26];
                for c in text.to_lowercase().chars().filter(char::is_ascii_lowercase) {
                    vector[(c as u8 - b'a') as usize] += 1.0;
                }
                vector
            })
            .collect())
    }
}

/// Returns the text registered for a document id, or fails.
#[derive(Default)]
pub struct FakeExtractor {
    texts: Mutex<HashMap<i64, String>>,
}

impl FakeExtractor {
    pub fn with(document_id: i64, text: &str) -> Arc<Self> {
        let extractor = Self::default();
        extractor.texts.lock().unwrap().insert(document_id, text.to_string());
        Arc::new(extractor)
    }
}

#[async_trait]
impl TextExtractor for FakeExtractor {
    async fn extract(&self, document: &Document) -> PortResult<String> {
        self.texts
            .lock()
            .unwrap()
            .get(&document.id)
            .cloned()
            .ok_or_else(|| PortError::Unexpected(format!("cannot read {}", document.original_filename)))
    }
}
